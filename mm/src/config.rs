//! Allocator configuration and its kernel command-line form.
//!
//! Recognised tokens: `kmem.cpus=<n>`, `kmem.junk=<bool>` and
//! `kmem.steal=<owner-first|ascending>`. Anything else is ignored, as are
//! values that do not parse.

use core::fmt;

use crate::mm_constants::DEFAULT_CPU_COUNT;

const DEFAULT_JUNK_FILL: bool = true;
const DEFAULT_STEAL_ORDER: StealOrder = StealOrder::Ascending;

/// Lock acquisition order when a processor steals from another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StealOrder {
    /// Hold the own lock, then nest the donor's lock.
    ///
    /// Two processors stealing from each other at the same time deadlock.
    OwnerFirst,
    /// Release the own lock, then take both locks lowest index first.
    Ascending,
}

impl StealOrder {
    pub fn from_str(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("owner-first") || value.eq_ignore_ascii_case("owner") {
            Some(StealOrder::OwnerFirst)
        } else if value.eq_ignore_ascii_case("ascending") || value.eq_ignore_ascii_case("ordered")
        {
            Some(StealOrder::Ascending)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StealOrder::OwnerFirst => "owner-first",
            StealOrder::Ascending => "ascending",
        }
    }
}

impl fmt::Display for StealOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub cpu_count: usize,
    pub steal_order: StealOrder,
    /// Fill pages with junk on free and allocation.
    pub junk_fill: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            cpu_count: DEFAULT_CPU_COUNT,
            steal_order: DEFAULT_STEAL_ORDER,
            junk_fill: DEFAULT_JUNK_FILL,
        }
    }
}

impl AllocatorConfig {
    pub const fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    pub const fn with_steal_order(mut self, steal_order: StealOrder) -> Self {
        self.steal_order = steal_order;
        self
    }

    pub const fn with_junk_fill(mut self, junk_fill: bool) -> Self {
        self.junk_fill = junk_fill;
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("on")
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("enabled")
        || value == "1"
    {
        Some(true)
    } else if value.eq_ignore_ascii_case("off")
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("disabled")
        || value == "0"
    {
        Some(false)
    } else {
        None
    }
}

pub fn config_from_cmdline(cmdline: Option<&str>) -> AllocatorConfig {
    let mut cfg = AllocatorConfig::default();
    if let Some(cmdline) = cmdline {
        for token in cmdline.split_whitespace() {
            if let Some(value) = token.strip_prefix("kmem.cpus=") {
                if let Ok(parsed) = value.parse::<usize>() {
                    cfg.cpu_count = parsed;
                }
            } else if let Some(value) = token.strip_prefix("kmem.junk=") {
                if let Some(junk) = parse_bool(value) {
                    cfg.junk_fill = junk;
                }
            } else if let Some(value) = token.strip_prefix("kmem.steal=") {
                if let Some(order) = StealOrder::from_str(value) {
                    cfg.steal_order = order;
                }
            }
        }
    }
    cfg
}
