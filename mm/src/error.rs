//! Error types for the physical page allocator.
//!
//! Free-path validation errors never reach callers: `free_page` turns them
//! into a fatal halt. They exist as values so the report is precise and so
//! the checks can be exercised on their own.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    NotAligned { address: u64, required: u64 },
    BelowManagedRange { address: u64, start: u64 },
    AboveManagedRange { address: u64, end: u64 },
    InvalidCpuCount { count: usize },
    InvalidCpu { cpu: usize },
    EmptyRange,
    RangeTooLarge { pages: u64 },
    LinkTableTooSmall { needed: u64, provided: usize },
    AlreadyInitialized,
    CorruptFreeList { cpu: usize },
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAligned { address, required } => {
                write!(f, "address {:#x} not aligned to {:#x}", address, required)
            }
            Self::BelowManagedRange { address, start } => {
                write!(
                    f,
                    "address {:#x} below managed range start {:#x}",
                    address, start
                )
            }
            Self::AboveManagedRange { address, end } => {
                write!(f, "address {:#x} at or above managed end {:#x}", address, end)
            }
            Self::InvalidCpuCount { count } => write!(f, "invalid cpu count {}", count),
            Self::InvalidCpu { cpu } => write!(f, "cpu {} outside configured cpus", cpu),
            Self::EmptyRange => write!(f, "managed range holds no whole page"),
            Self::RangeTooLarge { pages } => {
                write!(f, "managed range of {} pages exceeds frame index space", pages)
            }
            Self::LinkTableTooSmall { needed, provided } => {
                write!(
                    f,
                    "link table holds {} entries, {} pages need linking",
                    provided, needed
                )
            }
            Self::AlreadyInitialized => write!(f, "page allocator already initialized"),
            Self::CorruptFreeList { cpu } => write!(f, "free list of cpu {} is corrupt", cpu),
        }
    }
}

/// Convenience result type for allocator operations.
pub type MmResult<T = ()> = Result<T, MmError>;
