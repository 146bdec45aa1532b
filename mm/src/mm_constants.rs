//! Page geometry and allocator tuning constants.

pub use kmem_abi::PAGE_SIZE as PAGE_SIZE_4KB;
pub use kmem_lib::MAX_CPUS;

pub const PAGE_SIZE_4KB_USIZE: usize = PAGE_SIZE_4KB as usize;

/// Upper bound on pages moved by one steal.
pub const STEAL_BATCH_PAGES: u32 = 1024;

/// Written over every page as it is freed.
pub const FREE_JUNK_BYTE: u8 = 0x01;

/// Written over every page as it is handed out, unless zeroing was requested.
pub const ALLOC_JUNK_BYTE: u8 = 0x05;

pub const DEFAULT_CPU_COUNT: usize = 8;
