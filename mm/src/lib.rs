#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod free_list;
pub mod memory_layout;
pub mod mm_constants;
pub mod page_alloc;

#[cfg(test)]
mod tests_oom;
#[cfg(test)]
mod tests_steal;

pub use config::{AllocatorConfig, StealOrder, config_from_cmdline};
pub use error::{MmError, MmResult};
pub use free_list::FrameLink;
pub use memory_layout::MemoryLayout;
pub use page_alloc::{
    AllocFlags, CpuFreeListStats, OwnedPage, PageAllocator, PageAllocatorStats,
    alloc_page_frame, free_page_frame, init_page_allocator, page_allocator,
};
