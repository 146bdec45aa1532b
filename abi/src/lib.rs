//! Kernel memory ABI types
//!
//! Address newtypes and page geometry shared by the support layer and the
//! physical page allocator. Everything here is plain data.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod addr;

/// Standard 4KB page size.
pub const PAGE_SIZE: u64 = 0x1000;

pub use addr::*;
