//! The managed physical range and its direct mapping.
//!
//! The allocator owns every whole page from the first page boundary at or
//! after the end of the kernel image up to the physical upper bound. A
//! partial page just below the bound is never managed.

use kmem_abi::{PhysAddr, VirtAddr};

use crate::error::{MmError, MmResult};
use crate::mm_constants::PAGE_SIZE_4KB;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    kernel_end: PhysAddr,
    phys_top: PhysAddr,
    hhdm_offset: u64,
}

impl MemoryLayout {
    /// `kernel_end` is the first address past the kernel image (need not be
    /// page aligned), `phys_top` the exclusive upper bound of usable memory,
    /// and `hhdm_offset` the virtual offset at which physical memory is
    /// mapped.
    pub const fn new(kernel_end: PhysAddr, phys_top: PhysAddr, hhdm_offset: u64) -> Self {
        Self {
            kernel_end,
            phys_top,
            hhdm_offset,
        }
    }

    #[inline]
    pub const fn kernel_end(&self) -> PhysAddr {
        self.kernel_end
    }

    #[inline]
    pub const fn phys_top(&self) -> PhysAddr {
        self.phys_top
    }

    #[inline]
    pub const fn hhdm_offset(&self) -> u64 {
        self.hhdm_offset
    }

    /// First managed page.
    #[inline]
    pub const fn managed_start(&self) -> PhysAddr {
        self.kernel_end.align_up(PAGE_SIZE_4KB)
    }

    /// Number of whole pages in `[managed_start, phys_top)`.
    pub const fn page_count(&self) -> u64 {
        let start = self.managed_start().as_u64();
        let top = self.phys_top.as_u64();
        if top <= start {
            0
        } else {
            (top - start) / PAGE_SIZE_4KB
        }
    }

    /// End of the last whole managed page.
    #[inline]
    pub const fn managed_end(&self) -> PhysAddr {
        self.managed_start()
            .offset(self.page_count() * PAGE_SIZE_4KB)
    }

    /// Validate `phys` as a managed page and return its frame index.
    pub fn check_page(&self, phys: PhysAddr) -> MmResult<u32> {
        if !phys.is_page_aligned() {
            return Err(MmError::NotAligned {
                address: phys.as_u64(),
                required: PAGE_SIZE_4KB,
            });
        }
        let start = self.managed_start();
        if phys < start {
            return Err(MmError::BelowManagedRange {
                address: phys.as_u64(),
                start: start.as_u64(),
            });
        }
        let end = self.managed_end();
        if phys >= end {
            return Err(MmError::AboveManagedRange {
                address: phys.as_u64(),
                end: end.as_u64(),
            });
        }
        Ok(self.page_index(phys))
    }

    /// Frame index of a managed page. The address must already be checked.
    #[inline]
    pub fn page_index(&self, phys: PhysAddr) -> u32 {
        debug_assert!(phys >= self.managed_start() && phys < self.managed_end());
        ((phys.as_u64() - self.managed_start().as_u64()) / PAGE_SIZE_4KB) as u32
    }

    #[inline]
    pub fn page_addr(&self, index: u32) -> PhysAddr {
        self.managed_start().offset(index as u64 * PAGE_SIZE_4KB)
    }

    #[inline]
    pub fn contains(&self, phys: PhysAddr) -> bool {
        self.check_page(phys).is_ok()
    }

    #[inline]
    pub fn to_virt(&self, phys: PhysAddr) -> VirtAddr {
        VirtAddr::new(phys.as_u64() + self.hhdm_offset)
    }

    /// The same layout with the first `pages` managed pages taken out.
    pub fn skip_pages(&self, pages: u64) -> Self {
        Self {
            kernel_end: self.managed_start().offset(pages * PAGE_SIZE_4KB),
            ..*self
        }
    }
}
