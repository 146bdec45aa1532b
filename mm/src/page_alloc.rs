//! Physical Page Allocator with Per-CPU Free Lists
//!
//! Every processor owns a free list of 4KB pages guarded by its own
//! spinlock. Frees go to the list of the processor doing the free;
//! allocations pop from the local list and, only when it is empty, steal a
//! prefix of up to [`STEAL_BATCH_PAGES`] pages from the first other
//! processor with free pages.
//!
//! # Architecture
//!
//! ```text
//!   alloc_page()                               free_page(pa)
//!        │                                          │
//!        ▼                                          ▼
//!   ┌──────────┐  empty   ┌──────────────────┐  ┌──────────────┐
//!   │ local    │────────► │ steal prefix of  │  │ validate pa  │──► fatal
//!   │ pop      │          │ first non-empty  │  └──────┬───────┘
//!   └────┬─────┘          │ donor (≤ 1024)   │         │ junk fill
//!        │                └────────┬─────────┘         ▼
//!        │ ◄───────────────────────┘             push on current
//!        ▼                                        cpu's list
//!   junk fill / zero
//! ```
//!
//! # Bootstrap
//!
//! [`PageAllocator::init`] feeds every managed page through the normal free
//! path, so all of them land on the list of the processor running it. The
//! other processors start empty and fill up by stealing.
//!
//! # Lock order
//!
//! See [`StealOrder`]. With `OwnerFirst` a thief holds its own lock while
//! taking the donor's, which deadlocks when two empty processors steal from
//! each other. `Ascending` never holds two list locks out of index order.

use core::mem;
use core::ptr;
use core::slice;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use kmem_abi::{PhysAddr, VirtAddr};
use kmem_lib::{
    CpuOps, NamedSpinLock, NamedSpinLockGuard, align_up_u64, current_cpu_id, kernel_fatal,
    klog_debug, klog_info,
};
use spin::Once;

use crate::config::{AllocatorConfig, StealOrder};
use crate::error::{MmError, MmResult};
use crate::free_list::{FrameLink, FreeList};
use crate::memory_layout::MemoryLayout;
use crate::mm_constants::{
    ALLOC_JUNK_BYTE, FREE_JUNK_BYTE, MAX_CPUS, PAGE_SIZE_4KB, PAGE_SIZE_4KB_USIZE,
    STEAL_BATCH_PAGES,
};

bitflags! {
    /// Allocation request flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// Zero the page instead of filling it with allocation junk.
        const ZERO = 1 << 0;
    }
}

#[repr(C, align(64))]
struct CpuSlot {
    free_list: NamedSpinLock<FreeList>,
    alloc_count: AtomicU64,
    free_count: AtomicU64,
    steal_count: AtomicU64,
    pages_stolen: AtomicU64,
}

impl CpuSlot {
    const fn new() -> Self {
        Self {
            free_list: NamedSpinLock::new(FreeList::EMPTY),
            alloc_count: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            steal_count: AtomicU64::new(0),
            pages_stolen: AtomicU64::new(0),
        }
    }
}

struct Pool {
    layout: MemoryLayout,
    links: &'static [FrameLink],
    page_count: u32,
    cpu: &'static dyn CpuOps,
    config: AllocatorConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageAllocatorStats {
    pub total: u64,
    pub free: u64,
    pub allocated: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuFreeListStats {
    pub free: u32,
    pub allocs: u64,
    pub frees: u64,
    pub steals: u64,
    pub pages_stolen: u64,
}

pub(crate) type ListGuard<'a> = NamedSpinLockGuard<'a, FreeList>;

pub struct PageAllocator {
    slots: [CpuSlot; MAX_CPUS],
    pool: Once<Pool>,
}

impl PageAllocator {
    pub const fn new() -> Self {
        const EMPTY_SLOT: CpuSlot = CpuSlot::new();
        Self {
            slots: [EMPTY_SLOT; MAX_CPUS],
            pool: Once::new(),
        }
    }

    /// Take ownership of every whole page in `layout` and seed them onto the
    /// calling processor's list.
    ///
    /// `links` needs one entry per managed page. Must complete before any
    /// other processor allocates or frees.
    pub fn init(
        &self,
        layout: MemoryLayout,
        links: &'static [FrameLink],
        cpu: &'static dyn CpuOps,
        config: AllocatorConfig,
    ) -> MmResult {
        let pages = check_geometry(&layout, &config)?;
        if (links.len() as u64) < pages {
            return Err(MmError::LinkTableTooSmall {
                needed: pages,
                provided: links.len(),
            });
        }
        self.install(layout, cpu, config, || links)
    }

    /// Like [`PageAllocator::init`], but carve the link table out of the
    /// start of the managed range itself, for boots where no heap exists
    /// yet. The carved pages are never handed out.
    ///
    /// Nothing is written unless every check passes and this call wins the
    /// initialization.
    ///
    /// # Safety
    ///
    /// The whole managed range of `layout` must be unused RAM, writable
    /// through its direct mapping, and must stay reserved for this
    /// allocator for the rest of the kernel's lifetime.
    pub unsafe fn init_carved(
        &self,
        layout: MemoryLayout,
        cpu: &'static dyn CpuOps,
        config: AllocatorConfig,
    ) -> MmResult {
        if self.is_initialized() {
            return Err(MmError::AlreadyInitialized);
        }
        let total = check_geometry(&layout, &config)?;
        let table_bytes = total * mem::size_of::<FrameLink>() as u64;
        let table_pages = align_up_u64(table_bytes, PAGE_SIZE_4KB) / PAGE_SIZE_4KB;
        if total <= table_pages {
            return Err(MmError::EmptyRange);
        }

        let managed = layout.skip_pages(table_pages);
        self.install(managed, cpu, config, || {
            klog_debug!(
                "page_alloc: link table carved from {} pages at {:#x}",
                table_pages,
                layout.managed_start()
            );
            // SAFETY: the caller hands over the whole range, and only the
            // winner of the initialization gets here.
            unsafe { carve_links(&layout, managed.page_count() as usize) }
        })
    }

    /// Publish the pool, then name the locks and seed every page.
    ///
    /// `links` runs only if this call is the one that initializes.
    fn install(
        &self,
        layout: MemoryLayout,
        cpu: &'static dyn CpuOps,
        config: AllocatorConfig,
        links: impl FnOnce() -> &'static [FrameLink],
    ) -> MmResult {
        let pages = layout.page_count() as u32;
        let mut fresh = false;
        self.pool.call_once(|| {
            fresh = true;
            Pool {
                layout,
                links: links(),
                page_count: pages,
                cpu,
                config,
            }
        });
        if !fresh {
            return Err(MmError::AlreadyInitialized);
        }

        for (index, slot) in self.slots[..config.cpu_count].iter().enumerate() {
            slot.free_list.set_name(format_args!("kmem_cpu{}", index));
            klog_debug!("page_alloc: lock {} ready", slot.free_list.name());
        }

        for index in 0..pages {
            self.free_page(layout.page_addr(index));
        }

        klog_info!(
            "page_alloc: {} pages in [{:#x}, {:#x}) seeded on cpu {} ({} cpus, steal order {})",
            pages,
            layout.managed_start(),
            layout.managed_end(),
            current_cpu_id(cpu),
            config.cpu_count,
            config.steal_order
        );

        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.pool.is_completed()
    }

    fn pool(&self) -> &Pool {
        match self.pool.get() {
            Some(pool) => pool,
            None => kernel_fatal!("page_alloc: used before init"),
        }
    }

    /// Index of the calling processor, read with interrupts suppressed.
    fn this_cpu(&self, pool: &Pool) -> usize {
        let cpu = current_cpu_id(pool.cpu);
        if cpu >= pool.config.cpu_count {
            kernel_fatal!(
                "page_alloc: cpu {} outside configured {} cpus",
                cpu,
                pool.config.cpu_count
            );
        }
        cpu
    }

    #[inline]
    pub(crate) fn lock_list(&self, cpu: usize) -> ListGuard<'_> {
        self.slots[cpu].free_list.lock()
    }

    /// Lock the lists of `own` and `other` lowest index first.
    fn lock_pair(&self, own: usize, other: usize) -> (ListGuard<'_>, ListGuard<'_>) {
        debug_assert_ne!(own, other);
        if own < other {
            let own_guard = self.lock_list(own);
            let other_guard = self.lock_list(other);
            (own_guard, other_guard)
        } else {
            let other_guard = self.lock_list(other);
            let own_guard = self.lock_list(own);
            (own_guard, other_guard)
        }
    }

    /// Return a page to the calling processor's free list.
    ///
    /// Freeing an address that is misaligned, below the managed range or at
    /// or above its end is a caller bug and halts the kernel.
    pub fn free_page(&self, phys: PhysAddr) {
        let pool = self.pool();
        let frame = match pool.layout.check_page(phys) {
            Ok(frame) => frame,
            Err(err) => kernel_fatal!("free_page: {}", err),
        };

        if pool.config.junk_fill {
            // SAFETY: the page is managed and, per the caller's contract, no
            // longer in use by anyone.
            unsafe { fill_page(&pool.layout, phys, FREE_JUNK_BYTE) };
        }

        let cpu = self.this_cpu(pool);
        self.lock_list(cpu).push(pool.links, frame);
        self.slots[cpu].free_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Allocate one page, or `None` when every free list is empty.
    #[inline]
    pub fn alloc_page(&self) -> Option<PhysAddr> {
        self.alloc_page_with(AllocFlags::empty())
    }

    pub fn alloc_page_with(&self, flags: AllocFlags) -> Option<PhysAddr> {
        let pool = self.pool();
        let cpu = self.this_cpu(pool);

        let frame = match pool.config.steal_order {
            StealOrder::OwnerFirst => self.take_owner_first(pool, cpu),
            StealOrder::Ascending => self.take_ascending(pool, cpu),
        };
        let Some(frame) = frame else {
            klog_debug!("page_alloc: cpu {} found no free page", cpu);
            return None;
        };

        self.slots[cpu].alloc_count.fetch_add(1, Ordering::Relaxed);
        let phys = pool.layout.page_addr(frame);

        // SAFETY: the frame was just unlinked, so the caller is its only owner.
        if flags.contains(AllocFlags::ZERO) {
            unsafe { fill_page(&pool.layout, phys, 0) };
        } else if pool.config.junk_fill {
            unsafe { fill_page(&pool.layout, phys, ALLOC_JUNK_BYTE) };
        }

        Some(phys)
    }

    /// Own lock held across the whole call, donor lock nested inside it.
    fn take_owner_first(&self, pool: &Pool, cpu: usize) -> Option<u32> {
        let mut local = self.lock_list(cpu);
        if let Some(frame) = local.pop(pool.links) {
            return Some(frame);
        }

        for victim in 0..pool.config.cpu_count {
            if victim == cpu {
                continue;
            }
            let mut donor = self.lock_list(victim);
            if donor.is_empty() {
                continue;
            }
            *local = donor.split_front(pool.links, STEAL_BATCH_PAGES);
            drop(donor);
            self.note_steal(cpu, victim, local.len());
            break;
        }

        local.pop(pool.links)
    }

    /// Never holds two list locks out of index order.
    fn take_ascending(&self, pool: &Pool, cpu: usize) -> Option<u32> {
        let local_hit = self.lock_list(cpu).pop(pool.links);
        if local_hit.is_some() {
            return local_hit;
        }

        for victim in 0..pool.config.cpu_count {
            if victim == cpu {
                continue;
            }
            let (mut local, mut donor) = self.lock_pair(cpu, victim);
            // A free may have refilled the local list while it was unlocked.
            if let Some(frame) = local.pop(pool.links) {
                return Some(frame);
            }
            if donor.is_empty() {
                continue;
            }
            *local = donor.split_front(pool.links, STEAL_BATCH_PAGES);
            drop(donor);
            self.note_steal(cpu, victim, local.len());
            return local.pop(pool.links);
        }

        None
    }

    fn note_steal(&self, thief: usize, victim: usize, pages: u32) {
        let slot = &self.slots[thief];
        slot.steal_count.fetch_add(1, Ordering::Relaxed);
        slot.pages_stolen.fetch_add(pages as u64, Ordering::Relaxed);
        klog_debug!(
            "page_alloc: cpu {} stole {} pages from cpu {}",
            thief,
            pages,
            victim
        );
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn cpu_count(&self) -> usize {
        self.pool.get().map(|p| p.config.cpu_count).unwrap_or(0)
    }

    pub fn layout(&self) -> Option<MemoryLayout> {
        self.pool.get().map(|p| p.layout)
    }

    pub fn lock_name(&self, cpu: usize) -> &str {
        self.slots
            .get(cpu)
            .map(|slot| slot.free_list.name())
            .unwrap_or("<none>")
    }

    /// Pages on `cpu`'s free list right now.
    pub fn free_pages(&self, cpu: usize) -> u32 {
        if cpu >= self.cpu_count() {
            return 0;
        }
        self.lock_list(cpu).len()
    }

    /// Sum over all lists. Exact only while no allocation or free is running.
    pub fn total_free_pages(&self) -> u64 {
        (0..self.cpu_count())
            .map(|cpu| self.free_pages(cpu) as u64)
            .sum()
    }

    pub fn stats(&self) -> PageAllocatorStats {
        let Some(pool) = self.pool.get() else {
            return PageAllocatorStats::default();
        };
        let total = pool.page_count as u64;
        let free = self.total_free_pages();
        PageAllocatorStats {
            total,
            free,
            allocated: total.saturating_sub(free),
        }
    }

    pub fn cpu_stats(&self, cpu: usize) -> CpuFreeListStats {
        if cpu >= self.cpu_count() {
            return CpuFreeListStats::default();
        }
        let slot = &self.slots[cpu];
        CpuFreeListStats {
            free: self.free_pages(cpu),
            allocs: slot.alloc_count.load(Ordering::Relaxed),
            frees: slot.free_count.load(Ordering::Relaxed),
            steals: slot.steal_count.load(Ordering::Relaxed),
            pages_stolen: slot.pages_stolen.load(Ordering::Relaxed),
        }
    }

    /// Call `f` for every page on `cpu`'s list, head first, under its lock.
    ///
    /// `f` must not allocate or free.
    pub fn for_each_free_page(&self, cpu: usize, mut f: impl FnMut(PhysAddr)) {
        let Some(pool) = self.pool.get() else {
            return;
        };
        if cpu >= pool.config.cpu_count {
            return;
        }
        let list = self.lock_list(cpu);
        for frame in list.iter(pool.links).take(list.len() as usize) {
            f(pool.layout.page_addr(frame));
        }
    }

    /// Walk `cpu`'s list and check that every node is a managed page and
    /// that the chain ends after exactly `len` nodes. Returns the length.
    pub fn verify_free_list(&self, cpu: usize) -> MmResult<u32> {
        let pool = self.pool();
        if cpu >= pool.config.cpu_count {
            return Err(MmError::InvalidCpu { cpu });
        }
        let list = self.lock_list(cpu);
        let mut walked = 0u32;
        for frame in list.iter(pool.links) {
            if frame >= pool.page_count || walked >= list.len() {
                return Err(MmError::CorruptFreeList { cpu });
            }
            walked += 1;
        }
        if walked != list.len() {
            return Err(MmError::CorruptFreeList { cpu });
        }
        Ok(walked)
    }
}

impl Default for PageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the configuration and the size of the managed range. Returns
/// the page count.
fn check_geometry(layout: &MemoryLayout, config: &AllocatorConfig) -> MmResult<u64> {
    if config.cpu_count == 0 || config.cpu_count > MAX_CPUS {
        return Err(MmError::InvalidCpuCount {
            count: config.cpu_count,
        });
    }
    let pages = layout.page_count();
    if pages == 0 {
        return Err(MmError::EmptyRange);
    }
    if pages >= u32::MAX as u64 {
        return Err(MmError::RangeTooLarge { pages });
    }
    Ok(pages)
}

/// Initialize `entries` links at the start of the managed range.
///
/// # Safety
///
/// The first `entries * 4` bytes of the range must be unused RAM reserved
/// for the allocator from now on.
unsafe fn carve_links(layout: &MemoryLayout, entries: usize) -> &'static [FrameLink] {
    let base = layout
        .to_virt(layout.managed_start())
        .as_mut_ptr::<FrameLink>();
    for i in 0..entries {
        base.add(i).write(FrameLink::new());
    }
    slice::from_raw_parts(base, entries)
}

/// Fill one page through the direct map.
///
/// # Safety
///
/// `phys` must be a managed page that nobody else is using.
unsafe fn fill_page(layout: &MemoryLayout, phys: PhysAddr, value: u8) {
    let virt = layout.to_virt(phys);
    ptr::write_bytes(virt.as_mut_ptr::<u8>(), value, PAGE_SIZE_4KB_USIZE);
}

// =============================================================================
// Kernel-wide instance
// =============================================================================

static PAGE_ALLOCATOR: PageAllocator = PageAllocator::new();

#[inline]
pub fn page_allocator() -> &'static PageAllocator {
    &PAGE_ALLOCATOR
}

pub fn init_page_allocator(
    layout: MemoryLayout,
    links: &'static [FrameLink],
    cpu: &'static dyn CpuOps,
    config: AllocatorConfig,
) -> MmResult {
    PAGE_ALLOCATOR.init(layout, links, cpu, config)
}

#[inline]
pub fn alloc_page_frame(flags: AllocFlags) -> Option<PhysAddr> {
    PAGE_ALLOCATOR.alloc_page_with(flags)
}

#[inline]
pub fn free_page_frame(phys: PhysAddr) {
    PAGE_ALLOCATOR.free_page(phys)
}

// =============================================================================
// OwnedPage - RAII wrapper for automatic page deallocation
// =============================================================================

/// A page that goes back to its allocator when dropped.
///
/// ```ignore
/// let page = OwnedPage::alloc_zeroed(page_allocator()).ok_or(MmError::...)?;
/// unsafe { page.as_mut_ptr::<u64>().write(0x42) };
/// // freed here
/// ```
pub struct OwnedPage<'a> {
    allocator: &'a PageAllocator,
    phys: PhysAddr,
}

impl<'a> OwnedPage<'a> {
    /// Returns `None` when the pool is exhausted.
    #[inline]
    pub fn alloc(allocator: &'a PageAllocator, flags: AllocFlags) -> Option<Self> {
        allocator
            .alloc_page_with(flags)
            .map(|phys| Self { allocator, phys })
    }

    #[inline]
    pub fn alloc_zeroed(allocator: &'a PageAllocator) -> Option<Self> {
        Self::alloc(allocator, AllocFlags::ZERO)
    }

    #[inline]
    pub fn phys_addr(&self) -> PhysAddr {
        self.phys
    }

    /// Direct-map address of the page.
    #[inline]
    pub fn virt_addr(&self) -> VirtAddr {
        self.allocator.pool().layout.to_virt(self.phys)
    }

    /// The pointer is only valid while this `OwnedPage` is alive.
    #[inline]
    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.virt_addr().as_mut_ptr()
    }

    /// Give up ownership without freeing; the caller must free it later.
    #[inline]
    pub fn into_phys(self) -> PhysAddr {
        let phys = self.phys;
        mem::forget(self);
        phys
    }

    /// # Safety
    ///
    /// `phys` must have come from `allocator`, must not have been freed,
    /// and nothing else may free it.
    #[inline]
    pub unsafe fn from_phys(allocator: &'a PageAllocator, phys: PhysAddr) -> Self {
        Self { allocator, phys }
    }
}

impl Drop for OwnedPage<'_> {
    fn drop(&mut self) {
        self.allocator.free_page(self.phys);
    }
}

impl core::fmt::Debug for OwnedPage<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OwnedPage")
            .field("phys", &format_args!("{:#x}", self.phys.as_u64()))
            .finish()
    }
}
