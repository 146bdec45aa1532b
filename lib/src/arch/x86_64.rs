//! x86_64 processor operations.
//!
//! Interrupt control goes through RFLAGS.IF using the `x86_64` crate. The
//! processor index comes from whatever per-CPU mechanism the kernel sets up
//! (GS base, LAPIC ID table, ...), registered at boot with
//! [`register_cpu_index_fn`]. Until then every caller is reported as the
//! bootstrap processor, index 0.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use ::x86_64::instructions::interrupts;
use ::x86_64::registers::rflags;

use crate::cpu::{CpuOps, RFLAGS_IF};

/// Query returning the executing processor's index.
pub type CpuIndexFn = fn() -> usize;

static CPU_INDEX_FN: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

pub fn register_cpu_index_fn(query: CpuIndexFn) {
    CPU_INDEX_FN.store(query as *mut (), Ordering::Release);
}

/// [`CpuOps`] for the processor the code is running on.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86Cpu;

impl CpuOps for X86Cpu {
    #[inline]
    fn current_cpu(&self) -> usize {
        let fn_ptr = CPU_INDEX_FN.load(Ordering::Acquire);
        if fn_ptr.is_null() {
            return 0;
        }
        // SAFETY: only `register_cpu_index_fn` stores into CPU_INDEX_FN, and
        // it stores a valid `CpuIndexFn`.
        let query: CpuIndexFn = unsafe { core::mem::transmute(fn_ptr) };
        query()
    }

    #[inline]
    fn save_flags_cli(&self) -> u64 {
        let flags = rflags::read_raw();
        interrupts::disable();
        flags
    }

    #[inline]
    fn restore_flags(&self, flags: u64) {
        if flags & RFLAGS_IF != 0 {
            interrupts::enable();
        }
    }
}
