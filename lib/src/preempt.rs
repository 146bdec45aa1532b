//! Scoped interrupt suppression.
//!
//! RAII guard around the irqsave/irqrestore pattern. The saved state is
//! restored when the guard drops, so early returns and unwinding cannot
//! leave interrupts disabled.

use core::marker::PhantomData;

use crate::cpu::CpuOps;

/// Interrupts stay disabled for the lifetime of this guard.
/// !Send/!Sync: must be dropped on the processor that created it.
#[must_use = "if unused, interrupts will be immediately restored"]
pub struct IrqSaveGuard<'a> {
    ops: &'a dyn CpuOps,
    saved_flags: u64,
    _marker: PhantomData<*mut ()>,
}

impl<'a> IrqSaveGuard<'a> {
    #[inline]
    pub fn new(ops: &'a dyn CpuOps) -> Self {
        let saved_flags = ops.save_flags_cli();
        Self {
            ops,
            saved_flags,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn saved_flags(&self) -> u64 {
        self.saved_flags
    }
}

impl Drop for IrqSaveGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.ops.restore_flags(self.saved_flags);
    }
}

/// Migration-safe read of the executing processor's index.
///
/// Interrupts are suppressed only for the read itself; the caller may be
/// migrated right after, which is harmless for list ownership because a
/// page pushed to "the wrong" list is still on exactly one list.
#[inline]
pub fn current_cpu_id(ops: &dyn CpuOps) -> usize {
    let _irq = IrqSaveGuard::new(ops);
    ops.current_cpu()
}
