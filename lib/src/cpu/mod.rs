//! Processor identity and interrupt-flag control.
//!
//! The allocator never touches hardware directly: everything it needs from
//! the running processor goes through [`CpuOps`]. The kernel installs the
//! architecture implementation; host tests install a thread-backed one.

/// Upper bound on the number of processors any per-CPU table is sized for.
pub const MAX_CPUS: usize = 64;

/// Bit 9 of RFLAGS: interrupts enabled.
pub const RFLAGS_IF: u64 = 1 << 9;

/// Operations on the processor executing the caller.
///
/// `current_cpu` is only meaningful while interrupt delivery is suppressed:
/// a context switch in the middle of the read could move the caller to
/// another processor. Use [`crate::current_cpu_id`] instead of calling it
/// directly.
pub trait CpuOps: Sync {
    /// Index of the executing processor, `0..cpu_count`.
    fn current_cpu(&self) -> usize;

    /// Save the interrupt state and disable interrupt delivery.
    fn save_flags_cli(&self) -> u64;

    /// Restore a state returned by [`CpuOps::save_flags_cli`].
    ///
    /// Interrupts are re-enabled only if they were enabled when saved.
    fn restore_flags(&self, flags: u64);
}
