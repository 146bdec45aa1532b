#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod alignment;
pub mod arch;
pub mod cpu;
pub mod fatal;
pub mod klog;
pub mod preempt;
pub mod spinlock;

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u64, align_down_usize, align_up_u64, align_up_usize};
pub use cpu::{CpuOps, MAX_CPUS};
pub use fatal::kernel_fatal;
pub use klog::{
    KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level,
};
pub use preempt::{IrqSaveGuard, current_cpu_id};
pub use spinlock::{LockName, NamedSpinLock, NamedSpinLockGuard};

#[cfg(target_arch = "x86_64")]
pub use arch::x86_64::{X86Cpu, register_cpu_index_fn};
