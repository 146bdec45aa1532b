//! Fatal error reporting.
//!
//! Invariant violations inside the kernel are not recoverable: the message
//! is logged at error level and execution stops through the panic handler,
//! which halts the machine.

use core::fmt;

use crate::klog_error;

#[cold]
#[inline(never)]
pub fn kernel_fatal(args: fmt::Arguments<'_>) -> ! {
    klog_error!("FATAL: {}", args);
    panic!("{}", args);
}

/// Report an unrecoverable invariant violation and halt.
#[macro_export]
macro_rules! kernel_fatal {
    ($($arg:tt)*) => {
        $crate::fatal::kernel_fatal(::core::format_args!($($arg)*))
    };
}
