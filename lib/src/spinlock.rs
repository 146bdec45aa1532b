//! Busy-waiting locks with diagnostic names.
//!
//! [`NamedSpinLock`] is a `spin::Mutex` that also carries a short name so
//! that per-CPU instances of the same lock can be told apart in logs and
//! fatal reports. Acquisition spins; it never yields and never touches the
//! interrupt flag. Holders must not block or re-acquire the same lock.

use core::fmt;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard, Once};

const LOCK_NAME_CAPACITY: usize = 24;

/// Fixed-capacity ASCII name, formatted without an allocator.
///
/// Writes past the capacity are truncated rather than failing.
#[derive(Clone, Copy)]
pub struct LockName {
    bytes: [u8; LOCK_NAME_CAPACITY],
    len: usize,
}

impl LockName {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; LOCK_NAME_CAPACITY],
            len: 0,
        }
    }

    pub fn from_args(args: fmt::Arguments<'_>) -> Self {
        let mut name = Self::empty();
        let _ = fmt::write(&mut name, args);
        name
    }

    pub fn as_str(&self) -> &str {
        // Only whole UTF-8 sequences are ever copied in by `write_str`.
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("?")
    }
}

impl fmt::Write for LockName {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            let mut utf8 = [0u8; 4];
            let encoded = ch.encode_utf8(&mut utf8).as_bytes();
            if self.len + encoded.len() > LOCK_NAME_CAPACITY {
                break;
            }
            self.bytes[self.len..self.len + encoded.len()].copy_from_slice(encoded);
            self.len += encoded.len();
        }
        Ok(())
    }
}

impl fmt::Debug for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct NamedSpinLock<T> {
    name: Once<LockName>,
    inner: Mutex<T>,
}

pub struct NamedSpinLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> NamedSpinLock<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            name: Once::new(),
            inner: Mutex::new(data),
        }
    }

    /// Name the lock. Only the first call has an effect.
    pub fn set_name(&self, args: fmt::Arguments<'_>) {
        self.name.call_once(|| LockName::from_args(args));
    }

    pub fn name(&self) -> &str {
        self.name.get().map(LockName::as_str).unwrap_or("<unnamed>")
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    #[inline]
    pub fn lock(&self) -> NamedSpinLockGuard<'_, T> {
        NamedSpinLockGuard {
            guard: self.inner.lock(),
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<NamedSpinLockGuard<'_, T>> {
        self.inner.try_lock().map(|guard| NamedSpinLockGuard { guard })
    }
}

impl<T> Deref for NamedSpinLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for NamedSpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> fmt::Debug for NamedSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSpinLock")
            .field("name", &self.name())
            .field("locked", &self.is_locked())
            .finish()
    }
}
