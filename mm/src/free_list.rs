//! Index-linked free lists over a shared link table.
//!
//! Every managed page owns one [`FrameLink`] holding the index of the next
//! free page on whatever list currently contains it. A [`FreeList`] is just
//! a head index and a length; the chain itself lives in the link table.
//!
//! A link may only be read or written by the holder of the lock guarding
//! the list that contains the page. The lock supplies the ordering, so the
//! atomics are accessed relaxed.

use core::sync::atomic::{AtomicU32, Ordering};

/// Terminates a chain.
pub const NO_FRAME: u32 = u32::MAX;

#[repr(transparent)]
pub struct FrameLink(AtomicU32);

impl FrameLink {
    pub const fn new() -> Self {
        Self(AtomicU32::new(NO_FRAME))
    }

    #[inline]
    fn next(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    fn set_next(&self, next: u32) {
        self.0.store(next, Ordering::Relaxed);
    }
}

impl Default for FrameLink {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeList {
    head: u32,
    len: u32,
}

impl FreeList {
    pub const EMPTY: Self = Self {
        head: NO_FRAME,
        len: 0,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == NO_FRAME
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn head(&self) -> Option<u32> {
        (self.head != NO_FRAME).then_some(self.head)
    }

    /// Push `frame` as the new head.
    pub fn push(&mut self, links: &[FrameLink], frame: u32) {
        links[frame as usize].set_next(self.head);
        self.head = frame;
        self.len += 1;
    }

    /// Unlink and return the head.
    pub fn pop(&mut self, links: &[FrameLink]) -> Option<u32> {
        let frame = self.head()?;
        let link = &links[frame as usize];
        self.head = link.next();
        self.len -= 1;
        link.set_next(NO_FRAME);
        Some(frame)
    }

    /// Detach the first `min(len, max)` frames as a list of their own.
    ///
    /// The node at the cut becomes the detached list's terminated tail and
    /// `self` keeps whatever followed it.
    pub fn split_front(&mut self, links: &[FrameLink], max: u32) -> FreeList {
        debug_assert!(max > 0);
        let Some(head) = self.head() else {
            return FreeList::EMPTY;
        };

        let mut cut = head;
        let mut taken = 1;
        while taken < max {
            let next = links[cut as usize].next();
            if next == NO_FRAME {
                break;
            }
            cut = next;
            taken += 1;
        }

        let rest = links[cut as usize].next();
        links[cut as usize].set_next(NO_FRAME);
        self.head = rest;
        self.len -= taken;

        FreeList { head, len: taken }
    }

    /// Walk the chain from the head.
    pub fn iter<'a>(&self, links: &'a [FrameLink]) -> FreeListIter<'a> {
        FreeListIter {
            links,
            cursor: self.head,
        }
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::EMPTY
    }
}

pub struct FreeListIter<'a> {
    links: &'a [FrameLink],
    cursor: u32,
}

impl Iterator for FreeListIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == NO_FRAME {
            return None;
        }
        let frame = self.cursor;
        // Out-of-table links end the walk; `verify_free_list` reports them.
        self.cursor = match self.links.get(frame as usize) {
            Some(link) => link.next(),
            None => NO_FRAME,
        };
        Some(frame)
    }
}
