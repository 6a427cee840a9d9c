//! Transfer protocol: hand a value across an allocator boundary without a
//! third buffer.
//!
//! A producer that built a value inside its own allocator can seal that
//! allocator into an [`Envelope`]: its first three machine words are
//! overwritten with `{TRANSFER_MAGIC, payload_size, payload_alignment}` and
//! the payload bytes follow. The producer is gone at that point; the
//! envelope is a one-shot value whose only operations are absorption and
//! release.
//!
//! The consuming side allocates from its own allocator, copies the payload
//! out, clears the magic, and releases the envelope's mapping exactly once
//! (the envelope's destructor). An allocator `destroy` that finds the magic
//! in its header returns success without releasing, so a defensive destroy
//! on the producer after `transfer` stays harmless.

use std::ptr::NonNull;

use crate::constants::TRANSFER_MAGIC;
use crate::error;
use crate::store;
use crate::{invariant, invariant_positive, invariant_range};

const WORD: usize = size_of::<usize>();

/// A dying allocator repurposed as a self-describing payload carrier.
///
/// Created by `ScratchAllocator::transfer` / `StackAllocator::transfer`;
/// consumed by the `absorb` method of the receiving allocator. Dropping an
/// unabsorbed envelope releases its mapping.
pub struct Envelope {
    head: NonNull<usize>,
}

impl Envelope {
    /// Overwrite the mapping behind `user` with the envelope words and the
    /// payload.
    ///
    /// Panics when `src` is empty or longer than the dying allocator's
    /// `capacity`, or when `alignment` is not a power of two.
    ///
    /// # Safety
    ///
    /// `user` must be the user pointer of a live reservation whose former
    /// handle has been dismantled; the envelope takes sole ownership of the
    /// mapping. The first `3 * size_of::<usize>() + src.len()` bytes of the
    /// mapping must be committed.
    pub(crate) unsafe fn seal(
        user: NonNull<u8>,
        capacity: usize,
        src: &[u8],
        alignment: usize,
    ) -> Envelope {
        invariant_positive!(src.len());
        invariant_range!(src.len(), 1, capacity);
        invariant!(
            alignment.is_power_of_two(),
            error::INV_BAD_ALIGNMENT,
            "alignment was {alignment}"
        );

        let words = user.cast::<usize>().as_ptr();
        // SAFETY: per contract the head of the mapping is committed and
        // unaliased; the payload source cannot overlap the three header
        // words because they held the allocator header until now.
        unsafe {
            words.write(TRANSFER_MAGIC);
            words.add(1).write(src.len());
            words.add(2).write(alignment);
            std::ptr::copy(src.as_ptr(), user.as_ptr().add(3 * WORD), src.len());
        }

        Envelope { head: user.cast() }
    }

    /// Payload size recorded in the envelope, if the magic is intact.
    #[must_use]
    pub fn payload_size(&self) -> Option<usize> {
        // SAFETY: the envelope owns its mapping; the head words are committed.
        unsafe {
            if self.head.as_ptr().read() != TRANSFER_MAGIC {
                return None;
            }
            Some(self.head.as_ptr().add(1).read())
        }
    }

    /// Copy the payload into storage obtained from `alloc`, then release the
    /// mapping.
    ///
    /// Returns `None` when the magic is absent or `alloc` declines the
    /// request; the mapping is released regardless.
    pub(crate) fn absorb_with(
        self,
        alloc: impl FnOnce(usize, usize) -> Option<NonNull<u8>>,
    ) -> Option<NonNull<u8>> {
        let words = self.head.as_ptr();
        // SAFETY: the envelope owns its mapping; the head words are committed.
        if unsafe { words.read() } != TRANSFER_MAGIC {
            return None;
        }
        // SAFETY: magic verified; size and alignment words follow it.
        let (size, alignment) = unsafe { (words.add(1).read(), words.add(2).read()) };

        let dest = alloc(size, alignment)?;

        // SAFETY: the payload sits after the three header words and is
        // `size` bytes long; dest was just allocated with `size` bytes from
        // a different mapping, so the ranges cannot overlap.
        unsafe {
            words.write(0);
            std::ptr::copy_nonoverlapping(
                self.head.as_ptr().cast::<u8>().add(3 * WORD),
                dest.as_ptr(),
                size,
            );
        }

        Some(dest)
    }

    /// Dismantle the envelope into the raw user pointer of its mapping.
    ///
    /// The caller takes over the release obligation; pair with
    /// [`from_raw`](Self::from_raw).
    #[must_use]
    pub fn into_raw(self) -> *mut u8 {
        let head = self.head.as_ptr().cast();
        std::mem::forget(self);
        head
    }

    /// Rebuild an envelope from [`into_raw`](Self::into_raw) output.
    ///
    /// Returns `None` for a null pointer. The pointer need not carry the
    /// magic; absorption of a non-envelope mapping fails cleanly and still
    /// releases it.
    ///
    /// # Safety
    ///
    /// `raw` must be the user pointer of a live reservation with no other
    /// owner.
    #[must_use]
    pub unsafe fn from_raw(raw: *mut u8) -> Option<Envelope> {
        NonNull::new(raw).map(|head| Envelope { head: head.cast() })
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        // Sole owner of the mapping once the producer is sealed.
        // SAFETY: the envelope holds the mapping's user pointer.
        let _ = unsafe { store::release(self.head.cast()) };
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
