//! Scratch allocator: linear bump allocation with bulk reset.
//!
//! The allocator's header lives at the start of its own mapping's user
//! region; the usable span begins just past the header. `alloc` pads to the
//! requested alignment and advances a cursor, `reset` zeroes the consumed
//! prefix and rewinds the cursor, and nothing is ever freed individually.
//!
//! Handles own exactly one backing reservation, are neither `Send` nor
//! `Sync`, and release the reservation on drop unless the allocator has
//! entered envelope state (see [`crate::transfer`]).

use std::ptr::NonNull;

use crate::constants::{MAX_ALIGNMENT, MIN_ALIGNMENT, TRANSFER_MAGIC};
use crate::error::{self, AllocError};
use crate::store::{self, Strategy};
use crate::transfer::Envelope;
use crate::util::align_up;
use crate::{invariant, invariant_positive, invariant_range};

/// Header at the start of the mapping's user region.
///
/// The first three words double as the transfer envelope slot, so the header
/// must stay at least three words wide.
#[repr(C)]
struct Header {
    /// First byte of the usable region.
    base: *mut u8,
    /// Usable region size in bytes.
    capacity: usize,
    /// Bump cursor: bytes consumed, padding included.
    allocated: usize,
    /// Provisioning strategy of the backing reservation.
    strategy: Strategy,
}

const _: () = assert!(size_of::<Header>() == 4 * size_of::<usize>());
const _: () = assert!(size_of::<Header>() > 3 * size_of::<usize>());
const _: () = assert!(align_of::<Header>() == align_of::<*mut u8>());

/// A linear bump allocator over a single eager reservation.
pub struct ScratchAllocator {
    header: NonNull<Header>,
}

impl ScratchAllocator {
    /// Create a scratch allocator with `capacity` usable bytes.
    ///
    /// Reserves `capacity + header + alignment - 1` bytes eagerly so the
    /// full span is writable from the start. Returns `None` when the
    /// reservation fails.
    ///
    /// Panics when `capacity` is zero or `alignment` is not a power of two
    /// in `[MIN_ALIGNMENT, MAX_ALIGNMENT]`.
    #[must_use]
    pub fn create(capacity: usize, alignment: usize) -> Option<Self> {
        invariant_positive!(capacity);
        invariant!(
            alignment.is_power_of_two(),
            error::INV_BAD_ALIGNMENT,
            "alignment was {alignment}"
        );
        invariant_range!(alignment, MIN_ALIGNMENT, MAX_ALIGNMENT);

        let total = capacity.checked_add(size_of::<Header>() + alignment - 1)?;
        let user = store::reserve_eager(total, alignment)?;
        let header = user.cast::<Header>();
        // SAFETY: the user region is at least header-sized and committed.
        let base = unsafe { user.as_ptr().add(size_of::<Header>()) };

        let available = total - (base as usize - user.as_ptr() as usize);
        if available < capacity {
            // SAFETY: user was just reserved and never published.
            let released = unsafe { store::release(user) };
            invariant!(
                released.is_ok(),
                error::INV_INVALID_STATE,
                "failed to release a partially initialized mapping"
            );
            return None;
        }

        // SAFETY: header points at the committed start of the user region.
        unsafe {
            header.as_ptr().write(Header {
                base,
                capacity,
                allocated: 0,
                strategy: Strategy::Eager,
            });
        }

        Some(Self { header })
    }

    /// Allocate `size` bytes at `alignment`.
    ///
    /// Padding between the current cursor and the aligned address is
    /// consumed from capacity but not initialized. Returns `None` when the
    /// padded request does not fit; soft out-of-memory, never fatal.
    ///
    /// Panics when `size` is zero or `alignment` is invalid.
    pub fn alloc(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        invariant_positive!(size);
        invariant!(
            alignment.is_power_of_two(),
            error::INV_BAD_ALIGNMENT,
            "alignment was {alignment}"
        );
        invariant_range!(alignment, MIN_ALIGNMENT, MAX_ALIGNMENT);

        // SAFETY: the handle owns a live mapping.
        let header = unsafe { self.header.as_mut() };

        let current = header.base as usize + header.allocated;
        let aligned = align_up(current, alignment);
        let offset = aligned - current;
        let total = size.checked_add(offset)?;

        if total > header.capacity - header.allocated {
            return None;
        }

        header.allocated += total;
        NonNull::new(aligned as *mut u8)
    }

    /// Rewind the cursor to zero, zeroing the consumed prefix.
    ///
    /// After a reset, every byte previously issued reads as zero; callers
    /// may rely on this.
    pub fn reset(&mut self) -> Result<(), AllocError> {
        // SAFETY: the handle owns a live mapping.
        let header = unsafe { self.header.as_mut() };
        // SAFETY: [base, base + allocated) is committed and owned by this
        // allocator.
        unsafe {
            std::ptr::write_bytes(header.base, 0, header.allocated);
        }
        header.allocated = 0;
        Ok(())
    }

    /// Allocate room for `src` at pointer alignment and copy it in.
    ///
    /// Non-destructive to the source. Returns `None` on soft out-of-memory.
    /// Panics when `src` is empty.
    pub fn copy_in(&mut self, src: &[u8]) -> Option<NonNull<u8>> {
        invariant_positive!(src.len());

        let dest = self.alloc(src.len(), align_of::<*const u8>())?;
        // SAFETY: dest was just allocated with src.len() bytes; the regions
        // cannot overlap because dest came from untouched scratch space.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dest.as_ptr(), src.len());
        }

        // SAFETY: dest holds src.len() initialized bytes as of the copy.
        let copied = unsafe { std::slice::from_raw_parts(dest.as_ptr(), src.len()) };
        invariant!(
            copied == src,
            error::INV_INVALID_STATE,
            "copy into scratch region diverged from source"
        );

        Some(dest)
    }

    /// Copy `src` into the allocator and drop it.
    ///
    /// The destructive counterpart of [`copy_in`](Self::copy_in): on success
    /// the source buffer is consumed; on soft out-of-memory it is handed
    /// back untouched.
    pub fn move_in(&mut self, src: Vec<u8>) -> Result<NonNull<u8>, Vec<u8>> {
        match self.copy_in(&src) {
            Some(dest) => Ok(dest),
            None => Err(src),
        }
    }

    /// Seal this allocator into a transfer envelope carrying `src`.
    ///
    /// The allocator's own first bytes become the envelope; no further
    /// allocator operations exist afterwards, and the mapping is released by
    /// whoever absorbs (or drops) the envelope.
    ///
    /// Panics when `src` is empty, longer than this allocator's capacity, or
    /// `alignment` is not a power of two.
    #[must_use]
    pub fn transfer(self, src: &[u8], alignment: usize) -> Envelope {
        let user = self.into_user_ptr();
        let capacity = {
            // SAFETY: user still points at the live header.
            let header = unsafe { user.cast::<Header>().as_ref() };
            header.capacity
        };
        // SAFETY: user is the mapping's user pointer and stays live; the
        // handle has been dismantled so no alias remains.
        unsafe { Envelope::seal(user, capacity, src, alignment) }
    }

    /// Absorb a transfer envelope, copying its payload into this allocator.
    ///
    /// Returns the payload's new address, or `None` when the envelope is not
    /// in envelope state or the payload does not fit; the envelope's mapping
    /// is released exactly once either way.
    pub fn absorb(&mut self, envelope: Envelope) -> Option<NonNull<u8>> {
        envelope.absorb_with(|size, alignment| self.alloc(size, alignment))
    }

    /// Destroy the allocator, releasing its reservation.
    ///
    /// A header carrying the transfer magic belongs to the absorbing side;
    /// destroying it is a success no-op.
    pub fn destroy(self) -> Result<(), AllocError> {
        let user = self.into_user_ptr();
        // SAFETY: user points at the mapping's first word.
        if unsafe { user.cast::<usize>().as_ptr().read() } == TRANSFER_MAGIC {
            return Ok(());
        }
        // SAFETY: user came from this handle's reservation; no alias remains.
        unsafe { store::release(user) }
    }

    /// Bytes consumed so far, padding included.
    #[must_use]
    pub fn allocated(&self) -> usize {
        // SAFETY: the handle owns a live mapping.
        unsafe { self.header.as_ref() }.allocated
    }

    /// Usable capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        // SAFETY: the handle owns a live mapping.
        unsafe { self.header.as_ref() }.capacity
    }

    /// Bytes still available, ignoring future alignment padding.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.allocated()
    }

    /// Dismantle the handle into the raw user pointer of its mapping.
    ///
    /// The caller takes over the release obligation; pair with
    /// [`from_raw`](Self::from_raw).
    #[must_use]
    pub fn into_raw(self) -> *mut u8 {
        self.into_user_ptr().as_ptr()
    }

    /// Rebuild a handle from [`into_raw`](Self::into_raw) output.
    ///
    /// Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `raw` must have come from `into_raw` on a handle whose mapping is
    /// still live, and no other handle may alias it.
    #[must_use]
    pub unsafe fn from_raw(raw: *mut u8) -> Option<Self> {
        NonNull::new(raw).map(|user| Self { header: user.cast() })
    }

    fn into_user_ptr(self) -> NonNull<u8> {
        let user = self.header.cast::<u8>();
        std::mem::forget(self);
        user
    }
}

impl Drop for ScratchAllocator {
    fn drop(&mut self) {
        let user = self.header.cast::<u8>();
        // SAFETY: the handle owns the mapping until this point.
        if unsafe { user.cast::<usize>().as_ptr().read() } == TRANSFER_MAGIC {
            return;
        }
        // Release failures cannot be reported from a destructor.
        // SAFETY: releasing the handle's own reservation.
        let _ = unsafe { store::release(user) };
    }
}

impl std::fmt::Debug for ScratchAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchAllocator")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated())
            .finish()
    }
}
