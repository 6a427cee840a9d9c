//! Stack allocator: bump allocation with checkpoint markers.
//!
//! Extends the scratch discipline with a bounded stack of saved cursor
//! values: `record` pushes the current cursor, `unwind` pops it back,
//! invalidating everything issued in between. Checkpoints nest in strict
//! LIFO order; `reset` drops them all.
//!
//! The allocator couples with the backing store's lazy strategy: when
//! created lazy, every allocation first commits its padded size
//! (page-rounded) before the cursor moves, so pages materialize only as the
//! cursor reaches them.

use std::ptr::NonNull;

use crate::constants::{MAX_ALIGNMENT, MAX_STACK_DEPTH, MIN_ALIGNMENT, TRANSFER_MAGIC};
use crate::error::{self, AllocError};
use crate::store::{self, Strategy};
use crate::transfer::Envelope;
use crate::util::align_up;
use crate::{invariant, invariant_positive, invariant_range};

/// Header at the start of the mapping's user region.
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
    /// Number of live checkpoints.
    stack_depth: usize,
    /// Saved cursor values, oldest first.
    stack: [usize; MAX_STACK_DEPTH],
}

const _: () = assert!(size_of::<Header>() == (5 + MAX_STACK_DEPTH) * size_of::<usize>());
const _: () = assert!(size_of::<Header>() > 3 * size_of::<usize>());
const _: () = assert!(align_of::<Header>() == align_of::<*mut u8>());

/// A bump allocator with a bounded checkpoint stack.
pub struct StackAllocator {
    header: NonNull<Header>,
}

impl StackAllocator {
    /// Create a stack allocator with `capacity` usable bytes.
    ///
    /// `strategy` selects eager (fully committed) or lazy (reserve-then-
    /// commit) provisioning of the backing reservation. Returns `None` when
    /// the reservation fails.
    ///
    /// Panics when `capacity` is zero or `alignment` is not a power of two
    /// in `[MIN_ALIGNMENT, MAX_ALIGNMENT]`.
    #[must_use]
    pub fn create(capacity: usize, alignment: usize, strategy: Strategy) -> Option<Self> {
        invariant_positive!(capacity);
        invariant!(
            alignment.is_power_of_two(),
            error::INV_BAD_ALIGNMENT,
            "alignment was {alignment}"
        );
        invariant_range!(alignment, MIN_ALIGNMENT, MAX_ALIGNMENT);

        let total = capacity.checked_add(size_of::<Header>() + alignment - 1)?;
        let user = match strategy {
            Strategy::Eager => store::reserve_eager(total, alignment)?,
            Strategy::Lazy => store::reserve_lazy(total, alignment)?,
        };
        let header = user.cast::<Header>();
        // SAFETY: the user region is at least header-sized; the first page
        // is committed under either strategy, and the header fits in it.
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
                strategy,
                stack_depth: 0,
                stack: [0; MAX_STACK_DEPTH],
            });
        }

        Some(Self { header })
    }

    /// Allocate `size` bytes at `alignment`.
    ///
    /// Under the lazy strategy the padded request is committed (page-rounded)
    /// before the cursor advances; when the commit fails the cursor is left
    /// untouched and `None` is returned. Soft out-of-memory also returns
    /// `None`.
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

        if header.strategy == Strategy::Lazy {
            // SAFETY: the handle's own user pointer, still live.
            if unsafe { store::commit(self.header.cast(), total) }.is_err() {
                return None;
            }
        }

        // SAFETY: the handle owns a live mapping.
        let header = unsafe { self.header.as_mut() };
        header.allocated += total;
        NonNull::new(aligned as *mut u8)
    }

    /// Push the current cursor onto the checkpoint stack.
    ///
    /// Fails with [`AllocError::StackOverflow`] when the stack is at its
    /// depth limit; recoverable, never fatal.
    pub fn record(&mut self) -> Result<(), AllocError> {
        // SAFETY: the handle owns a live mapping.
        let header = unsafe { self.header.as_mut() };

        if header.stack_depth == MAX_STACK_DEPTH - 1 {
            return Err(AllocError::StackOverflow);
        }

        header.stack[header.stack_depth] = header.allocated;
        header.stack_depth += 1;
        Ok(())
    }

    /// Pop the newest checkpoint into the cursor.
    ///
    /// Logically invalidates every allocation issued since the matching
    /// [`record`](Self::record). Panics on an empty checkpoint stack; an
    /// unmatched unwind is a caller bug.
    pub fn unwind(&mut self) -> Result<(), AllocError> {
        // SAFETY: the handle owns a live mapping.
        let header = unsafe { self.header.as_mut() };

        invariant!(
            header.stack_depth > 0,
            error::INV_INVALID_STATE,
            "cannot unwind an empty checkpoint stack"
        );
        invariant_range!(header.stack_depth, 1, MAX_STACK_DEPTH - 1);

        header.stack_depth -= 1;
        header.allocated = header.stack[header.stack_depth];
        Ok(())
    }

    /// Rewind the cursor to zero and drop every checkpoint.
    ///
    /// Unlike the scratch allocator's reset, the region is not zeroed.
    pub fn reset(&mut self) -> Result<(), AllocError> {
        // SAFETY: the handle owns a live mapping.
        let header = unsafe { self.header.as_mut() };
        header.allocated = 0;
        header.stack_depth = 0;
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
        // cannot overlap because dest came from untouched stack space.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dest.as_ptr(), src.len());
        }

        // SAFETY: dest holds src.len() initialized bytes as of the copy.
        let copied = unsafe { std::slice::from_raw_parts(dest.as_ptr(), src.len()) };
        invariant!(
            copied == src,
            error::INV_INVALID_STATE,
            "copy into stack region diverged from source"
        );

        Some(dest)
    }

    /// Copy `src` into the allocator and drop it.
    ///
    /// On soft out-of-memory the source buffer is handed back untouched.
    pub fn move_in(&mut self, src: Vec<u8>) -> Result<NonNull<u8>, Vec<u8>> {
        match self.copy_in(&src) {
            Some(dest) => Ok(dest),
            None => Err(src),
        }
    }

    /// Seal this allocator into a transfer envelope carrying `src`.
    ///
    /// See [`ScratchAllocator::transfer`](crate::ScratchAllocator::transfer);
    /// the semantics are identical.
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

    /// Number of live checkpoints.
    #[must_use]
    pub fn depth(&self) -> usize {
        // SAFETY: the handle owns a live mapping.
        unsafe { self.header.as_ref() }.stack_depth
    }

    /// Provisioning strategy chosen at creation.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        // SAFETY: the handle owns a live mapping.
        unsafe { self.header.as_ref() }.strategy
    }

    /// Committed bytes of the backing reservation.
    ///
    /// Equals the reservation size under the eager strategy; under the lazy
    /// strategy it grows by whole pages as allocations land.
    #[must_use]
    pub fn committed_bytes(&self) -> usize {
        // SAFETY: the handle owns a live mapping.
        unsafe { store::committed_bytes(self.header.cast()) }
    }

    /// Committed page count of the backing reservation.
    #[must_use]
    pub fn committed_pages(&self) -> usize {
        // SAFETY: the handle owns a live mapping.
        unsafe { store::page_count(self.header.cast()) }
    }

    /// Dismantle the handle into the raw user pointer of its mapping.
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

impl Drop for StackAllocator {
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

impl std::fmt::Debug for StackAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackAllocator")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated())
            .field("depth", &self.depth())
            .field("strategy", &self.strategy())
            .finish()
    }
}
