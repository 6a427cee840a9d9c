//! Backing store: page-granular reservations with hidden per-mapping metadata.
//!
//! Every reservation returns a user pointer aligned to the caller's request;
//! the bytes immediately before it hold a `Metadata` record naming the raw
//! mapping base, the page size captured at reservation time, the reserved
//! (virtual) capacity, and the currently committed capacity. Any later call
//! recovers the record by pointer subtraction, so higher layers can treat
//! the returned address as the start of their own header without keeping a
//! sidecar map.
//!
//! Two provisioning strategies share the layout:
//!
//! - **Eager**: the whole range is committed read-write at reservation time.
//! - **Lazy**: the range is reserved with no access; only the first page is
//!   committed (the metadata must be writable). [`commit`] grows the
//!   committed span by whole pages on demand.
//!
//! Unsafe pointer work is confined to three places: the metadata write at
//! reservation, the metadata read behind `metadata_mut`, and [`release`].

use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::constants::{MAX_ALIGNMENT, MIN_ALIGNMENT};
use crate::error::{self, AllocError, check};
use crate::syscall::{
    MADV_HUGEPAGE, MAP_ANONYMOUS, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE, sys_madvise,
    sys_mmap, sys_mprotect, sys_munmap,
};
use crate::util::align_up;
use crate::{invariant, invariant_positive, invariant_range};

/// Provisioning strategy for a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Strategy {
    /// Commit the entire range read-write at reservation time.
    Eager = 0,
    /// Reserve address space only; commit pages on demand.
    Lazy = 1,
}

/// Bookkeeping prepended before every user pointer this module hands out.
#[repr(C)]
struct Metadata {
    /// Raw address returned by the kernel for the reservation.
    base: *mut u8,
    /// Page size captured at reservation time.
    page_size: usize,
    /// Total reserved bytes (page-rounded).
    virtual_capacity: usize,
    /// Currently committed bytes; equals `virtual_capacity` for eager
    /// reservations and grows by whole pages for lazy ones.
    capacity: usize,
    /// `capacity / page_size`.
    page_count: usize,
}

const METADATA_SIZE: usize = size_of::<Metadata>();
const _: () = assert!(METADATA_SIZE == 5 * size_of::<usize>());
const _: () = assert!(align_of::<Metadata>() == align_of::<*mut u8>());

const AT_PAGESZ: usize = 6;

fn read_auxv_page_size() -> usize {
    // /proc/self/auxv is a stream of (key, value) machine-word pairs.
    if let Ok(bytes) = std::fs::read("/proc/self/auxv") {
        let word = size_of::<usize>();
        for pair in bytes.chunks_exact(2 * word) {
            let key = pair[..word].try_into().map(usize::from_ne_bytes).unwrap_or(0);
            let value = pair[word..].try_into().map(usize::from_ne_bytes).unwrap_or(0);
            if key == AT_PAGESZ && value.is_power_of_two() {
                return value;
            }
        }
    }
    4096
}

/// System page size, captured once per process.
#[must_use]
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(read_auxv_page_size)
}

/// Reserve `capacity` usable bytes of address space with no physical
/// backing, committing only the first page.
///
/// The returned pointer is aligned to `alignment`; writes past the first
/// page fault until [`commit`] grants access. Returns `None` when the kernel
/// refuses the reservation or the first-page commit.
#[must_use]
pub fn reserve_lazy(capacity: usize, alignment: usize) -> Option<NonNull<u8>> {
    reserve(capacity, alignment, Strategy::Lazy)
}

/// Reserve `capacity` usable bytes, committed read-write in full.
///
/// Returns `None` when the kernel refuses the mapping.
#[must_use]
pub fn reserve_eager(capacity: usize, alignment: usize) -> Option<NonNull<u8>> {
    reserve(capacity, alignment, Strategy::Eager)
}

fn reserve(capacity: usize, alignment: usize, strategy: Strategy) -> Option<NonNull<u8>> {
    invariant_positive!(capacity);
    invariant!(
        alignment.is_power_of_two(),
        error::INV_BAD_ALIGNMENT,
        "alignment was {alignment}"
    );
    invariant_range!(alignment, MIN_ALIGNMENT, MAX_ALIGNMENT);

    let page = page_size();
    let total = align_up(capacity.checked_add(METADATA_SIZE)?, page);

    let prot = match strategy {
        Strategy::Eager => PROT_READ | PROT_WRITE,
        Strategy::Lazy => PROT_NONE,
    };
    // SAFETY: anonymous private mapping with no fixed address; the kernel
    // picks a free range.
    let base = unsafe {
        sys_mmap(std::ptr::null_mut(), total, prot, MAP_PRIVATE | MAP_ANONYMOUS, -1, 0)
    }
    .ok()?;

    // Huge-page eligibility is advisory; a refusal changes nothing.
    // SAFETY: [base, base + total) was just mapped.
    let _ = unsafe { sys_madvise(base, total, MADV_HUGEPAGE) };

    if strategy == Strategy::Lazy {
        // The metadata lives in the first page, which must be writable.
        // SAFETY: the first page of the mapping just created.
        if unsafe { sys_mprotect(base, page, PROT_READ | PROT_WRITE) }.is_err() {
            // SAFETY: releasing the exact range just mapped.
            let _ = unsafe { sys_munmap(base, total) };
            return None;
        }
    }

    let committed = match strategy {
        Strategy::Eager => total,
        Strategy::Lazy => page,
    };

    let addr = base as usize + METADATA_SIZE;
    let aligned = align_up(addr, alignment);
    // MAX_ALIGNMENT is half a page, so the record always fits inside the
    // committed first page: aligned <= base + METADATA_SIZE + alignment - 1.
    let metadata = (aligned - METADATA_SIZE) as *mut Metadata;
    // SAFETY: metadata lies within the committed first page of the mapping.
    unsafe {
        metadata.write(Metadata {
            base,
            page_size: page,
            virtual_capacity: total,
            capacity: committed,
            page_count: committed / page,
        });
    }

    NonNull::new(aligned as *mut u8)
}

/// Grant read-write access to the next `bytes` (page-rounded) of a lazy
/// reservation.
///
/// Fails with [`AllocError::OutOfMemory`] when the rounded size exceeds the
/// uncommitted remainder and [`AllocError::PermissionChange`] when the
/// kernel refuses the upgrade.
///
/// # Safety
///
/// `user` must have been returned by [`reserve_lazy`] or [`reserve_eager`]
/// and not yet released.
pub unsafe fn commit(user: NonNull<u8>, bytes: usize) -> Result<(), AllocError> {
    invariant_positive!(bytes);

    // SAFETY: caller guarantees `user` came from a live reservation.
    let metadata = unsafe { metadata_mut(user) };
    let rounded = align_up(bytes, metadata.page_size);

    check(
        rounded <= metadata.virtual_capacity - metadata.capacity,
        AllocError::OutOfMemory,
    )?;

    // SAFETY: [base + capacity, base + capacity + rounded) lies inside the
    // reservation; the bound was just checked.
    let start = unsafe { metadata.base.add(metadata.capacity) };
    // SAFETY: start is page-aligned (capacity is a page multiple) and mapped.
    unsafe { sys_mprotect(start, rounded, PROT_READ | PROT_WRITE) }
        .map_err(|_| AllocError::PermissionChange)?;

    metadata.capacity += rounded;
    metadata.page_count = metadata.capacity / metadata.page_size;
    Ok(())
}

/// Release the entire reservation behind `user`.
///
/// Fails with [`AllocError::Deallocation`] when the kernel refuses the
/// unmap; the mapping must then be considered leaked, not reusable.
///
/// # Safety
///
/// `user` must have been returned by [`reserve_lazy`] or [`reserve_eager`]
/// and not yet released. Every pointer into the mapping is dangling
/// afterwards.
pub unsafe fn release(user: NonNull<u8>) -> Result<(), AllocError> {
    // SAFETY: caller guarantees `user` came from a live reservation.
    let metadata = unsafe { metadata_mut(user) };
    invariant!(!metadata.base.is_null(), error::INV_NULL_POINTER, "mapping base");
    invariant_positive!(metadata.virtual_capacity);
    invariant_positive!(metadata.page_size);

    // SAFETY: releasing the exact range recorded at reservation time.
    unsafe { sys_munmap(metadata.base, metadata.virtual_capacity) }
        .map_err(|_| AllocError::Deallocation)
}

/// Currently committed bytes of the reservation behind `user`.
///
/// # Safety
///
/// `user` must come from a live reservation.
#[must_use]
pub unsafe fn committed_bytes(user: NonNull<u8>) -> usize {
    // SAFETY: caller guarantees a live reservation.
    unsafe { metadata_mut(user) }.capacity
}

/// Total reserved bytes of the reservation behind `user`.
///
/// # Safety
///
/// `user` must come from a live reservation.
#[must_use]
pub unsafe fn virtual_capacity(user: NonNull<u8>) -> usize {
    // SAFETY: caller guarantees a live reservation.
    unsafe { metadata_mut(user) }.virtual_capacity
}

/// Committed page count of the reservation behind `user`.
///
/// # Safety
///
/// `user` must come from a live reservation.
#[must_use]
pub unsafe fn page_count(user: NonNull<u8>) -> usize {
    // SAFETY: caller guarantees a live reservation.
    unsafe { metadata_mut(user) }.page_count
}

/// The metadata record hiding before `user`.
///
/// # Safety
///
/// `user` must have been returned by a reserve call and not yet released;
/// the record sits immediately before it.
unsafe fn metadata_mut<'a>(user: NonNull<u8>) -> &'a mut Metadata {
    // SAFETY: per contract, the record sits immediately before `user` inside
    // committed pages of the same mapping.
    unsafe { &mut *user.as_ptr().sub(METADATA_SIZE).cast::<Metadata>() }
}
