//! ABI surface for the pool allocator.
//!
//! The pool handle is a boxed allocator rather than a pointer into its own
//! mapping, so create/destroy go through `Box`; everything else borrows.

use std::ffi::c_void;
use std::ptr::NonNull;

use hearth_core::PoolAllocator;
use hearth_core::error::{self, Code};

/// Create a pool of `object_count` slots of `object_size` bytes. Returns
/// null when the reservation fails.
#[unsafe(no_mangle)]
pub extern "C" fn hearth_pool_create(
    object_size: usize,
    object_count: usize,
    alignment: usize,
) -> *mut c_void {
    match PoolAllocator::create(object_size, object_count, alignment) {
        Some(pool) => Box::into_raw(Box::new(pool)).cast(),
        None => std::ptr::null_mut(),
    }
}

/// Destroy the pool behind `*handle` and null the handle.
///
/// # Safety
///
/// `handle` must point to a handle obtained from [`hearth_pool_create`]
/// (or null); no other handle may alias it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_pool_destroy(handle: *mut *mut c_void) -> Code {
    if handle.is_null() {
        return error::INV_NULL_POINTER;
    }
    // SAFETY: caller guarantees handle points to a pointer-sized slot.
    let raw = unsafe { handle.read() };
    if raw.is_null() {
        return error::INV_NULL_POINTER;
    }
    // SAFETY: the slot was readable above.
    unsafe { handle.write(std::ptr::null_mut()) };
    // SAFETY: raw came from Box::into_raw in hearth_pool_create.
    let pool = unsafe { Box::from_raw(raw.cast::<PoolAllocator>()) };
    match pool.destroy() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Pop a free slot. Returns null when every slot is in flight or the handle
/// is null.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_pool_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_pool_acquire(handle: *mut c_void) -> *mut c_void {
    let Some(mut pool) = NonNull::new(handle.cast::<PoolAllocator>()) else {
        return std::ptr::null_mut();
    };
    // SAFETY: caller guarantees a live, unaliased handle.
    match unsafe { pool.as_mut() }.acquire() {
        Some(ptr) => ptr.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

/// Push a slot back onto the free ring.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_pool_create`]; `ptr` must be
/// a slot previously returned by [`hearth_pool_acquire`]. A foreign,
/// misaligned, or already-free pointer is a fatal precondition violation and
/// aborts.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_pool_release(handle: *mut c_void, ptr: *mut c_void) -> Code {
    let Some(mut pool) = NonNull::new(handle.cast::<PoolAllocator>()) else {
        return error::INV_NULL_POINTER;
    };
    let Some(slot) = NonNull::new(ptr.cast::<u8>()) else {
        return error::INV_NULL_POINTER;
    };
    // SAFETY: caller guarantees a live, unaliased handle.
    match unsafe { pool.as_mut() }.release(slot) {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Rewrite the free ring with every slot address.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_pool_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_pool_reset(handle: *mut c_void) -> Code {
    let Some(mut pool) = NonNull::new(handle.cast::<PoolAllocator>()) else {
        return error::INV_NULL_POINTER;
    };
    // SAFETY: caller guarantees a live, unaliased handle.
    match unsafe { pool.as_mut() }.reset() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}
