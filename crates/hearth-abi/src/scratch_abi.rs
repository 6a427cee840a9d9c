//! ABI surface for the scratch allocator.

use std::ffi::c_void;
use std::mem::ManuallyDrop;

use hearth_core::error::{self, Code};
use hearth_core::{Envelope, ScratchAllocator};

/// Create a scratch allocator. Returns null when the reservation fails.
#[unsafe(no_mangle)]
pub extern "C" fn hearth_scratch_create(capacity: usize, alignment: usize) -> *mut c_void {
    match ScratchAllocator::create(capacity, alignment) {
        Some(allocator) => allocator.into_raw().cast(),
        None => std::ptr::null_mut(),
    }
}

/// Destroy the allocator behind `*handle` and null the handle.
///
/// Returns `0` on success (including the envelope-state no-op) or a packed
/// diagnostic code.
///
/// # Safety
///
/// `handle` must point to a handle obtained from [`hearth_scratch_create`]
/// (or null); no other handle may alias it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_scratch_destroy(handle: *mut *mut c_void) -> Code {
    if handle.is_null() {
        return error::INV_NULL_POINTER;
    }
    // SAFETY: caller guarantees handle points to a pointer-sized slot.
    let raw = unsafe { handle.read() };
    // SAFETY: caller guarantees raw is an unaliased live handle or null.
    let Some(allocator) = (unsafe { ScratchAllocator::from_raw(raw.cast()) }) else {
        return error::INV_NULL_POINTER;
    };
    // SAFETY: the slot was readable above.
    unsafe { handle.write(std::ptr::null_mut()) };
    match allocator.destroy() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Allocate `size` bytes at `alignment`. Returns null on soft out-of-memory
/// or a null handle.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_scratch_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_scratch_alloc(
    handle: *mut c_void,
    size: usize,
    alignment: usize,
) -> *mut c_void {
    // SAFETY: caller guarantees a live, unaliased handle.
    let Some(allocator) = (unsafe { ScratchAllocator::from_raw(handle.cast()) }) else {
        return std::ptr::null_mut();
    };
    let mut allocator = ManuallyDrop::new(allocator);
    match allocator.alloc(size, alignment) {
        Some(ptr) => ptr.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

/// Zero the consumed prefix and rewind the cursor.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_scratch_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_scratch_reset(handle: *mut c_void) -> Code {
    // SAFETY: caller guarantees a live, unaliased handle.
    let Some(allocator) = (unsafe { ScratchAllocator::from_raw(handle.cast()) }) else {
        return error::INV_NULL_POINTER;
    };
    let mut allocator = ManuallyDrop::new(allocator);
    match allocator.reset() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Seal the allocator behind `*handle` into a transfer envelope carrying
/// `data_size` bytes from `src`; nulls the handle.
///
/// Returns the envelope handle, or null when `*handle` or `src` is null.
///
/// # Safety
///
/// `handle` must point to a live handle slot; `src` must be readable for
/// `data_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_scratch_transfer(
    handle: *mut *mut c_void,
    src: *const u8,
    data_size: usize,
    alignment: usize,
) -> *mut c_void {
    if handle.is_null() || src.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: caller guarantees handle points to a pointer-sized slot.
    let raw = unsafe { handle.read() };
    // SAFETY: caller guarantees raw is an unaliased live handle or null.
    let Some(allocator) = (unsafe { ScratchAllocator::from_raw(raw.cast()) }) else {
        return std::ptr::null_mut();
    };
    // SAFETY: caller guarantees src is readable for data_size bytes.
    let payload = unsafe { std::slice::from_raw_parts(src, data_size) };
    // SAFETY: the slot was readable above.
    unsafe { handle.write(std::ptr::null_mut()) };
    allocator.transfer(payload, alignment).into_raw().cast()
}

/// Absorb the envelope behind `*envelope` into the consumer; nulls the
/// envelope handle.
///
/// Returns the payload's new address, or null when the envelope is invalid
/// or the consumer cannot hold the payload (the envelope's mapping is
/// released either way).
///
/// # Safety
///
/// `consumer` must be a live handle from [`hearth_scratch_create`];
/// `envelope` must point to a handle from [`hearth_scratch_transfer`] or
/// [`crate::stack_abi::hearth_stack_transfer`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_scratch_absorb(
    consumer: *mut c_void,
    envelope: *mut *mut c_void,
) -> *mut c_void {
    if envelope.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: caller guarantees a live, unaliased consumer handle.
    let Some(allocator) = (unsafe { ScratchAllocator::from_raw(consumer.cast()) }) else {
        return std::ptr::null_mut();
    };
    let mut allocator = ManuallyDrop::new(allocator);
    // SAFETY: caller guarantees envelope points to a pointer-sized slot.
    let raw = unsafe { envelope.read() };
    // SAFETY: caller guarantees raw came from a transfer call.
    let Some(sealed) = (unsafe { Envelope::from_raw(raw.cast()) }) else {
        return std::ptr::null_mut();
    };
    // SAFETY: the slot was readable above.
    unsafe { envelope.write(std::ptr::null_mut()) };
    match allocator.absorb(sealed) {
        Some(ptr) => ptr.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}
