//! ABI surface for the stack allocator.

use std::ffi::c_void;
use std::mem::ManuallyDrop;

use hearth_core::error::{self, Code};
use hearth_core::{Envelope, StackAllocator, Strategy};

/// Eager strategy selector for [`hearth_stack_create`].
pub const HEARTH_STRATEGY_EAGER: usize = 0;
/// Lazy strategy selector for [`hearth_stack_create`].
pub const HEARTH_STRATEGY_LAZY: usize = 1;

/// Create a stack allocator.
///
/// `strategy` is [`HEARTH_STRATEGY_EAGER`] or [`HEARTH_STRATEGY_LAZY`]; any
/// other value returns null. Returns null when the reservation fails.
#[unsafe(no_mangle)]
pub extern "C" fn hearth_stack_create(
    capacity: usize,
    alignment: usize,
    strategy: usize,
) -> *mut c_void {
    let strategy = match strategy {
        HEARTH_STRATEGY_EAGER => Strategy::Eager,
        HEARTH_STRATEGY_LAZY => Strategy::Lazy,
        _ => return std::ptr::null_mut(),
    };
    match StackAllocator::create(capacity, alignment, strategy) {
        Some(allocator) => allocator.into_raw().cast(),
        None => std::ptr::null_mut(),
    }
}

/// Destroy the allocator behind `*handle` and null the handle.
///
/// # Safety
///
/// `handle` must point to a handle obtained from [`hearth_stack_create`]
/// (or null); no other handle may alias it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_stack_destroy(handle: *mut *mut c_void) -> Code {
    if handle.is_null() {
        return error::INV_NULL_POINTER;
    }
    // SAFETY: caller guarantees handle points to a pointer-sized slot.
    let raw = unsafe { handle.read() };
    // SAFETY: caller guarantees raw is an unaliased live handle or null.
    let Some(allocator) = (unsafe { StackAllocator::from_raw(raw.cast()) }) else {
        return error::INV_NULL_POINTER;
    };
    // SAFETY: the slot was readable above.
    unsafe { handle.write(std::ptr::null_mut()) };
    match allocator.destroy() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Allocate `size` bytes at `alignment`. Returns null on soft out-of-memory,
/// a failed lazy commit, or a null handle.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_stack_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_stack_alloc(
    handle: *mut c_void,
    size: usize,
    alignment: usize,
) -> *mut c_void {
    // SAFETY: caller guarantees a live, unaliased handle.
    let Some(allocator) = (unsafe { StackAllocator::from_raw(handle.cast()) }) else {
        return std::ptr::null_mut();
    };
    let mut allocator = ManuallyDrop::new(allocator);
    match allocator.alloc(size, alignment) {
        Some(ptr) => ptr.as_ptr().cast(),
        None => std::ptr::null_mut(),
    }
}

/// Rewind the cursor and drop every checkpoint.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_stack_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_stack_reset(handle: *mut c_void) -> Code {
    // SAFETY: caller guarantees a live, unaliased handle.
    let Some(allocator) = (unsafe { StackAllocator::from_raw(handle.cast()) }) else {
        return error::INV_NULL_POINTER;
    };
    let mut allocator = ManuallyDrop::new(allocator);
    match allocator.reset() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Push the current cursor onto the checkpoint stack.
///
/// Returns the packed stack-overflow code when the stack is at its depth
/// limit.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_stack_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_stack_record(handle: *mut c_void) -> Code {
    // SAFETY: caller guarantees a live, unaliased handle.
    let Some(allocator) = (unsafe { StackAllocator::from_raw(handle.cast()) }) else {
        return error::INV_NULL_POINTER;
    };
    let mut allocator = ManuallyDrop::new(allocator);
    match allocator.record() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Pop the newest checkpoint into the cursor.
///
/// # Safety
///
/// `handle` must be a live handle from [`hearth_stack_create`]. An unwind on
/// an empty checkpoint stack is a fatal precondition violation and aborts.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_stack_unwind(handle: *mut c_void) -> Code {
    // SAFETY: caller guarantees a live, unaliased handle.
    let Some(allocator) = (unsafe { StackAllocator::from_raw(handle.cast()) }) else {
        return error::INV_NULL_POINTER;
    };
    let mut allocator = ManuallyDrop::new(allocator);
    match allocator.unwind() {
        Ok(()) => error::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Seal the allocator behind `*handle` into a transfer envelope carrying
/// `data_size` bytes from `src`; nulls the handle.
///
/// # Safety
///
/// `handle` must point to a live handle slot; `src` must be readable for
/// `data_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_stack_transfer(
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
    let Some(allocator) = (unsafe { StackAllocator::from_raw(raw.cast()) }) else {
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
/// # Safety
///
/// `consumer` must be a live handle from [`hearth_stack_create`];
/// `envelope` must point to a handle from a transfer call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_stack_absorb(
    consumer: *mut c_void,
    envelope: *mut *mut c_void,
) -> *mut c_void {
    if envelope.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: caller guarantees a live, unaliased consumer handle.
    let Some(allocator) = (unsafe { StackAllocator::from_raw(consumer.cast()) }) else {
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
