//! Byte-buffer and address escapes over issued pointers.
//!
//! Scripting hosts cannot dereference the pointers the allocators hand out;
//! these three calls let them read, write, and observe addresses for tests.
//! Bounds are the caller's responsibility, exactly as with the pointers
//! themselves.

use std::ffi::c_void;

use hearth_core::error::{self, Code};

/// Copy `len` bytes from an issued pointer into `out`.
///
/// # Safety
///
/// `ptr` must be readable and `out` writable for `len` bytes, and the
/// regions must not overlap.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_mem_read(ptr: *const c_void, out: *mut u8, len: usize) -> Code {
    if ptr.is_null() || out.is_null() {
        return error::INV_NULL_POINTER;
    }
    // SAFETY: caller guarantees both regions are valid for len bytes and
    // disjoint.
    unsafe {
        std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out, len);
    }
    error::SUCCESS
}

/// Copy `len` bytes from `data` into an issued pointer.
///
/// # Safety
///
/// `data` must be readable and `ptr` writable for `len` bytes, and the
/// regions must not overlap.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hearth_mem_write(ptr: *mut c_void, data: *const u8, len: usize) -> Code {
    if ptr.is_null() || data.is_null() {
        return error::INV_NULL_POINTER;
    }
    // SAFETY: caller guarantees both regions are valid for len bytes and
    // disjoint.
    unsafe {
        std::ptr::copy_nonoverlapping(data, ptr.cast::<u8>(), len);
    }
    error::SUCCESS
}

/// The integer address of an issued pointer, for observational tests.
#[unsafe(no_mangle)]
pub extern "C" fn hearth_mem_addr(ptr: *const c_void) -> usize {
    ptr as usize
}
