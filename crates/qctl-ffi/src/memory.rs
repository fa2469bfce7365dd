//! Strings and arrays handed to C callers.
//!
//! Every buffer returned by this library must be freed with the matching
//! `qctl_*_delete` function, never with the caller's own allocator. Live
//! allocations are counted so leaks show up in tests.

use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};

use qctl::device::WORK_ITEM_DIMS;

static LIVE_STRINGS: AtomicUsize = AtomicUsize::new(0);
static LIVE_SIZE_ARRAYS: AtomicUsize = AtomicUsize::new(0);

/// Copy `s` into a new C string. Interior NUL bytes are dropped.
pub(crate) fn give_c_string(s: &str) -> *mut c_char {
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    match CString::new(bytes) {
        Ok(c) => {
            LIVE_STRINGS.fetch_add(1, Ordering::Relaxed);
            c.into_raw()
        }
        Err(_) => std::ptr::null_mut(),
    }
}

/// Move a work-item size triple onto the heap.
pub(crate) fn give_size_array(sizes: [usize; WORK_ITEM_DIMS]) -> *mut usize {
    LIVE_SIZE_ARRAYS.fetch_add(1, Ordering::Relaxed);
    Box::into_raw(Box::new(sizes)).cast::<usize>()
}

/// Free a string returned by this library. Null is ignored.
///
/// # Safety
///
/// `s` must be null or a pointer returned by a `qctl_*` function returning
/// `char *`, not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_cstring_delete(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    LIVE_STRINGS.fetch_sub(1, Ordering::Relaxed);
    // SAFETY: produced by `CString::into_raw` in `give_c_string`.
    drop(unsafe { CString::from_raw(s) });
}

/// Free an array returned by `qctl_device_get_max_work_item_sizes`. Null is
/// ignored.
///
/// # Safety
///
/// `sizes` must be null or a pointer returned by
/// `qctl_device_get_max_work_item_sizes`, not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_size_array_delete(sizes: *mut usize) {
    if sizes.is_null() {
        return;
    }
    LIVE_SIZE_ARRAYS.fetch_sub(1, Ordering::Relaxed);
    // SAFETY: produced by `Box::into_raw` on a `[usize; WORK_ITEM_DIMS]`.
    drop(unsafe { Box::from_raw(sizes.cast::<[usize; WORK_ITEM_DIMS]>()) });
}

/// Number of strings handed out and not yet freed.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_live_cstrings() -> usize {
    LIVE_STRINGS.load(Ordering::Relaxed)
}

/// Number of size arrays handed out and not yet freed.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_live_size_arrays() -> usize {
    LIVE_SIZE_ARRAYS.load(Ordering::Relaxed)
}
