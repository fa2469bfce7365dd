//! Exported C functions.
//!
//! Handles are opaque heap boxes. A function documented as *give* returns a
//! handle the caller owns and must free with the matching `qctl_*_delete`;
//! parameters documented as *keep* are borrowed and never freed by the callee.
//! Backends and device types cross the boundary as their raw `u32` values.
//!
//! The queue manager behind these functions is [`QueueManager::global`].

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;

use qctl::{
    Backend, Context, Device, DeviceType, Queue, QueueManager, dump_device_info, dump_queue_info,
};

use crate::error::{
    QCTL_SUCCESS, QctlCError, clear_last_error, get_last_error, guard, guard_status,
};
use crate::memory::{give_c_string, give_size_array};

/// Opaque device handle.
pub struct QctlDevice(Device);

/// Opaque context handle.
pub struct QctlContext(Context);

/// Opaque queue handle.
pub struct QctlQueue(Queue);

fn give<T>(value: T) -> *mut T {
    Box::into_raw(Box::new(value))
}

/// Borrow the value behind a keep parameter.
///
/// # Safety
///
/// `ptr` must be null or point to a live handle of type `T`.
unsafe fn keep<'a, T>(ptr: *const T, what: &'static str) -> Result<&'a T, QctlCError> {
    // SAFETY: forwarded from the caller.
    unsafe { ptr.as_ref() }.ok_or(QctlCError::InvalidHandle(what))
}

fn backend_arg(raw: c_uint) -> Result<Backend, QctlCError> {
    Backend::from_raw(raw).ok_or_else(|| QctlCError::InvalidArgument(format!("backend {raw}")))
}

fn device_type_arg(raw: c_uint) -> Result<DeviceType, QctlCError> {
    DeviceType::from_raw(raw)
        .ok_or_else(|| QctlCError::InvalidArgument(format!("device type {raw}")))
}

fn manager() -> &'static QueueManager {
    QueueManager::global()
}

// ── Version and errors ──────────────────────────────────────────────────────

/// Library version as a static NUL-terminated string. Do not free.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr().cast::<c_char>()
}

/// Message of the calling thread's last error, or null if the last call
/// succeeded. Valid until the next call on this thread. Do not free.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_get_last_error() -> *const c_char {
    thread_local! {
        static MESSAGE: RefCell<Option<CString>> = const { RefCell::new(None) };
    }
    match get_last_error() {
        Some(error) => MESSAGE.with(|slot| {
            let text: Vec<u8> = error.to_string().bytes().filter(|&b| b != 0).collect();
            let message = CString::new(text).unwrap_or_default();
            let ptr = message.as_ptr();
            *slot.borrow_mut() = Some(message);
            ptr
        }),
        None => ptr::null(),
    }
}

/// Status code of the calling thread's last error, or `QCTL_SUCCESS`.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_get_last_error_code() -> c_int {
    get_last_error().map_or(QCTL_SUCCESS, |e| e.code())
}

#[unsafe(no_mangle)]
pub extern "C" fn qctl_clear_last_error() {
    clear_last_error();
}

// ── Queue manager ───────────────────────────────────────────────────────────

/// Give: the calling thread's current queue. Null if there is none.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_get_current_queue() -> *mut QctlQueue {
    guard(ptr::null_mut(), || Ok(give(QctlQueue(manager().current_queue()?))))
}

/// Give: the `index`-th default queue of (backend, device type). Null if no
/// such queue exists.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_get_queue(
    backend: c_uint,
    device_type: c_uint,
    index: usize,
) -> *mut QctlQueue {
    guard(ptr::null_mut(), || {
        let queue =
            manager().get_queue(backend_arg(backend)?, device_type_arg(device_type)?, index)?;
        Ok(give(QctlQueue(queue)))
    })
}

/// Number of default queues of (backend, device type); zero for unknown
/// combinations.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_get_num_queues(backend: c_uint, device_type: c_uint) -> usize {
    guard(0, || Ok(manager().num_queues(backend_arg(backend)?, device_type_arg(device_type)?)))
}

/// Give: activate the `index`-th queue of (backend, device type) on the
/// calling thread. The stack keeps its own copy, so the returned handle may
/// be deleted independently of [`qctl_queue_mgr_pop_queue`].
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_push_queue(
    backend: c_uint,
    device_type: c_uint,
    index: usize,
) -> *mut QctlQueue {
    guard(ptr::null_mut(), || {
        let queue =
            manager().push_queue(backend_arg(backend)?, device_type_arg(device_type)?, index)?;
        Ok(give(QctlQueue(queue)))
    })
}

/// Deactivate the calling thread's current queue. Returns
/// `QCTL_ERROR_EMPTY_STACK`, changing nothing, if no queue is active.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_pop_queue() -> c_int {
    guard_status(|| Ok(manager().pop_queue()?))
}

/// Whether `queue` (keep) is the calling thread's current queue.
///
/// # Safety
///
/// `queue` must be null or a live queue handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_mgr_is_current_queue(queue: *const QctlQueue) -> bool {
    guard(false, || {
        // SAFETY: forwarded from the caller.
        let queue = unsafe { keep(queue, "queue") }?;
        Ok(manager().is_current_queue(&queue.0))
    })
}

/// Depth of the calling thread's activation stack.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_get_num_activated_queues() -> usize {
    guard(0, || Ok(manager().num_activated_queues()))
}

/// Give: a fresh queue bound to `context` and `device` (both keep). Null if
/// the device is not part of the context.
///
/// # Safety
///
/// Both arguments must be null or live handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_mgr_get_queue_from_context_and_device(
    context: *const QctlContext,
    device: *const QctlDevice,
) -> *mut QctlQueue {
    guard(ptr::null_mut(), || {
        // SAFETY: forwarded from the caller.
        let (context, device) = unsafe { (keep(context, "context")?, keep(device, "device")?) };
        let queue = manager().queue_from_context_and_device(&context.0, &device.0)?;
        Ok(give(QctlQueue(queue)))
    })
}

/// Replace the process default queue with a fresh queue on the first device
/// of `device_type`. The previous default stays on failure.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_set_as_default_queue(device_type: c_uint) -> c_int {
    guard_status(|| {
        manager().reset_global_default(device_type_arg(device_type)?)?;
        Ok(())
    })
}

/// Replace the process default queue with a fresh queue on the `index`-th
/// device of (backend, device type).
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_set_default_queue(
    backend: c_uint,
    device_type: c_uint,
    index: usize,
) -> c_int {
    guard_status(|| {
        manager().reset_global_default_to(
            backend_arg(backend)?,
            device_type_arg(device_type)?,
            index,
        )?;
        Ok(())
    })
}

/// Give: a text summary of the manager as seen from the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn qctl_queue_mgr_dump() -> *mut c_char {
    guard(ptr::null_mut(), || Ok(give_c_string(&manager().dump())))
}

// ── Queues ──────────────────────────────────────────────────────────────────

/// Give: the device of `queue` (keep). Null for a null queue.
///
/// # Safety
///
/// `queue` must be null or a live queue handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_get_device(queue: *const QctlQueue) -> *mut QctlDevice {
    guard(ptr::null_mut(), || {
        // SAFETY: forwarded from the caller.
        let queue = unsafe { keep(queue, "queue") }?;
        Ok(give(QctlDevice(queue.0.device().clone())))
    })
}

/// Give: the context of `queue` (keep). Null for a null queue.
///
/// # Safety
///
/// `queue` must be null or a live queue handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_get_context(queue: *const QctlQueue) -> *mut QctlContext {
    guard(ptr::null_mut(), || {
        // SAFETY: forwarded from the caller.
        let queue = unsafe { keep(queue, "queue") }?;
        Ok(give(QctlContext(queue.0.context().clone())))
    })
}

/// Raw backend of `queue`, or 0 for a null queue.
///
/// # Safety
///
/// `queue` must be null or a live queue handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_get_backend(queue: *const QctlQueue) -> c_uint {
    guard(0, || {
        // SAFETY: forwarded from the caller.
        Ok(unsafe { keep(queue, "queue") }?.0.backend().as_raw())
    })
}

/// Whether two queues (both keep) use the same device and context.
///
/// # Safety
///
/// Both arguments must be null or live queue handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_are_eq(a: *const QctlQueue, b: *const QctlQueue) -> bool {
    guard(false, || {
        // SAFETY: forwarded from the caller.
        let (a, b) = unsafe { (keep(a, "queue")?, keep(b, "queue")?) };
        Ok(qctl::queues_equal(&a.0, &b.0))
    })
}

/// Give: a text description of `queue` (keep); `<unavailable>` for null.
///
/// # Safety
///
/// `queue` must be null or a live queue handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_dump_info(queue: *const QctlQueue) -> *mut c_char {
    guard(ptr::null_mut(), || {
        // SAFETY: forwarded from the caller.
        let queue = unsafe { queue.as_ref() };
        Ok(give_c_string(&dump_queue_info(queue.map(|q| &q.0))))
    })
}

/// Release a queue handle. Null is ignored.
///
/// # Safety
///
/// `queue` must be null or a handle given by this library, not yet deleted.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_queue_delete(queue: *mut QctlQueue) {
    if !queue.is_null() {
        // SAFETY: produced by `give`.
        drop(unsafe { Box::from_raw(queue) });
    }
}

// ── Contexts ────────────────────────────────────────────────────────────────

/// Whether two contexts (both keep) wrap the same platform context.
///
/// # Safety
///
/// Both arguments must be null or live context handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_context_are_eq(
    a: *const QctlContext,
    b: *const QctlContext,
) -> bool {
    guard(false, || {
        // SAFETY: forwarded from the caller.
        let (a, b) = unsafe { (keep(a, "context")?, keep(b, "context")?) };
        Ok(qctl::contexts_equal(&a.0, &b.0))
    })
}

/// Raw backend of `context`, or 0 for a null context.
///
/// # Safety
///
/// `context` must be null or a live context handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_context_get_backend(context: *const QctlContext) -> c_uint {
    guard(0, || {
        // SAFETY: forwarded from the caller.
        Ok(unsafe { keep(context, "context") }?.0.backend().as_raw())
    })
}

/// Number of devices in `context`, or 0 for a null context.
///
/// # Safety
///
/// `context` must be null or a live context handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_context_get_device_count(context: *const QctlContext) -> usize {
    guard(0, || {
        // SAFETY: forwarded from the caller.
        Ok(unsafe { keep(context, "context") }?.0.devices().len())
    })
}

/// Release a context handle. Null is ignored.
///
/// # Safety
///
/// `context` must be null or a handle given by this library, not yet deleted.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_context_delete(context: *mut QctlContext) {
    if !context.is_null() {
        // SAFETY: produced by `give`.
        drop(unsafe { Box::from_raw(context) });
    }
}

// ── Devices ─────────────────────────────────────────────────────────────────

/// Read one property of a keep device handle, recording an invalid-handle
/// error and returning `fallback` for null.
///
/// # Safety
///
/// `device` must be null or a live device handle.
unsafe fn device_query<T>(
    device: *const QctlDevice,
    fallback: T,
    f: impl FnOnce(&Device) -> T,
) -> T {
    guard(fallback, || {
        // SAFETY: forwarded from the caller.
        let device = unsafe { keep(device, "device") }?;
        Ok(f(&device.0))
    })
}

/// Give: device name; an empty string for a null device.
///
/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_name(device: *const QctlDevice) -> *mut c_char {
    // SAFETY: forwarded from the caller.
    let name = unsafe { device_query(device, String::new(), |d| d.name().to_owned()) };
    give_c_string(&name)
}

/// Give: device vendor; an empty string for a null device.
///
/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_vendor_name(device: *const QctlDevice) -> *mut c_char {
    // SAFETY: forwarded from the caller.
    let vendor = unsafe { device_query(device, String::new(), |d| d.vendor().to_owned()) };
    give_c_string(&vendor)
}

/// Give: driver version; an empty string for a null device.
///
/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_driver_info(device: *const QctlDevice) -> *mut c_char {
    // SAFETY: forwarded from the caller.
    let driver =
        unsafe { device_query(device, String::new(), |d| d.driver_version().to_owned()) };
    give_c_string(&driver)
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_max_compute_units(device: *const QctlDevice) -> u32 {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, 0, Device::max_compute_units) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_max_work_item_dims(device: *const QctlDevice) -> u32 {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, 0, Device::max_work_item_dims) }
}

/// Give: the three maximum work-item sizes; null for a null device. Free
/// with `qctl_size_array_delete`.
///
/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_max_work_item_sizes(
    device: *const QctlDevice,
) -> *mut usize {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, None, |d| Some(d.max_work_item_sizes())) }
        .map_or(ptr::null_mut(), give_size_array)
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_max_work_group_size(device: *const QctlDevice) -> usize {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, 0, Device::max_work_group_size) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_max_num_sub_groups(device: *const QctlDevice) -> u32 {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, 0, Device::max_num_sub_groups) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_has_int64_base_atomics(device: *const QctlDevice) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, false, Device::has_int64_base_atomics) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_has_int64_extended_atomics(
    device: *const QctlDevice,
) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, false, Device::has_int64_extended_atomics) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_is_host_unified_memory(device: *const QctlDevice) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, false, Device::is_host_unified_memory) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_is_cpu(device: *const QctlDevice) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, false, Device::is_cpu) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_is_gpu(device: *const QctlDevice) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, false, Device::is_gpu) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_is_accelerator(device: *const QctlDevice) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, false, Device::is_accelerator) }
}

/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_is_host(device: *const QctlDevice) -> bool {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, false, Device::is_host) }
}

/// Raw backend of `device`, or 0 for a null device.
///
/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_backend(device: *const QctlDevice) -> c_uint {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, 0, |d| d.backend().as_raw()) }
}

/// Raw device type of `device`, or 0 for a null device.
///
/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_get_device_type(device: *const QctlDevice) -> c_uint {
    // SAFETY: forwarded from the caller.
    unsafe { device_query(device, 0, |d| d.device_type().as_raw()) }
}

/// Whether two devices (both keep) are the same physical device.
///
/// # Safety
///
/// Both arguments must be null or live device handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_are_eq(a: *const QctlDevice, b: *const QctlDevice) -> bool {
    guard(false, || {
        // SAFETY: forwarded from the caller.
        let (a, b) = unsafe { (keep(a, "device")?, keep(b, "device")?) };
        Ok(qctl::devices_equal(&a.0, &b.0))
    })
}

/// Give: a text description of `device` (keep); `<unavailable>` for null.
///
/// # Safety
///
/// `device` must be null or a live device handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_dump_info(device: *const QctlDevice) -> *mut c_char {
    guard(ptr::null_mut(), || {
        // SAFETY: forwarded from the caller.
        let device = unsafe { device.as_ref() };
        Ok(give_c_string(&dump_device_info(device.map(|d| &d.0))))
    })
}

/// Release a device handle. Null is ignored.
///
/// # Safety
///
/// `device` must be null or a handle given by this library, not yet deleted.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qctl_device_delete(device: *mut QctlDevice) {
    if !device.is_null() {
        // SAFETY: produced by `give`.
        drop(unsafe { Box::from_raw(device) });
    }
}
