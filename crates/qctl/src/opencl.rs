//! OpenCL platform backed by the `opencl3` crate.
//!
//! Enumerates every device of every installed OpenCL platform and creates real
//! contexts and command queues. Native handles are the raw OpenCL object
//! pointers, so handle equality is OpenCL object identity.

use std::collections::HashMap;
use std::sync::Mutex;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_CUSTOM,
    CL_DEVICE_TYPE_GPU, Device as ClDevice,
};
use opencl3::platform::get_platforms;
use opencl3::types::{cl_device_id, cl_device_type};
use tracing::{debug, info, warn};

use crate::backend::{Backend, DeviceType};
use crate::device::{Device, DeviceDescriptor, DeviceProperties, WORK_ITEM_DIMS};
use crate::error::PlatformError;
use crate::handle::NativeHandle;
use crate::platform::Platform;

const INT64_BASE_ATOMICS: &str = "cl_khr_int64_base_atomics";
const INT64_EXTENDED_ATOMICS: &str = "cl_khr_int64_extended_atomics";

struct Live {
    contexts: HashMap<NativeHandle, Context>,
    queues: HashMap<NativeHandle, CommandQueue>,
}

// SAFETY: OpenCL objects are thread-safe per the OpenCL specification; the
// wrappers are only reached through the enclosing Mutex.
unsafe impl Send for Live {}

/// OpenCL devices discovered through the installed ICD loader.
pub struct OpenClPlatform {
    devices: Vec<DeviceDescriptor>,
    live: Mutex<Live>,
}

impl OpenClPlatform {
    /// Enumerate every OpenCL platform and device.
    ///
    /// Fails only when the ICD loader itself is unusable; a platform whose
    /// devices cannot be listed is skipped.
    pub fn new() -> Result<Self, PlatformError> {
        let platforms = get_platforms().map_err(|e| PlatformError::Api {
            code: e.0,
            message: format!("failed to get OpenCL platforms: {e}"),
        })?;

        let mut devices = Vec::new();
        for platform in &platforms {
            let platform_name = platform.name().unwrap_or_default();
            let ids = match platform.get_devices(CL_DEVICE_TYPE_ALL) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(platform = %platform_name, error = %e, "skipping OpenCL platform");
                    continue;
                }
            };
            for id in ids {
                match describe(id) {
                    Some(descriptor) => {
                        debug!(
                            platform = %platform_name,
                            device = %descriptor.properties.name,
                            device_type = %descriptor.device_type,
                            "found OpenCL device"
                        );
                        devices.push(descriptor);
                    }
                    None => warn!(platform = %platform_name, "skipping OpenCL device of unknown type"),
                }
            }
        }
        info!(platforms = platforms.len(), devices = devices.len(), "OpenCL platform ready");

        Ok(Self {
            devices,
            live: Mutex::new(Live { contexts: HashMap::new(), queues: HashMap::new() }),
        })
    }
}

fn native_of(id: cl_device_id) -> NativeHandle {
    NativeHandle(id as usize as u64)
}

fn id_of(device: &Device) -> cl_device_id {
    device.native().get() as usize as cl_device_id
}

fn device_type_of(bits: cl_device_type) -> Option<DeviceType> {
    // A device may report several bits; the most specific wins.
    if bits & CL_DEVICE_TYPE_GPU != 0 {
        Some(DeviceType::Gpu)
    } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        Some(DeviceType::Accelerator)
    } else if bits & CL_DEVICE_TYPE_CPU != 0 {
        Some(DeviceType::Cpu)
    } else if bits & CL_DEVICE_TYPE_CUSTOM != 0 {
        Some(DeviceType::Custom)
    } else {
        None
    }
}

fn describe(id: cl_device_id) -> Option<DeviceDescriptor> {
    let device = ClDevice::new(id);
    let device_type = device_type_of(device.dev_type().ok()?)?;
    let extensions = device.extensions().unwrap_or_default();

    let mut max_work_item_sizes = [0; WORK_ITEM_DIMS];
    for (slot, size) in
        max_work_item_sizes.iter_mut().zip(device.max_work_item_sizes().unwrap_or_default())
    {
        *slot = size;
    }

    Some(DeviceDescriptor {
        native: native_of(id),
        backend: Backend::OpenCl,
        device_type,
        properties: DeviceProperties {
            name: device.name().unwrap_or_default(),
            vendor: device.vendor().unwrap_or_default(),
            driver_version: device.driver_version().unwrap_or_default(),
            max_compute_units: device.max_compute_units().unwrap_or(0),
            max_work_item_dims: device.max_work_item_dimensions().unwrap_or(0),
            max_work_item_sizes,
            max_work_group_size: device.max_work_group_size().unwrap_or(0),
            max_num_sub_groups: device.max_num_sub_groups().unwrap_or(0),
            has_int64_base_atomics: extensions.contains(INT64_BASE_ATOMICS),
            has_int64_extended_atomics: extensions.contains(INT64_EXTENDED_ATOMICS),
            host_unified_memory: device.host_unified_memory().unwrap_or(false),
        },
    })
}

impl Platform for OpenClPlatform {
    fn name(&self) -> &str {
        "opencl"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        Ok(self.devices.clone())
    }

    fn create_context(&self, devices: &[Device]) -> Result<NativeHandle, PlatformError> {
        let ids: Vec<cl_device_id> = devices.iter().map(id_of).collect();
        let context = Context::from_devices(&ids, &[], None, std::ptr::null_mut()).map_err(|e| {
            PlatformError::ContextCreation { reason: format!("OpenCL context: {e}") }
        })?;
        let handle = NativeHandle(context.get() as usize as u64);
        self.live
            .lock()
            .map_err(|e| PlatformError::ContextCreation { reason: e.to_string() })?
            .contexts
            .insert(handle, context);
        Ok(handle)
    }

    fn create_queue(
        &self,
        context: NativeHandle,
        device: &Device,
    ) -> Result<NativeHandle, PlatformError> {
        let mut live =
            self.live.lock().map_err(|e| PlatformError::QueueCreation { reason: e.to_string() })?;
        let ctx = live.contexts.get(&context).ok_or(PlatformError::UnknownHandle(context.get()))?;
        let id = id_of(device);
        if !ctx.devices().contains(&id) {
            return Err(PlatformError::QueueCreation {
                reason: format!("device {} is not part of context {context}", device.native()),
            });
        }
        // SAFETY: `id` belongs to `ctx`, checked above.
        let queue = unsafe { CommandQueue::create_with_properties(ctx, id, 0, 0) }.map_err(|e| {
            PlatformError::QueueCreation { reason: format!("OpenCL command queue: {e}") }
        })?;
        let handle = NativeHandle(queue.get() as usize as u64);
        live.queues.insert(handle, queue);
        Ok(handle)
    }

    fn release_context(&self, context: NativeHandle) {
        if let Ok(mut live) = self.live.lock() {
            if live.contexts.remove(&context).is_none() {
                warn!(%context, "release of unknown OpenCL context ignored");
            }
        }
    }

    fn release_queue(&self, queue: NativeHandle) {
        if let Ok(mut live) = self.live.lock() {
            if live.queues.remove(&queue).is_none() {
                warn!(%queue, "release of unknown OpenCL queue ignored");
            }
        }
    }
}

impl std::fmt::Debug for OpenClPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClPlatform").field("devices", &self.devices.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_specific_type_wins() {
        assert_eq!(device_type_of(CL_DEVICE_TYPE_GPU | CL_DEVICE_TYPE_CPU), Some(DeviceType::Gpu));
        assert_eq!(device_type_of(CL_DEVICE_TYPE_CPU), Some(DeviceType::Cpu));
        assert_eq!(device_type_of(CL_DEVICE_TYPE_ACCELERATOR), Some(DeviceType::Accelerator));
        assert_eq!(device_type_of(CL_DEVICE_TYPE_CUSTOM), Some(DeviceType::Custom));
        assert_eq!(device_type_of(0), None);
    }

    #[test]
    #[ignore = "requires an OpenCL ICD loader"]
    fn enumerates_installed_devices() {
        let platform = OpenClPlatform::new().unwrap();
        for d in platform.enumerate_devices().unwrap() {
            assert_eq!(d.backend, Backend::OpenCl);
            assert!(d.device_type.is_concrete());
        }
    }
}
