//! Native resource identity and the equality layer.
//!
//! Handles compare by the resource they wrap, never by wrapper address: two
//! [`Device`]s are equal when they name the same platform device, two
//! [`Context`]s when they wrap the same platform context, and two [`Queue`]s
//! when both their device and their context are equal.

use std::fmt;

use crate::context::Context;
use crate::device::Device;
use crate::queue::Queue;

/// Pointer-sized identifier issued by a platform for a device, context or queue.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:#x})", self.0)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Whether both handles denote the same underlying device.
pub fn devices_equal(a: &Device, b: &Device) -> bool {
    a == b
}

/// Whether both handles wrap the same underlying context.
pub fn contexts_equal(a: &Context, b: &Context) -> bool {
    a == b
}

/// Whether both queues are bound to the same device and the same context.
pub fn queues_equal(a: &Queue, b: &Queue) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, DeviceType};
    use crate::config::{DeviceSpec, PlatformConfig};
    use crate::platform::Platform;
    use crate::reference::ReferencePlatform;
    use std::sync::Arc;

    fn platform() -> Arc<dyn Platform> {
        let config = PlatformConfig {
            probe_host: false,
            devices: vec![DeviceSpec::new(Backend::OpenCl, DeviceType::Cpu)],
            ..PlatformConfig::default()
        };
        Arc::new(ReferencePlatform::from_config(&config))
    }

    #[test]
    fn copies_of_a_handle_are_equal() {
        let platform = platform();
        let device = Device::new(platform.enumerate_devices().unwrap().remove(0));
        let context = Context::create(&platform, std::slice::from_ref(&device)).unwrap();
        let queue = Queue::new(&context, &device).unwrap();

        assert!(devices_equal(&device, &device.clone()));
        assert!(contexts_equal(&context, &context.clone()));
        assert!(queues_equal(&queue, &queue.clone()));
    }

    #[test]
    fn distinct_contexts_on_one_device_differ() {
        let platform = platform();
        let device = Device::new(platform.enumerate_devices().unwrap().remove(0));
        let a = Context::create(&platform, std::slice::from_ref(&device)).unwrap();
        let b = Context::create(&platform, std::slice::from_ref(&device)).unwrap();
        assert!(!contexts_equal(&a, &b));

        let qa = Queue::new(&a, &device).unwrap();
        let qb = Queue::new(&b, &device).unwrap();
        assert!(!queues_equal(&qa, &qb));
        assert!(devices_equal(qa.device(), qb.device()));
    }

    #[test]
    fn native_handle_formats_as_hex() {
        assert_eq!(NativeHandle(255).to_string(), "0xff");
        assert_eq!(format!("{:?}", NativeHandle(16)), "NativeHandle(0x10)");
    }
}
