//! Device handles and their read-only properties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::backend::{Backend, Category, DeviceType};
use crate::handle::NativeHandle;

/// Number of entries in [`DeviceProperties::max_work_item_sizes`].
pub const WORK_ITEM_DIMS: usize = 3;

/// Read-only attributes reported for a device at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceProperties {
    pub name: String,
    pub vendor: String,
    /// Driver version in `major.minor` form where the backend reports one.
    pub driver_version: String,
    pub max_compute_units: u32,
    pub max_work_item_dims: u32,
    pub max_work_item_sizes: [usize; WORK_ITEM_DIMS],
    pub max_work_group_size: usize,
    pub max_num_sub_groups: u32,
    pub has_int64_base_atomics: bool,
    pub has_int64_extended_atomics: bool,
    /// Device and host share one memory subsystem.
    pub host_unified_memory: bool,
}

/// What a platform reports for one device during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub native: NativeHandle,
    pub backend: Backend,
    pub device_type: DeviceType,
    pub properties: DeviceProperties,
}

/// Opaque, cheaply clonable handle to a compute device.
///
/// Cloning copies the handle value; every clone refers to the same device and
/// compares equal to it. Devices are immutable for the lifetime of the process.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceDescriptor>,
}

impl Device {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self { inner: Arc::new(descriptor) }
    }

    pub fn native(&self) -> NativeHandle {
        self.inner.native
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    pub fn device_type(&self) -> DeviceType {
        self.inner.device_type
    }

    pub fn category(&self) -> Category {
        Category::new(self.inner.backend, self.inner.device_type)
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.inner.properties
    }

    pub fn name(&self) -> &str {
        &self.inner.properties.name
    }

    pub fn vendor(&self) -> &str {
        &self.inner.properties.vendor
    }

    pub fn driver_version(&self) -> &str {
        &self.inner.properties.driver_version
    }

    pub fn max_compute_units(&self) -> u32 {
        self.inner.properties.max_compute_units
    }

    pub fn max_work_item_dims(&self) -> u32 {
        self.inner.properties.max_work_item_dims
    }

    pub fn max_work_item_sizes(&self) -> [usize; WORK_ITEM_DIMS] {
        self.inner.properties.max_work_item_sizes
    }

    pub fn max_work_group_size(&self) -> usize {
        self.inner.properties.max_work_group_size
    }

    pub fn max_num_sub_groups(&self) -> u32 {
        self.inner.properties.max_num_sub_groups
    }

    pub fn has_int64_base_atomics(&self) -> bool {
        self.inner.properties.has_int64_base_atomics
    }

    pub fn has_int64_extended_atomics(&self) -> bool {
        self.inner.properties.has_int64_extended_atomics
    }

    pub fn is_host_unified_memory(&self) -> bool {
        self.inner.properties.host_unified_memory
    }

    pub fn is_cpu(&self) -> bool {
        self.inner.device_type == DeviceType::Cpu
    }

    pub fn is_gpu(&self) -> bool {
        self.inner.device_type == DeviceType::Gpu
    }

    pub fn is_accelerator(&self) -> bool {
        self.inner.device_type == DeviceType::Accelerator
    }

    pub fn is_host(&self) -> bool {
        self.inner.device_type == DeviceType::Host
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.backend == other.inner.backend && self.inner.native == other.inner.native
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.backend.hash(state);
        self.inner.native.hash(state);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("native", &self.inner.native)
            .field("category", &self.category())
            .field("name", &self.inner.properties.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(native: u64, backend: Backend, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            native: NativeHandle(native),
            backend,
            device_type: DeviceType::Gpu,
            properties: DeviceProperties {
                name: name.to_owned(),
                vendor: "Acme".to_owned(),
                driver_version: "1.2".to_owned(),
                max_compute_units: 32,
                max_work_item_dims: 3,
                max_work_item_sizes: [256, 256, 256],
                max_work_group_size: 256,
                max_num_sub_groups: 8,
                has_int64_base_atomics: true,
                has_int64_extended_atomics: false,
                host_unified_memory: false,
            },
        }
    }

    #[test]
    fn equality_follows_native_identity_not_properties() {
        let a = Device::new(descriptor(7, Backend::OpenCl, "first"));
        let b = Device::new(descriptor(7, Backend::OpenCl, "renamed"));
        let c = Device::new(descriptor(8, Backend::OpenCl, "first"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn same_native_value_on_another_backend_is_a_different_device() {
        let a = Device::new(descriptor(7, Backend::OpenCl, "gpu"));
        let b = Device::new(descriptor(7, Backend::LevelZero, "gpu"));
        assert_ne!(a, b);
    }

    #[test]
    fn accessors_read_the_descriptor() {
        let dev = Device::new(descriptor(1, Backend::LevelZero, "Arc A770"));
        assert!(dev.is_gpu());
        assert!(!dev.is_cpu());
        assert_eq!(dev.name(), "Arc A770");
        assert_eq!(dev.max_work_item_sizes(), [256, 256, 256]);
        assert_eq!(dev.category().to_string(), "level_zero:gpu");
        assert!(format!("{dev:?}").contains("Arc A770"));
    }
}
