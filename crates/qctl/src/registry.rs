//! Device registry.
//!
//! Enumerates a platform once and partitions its devices by [`Category`].
//! Indexing within a category follows platform enumeration order and is stable
//! for the lifetime of the registry. Unknown or empty categories read as empty.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::backend::{Backend, Category, DeviceType};
use crate::device::Device;
use crate::platform::Platform;

/// Snapshot of every device a platform exposed at enumeration time.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    categories: BTreeMap<Category, Vec<Device>>,
}

impl DeviceRegistry {
    /// Enumerate `platform` and partition its devices.
    ///
    /// A platform that fails to enumerate yields an empty registry; every
    /// later lookup then reports "not found".
    pub fn enumerate(platform: &dyn Platform) -> Self {
        match platform.enumerate_devices() {
            Ok(descriptors) => {
                let registry = Self::from_devices(descriptors.into_iter().map(Device::new));
                info!(
                    platform = platform.name(),
                    devices = registry.len(),
                    categories = registry.categories.len(),
                    "device registry built"
                );
                registry
            }
            Err(e) => {
                warn!(platform = platform.name(), error = %e, "device enumeration failed");
                Self::default()
            }
        }
    }

    /// Partition already-enumerated devices, preserving their order.
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut categories: BTreeMap<Category, Vec<Device>> = BTreeMap::new();
        for device in devices {
            categories.entry(device.category()).or_default().push(device);
        }
        Self { categories }
    }

    /// Concrete categories that hold at least one device, in key order.
    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.categories.keys().copied()
    }

    /// Devices of one concrete category.
    pub fn category(&self, category: Category) -> &[Device] {
        self.categories.get(&category).map_or(&[], Vec::as_slice)
    }

    /// Resolve a (backend, device type) request to concrete categories.
    ///
    /// `All` concatenates the backend's categories in [`DeviceType::CONCRETE`]
    /// order; `Automatic` picks the first non-empty category in
    /// [`DeviceType::AUTOMATIC_PREFERENCE`].
    pub fn resolve(&self, backend: Backend, device_type: DeviceType) -> Vec<Category> {
        match device_type {
            DeviceType::All => DeviceType::CONCRETE
                .iter()
                .map(|&t| Category::new(backend, t))
                .filter(|c| self.categories.contains_key(c))
                .collect(),
            DeviceType::Automatic => DeviceType::AUTOMATIC_PREFERENCE
                .iter()
                .map(|&t| Category::new(backend, t))
                .find(|c| self.categories.contains_key(c))
                .into_iter()
                .collect(),
            concrete => vec![Category::new(backend, concrete)],
        }
    }

    /// Devices matching a request, in resolution order.
    pub fn devices(&self, backend: Backend, device_type: DeviceType) -> Vec<Device> {
        self.resolve(backend, device_type)
            .into_iter()
            .flat_map(|c| self.category(c).iter().cloned())
            .collect()
    }

    /// Number of devices matching a request; zero for unknown combinations.
    pub fn count_of(&self, backend: Backend, device_type: DeviceType) -> usize {
        self.resolve(backend, device_type).into_iter().map(|c| self.category(c).len()).sum()
    }

    /// The `index`-th device matching a request.
    pub fn device(
        &self,
        backend: Backend,
        device_type: DeviceType,
        index: usize,
    ) -> Option<Device> {
        let mut remaining = index;
        for category in self.resolve(backend, device_type) {
            let devices = self.category(category);
            if remaining < devices.len() {
                return Some(devices[remaining].clone());
            }
            remaining -= devices.len();
        }
        None
    }

    /// Total number of devices.
    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
