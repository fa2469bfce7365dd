//! Queue pool.
//!
//! Holds one lazily-built default queue per enumerated device. Each category's
//! queues are constructed exactly once, on first request, even when several
//! threads ask concurrently; after that the cached list is read without
//! locking.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::backend::{Backend, Category, DeviceType};
use crate::context::Context;
use crate::device::Device;
use crate::error::Result;
use crate::platform::Platform;
use crate::queue::Queue;
use crate::registry::DeviceRegistry;

pub struct QueuePool {
    platform: Arc<dyn Platform>,
    registry: DeviceRegistry,
    slots: HashMap<Category, OnceLock<Vec<Queue>>>,
}

impl QueuePool {
    /// Enumerate `platform` and prepare an empty slot per non-empty category.
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let registry = DeviceRegistry::enumerate(platform.as_ref());
        let slots = registry.categories().map(|c| (c, OnceLock::new())).collect();
        Self { platform, registry, slots }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// The cached default queues of one concrete category, building them on
    /// first use.
    ///
    /// A device whose queue cannot be created is logged and skipped, so the
    /// returned list may be shorter than the category's device list.
    pub fn category(&self, category: Category) -> &[Queue] {
        let Some(slot) = self.slots.get(&category) else {
            return &[];
        };
        slot.get_or_init(|| {
            let devices = self.registry.category(category);
            let queues: Vec<Queue> = devices
                .iter()
                .filter_map(|device| match Queue::with_default_context(&self.platform, device) {
                    Ok(queue) => Some(queue),
                    Err(e) => {
                        warn!(
                            %category,
                            device = device.name(),
                            error = %e,
                            "skipping device without a default queue"
                        );
                        None
                    }
                })
                .collect();
            debug!(
                %category,
                queues = queues.len(),
                devices = devices.len(),
                "built default queues"
            );
            queues
        })
    }

    /// The `index`-th default queue matching (backend, device type).
    pub fn queue(&self, backend: Backend, device_type: DeviceType, index: usize) -> Option<Queue> {
        let mut remaining = index;
        for category in self.registry.resolve(backend, device_type) {
            let queues = self.category(category);
            if remaining < queues.len() {
                return Some(queues[remaining].clone());
            }
            remaining -= queues.len();
        }
        None
    }

    /// Number of default queues matching (backend, device type).
    pub fn num_queues(&self, backend: Backend, device_type: DeviceType) -> usize {
        self.registry
            .resolve(backend, device_type)
            .into_iter()
            .map(|c| self.category(c).len())
            .sum()
    }

    /// A fresh queue bound to exactly `context` and `device`, bypassing the
    /// cache.
    pub fn queue_from_context_and_device(
        &self,
        context: &Context,
        device: &Device,
    ) -> Result<Queue> {
        Queue::new(context, device)
    }

    /// A fresh queue on `device` inside a new single-device context.
    pub fn create_queue_for_device(&self, device: &Device) -> Result<Queue> {
        Queue::with_default_context(&self.platform, device)
    }
}

impl std::fmt::Debug for QueuePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePool")
            .field("platform", &self.platform.name())
            .field("devices", &self.registry.len())
            .field("initialized", &self.slots.values().filter(|s| s.get().is_some()).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceSpec, PlatformConfig};
    use crate::reference::ReferencePlatform;

    fn pool() -> (Arc<ReferencePlatform>, QueuePool) {
        let config = PlatformConfig {
            probe_host: false,
            devices: vec![
                DeviceSpec::new(Backend::OpenCl, DeviceType::Cpu).with_count(2),
                DeviceSpec::new(Backend::OpenCl, DeviceType::Gpu),
            ],
            ..PlatformConfig::default()
        };
        let reference = Arc::new(ReferencePlatform::from_config(&config));
        let pool = QueuePool::new(reference.clone());
        (reference, pool)
    }

    #[test]
    fn queues_are_built_lazily_per_category() {
        let (reference, pool) = pool();
        assert_eq!(reference.live_queues(), 0);

        let q = pool.queue(Backend::OpenCl, DeviceType::Cpu, 0).unwrap();
        assert_eq!(reference.live_queues(), 2);
        assert!(q.device().is_cpu());

        pool.queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
        assert_eq!(reference.live_queues(), 3);
    }

    #[test]
    fn repeated_requests_reuse_the_cached_queue() {
        let (reference, pool) = pool();
        let a = pool.queue(Backend::OpenCl, DeviceType::Cpu, 1).unwrap();
        let b = pool.queue(Backend::OpenCl, DeviceType::Cpu, 1).unwrap();
        assert!(a.same_handle(&b));
        assert_eq!(reference.live_queues(), 2);
    }

    #[test]
    fn out_of_range_index_is_none() {
        let (_, pool) = pool();
        assert_eq!(pool.num_queues(Backend::OpenCl, DeviceType::Cpu), 2);
        assert!(pool.queue(Backend::OpenCl, DeviceType::Cpu, 2).is_none());
        assert!(pool.queue(Backend::LevelZero, DeviceType::Gpu, 0).is_none());
        assert_eq!(pool.num_queues(Backend::Host, DeviceType::Host), 0);
    }

    #[test]
    fn explicit_pair_bypasses_the_cache() {
        let (reference, pool) = pool();
        let default = pool.queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
        let fresh =
            pool.queue_from_context_and_device(default.context(), default.device()).unwrap();
        assert_eq!(fresh, default);
        assert!(!fresh.same_handle(&default));
        assert_eq!(reference.live_queues(), 2);
        drop(fresh);
        assert_eq!(reference.live_queues(), 1);
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        let (reference, pool) = pool();
        let pool = Arc::new(pool);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.queue(Backend::OpenCl, DeviceType::Cpu, 0).unwrap())
            })
            .collect();
        let queues: Vec<Queue> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(queues.windows(2).all(|w| w[0].same_handle(&w[1])));
        assert_eq!(reference.live_queues(), 2);
    }
}
