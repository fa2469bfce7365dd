//! Host reference platform.
//!
//! A deterministic CPU implementation of the [`Platform`] surface: devices are
//! described by a [`PlatformConfig`] (plus, optionally, the host CPU), and
//! contexts and queues are bookkeeping entries keyed by handles drawn from a
//! process-wide counter. It enforces the same compatibility rules a real
//! runtime does and counts live resources so release discipline can be
//! checked.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::backend::{Backend, DeviceType};
use crate::config::{DeviceSpec, PlatformConfig};
use crate::device::{Device, DeviceDescriptor, DeviceProperties, WORK_ITEM_DIMS};
use crate::error::PlatformError;
use crate::handle::NativeHandle;
use crate::platform::Platform;

// ── Handle generation ───────────────────────────────────────────────────────

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

fn next_handle() -> NativeHandle {
    NativeHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

// ── ReferencePlatform ───────────────────────────────────────────────────────

/// Deterministic platform whose devices come from configuration.
#[derive(Debug)]
pub struct ReferencePlatform {
    devices: Vec<DeviceDescriptor>,
    /// Live contexts and the devices each was created for.
    contexts: Mutex<HashMap<NativeHandle, Vec<NativeHandle>>>,
    queues: Mutex<HashSet<NativeHandle>>,
}

impl ReferencePlatform {
    /// Build the device list described by `config`.
    ///
    /// Configured devices come first, in order; the host device, when probed,
    /// is appended last.
    pub fn from_config(config: &PlatformConfig) -> Self {
        let mut devices = Vec::new();
        for spec in &config.devices {
            for ordinal in 0..spec.count {
                devices.push(describe(spec, ordinal));
            }
        }
        if config.probe_host {
            devices.push(describe_host());
        }
        info!(devices = devices.len(), probe_host = config.probe_host, "reference platform ready");
        Self::with_devices(devices)
    }

    /// Build a platform exposing exactly `devices`.
    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices, contexts: Mutex::new(HashMap::new()), queues: Mutex::new(HashSet::new()) }
    }

    /// Number of contexts created and not yet released.
    pub fn live_contexts(&self) -> usize {
        self.contexts.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of queues created and not yet released.
    pub fn live_queues(&self) -> usize {
        self.queues.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn knows(&self, device: &Device) -> bool {
        self.devices.iter().any(|d| d.native == device.native() && d.backend == device.backend())
    }
}

impl Platform for ReferencePlatform {
    fn name(&self) -> &str {
        "reference"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        Ok(self.devices.clone())
    }

    fn create_context(&self, devices: &[Device]) -> Result<NativeHandle, PlatformError> {
        if devices.is_empty() {
            return Err(PlatformError::ContextCreation { reason: "no devices".into() });
        }
        if let Some(unknown) = devices.iter().find(|d| !self.knows(d)) {
            return Err(PlatformError::UnknownHandle(unknown.native().get()));
        }
        let handle = next_handle();
        let members = devices.iter().map(Device::native).collect();
        self.contexts
            .lock()
            .map_err(|e| PlatformError::ContextCreation { reason: e.to_string() })?
            .insert(handle, members);
        Ok(handle)
    }

    fn create_queue(
        &self,
        context: NativeHandle,
        device: &Device,
    ) -> Result<NativeHandle, PlatformError> {
        let contexts = self
            .contexts
            .lock()
            .map_err(|e| PlatformError::QueueCreation { reason: e.to_string() })?;
        let members = contexts.get(&context).ok_or(PlatformError::UnknownHandle(context.get()))?;
        if !members.contains(&device.native()) {
            return Err(PlatformError::QueueCreation {
                reason: format!("device {} is not part of context {context}", device.native()),
            });
        }
        drop(contexts);

        let handle = next_handle();
        self.queues
            .lock()
            .map_err(|e| PlatformError::QueueCreation { reason: e.to_string() })?
            .insert(handle);
        Ok(handle)
    }

    fn release_context(&self, context: NativeHandle) {
        let removed =
            self.contexts.lock().map(|mut c| c.remove(&context).is_some()).unwrap_or(false);
        if !removed {
            warn!(%context, "release of unknown context ignored");
        }
    }

    fn release_queue(&self, queue: NativeHandle) {
        let removed = self.queues.lock().map(|mut q| q.remove(&queue)).unwrap_or(false);
        if !removed {
            warn!(%queue, "release of unknown queue ignored");
        }
    }
}

// ── Device descriptions ─────────────────────────────────────────────────────

fn host_parallelism() -> u32 {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
        .try_into()
        .unwrap_or(u32::MAX)
}

fn describe(spec: &DeviceSpec, ordinal: usize) -> DeviceDescriptor {
    let (units, group, sub_groups, unified) = match spec.device_type {
        DeviceType::Cpu | DeviceType::Host => (host_parallelism(), 8192, 1, true),
        DeviceType::Gpu => (96, 1024, 64, false),
        DeviceType::Accelerator => (16, 256, 8, false),
        _ => (1, 64, 1, false),
    };
    let base_name =
        spec.name.clone().unwrap_or_else(|| default_name(spec.backend, spec.device_type));
    let name = if spec.count > 1 { format!("{base_name} #{ordinal}") } else { base_name };
    let max_work_group_size = spec.max_work_group_size.unwrap_or(group);

    let descriptor = DeviceDescriptor {
        native: next_handle(),
        backend: spec.backend,
        device_type: spec.device_type,
        properties: DeviceProperties {
            name,
            vendor: spec.vendor.clone().unwrap_or_else(|| "qctl reference".to_owned()),
            driver_version: spec.driver_version.clone().unwrap_or_else(reference_driver_version),
            max_compute_units: spec.max_compute_units.unwrap_or(units),
            max_work_item_dims: WORK_ITEM_DIMS as u32,
            max_work_item_sizes: [max_work_group_size; WORK_ITEM_DIMS],
            max_work_group_size,
            max_num_sub_groups: spec.max_num_sub_groups.unwrap_or(sub_groups),
            has_int64_base_atomics: spec.int64_base_atomics.unwrap_or(true),
            has_int64_extended_atomics: spec.int64_extended_atomics.unwrap_or(unified),
            host_unified_memory: spec.host_unified_memory.unwrap_or(unified),
        },
    };
    debug!(
        device = %descriptor.native,
        backend = %spec.backend,
        device_type = %spec.device_type,
        name = %descriptor.properties.name,
        "described reference device"
    );
    descriptor
}

fn describe_host() -> DeviceDescriptor {
    let mut spec = DeviceSpec::new(Backend::Host, DeviceType::Host).with_name(host_cpu_name());
    spec.vendor = Some(std::env::consts::ARCH.to_owned());
    describe(&spec, 0)
}

fn default_name(backend: Backend, device_type: DeviceType) -> String {
    format!("Reference {backend} {device_type} device")
}

fn reference_driver_version() -> String {
    let major = env!("CARGO_PKG_VERSION_MAJOR");
    let minor = env!("CARGO_PKG_VERSION_MINOR");
    format!("{major}.{minor}")
}

fn host_cpu_name() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|info| {
                info.lines()
                    .find(|l| l.starts_with("model name"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_owned())
            })
            .unwrap_or_else(|| "Host CPU".to_owned())
    }
    #[cfg(not(target_os = "linux"))]
    {
        "Host CPU".to_owned()
    }
}
