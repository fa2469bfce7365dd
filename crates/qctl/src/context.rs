//! Context handles.
//!
//! A `Context` wraps a platform context created for one or more devices of a
//! single backend. It is reference counted: the platform context is released
//! when the last handle copy (including those held inside queues) is dropped.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::backend::Backend;
use crate::device::Device;
use crate::error::PlatformError;
use crate::handle::NativeHandle;
use crate::platform::Platform;

struct ContextInner {
    native: NativeHandle,
    backend: Backend,
    devices: Vec<Device>,
    platform: Arc<dyn Platform>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        debug!(context = %self.native, "releasing context");
        self.platform.release_context(self.native);
    }
}

/// Opaque, cheaply clonable handle to a platform context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a new platform context for `devices`.
    ///
    /// All devices must share a backend; an empty device list is rejected.
    pub fn create(platform: &Arc<dyn Platform>, devices: &[Device]) -> Result<Self, PlatformError> {
        let first = devices.first().ok_or_else(|| PlatformError::ContextCreation {
            reason: "a context needs at least one device".into(),
        })?;
        let backend = first.backend();
        if let Some(other) = devices.iter().find(|d| d.backend() != backend) {
            return Err(PlatformError::ContextCreation {
                reason: format!("devices span backends {backend} and {}", other.backend()),
            });
        }

        let native = platform.create_context(devices)?;
        debug!(context = %native, %backend, devices = devices.len(), "created context");
        Ok(Self {
            inner: Arc::new(ContextInner {
                native,
                backend,
                devices: devices.to_vec(),
                platform: Arc::clone(platform),
            }),
        })
    }

    pub fn native(&self) -> NativeHandle {
        self.inner.native
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    /// Whether `device` is one of the devices this context was created for.
    pub fn contains(&self, device: &Device) -> bool {
        self.inner.devices.contains(device)
    }

    pub(crate) fn platform(&self) -> &Arc<dyn Platform> {
        &self.inner.platform
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.backend == other.inner.backend && self.inner.native == other.inner.native
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("native", &self.inner.native)
            .field("backend", &self.inner.backend)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}
