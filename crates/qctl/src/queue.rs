//! Queue handles.
//!
//! A `Queue` binds exactly one device and one context. Functions that return
//! a `Queue` by value give the caller its own handle copy; functions that take
//! `&Queue` only borrow it. The platform queue is released when the last copy
//! is dropped, so a handle can never be released twice or used after release.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, Category, DeviceType};
use crate::context::Context;
use crate::device::Device;
use crate::error::{QueueError, Result};
use crate::handle::NativeHandle;

struct QueueInner {
    native: NativeHandle,
    device: Device,
    context: Context,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        debug!(queue = %self.native, "releasing queue");
        self.context.platform().release_queue(self.native);
    }
}

/// Opaque, cheaply clonable handle to a platform queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Create a fresh queue bound to exactly `context` and `device`.
    ///
    /// Fails with [`QueueError::IncompatibleContext`] when the device is not
    /// part of the context.
    pub fn new(context: &Context, device: &Device) -> Result<Self> {
        if !context.contains(device) {
            return Err(QueueError::IncompatibleContext);
        }
        let native = context.platform().create_queue(context.native(), device)?;
        debug!(
            queue = %native,
            context = %context.native(),
            device = device.name(),
            "created queue"
        );
        Ok(Self {
            inner: Arc::new(QueueInner {
                native,
                device: device.clone(),
                context: context.clone(),
            }),
        })
    }

    /// Create a queue on `device` inside a new single-device context.
    pub(crate) fn with_default_context(
        platform: &Arc<dyn crate::platform::Platform>,
        device: &Device,
    ) -> Result<Self> {
        let context = Context::create(platform, std::slice::from_ref(device))?;
        Self::new(&context, device)
    }

    pub fn native(&self) -> NativeHandle {
        self.inner.native
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn backend(&self) -> Backend {
        self.inner.device.backend()
    }

    pub fn device_type(&self) -> DeviceType {
        self.inner.device.device_type()
    }

    pub fn category(&self) -> Category {
        self.inner.device.category()
    }

    /// Whether both values are copies of one handle, as opposed to two
    /// queues on the same device and context.
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.device == other.inner.device && self.inner.context == other.inner.context
    }
}

impl Eq for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("native", &self.inner.native)
            .field("device", &self.inner.device)
            .field("context", &self.inner.context.native())
            .finish()
    }
}
