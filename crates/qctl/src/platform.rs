//! The seam between queue management and a concrete compute runtime.

use crate::device::{Device, DeviceDescriptor};
use crate::error::PlatformError;
use crate::handle::NativeHandle;

/// A compute runtime that can enumerate devices and create contexts and queues.
///
/// Abstracted so the registry, pool and manager can be exercised without real
/// accelerator hardware. Implementations are shared across threads.
pub trait Platform: Send + Sync {
    /// Short name used in logs and diagnostics (e.g. `"reference"`, `"opencl"`).
    fn name(&self) -> &str;

    /// Report every device the runtime exposes, in a stable order.
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError>;

    /// Create a context spanning `devices`.
    fn create_context(&self, devices: &[Device]) -> Result<NativeHandle, PlatformError>;

    /// Create a queue on `device` inside `context`.
    fn create_queue(
        &self,
        context: NativeHandle,
        device: &Device,
    ) -> Result<NativeHandle, PlatformError>;

    /// Release a context. Called exactly once, when the last handle copy drops.
    fn release_context(&self, context: NativeHandle);

    /// Release a queue. Called exactly once, when the last handle copy drops.
    fn release_queue(&self, queue: NativeHandle);
}
