//! Error types for queue management and the underlying compute platform.

use crate::backend::{Backend, DeviceType};

/// Failures reported by a [`Platform`](crate::platform::Platform) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The platform runtime could not be reached (no ICD, no driver, ...).
    #[error("compute platform unavailable: {0}")]
    Unavailable(String),

    #[error("context creation failed: {reason}")]
    ContextCreation { reason: String },

    #[error("queue creation failed: {reason}")]
    QueueCreation { reason: String },

    /// A native handle that the platform never issued or already released.
    #[error("unknown native handle {0:#x}")]
    UnknownHandle(u64),

    /// A raw status code returned by the underlying API.
    #[error("platform API error {code}: {message}")]
    Api { code: i32, message: String },
}

/// Errors surfaced by the queue manager, the queue pool and handle construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The (backend, device type, index) triple does not name a known queue.
    ///
    /// Also covers a platform that has zero devices of the requested category.
    #[error("no {backend} {device_type} queue at index {index}")]
    NotFound { backend: Backend, device_type: DeviceType, index: usize },

    /// `pop_queue` was called on a thread with no activated queues.
    #[error("activation stack is empty")]
    EmptyStack,

    /// The device is not part of the context it was paired with.
    #[error("device is not usable with the given context")]
    IncompatibleContext,

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl QueueError {
    pub(crate) fn not_found(backend: Backend, device_type: DeviceType, index: usize) -> Self {
        Self::NotFound { backend, device_type, index }
    }

    /// Whether this error means "no such queue", the only lookup failure the
    /// public contract distinguishes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_category() {
        let err = QueueError::not_found(Backend::OpenCl, DeviceType::Gpu, 3);
        assert_eq!(err.to_string(), "no opencl gpu queue at index 3");
        assert!(err.is_not_found());
    }

    #[test]
    fn platform_errors_convert_transparently() {
        let err: QueueError = PlatformError::Unavailable("no ICD loader".into()).into();
        assert_eq!(err.to_string(), "compute platform unavailable: no ICD loader");
        assert!(!err.is_not_found());
    }
}
