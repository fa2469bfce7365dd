//! Error codes and thread-local last-error state for the C API.
//!
//! No error crosses the boundary as a Rust value or a panic. Each exported
//! function clears the calling thread's last error on entry, records one on
//! failure, and returns a sentinel (null, zero, false, or a negative status).

use std::any::Any;
use std::cell::RefCell;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

use qctl::QueueError;

pub const QCTL_SUCCESS: c_int = 0;
pub const QCTL_ERROR_NOT_FOUND: c_int = -1;
pub const QCTL_ERROR_EMPTY_STACK: c_int = -2;
pub const QCTL_ERROR_INVALID_ARGUMENT: c_int = -3;
pub const QCTL_ERROR_INVALID_HANDLE: c_int = -4;
pub const QCTL_ERROR_INTERNAL: c_int = -5;

/// Failure of one C API call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QctlCError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("null or invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl QctlCError {
    /// Status code reported for this error.
    ///
    /// Platform failures and incompatible (context, device) pairs surface as
    /// "not found", like any other lookup that yields no queue.
    pub fn code(&self) -> c_int {
        match self {
            Self::InvalidArgument(_) => QCTL_ERROR_INVALID_ARGUMENT,
            Self::InvalidHandle(_) => QCTL_ERROR_INVALID_HANDLE,
            Self::Queue(QueueError::EmptyStack) => QCTL_ERROR_EMPTY_STACK,
            Self::Queue(
                QueueError::NotFound { .. }
                | QueueError::IncompatibleContext
                | QueueError::Platform(_),
            ) => QCTL_ERROR_NOT_FOUND,
            Self::Queue(QueueError::LockPoisoned(_)) | Self::Internal(_) => QCTL_ERROR_INTERNAL,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<QctlCError>> = const { RefCell::new(None) };
}

pub fn set_last_error(error: QctlCError) {
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(error));
}

pub fn get_last_error() -> Option<QctlCError> {
    LAST_ERROR.with(|e| e.borrow().clone())
}

pub fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Run `f` at the C boundary.
///
/// Errors and panics are recorded as the thread's last error and replaced by
/// `fallback`.
pub(crate) fn guard<T>(fallback: T, f: impl FnOnce() -> Result<T, QctlCError>) -> T {
    clear_last_error();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, code = e.code(), "C API call failed");
            set_last_error(e);
            fallback
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(%message, "panic caught at the C boundary");
            set_last_error(QctlCError::Internal(message));
            fallback
        }
    }
}

/// Like [`guard`], for calls that report a status code.
pub(crate) fn guard_status(f: impl FnOnce() -> Result<(), QctlCError>) -> c_int {
    clear_last_error();
    guard((), f);
    get_last_error().map_or(QCTL_SUCCESS, |e| e.code())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qctl::{Backend, DeviceType, PlatformError};

    #[test]
    fn codes_follow_the_taxonomy() {
        let not_found = QueueError::NotFound {
            backend: Backend::OpenCl,
            device_type: DeviceType::Gpu,
            index: 3,
        };
        assert_eq!(QctlCError::from(not_found).code(), QCTL_ERROR_NOT_FOUND);
        assert_eq!(QctlCError::from(QueueError::EmptyStack).code(), QCTL_ERROR_EMPTY_STACK);
        assert_eq!(
            QctlCError::from(QueueError::IncompatibleContext).code(),
            QCTL_ERROR_NOT_FOUND
        );
        let unavailable = QueueError::Platform(PlatformError::Unavailable("none".into()));
        assert_eq!(QctlCError::from(unavailable).code(), QCTL_ERROR_NOT_FOUND);
        assert_eq!(QctlCError::InvalidHandle("queue").code(), QCTL_ERROR_INVALID_HANDLE);
    }

    #[test]
    fn guard_records_and_clears() {
        let v = guard(0, || Err(QctlCError::InvalidArgument("x".into())));
        assert_eq!(v, 0);
        assert_eq!(get_last_error().unwrap().code(), QCTL_ERROR_INVALID_ARGUMENT);

        let v = guard(0, || Ok(7));
        assert_eq!(v, 7);
        assert!(get_last_error().is_none());
    }

    #[test]
    fn guard_contains_panics() {
        let v = guard(-1, || -> Result<i32, QctlCError> { panic!("boom") });
        assert_eq!(v, -1);
        let err = get_last_error().unwrap();
        assert_eq!(err.code(), QCTL_ERROR_INTERNAL);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn status_guard_reports_codes() {
        assert_eq!(guard_status(|| Ok(())), QCTL_SUCCESS);
        assert_eq!(guard_status(|| Err(QueueError::EmptyStack.into())), QCTL_ERROR_EMPTY_STACK);
    }
}
