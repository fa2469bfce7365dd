//! Per-thread compute queue activation over a lazily enumerated device
//! registry.
//!
//! A [`QueueManager`] owns a [`QueuePool`] holding one default queue per
//! device, built on first use, plus one activation stack per thread. Pushing
//! a queue makes it the calling thread's current queue until it is popped;
//! threads that never pushed see the process default.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use qctl::{Backend, DeviceSpec, DeviceType, PlatformConfig, QueueManager, ReferencePlatform};
//!
//! let config = PlatformConfig {
//!     devices: vec![DeviceSpec::new(Backend::OpenCl, DeviceType::Gpu)],
//!     ..PlatformConfig::default()
//! };
//! let manager = QueueManager::new(Arc::new(ReferencePlatform::from_config(&config)));
//!
//! let gpu = manager.push_queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
//! assert!(manager.is_current_queue(&gpu));
//! manager.pop_queue().unwrap();
//! assert_eq!(manager.num_activated_queues(), 0);
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod manager;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod platform;
pub mod pool;
pub mod queue;
pub mod reference;
pub mod registry;

pub use backend::{Backend, Category, DeviceType};
pub use config::{ConfigError, DeviceSpec, PlatformConfig, PlatformKind};
pub use context::Context;
pub use device::{Device, DeviceDescriptor, DeviceProperties};
pub use diagnostics::{
    DeviceReport, QueueReport, RuntimeReport, UNAVAILABLE, dump_device_info, dump_queue_info,
};
pub use error::{PlatformError, QueueError, Result};
pub use handle::{NativeHandle, contexts_equal, devices_equal, queues_equal};
pub use manager::{ActivatedQueue, DEFAULT_CATEGORY_ORDER, QueueManager};
#[cfg(feature = "opencl")]
pub use opencl::OpenClPlatform;
pub use platform::Platform;
pub use pool::QueuePool;
pub use queue::Queue;
pub use reference::ReferencePlatform;
pub use registry::DeviceRegistry;
