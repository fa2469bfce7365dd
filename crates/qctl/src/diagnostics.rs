//! Human-readable and JSON-serializable dumps of device and queue state.
//!
//! Everything here is best effort: a missing handle renders as
//! [`UNAVAILABLE`] instead of failing.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::backend::Category;
use crate::device::{Device, DeviceProperties};
use crate::manager::QueueManager;
use crate::queue::Queue;

/// Rendered in place of a handle that is null or no longer valid.
pub const UNAVAILABLE: &str = "<unavailable>";

/// Attributes of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub category: Category,
    pub native: u64,
    #[serde(flatten)]
    pub properties: DeviceProperties,
}

impl DeviceReport {
    pub fn new(device: &Device) -> Self {
        Self {
            category: device.category(),
            native: device.native().get(),
            properties: device.properties().clone(),
        }
    }
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.properties;
        let sizes = p.max_work_item_sizes;
        writeln!(f, "Name                        {}", p.name)?;
        writeln!(f, "Category                    {}", self.category)?;
        writeln!(f, "Vendor                      {}", p.vendor)?;
        writeln!(f, "Driver version              {}", p.driver_version)?;
        writeln!(f, "Max compute units           {}", p.max_compute_units)?;
        writeln!(f, "Max work item dimensions    {}", p.max_work_item_dims)?;
        writeln!(f, "Max work item sizes         {} x {} x {}", sizes[0], sizes[1], sizes[2])?;
        writeln!(f, "Max work group size         {}", p.max_work_group_size)?;
        writeln!(f, "Max sub groups              {}", p.max_num_sub_groups)?;
        writeln!(f, "Int64 base atomics          {}", p.has_int64_base_atomics)?;
        writeln!(f, "Int64 extended atomics      {}", p.has_int64_extended_atomics)?;
        write!(f, "Host unified memory         {}", p.host_unified_memory)
    }
}

/// Identity of one queue and its device.
#[derive(Debug, Clone, Serialize)]
pub struct QueueReport {
    pub native: u64,
    pub context: u64,
    pub category: Category,
    pub device: DeviceReport,
}

impl QueueReport {
    pub fn new(queue: &Queue) -> Self {
        Self {
            native: queue.native().get(),
            context: queue.context().native().get(),
            category: queue.category(),
            device: DeviceReport::new(queue.device()),
        }
    }
}

impl fmt::Display for QueueReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Queue                       {:#x}", self.native)?;
        writeln!(f, "Context                     {:#x}", self.context)?;
        write!(f, "{}", self.device)
    }
}

/// Device and queue counts of one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub devices: usize,
    pub queues: usize,
}

/// Snapshot of a manager as seen from the calling thread.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub platform: String,
    pub categories: Vec<CategoryReport>,
    pub default_queue: Option<QueueReport>,
    pub current_queue: Option<QueueReport>,
    pub activated: usize,
}

impl RuntimeReport {
    pub fn collect(manager: &QueueManager) -> Self {
        let pool = manager.pool();
        let categories = pool
            .registry()
            .categories()
            .map(|category| CategoryReport {
                category,
                devices: pool.registry().category(category).len(),
                queues: pool.category(category).len(),
            })
            .collect();
        Self {
            platform: manager.platform_name().to_owned(),
            categories,
            default_queue: manager.default_queue().ok().as_ref().map(QueueReport::new),
            current_queue: manager.current_queue().ok().as_ref().map(QueueReport::new),
            activated: manager.num_activated_queues(),
        }
    }
}

impl fmt::Display for RuntimeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Platform                    {}", self.platform)?;
        for c in &self.categories {
            let category = c.category.to_string();
            writeln!(f, "  {category:<26}{} device(s), {} queue(s)", c.devices, c.queues)?;
        }
        writeln!(f, "Activated queues            {}", self.activated)?;
        writeln!(f, "Default queue               {}", QueueLine(self.default_queue.as_ref()))?;
        write!(f, "Current queue               {}", QueueLine(self.current_queue.as_ref()))
    }
}

struct QueueLine<'a>(Option<&'a QueueReport>);

impl fmt::Display for QueueLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(q) => write!(f, "{:#x} on {}", q.native, q.device.properties.name),
            None => f.write_str(UNAVAILABLE),
        }
    }
}

/// Render a device's attributes, logging them at `info`.
pub fn dump_device_info(device: Option<&Device>) -> String {
    let text = device.map_or_else(|| UNAVAILABLE.to_owned(), |d| DeviceReport::new(d).to_string());
    info!(target: "qctl::dump", "\n{text}");
    text
}

/// Render a queue's identity and device, logging them at `info`.
pub fn dump_queue_info(queue: Option<&Queue>) -> String {
    let text = queue.map_or_else(|| UNAVAILABLE.to_owned(), |q| QueueReport::new(q).to_string());
    info!(target: "qctl::dump", "\n{text}");
    text
}

impl QueueManager {
    /// Summary of this manager as seen from the calling thread.
    pub fn report(&self) -> RuntimeReport {
        RuntimeReport::collect(self)
    }

    /// Render [`report`](Self::report), logging it at `info`.
    pub fn dump(&self) -> String {
        let text = self.report().to_string();
        info!(target: "qctl::dump", "\n{text}");
        text
    }
}
