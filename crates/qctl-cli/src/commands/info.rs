//! Device attribute dump

use anyhow::{Context, Result};
use clap::Args;
use qctl::{Category, DeviceReport, QueueError, QueueManager};

/// Show the attributes of one device
#[derive(Debug, Args)]
pub struct InfoCommand {
    /// Category as `backend:type`, e.g. `opencl:gpu` or `level_zero:auto`
    #[arg(value_name = "CATEGORY")]
    pub category: Category,

    /// Index within the category
    #[arg(short, long, default_value_t = 0)]
    pub index: usize,
}

impl InfoCommand {
    pub fn run(&self, manager: &QueueManager, json: bool) -> Result<()> {
        let Category { backend, device_type } = self.category;
        let device = manager
            .registry()
            .device(backend, device_type, self.index)
            .ok_or(QueueError::NotFound { backend, device_type, index: self.index })
            .with_context(|| format!("No device {} of {}", self.index, self.category))?;

        if json {
            super::print(&DeviceReport::new(&device), true)
        } else {
            println!("{}", qctl::dump_device_info(Some(&device)));
            Ok(())
        }
    }
}
