use anyhow::{Context, Result};
use clap::Args;
use qctl::{Backend, DeviceReport, DeviceType, QueueManager};
use tracing::info;

/// List devices grouped by category
#[derive(Debug, Args)]
pub struct DevicesCommand {
    /// Only list devices of this backend (opencl, level_zero, host, cuda)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<Backend>,

    /// Device type or selector (cpu, gpu, accelerator, custom, host, auto, all)
    #[arg(long = "type", value_name = "TYPE", default_value = "all")]
    pub device_type: DeviceType,
}

impl DevicesCommand {
    pub fn run(&self, manager: &QueueManager, json: bool) -> Result<()> {
        let registry = manager.registry();
        let backends = self.backend.map_or_else(|| Backend::ALL.to_vec(), |b| vec![b]);
        let categories: Vec<_> = backends
            .into_iter()
            .flat_map(|b| registry.resolve(b, self.device_type))
            .filter(|&c| !registry.category(c).is_empty())
            .collect();
        info!(categories = categories.len(), "listing devices");

        if json {
            let reports: Vec<DeviceReport> = categories
                .iter()
                .flat_map(|&c| registry.category(c).iter().map(DeviceReport::new))
                .collect();
            let text =
                serde_json::to_string_pretty(&reports).context("Failed to serialize devices")?;
            println!("{text}");
            return Ok(());
        }

        if categories.is_empty() {
            println!("No devices found");
            return Ok(());
        }
        for category in categories {
            println!("{category}");
            for (index, device) in registry.category(category).iter().enumerate() {
                println!("  [{index}] {} ({})", device.name(), device.vendor());
            }
        }
        Ok(())
    }
}
