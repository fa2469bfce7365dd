use anyhow::{Context, Result};
use clap::Args;
use qctl::{Category, QueueManager, QueueReport};

/// Show the current queue of this thread
#[derive(Debug, Args)]
pub struct CurrentCommand {
    /// Activate the queue of this category first, e.g. `opencl:gpu`
    #[arg(value_name = "CATEGORY")]
    pub category: Option<Category>,

    /// Index of the queue to activate
    #[arg(short, long, default_value_t = 0, requires = "category")]
    pub index: usize,
}

impl CurrentCommand {
    pub fn run(&self, manager: &QueueManager, json: bool) -> Result<()> {
        let _activated = match self.category {
            Some(category) => Some(
                manager
                    .activate(category.backend, category.device_type, self.index)
                    .with_context(|| format!("No queue {} of {category}", self.index))?,
            ),
            None => None,
        };
        let queue = manager.current_queue().context("No current queue")?;
        super::print(&QueueReport::new(&queue), json)
    }
}
