//! Subcommands. Each renders a report from `qctl::diagnostics` as text or
//! JSON.

use std::fmt::Display;

use anyhow::{Context, Result};
use serde::Serialize;

mod current;
mod devices;
mod info;

pub use current::CurrentCommand;
pub use devices::DevicesCommand;
pub use info::InfoCommand;

/// Print `report` to stdout.
pub fn print<T: Serialize + Display>(report: &T, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        println!("{text}");
    } else {
        println!("{report}");
    }
    Ok(())
}
