use std::path::Path;

use anyhow::Result;

use crate::commands::util::{effective_config, ConfigOverrides};

/// Print the effective configuration as JSON.
pub fn show_config_command(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<()> {
    let config = effective_config(config_path, overrides)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
