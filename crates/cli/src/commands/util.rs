use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use gts_core::config::{load_config, AddressFormat, CorrelateConfig, OutputLayout, ReportStyle};
use gts_core::model::{load_ir, Ir};

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub batch_size: Option<usize>,
    pub instruction_width: Option<usize>,
    pub disassembler: Option<String>,
    /// Replaces the configured argument list when non-empty.
    pub disassembler_args: Vec<String>,
    pub address_format: Option<AddressFormat>,
    pub layout: Option<OutputLayout>,
    pub style: Option<ReportStyle>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut CorrelateConfig) {
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(n) = self.instruction_width {
            config.instruction_width = n;
        }
        if let Some(program) = &self.disassembler {
            config.disassembler.program = Some(program.clone());
        }
        if !self.disassembler_args.is_empty() {
            config.disassembler.args = self.disassembler_args.clone();
        }
        if let Some(format) = self.address_format {
            config.address_format = format;
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(style) = self.style {
            config.style = style;
        }
    }
}

/// Config file (if any) with overrides applied, validated.
pub fn effective_config(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<CorrelateConfig> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => CorrelateConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Read the IR JSON directly, or run `converter <input>` and parse its stdout.
pub fn load_input(input: &Path, converter: Option<&str>) -> Result<Ir> {
    let Some(converter) = converter else {
        return load_ir(input);
    };

    let output = Command::new(converter)
        .arg(input)
        .output()
        .with_context(|| format!("Failed to run converter '{converter}'"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "Converter '{}' failed on {} ({}): {}",
            converter,
            input.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ir::from_json_slice(&output.stdout)
        .with_context(|| format!("Failed to parse converter output for {}", input.display()))
}

/// Write `body` to `path`, or to stdout when no path is given.
pub fn write_output(path: Option<&Path>, body: &str) -> Result<()> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create output directory {}", parent.display())
                })?;
            }
            fs::write(path, format!("{body}\n"))
                .with_context(|| format!("Failed to write output to {}", path.display()))
        }
        None => {
            println!("{body}");
            Ok(())
        }
    }
}
