//! Run configuration for a correlation pass.
//!
//! A `CorrelateConfig` can be read from a YAML or JSON file (chosen by
//! extension) and is passed explicitly to the pieces that need it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_INSTRUCTION_WIDTH: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Environment variable overriding the default disassembler program.
pub const DISASSEMBLER_ENV: &str = "LLVM_MC_BIN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("instruction_width must be at least 1")]
    ZeroInstructionWidth,
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("Unsupported config format '{0}' (expected .yaml, .yml, or .json)")]
    UnsupportedFormat(String),
}

/// How addresses are rendered in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressFormat {
    /// Zero-padded `0x%016x` strings.
    #[default]
    Hex,
    /// Plain JSON numbers.
    Integer,
}

/// Whether modules are merged into one address-ordered mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLayout {
    #[default]
    Merged,
    PerModule,
}

/// Shape of each block entry in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStyle {
    /// Name, address, code, and successors.
    #[default]
    Full,
    /// A list of `{ assembly: statements }` pairs per block.
    Compact,
}

/// External disassembler invocation settings. Arguments are passed through
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisassemblerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl Default for DisassemblerConfig {
    fn default() -> Self {
        Self { program: None, args: vec!["--disassemble".into(), "--arch=arm64".into()] }
    }
}

impl DisassemblerConfig {
    /// Configured program, else `$LLVM_MC_BIN`, else `llvm-mc` from `PATH`.
    pub fn program_path(&self) -> PathBuf {
        self.program
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(DISASSEMBLER_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("llvm-mc"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelateConfig {
    /// Bytes per opcode word.
    pub instruction_width: usize,
    /// Maximum number of opcode words per disassembler invocation.
    pub batch_size: usize,
    pub disassembler: DisassemblerConfig,
    pub address_format: AddressFormat,
    pub layout: OutputLayout,
    pub style: ReportStyle,
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        Self {
            instruction_width: DEFAULT_INSTRUCTION_WIDTH,
            batch_size: DEFAULT_BATCH_SIZE,
            disassembler: DisassemblerConfig::default(),
            address_format: AddressFormat::default(),
            layout: OutputLayout::default(),
            style: ReportStyle::default(),
        }
    }
}

impl CorrelateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruction_width == 0 {
            return Err(ConfigError::ZeroInstructionWidth);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

/// Load a config file, picking the parser from the file extension.
pub fn load_config(path: &Path) -> Result<CorrelateConfig> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();
    let config: CorrelateConfig = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&body).context("Failed to parse config YAML")?,
        "json" => serde_json::from_str(&body).context("Failed to parse config JSON")?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string()).into()),
    };
    config.validate()?;
    Ok(config)
}

macro_rules! kebab_enum_text {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($text),)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        "Invalid value '{}'. Allowed: {}",
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

kebab_enum_text!(AddressFormat { Hex => "hex", Integer => "integer" });
kebab_enum_text!(OutputLayout { Merged => "merged", PerModule => "per-module" });
kebab_enum_text!(ReportStyle { Full => "full", Compact => "compact" });
