use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use debug_gts::commands::{
    blocks_command, correlate_command, show_config_command, ConfigOverrides,
};
use gts_core::config::{AddressFormat, OutputLayout, ReportStyle};

/// Block-level debugging for lifted GTIRB binaries.
///
/// This CLI is a thin wrapper around `gts-core` (exposed in code as `gts_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "debug-gts",
    version,
    about = "Correlate GTIRB code blocks with instruction semantics and disassembly",
    long_about = None
)]
struct Cli {
    /// Log debug output to stderr (otherwise `RUST_LOG`, default `warn`).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Correlate every code block with its semantics and mnemonics.
    ///
    /// Writes pretty JSON to OUTPUT, or to stdout when OUTPUT is omitted.
    /// Identity and instruction-count mismatches are logged as warnings.
    Correlate {
        /// GTIRB JSON file (or a raw IR file when `--converter` is given).
        input: PathBuf,

        /// Output file. Defaults to stdout.
        output: Option<PathBuf>,

        /// Program that turns INPUT into GTIRB JSON on stdout.
        #[arg(long)]
        converter: Option<String>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List the code blocks of each module.
    Blocks {
        /// GTIRB JSON file (or a raw IR file when `--converter` is given).
        input: PathBuf,

        /// Program that turns INPUT into GTIRB JSON on stdout.
        #[arg(long)]
        converter: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the effective configuration as JSON.
    ShowConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// YAML or JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum opcode words per disassembler invocation.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Bytes per instruction.
    #[arg(long)]
    width: Option<usize>,

    /// Disassembler program (default `$LLVM_MC_BIN` or `llvm-mc`).
    #[arg(long)]
    disassembler: Option<String>,

    /// Disassembler argument; repeat to pass several. Replaces the configured list.
    #[arg(long = "disasm-arg", allow_hyphen_values = true)]
    disasm_args: Vec<String>,

    /// Address rendering: hex or integer.
    #[arg(long)]
    address_format: Option<AddressFormat>,

    /// Output layout: merged or per-module.
    #[arg(long)]
    layout: Option<OutputLayout>,

    /// Block entry shape: full or compact.
    #[arg(long)]
    style: Option<ReportStyle>,
}

impl ConfigArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            batch_size: self.batch_size,
            instruction_width: self.width,
            disassembler: self.disassembler.clone(),
            disassembler_args: self.disasm_args.clone(),
            address_format: self.address_format,
            layout: self.layout,
            style: self.style,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    debug_gts::init_logging(cli.verbose);

    match cli.command {
        Command::Correlate { input, output, converter, config } => correlate_command(
            &input,
            output.as_deref(),
            config.config.as_deref(),
            converter.as_deref(),
            &config.overrides(),
        )?,
        Command::Blocks { input, converter, json } => {
            blocks_command(&input, converter.as_deref(), json)?
        }
        Command::ShowConfig { config } => {
            show_config_command(config.config.as_deref(), &config.overrides())?
        }
    }

    Ok(())
}
