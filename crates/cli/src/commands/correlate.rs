use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use gts_core::analysis::Correlator;
use gts_core::report;
use gts_core::services::backends::CommandBackend;

use crate::commands::util::{effective_config, load_input, write_output, ConfigOverrides};

/// Run the full pipeline on `input` and write the report.
///
/// Nothing is written unless correlation succeeds.
pub fn correlate_command(
    input: &Path,
    output: Option<&Path>,
    config_path: Option<&Path>,
    converter: Option<&str>,
    overrides: &ConfigOverrides,
) -> Result<()> {
    let config = effective_config(config_path, overrides)?;
    let ir = load_input(input, converter)?;
    let backend = CommandBackend::from_config(&config.disassembler);

    let correlation = Correlator::new(&config, &backend)
        .run(&ir)
        .with_context(|| format!("Failed to correlate {}", input.display()))?;
    let report = report::assemble(&correlation, &config);
    let body = report::to_json_string(&report).context("Failed to serialize report")?;
    write_output(output, &body)?;

    info!(
        blocks = report.block_count(),
        warnings = correlation.diagnostics.len(),
        disassembler_runs = correlation.disassembler_invocations,
        "correlation finished"
    );
    Ok(())
}
