//! gts-core
//!
//! Core library for debugging lifted binaries: it correlates the code blocks
//! of a GTIRB module graph with the per-instruction semantics embedded in its
//! aux-data and with mnemonics from an external disassembler, producing one
//! address-ordered report keyed by block identity.
//!
//! All substantive logic lives here so it is testable without the CLI.

pub mod model;
pub mod semantics;
pub mod config;
pub mod services;
pub mod analysis;
pub mod report;

use analysis::{CorrelateError, Correlator};
use config::CorrelateConfig;
use model::Ir;
use report::Report;
use services::backends::DisassemblyBackend;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Correlate `ir` and assemble the report in one call.
///
/// Diagnostics are logged as they are found; callers that need them as
/// values should drive [`Correlator`] and [`report::assemble`] directly.
pub fn correlate(
    ir: &Ir,
    config: &CorrelateConfig,
    backend: &dyn DisassemblyBackend,
) -> Result<Report, CorrelateError> {
    let correlation = Correlator::new(config, backend).run(ir)?;
    Ok(report::assemble(&correlation, config))
}
