//! Correlation engine.
//!
//! - `naming`: display names derived from function groups
//! - `diagnostics`: non-fatal findings reported alongside the output
//! - `correlate`: the phased pipeline producing per-block records

pub mod correlate;
pub mod diagnostics;
pub mod naming;

pub use correlate::{
    BlockRecord, CorrelateError, Correlation, Correlator, InstructionRecord, ModuleCorrelation,
};
pub use diagnostics::Diagnostic;
pub use naming::{ModuleNames, NameCache, NamingError};
