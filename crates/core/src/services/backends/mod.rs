//! Disassembly backends.
//!
//! A backend receives one textual request (space-separated hexadecimal
//! byte literals for a batch of opcode words) and returns the tool's raw
//! textual output: a header line followed by one line per instruction, in
//! request order.

pub mod command;

pub use command::CommandBackend;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit { program: String, status: String, stderr: String },

    #[error("{0}")]
    Other(String),
}

/// Trait implemented by external disassemblers.
pub trait DisassemblyBackend: Send + Sync {
    /// Human-readable name for logs and errors.
    fn name(&self) -> &str;

    /// Run one request and return the raw output text.
    fn disassemble(&self, request: &str) -> Result<String, BackendError>;
}
