//! Batched opcode → mnemonic resolution.
//!
//! Distinct opcode words are sent to a [`DisassemblyBackend`] in bounded
//! batches. The backend answers one line per word, in request order, after
//! a single header line; a batch whose line count differs from the number
//! of words sent is rejected outright.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::config::CorrelateConfig;
use crate::services::backends::{BackendError, DisassemblyBackend};

/// Raw bytes of one fixed-width instruction, in memory order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpcodeWord(Box<[u8]>);

impl OpcodeWord {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Space-separated `0x..` literals, one per byte.
    pub fn hex_literals(&self) -> String {
        self.0.iter().map(|b| format!("0x{b:02x}")).collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for OpcodeWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

pub type MnemonicTable = BTreeMap<OpcodeWord, String>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("disassembler failed on batch {batch}: {source}")]
    Backend {
        batch: usize,
        #[source]
        source: BackendError,
    },

    #[error("disassembler returned {actual} lines for batch {batch} of {expected} opcode words")]
    LineCountMismatch { batch: usize, expected: usize, actual: usize },
}

/// Resolves opcode words through a backend and memoizes the answers for
/// the whole run.
pub struct OpcodeResolver<'a> {
    backend: &'a dyn DisassemblyBackend,
    batch_size: usize,
    cache: MnemonicTable,
    invocations: usize,
}

impl<'a> OpcodeResolver<'a> {
    /// `batch_size` is clamped to at least one word.
    pub fn new(backend: &'a dyn DisassemblyBackend, batch_size: usize) -> Self {
        Self { backend, batch_size: batch_size.max(1), cache: MnemonicTable::new(), invocations: 0 }
    }

    pub fn from_config(backend: &'a dyn DisassemblyBackend, config: &CorrelateConfig) -> Self {
        Self::new(backend, config.batch_size)
    }

    /// Resolve every word not already cached. Batches are cut from the
    /// sorted set of pending words, so the request sequence is the same on
    /// every run with the same input.
    pub fn resolve(&mut self, words: &BTreeSet<OpcodeWord>) -> Result<&MnemonicTable, ResolveError> {
        let pending: Vec<&OpcodeWord> = words.iter().filter(|w| !self.cache.contains_key(*w)).collect();
        debug!(
            backend = self.backend.name(),
            requested = words.len(),
            pending = pending.len(),
            batch_size = self.batch_size,
            "resolving opcode words"
        );

        for (batch, chunk) in pending.chunks(self.batch_size).enumerate() {
            let request = build_request(chunk.iter().copied());
            let body = self
                .backend
                .disassemble(&request)
                .map_err(|source| ResolveError::Backend { batch, source })?;
            self.invocations += 1;

            let lines = split_response(&body);
            if lines.len() != chunk.len() {
                return Err(ResolveError::LineCountMismatch {
                    batch,
                    expected: chunk.len(),
                    actual: lines.len(),
                });
            }
            debug!(batch, words = chunk.len(), "batch resolved");
            for (word, line) in chunk.iter().zip(lines) {
                self.cache.insert((*word).clone(), line);
            }
        }
        Ok(&self.cache)
    }

    pub fn mnemonic(&self, word: &OpcodeWord) -> Option<&str> {
        self.cache.get(word).map(String::as_str)
    }

    /// Number of backend invocations made so far.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    pub fn table(&self) -> &MnemonicTable {
        &self.cache
    }

    pub fn into_table(self) -> MnemonicTable {
        self.cache
    }
}

/// Concatenate the hex literals of a batch into one request line.
pub fn build_request<'w>(batch: impl IntoIterator<Item = &'w OpcodeWord>) -> String {
    batch.into_iter().map(OpcodeWord::hex_literals).collect::<Vec<_>>().join(" ")
}

/// Drop the leading header line and normalise the rest: one trimmed,
/// tab-free line per instruction.
pub fn split_response(body: &str) -> Vec<String> {
    body.trim()
        .lines()
        .skip(1)
        .map(|line| line.trim().replace('\t', " "))
        .collect()
}
