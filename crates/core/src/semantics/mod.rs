//! Per-instruction semantics embedded in a module's `ast` aux-data table.
//!
//! The payload is decoded in two scoped steps: the outer transport
//! (base64 of the serialized bytes, then UTF-8), and the inner JSON text
//! mapping block ids to a list of statement lists, one per instruction.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::model::{AuxData, BlockId, ModelError, Module};

/// Name of the aux-data table carrying the semantics payload.
pub const SEMANTICS_TABLE: &str = "ast";

/// Abstract statements describing one instruction.
pub type StatementList = Vec<String>;

#[derive(Debug, Error)]
pub enum SemanticsError {
    #[error("module '{0}' has no 'ast' aux-data table")]
    Missing(String),

    #[error("semantics payload has neither raw nor decoded data")]
    Empty,

    #[error("semantics payload is not valid base64: {0}")]
    Transport(#[source] base64::DecodeError),

    #[error("semantics payload is not valid UTF-8: {0}")]
    Encoding(#[source] std::string::FromUtf8Error),

    #[error("semantics payload is not valid structured text: {0}")]
    Syntax(#[source] serde_json::Error),

    #[error("semantics payload has an invalid block id: {0}")]
    InvalidIdentity(#[source] ModelError),
}

/// Block id → ordered per-instruction statement lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticsStore {
    records: BTreeMap<BlockId, Vec<StatementList>>,
}

impl SemanticsStore {
    pub fn from_module(module: &Module) -> Result<Self, SemanticsError> {
        let aux = module
            .aux(SEMANTICS_TABLE)
            .ok_or_else(|| SemanticsError::Missing(module.name.clone()))?;
        Self::decode(aux)
    }

    /// Decode an aux-data entry in either raw or converter-decoded form.
    pub fn decode(aux: &AuxData) -> Result<Self, SemanticsError> {
        if let Some(raw) = &aux.data {
            let bytes = STANDARD.decode(raw.trim()).map_err(SemanticsError::Transport)?;
            let text = String::from_utf8(bytes).map_err(SemanticsError::Encoding)?;
            return Self::from_json_str(&text);
        }
        match &aux.decoded {
            Some(serde_json::Value::String(text)) => Self::from_json_str(text),
            Some(value) => {
                let raw: BTreeMap<String, Vec<StatementList>> =
                    serde_json::from_value(value.clone()).map_err(SemanticsError::Syntax)?;
                Self::from_raw(raw)
            }
            None => Err(SemanticsError::Empty),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, SemanticsError> {
        let raw: BTreeMap<String, Vec<StatementList>> =
            serde_json::from_str(text).map_err(SemanticsError::Syntax)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: BTreeMap<String, Vec<StatementList>>) -> Result<Self, SemanticsError> {
        let records = raw
            .into_iter()
            .map(|(key, value)| {
                BlockId::parse(&key).map(|id| (id, value)).map_err(SemanticsError::InvalidIdentity)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { records })
    }

    pub fn lookup(&self, id: BlockId) -> Option<&[StatementList]> {
        self.records.get(&id).map(Vec::as_slice)
    }

    pub fn ids(&self) -> BTreeSet<BlockId> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
