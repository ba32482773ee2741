//! Function tables stored in module aux-data.
//!
//! Raw tables use GTIRB's aux-data serialization: every container is
//! prefixed by a little-endian `u64` element count and UUIDs are 16 raw
//! bytes. Decoded tables are JSON objects keyed by base64 ids.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::model::{AuxData, ModelError, Module, NodeId};

pub const FUNCTION_BLOCKS: &str = "functionBlocks";
pub const FUNCTION_ENTRIES: &str = "functionEntries";
pub const FUNCTION_NAMES: &str = "functionNames";

#[derive(Debug, Error)]
pub enum AuxDataError {
    #[error("module '{module}' has no '{table}' aux-data table")]
    MissingTable { module: String, table: &'static str },

    #[error("aux-data table '{table}' has neither raw nor decoded data")]
    Empty { table: &'static str },

    #[error("aux-data table '{table}' is not valid base64: {source}")]
    Transport {
        table: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("aux-data table '{table}' is truncated at byte {offset}")]
    Truncated { table: &'static str, offset: usize },

    #[error("aux-data table '{table}' has {remaining} trailing bytes")]
    TrailingBytes { table: &'static str, remaining: usize },

    #[error("aux-data table '{table}' has unexpected shape: {reason}")]
    Shape { table: &'static str, reason: String },

    #[error("aux-data table '{table}': {source}")]
    InvalidId {
        table: &'static str,
        #[source]
        source: ModelError,
    },
}

/// Function membership, entries, and name symbols for one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionTables {
    pub blocks: BTreeMap<NodeId, BTreeSet<NodeId>>,
    pub entries: BTreeMap<NodeId, BTreeSet<NodeId>>,
    pub names: BTreeMap<NodeId, NodeId>,
}

impl FunctionTables {
    /// Decode the three function tables; all of them must be present.
    pub fn from_module(module: &Module) -> Result<Self, AuxDataError> {
        let table = |name: &'static str| {
            module.aux(name).ok_or_else(|| AuxDataError::MissingTable {
                module: module.name.clone(),
                table: name,
            })
        };
        Ok(Self {
            blocks: decode_id_set_mapping(FUNCTION_BLOCKS, table(FUNCTION_BLOCKS)?)?,
            entries: decode_id_set_mapping(FUNCTION_ENTRIES, table(FUNCTION_ENTRIES)?)?,
            names: decode_id_mapping(FUNCTION_NAMES, table(FUNCTION_NAMES)?)?,
        })
    }
}

/// Decode a `mapping<UUID,set<UUID>>` table.
pub fn decode_id_set_mapping(
    table: &'static str,
    aux: &AuxData,
) -> Result<BTreeMap<NodeId, BTreeSet<NodeId>>, AuxDataError> {
    if let Some(raw) = &aux.data {
        let bytes = decode_transport(table, raw)?;
        let mut reader = Reader::new(table, &bytes);
        let mut out = BTreeMap::new();
        for _ in 0..reader.u64()? {
            let key = reader.id()?;
            let mut members = BTreeSet::new();
            for _ in 0..reader.u64()? {
                members.insert(reader.id()?);
            }
            out.insert(key, members);
        }
        reader.finish()?;
        return Ok(out);
    }

    let object = decoded_object(table, aux)?;
    let mut out = BTreeMap::new();
    for (key, value) in object {
        let members = value.as_array().ok_or_else(|| AuxDataError::Shape {
            table,
            reason: format!("value for '{key}' is not a list"),
        })?;
        let members = members
            .iter()
            .map(|m| parse_json_id(table, m))
            .collect::<Result<BTreeSet<_>, _>>()?;
        out.insert(parse_id(table, key)?, members);
    }
    Ok(out)
}

/// Decode a `mapping<UUID,UUID>` table.
pub fn decode_id_mapping(
    table: &'static str,
    aux: &AuxData,
) -> Result<BTreeMap<NodeId, NodeId>, AuxDataError> {
    if let Some(raw) = &aux.data {
        let bytes = decode_transport(table, raw)?;
        let mut reader = Reader::new(table, &bytes);
        let mut out = BTreeMap::new();
        for _ in 0..reader.u64()? {
            let key = reader.id()?;
            out.insert(key, reader.id()?);
        }
        reader.finish()?;
        return Ok(out);
    }

    let object = decoded_object(table, aux)?;
    let mut out = BTreeMap::new();
    for (key, value) in object {
        out.insert(parse_id(table, key)?, parse_json_id(table, value)?);
    }
    Ok(out)
}

fn decode_transport(table: &'static str, raw: &str) -> Result<Vec<u8>, AuxDataError> {
    STANDARD.decode(raw.trim()).map_err(|source| AuxDataError::Transport { table, source })
}

fn decoded_object<'a>(
    table: &'static str,
    aux: &'a AuxData,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, AuxDataError> {
    let value = aux.decoded.as_ref().ok_or(AuxDataError::Empty { table })?;
    value
        .as_object()
        .ok_or_else(|| AuxDataError::Shape { table, reason: "expected a JSON object".into() })
}

fn parse_id(table: &'static str, text: &str) -> Result<NodeId, AuxDataError> {
    NodeId::parse(text).map_err(|source| AuxDataError::InvalidId { table, source })
}

fn parse_json_id(table: &'static str, value: &serde_json::Value) -> Result<NodeId, AuxDataError> {
    let text = value.as_str().ok_or_else(|| AuxDataError::Shape {
        table,
        reason: format!("expected an id, found {value}"),
    })?;
    parse_id(table, text)
}

struct Reader<'a> {
    table: &'static str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(table: &'static str, bytes: &'a [u8]) -> Self {
        Self { table, bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], AuxDataError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        let end = end.ok_or(AuxDataError::Truncated { table: self.table, offset: self.pos })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64, AuxDataError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn id(&mut self) -> Result<NodeId, AuxDataError> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(self.take(16)?);
        Ok(NodeId::from_bytes(buf))
    }

    fn finish(self) -> Result<(), AuxDataError> {
        let remaining = self.bytes.len() - self.pos;
        if remaining == 0 {
            Ok(())
        } else {
            Err(AuxDataError::TrailingBytes { table: self.table, remaining })
        }
    }
}
