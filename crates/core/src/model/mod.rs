//! Serde model of the GTIRB intermediate representation, as rendered to JSON
//! by the protobuf converter (proto field names preserved).
//!
//! Only the parts the correlation engine reads are modelled:
//! - modules, sections, byte intervals, and their code/data blocks
//! - symbols and proxy blocks (unresolved external targets)
//! - the IR-level control-flow graph
//! - named aux-data tables, kept either raw (base64 bytes) or decoded
//!
//! Everything here is a read-only projection of the input.

pub mod aux_data;
pub mod index;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

pub use aux_data::{AuxDataError, FunctionTables};
pub use index::{BlockIndex, BlockRef, CodeBlockEntry, ControlFlow};

/// Errors raised while reading the IR model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to parse GTIRB JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid node id '{value}': {reason}")]
    InvalidId { value: String, reason: String },
}

/// Identity of any IR node (module, block, symbol, function).
///
/// Wraps the 128-bit UUID and renders as standard base64 of its 16 bytes,
/// which is how the converter renders UUID fields and how report keys are
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

/// Block identities are plain node ids.
pub type BlockId = NodeId;

impl NodeId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Build an id from a raw 16-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        Uuid::from_slice(bytes).map(Self).map_err(|e| ModelError::InvalidId {
            value: format!("{bytes:02x?}"),
            reason: e.to_string(),
        })
    }

    /// Parse the base64 rendering of an id.
    pub fn parse(encoded: &str) -> Result<Self, ModelError> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| ModelError::InvalidId {
            value: encoded.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes).map_err(|_| ModelError::InvalidId {
            value: encoded.to_string(),
            reason: format!("expected 16 bytes, found {}", bytes.len()),
        })
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.as_bytes()))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        NodeId::parse(&text).map_err(D::Error::custom)
    }
}

/// proto3 JSON renders 64-bit integers as strings; accept both forms.
fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s.trim().parse().map_err(D::Error::custom),
    }
}

/// Empty strings stand for an unset optional id.
fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NodeId>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(text) if !text.trim().is_empty() => {
            NodeId::parse(&text).map(Some).map_err(D::Error::custom)
        }
        _ => Ok(None),
    }
}

fn de_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    STANDARD.decode(text.trim()).map_err(D::Error::custom)
}

/// Top-level IR message.
#[derive(Debug, Clone, Deserialize)]
pub struct Ir {
    pub uuid: NodeId,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub cfg: Cfg,
}

impl Ir {
    pub fn from_json_str(body: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn from_json_slice(body: &[u8]) -> Result<Self, ModelError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Load an IR JSON document from disk.
pub fn load_ir(path: &Path) -> Result<Ir> {
    let body = std::fs::read(path)
        .with_context(|| format!("Failed to read GTIRB JSON at {}", path.display()))?;
    Ir::from_json_slice(&body)
        .with_context(|| format!("Failed to parse GTIRB JSON at {}", path.display()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    pub uuid: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub proxies: Vec<ProxyBlock>,
    #[serde(default)]
    pub aux_data: BTreeMap<String, AuxData>,
}

impl Module {
    pub fn aux(&self, table: &str) -> Option<&AuxData> {
        self.aux_data.get(table)
    }

    pub fn symbol(&self, id: NodeId) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.uuid == id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    pub uuid: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub byte_intervals: Vec<ByteInterval>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ByteInterval {
    pub uuid: NodeId,
    #[serde(default)]
    pub has_address: bool,
    #[serde(default, deserialize_with = "de_u64")]
    pub address: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub size: u64,
    #[serde(default, deserialize_with = "de_base64")]
    pub contents: Vec<u8>,
    #[serde(default)]
    pub blocks: Vec<IntervalBlock>,
}

impl ByteInterval {
    /// Base address used for the blocks it owns; unaddressed intervals count from zero.
    pub fn base_address(&self) -> u64 {
        if self.has_address {
            self.address
        } else {
            0
        }
    }
}

/// A block placed in a byte interval. Exactly one of `code`/`data` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct IntervalBlock {
    #[serde(default, deserialize_with = "de_u64")]
    pub offset: u64,
    #[serde(default)]
    pub code: Option<CodeBlock>,
    #[serde(default)]
    pub data: Option<DataBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeBlock {
    pub uuid: NodeId,
    #[serde(default, deserialize_with = "de_u64")]
    pub size: u64,
    #[serde(default)]
    pub decode_mode: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataBlock {
    pub uuid: NodeId,
    #[serde(default, deserialize_with = "de_u64")]
    pub size: u64,
}

/// Unresolved external target; never carries bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyBlock {
    pub uuid: NodeId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Symbol {
    pub uuid: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub referent_uuid: Option<NodeId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cfg {
    #[serde(default)]
    pub vertices: Vec<NodeId>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Edge {
    pub source_uuid: NodeId,
    pub target_uuid: NodeId,
    #[serde(default)]
    pub label: EdgeLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct EdgeLabel {
    #[serde(default)]
    pub conditional: bool,
    #[serde(default)]
    pub direct: bool,
    #[serde(default, rename = "type")]
    pub kind: EdgeKind,
}

impl EdgeLabel {
    /// Render as `<Kind>, <conditional|unconditional>, <direct|indirect>`,
    /// prefixed with `Unresolved ` for edges into proxy blocks.
    pub fn describe(&self, unresolved: bool) -> String {
        let conditional = if self.conditional { "conditional" } else { "unconditional" };
        let direct = if self.direct { "direct" } else { "indirect" };
        let prefix = if unresolved { "Unresolved " } else { "" };
        format!("{prefix}{}, {conditional}, {direct}", self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum EdgeKind {
    #[default]
    #[serde(rename = "Type_Branch")]
    Branch,
    #[serde(rename = "Type_Call")]
    Call,
    #[serde(rename = "Type_Fallthrough")]
    Fallthrough,
    #[serde(rename = "Type_Return")]
    Return,
    #[serde(rename = "Type_Syscall")]
    Syscall,
    #[serde(rename = "Type_Sysret")]
    Sysret,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EdgeKind::Branch => "Branch",
            EdgeKind::Call => "Call",
            EdgeKind::Fallthrough => "Fallthrough",
            EdgeKind::Return => "Return",
            EdgeKind::Syscall => "Syscall",
            EdgeKind::Sysret => "Sysret",
        };
        f.write_str(text)
    }
}

/// A named aux-data table.
///
/// The converter either keeps the serialized bytes (`data`, base64) or
/// replaces them with a decoded JSON rendering (`_decoded`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuxData {
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, rename = "_decoded")]
    pub decoded: Option<serde_json::Value>,
}
