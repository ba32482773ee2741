//! Serializable report built from a [`Correlation`].

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

use crate::analysis::{BlockRecord, Correlation};
use crate::config::{AddressFormat, CorrelateConfig, OutputLayout, ReportStyle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AddressValue {
    Integer(u64),
    Hex(String),
}

pub fn render_address(format: AddressFormat, address: u64) -> AddressValue {
    match format {
        AddressFormat::Hex => AddressValue::Hex(format!("0x{address:016x}")),
        AddressFormat::Integer => AddressValue::Integer(address),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstructionEntry {
    pub address: AddressValue,
    pub assembly: String,
    pub semantics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullBlock {
    pub name: String,
    pub address: AddressValue,
    pub code: Vec<InstructionEntry>,
    pub successors: IndexMap<String, String>,
}

/// One report entry; the shape follows [`ReportStyle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BlockEntry {
    Full(FullBlock),
    /// `[{ "<assembly>": [statements...] }, ...]`
    Compact(Vec<IndexMap<String, Vec<String>>>),
}

/// Block id → entry, in address order.
pub type BlockMap = IndexMap<String, BlockEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Merged(BlockMap),
    PerModule(Vec<BlockMap>),
}

impl Report {
    pub fn block_count(&self) -> usize {
        match self {
            Report::Merged(map) => map.len(),
            Report::PerModule(modules) => modules.iter().map(IndexMap::len).sum(),
        }
    }
}

/// Arrange correlated blocks by address, either merged across modules or
/// one map per module. Ties keep encounter order. A block id that repeats
/// keeps its first entry.
pub fn assemble(correlation: &Correlation, config: &CorrelateConfig) -> Report {
    match config.layout {
        OutputLayout::Merged => {
            let blocks = correlation.modules.iter().flat_map(|m| m.blocks.iter());
            Report::Merged(block_map(blocks, config))
        }
        OutputLayout::PerModule => Report::PerModule(
            correlation.modules.iter().map(|m| block_map(m.blocks.iter(), config)).collect(),
        ),
    }
}

fn block_map<'a>(blocks: impl Iterator<Item = &'a BlockRecord>, config: &CorrelateConfig) -> BlockMap {
    let mut ordered: Vec<&BlockRecord> = blocks.collect();
    ordered.sort_by_key(|block| block.address);
    let mut map = BlockMap::with_capacity(ordered.len());
    for block in ordered {
        match map.entry(block.id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(block_entry(block, config));
            }
            Entry::Occupied(slot) => {
                warn!(
                    block = %slot.key(),
                    name = %block.name,
                    "duplicate block id in report; entry dropped"
                );
            }
        }
    }
    map
}

fn block_entry(block: &BlockRecord, config: &CorrelateConfig) -> BlockEntry {
    match config.style {
        ReportStyle::Full => BlockEntry::Full(FullBlock {
            name: block.name.clone(),
            address: render_address(config.address_format, block.address),
            code: block
                .code
                .iter()
                .map(|insn| InstructionEntry {
                    address: render_address(config.address_format, insn.address),
                    assembly: insn.assembly.clone(),
                    semantics: insn.semantics.clone(),
                })
                .collect(),
            successors: block.successors.clone(),
        }),
        ReportStyle::Compact => BlockEntry::Compact(
            block
                .code
                .iter()
                .map(|insn| IndexMap::from([(insn.assembly.clone(), insn.semantics.clone())]))
                .collect(),
        ),
    }
}

pub fn to_json_string(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
