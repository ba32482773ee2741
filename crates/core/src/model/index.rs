//! Structural block index over one module.

use std::collections::{BTreeSet, HashMap};

use crate::model::{BlockId, Cfg, Edge, Module};

/// One code block with everything needed to slice its instructions.
#[derive(Debug, Clone, Copy)]
pub struct CodeBlockEntry<'a> {
    pub id: BlockId,
    /// Address of the owning byte interval (0 when it has none).
    pub interval_address: u64,
    /// Offset of the block inside the interval.
    pub offset: u64,
    /// Declared size in bytes.
    pub size: u64,
    /// Full contents of the owning interval.
    pub contents: &'a [u8],
    pub section: &'a str,
}

impl CodeBlockEntry<'_> {
    pub fn address(&self) -> u64 {
        self.interval_address.wrapping_add(self.offset)
    }
}

/// A block as seen by control flow: either code with bytes, or a proxy
/// standing for an external target.
#[derive(Debug, Clone, Copy)]
pub enum BlockRef<'a> {
    Code(CodeBlockEntry<'a>),
    Proxy { id: BlockId, symbol: Option<&'a str> },
}

/// Lazily walk every code block of a module in traversal order
/// (sections, then intervals, then blocks). Data blocks are skipped.
pub fn code_blocks(module: &Module) -> impl Iterator<Item = CodeBlockEntry<'_>> {
    module.sections.iter().flat_map(|section| {
        section.byte_intervals.iter().flat_map(move |ival| {
            ival.blocks.iter().filter_map(move |blk| {
                blk.code.as_ref().map(|code| CodeBlockEntry {
                    id: code.uuid,
                    interval_address: ival.base_address(),
                    offset: blk.offset,
                    size: code.size,
                    contents: &ival.contents,
                    section: &section.name,
                })
            })
        })
    })
}

/// Code and proxy blocks of one module, addressable by id.
#[derive(Debug)]
pub struct BlockIndex<'a> {
    module: &'a Module,
    code: Vec<CodeBlockEntry<'a>>,
    by_id: HashMap<BlockId, usize>,
    proxies: HashMap<BlockId, Option<&'a str>>,
}

impl<'a> BlockIndex<'a> {
    pub fn new(module: &'a Module) -> Self {
        let code: Vec<CodeBlockEntry<'a>> = code_blocks(module).collect();
        let by_id = code.iter().enumerate().map(|(idx, entry)| (entry.id, idx)).collect();

        let mut proxies: HashMap<BlockId, Option<&'a str>> =
            module.proxies.iter().map(|p| (p.uuid, None)).collect();
        for sym in &module.symbols {
            if let Some(referent) = sym.referent_uuid {
                if let Some(slot) = proxies.get_mut(&referent) {
                    if slot.is_none() && !sym.name.is_empty() {
                        *slot = Some(sym.name.as_str());
                    }
                }
            }
        }

        Self { module, code, by_id, proxies }
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    /// Code blocks in traversal order.
    pub fn code_blocks(&self) -> &[CodeBlockEntry<'a>] {
        &self.code
    }

    pub fn code_block(&self, id: BlockId) -> Option<&CodeBlockEntry<'a>> {
        self.by_id.get(&id).map(|&idx| &self.code[idx])
    }

    pub fn lookup(&self, id: BlockId) -> Option<BlockRef<'a>> {
        if let Some(entry) = self.code_block(id) {
            return Some(BlockRef::Code(*entry));
        }
        self.proxies.get(&id).map(|&symbol| BlockRef::Proxy { id, symbol })
    }

    /// Ids of all code blocks found by structural traversal.
    pub fn code_ids(&self) -> BTreeSet<BlockId> {
        self.code.iter().map(|entry| entry.id).collect()
    }
}

/// Outgoing edges per source block, in CFG edge-list order.
#[derive(Debug, Default)]
pub struct ControlFlow<'a> {
    outgoing: HashMap<BlockId, Vec<&'a Edge>>,
}

impl<'a> ControlFlow<'a> {
    pub fn new(cfg: &'a Cfg) -> Self {
        let mut outgoing: HashMap<BlockId, Vec<&'a Edge>> = HashMap::new();
        for edge in &cfg.edges {
            outgoing.entry(edge.source_uuid).or_default().push(edge);
        }
        Self { outgoing }
    }

    pub fn successors(&self, id: BlockId) -> &[&'a Edge] {
        self.outgoing.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}
