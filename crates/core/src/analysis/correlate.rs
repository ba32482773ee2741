//! Block-level correlation of bytes, mnemonics, and semantics.
//!
//! A run is split into explicit phases:
//! 1. prepare: index every module, decode its semantics, compare the two
//!    id sets, and resolve display names;
//! 2. collect: slice every correlated block into opcode words (no
//!    disassembler involved);
//! 3. resolve: turn the collected set into mnemonics in batches;
//! 4. correlate: build one record per block from the now-complete table.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::analysis::diagnostics::{compare_identity_sets, Diagnostic};
use crate::analysis::naming::{resolve_module_names, ModuleNames, NameCache, NamingError};
use crate::config::{ConfigError, CorrelateConfig};
use crate::model::{
    BlockId, BlockIndex, BlockRef, CodeBlockEntry, ControlFlow, FunctionTables, Ir, Module, NodeId,
};
use crate::semantics::{SemanticsError, SemanticsStore, StatementList};
use crate::services::backends::DisassemblyBackend;
use crate::services::disasm::{MnemonicTable, OpcodeResolver, OpcodeWord, ResolveError};

#[derive(Debug, Error)]
pub enum CorrelateError {
    #[error("block {block} has size {size}, which is not a multiple of the {width}-byte instruction width")]
    UnalignedBlock { block: BlockId, size: u64, width: usize },

    #[error("instruction {index} of block {block} spans bytes {start}..{end}, outside {bound} bytes")]
    SliceOutOfBounds { block: BlockId, index: usize, start: u64, end: u64, bound: u64 },

    #[error("no mnemonic was resolved for opcode {word} in block {block}")]
    MissingMnemonic { block: BlockId, word: String },

    #[error("module '{module}': {source}")]
    Semantics {
        module: String,
        #[source]
        source: SemanticsError,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One instruction of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionRecord {
    pub address: u64,
    pub assembly: String,
    pub semantics: StatementList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: BlockId,
    pub name: String,
    pub address: u64,
    pub code: Vec<InstructionRecord>,
    /// Target name → edge label, in CFG edge order.
    pub successors: IndexMap<String, String>,
}

/// Correlated blocks of one module, in structural traversal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCorrelation {
    pub module: NodeId,
    pub module_name: String,
    pub blocks: Vec<BlockRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub modules: Vec<ModuleCorrelation>,
    pub diagnostics: Vec<Diagnostic>,
    pub disassembler_invocations: usize,
}

impl Correlation {
    pub fn block_count(&self) -> usize {
        self.modules.iter().map(|m| m.blocks.len()).sum()
    }
}

struct PreparedModule<'ir> {
    index: BlockIndex<'ir>,
    semantics: SemanticsStore,
    names: ModuleNames,
}

impl<'ir> PreparedModule<'ir> {
    /// Code blocks that also have a semantic record, in traversal order.
    fn correlated_blocks<'s>(
        &'s self,
    ) -> impl Iterator<Item = (&'s CodeBlockEntry<'ir>, &'s [StatementList])> + 's {
        self.index
            .code_blocks()
            .iter()
            .filter_map(|entry| self.semantics.lookup(entry.id).map(|record| (entry, record)))
    }
}

/// Runs the correlation pipeline against one disassembly backend.
pub struct Correlator<'a> {
    config: &'a CorrelateConfig,
    backend: &'a dyn DisassemblyBackend,
}

impl<'a> Correlator<'a> {
    pub fn new(config: &'a CorrelateConfig, backend: &'a dyn DisassemblyBackend) -> Self {
        Self { config, backend }
    }

    pub fn run(&self, ir: &Ir) -> Result<Correlation, CorrelateError> {
        self.config.validate()?;
        let width = self.config.instruction_width;
        let flow = ControlFlow::new(&ir.cfg);
        let mut names = NameCache::new();
        let mut diagnostics = Vec::new();

        let mut prepared = Vec::with_capacity(ir.modules.len());
        for module in &ir.modules {
            let (module, diag) = prepare_module(module, &flow, &mut names)?;
            diagnostics.extend(diag);
            prepared.push(module);
        }

        let words = collect_opcode_words(&prepared, width)?;
        let mut resolver = OpcodeResolver::from_config(self.backend, self.config);
        resolver.resolve(&words)?;
        let invocations = resolver.invocations();
        let table = resolver.into_table();

        let mut modules = Vec::with_capacity(prepared.len());
        for module in &prepared {
            modules.push(correlate_module(module, &flow, &table, width, &mut diagnostics)?);
        }

        Ok(Correlation { modules, diagnostics, disassembler_invocations: invocations })
    }
}

fn prepare_module<'ir>(
    module: &'ir Module,
    flow: &ControlFlow<'_>,
    names: &mut NameCache,
) -> Result<(PreparedModule<'ir>, Option<Diagnostic>), CorrelateError> {
    let index = BlockIndex::new(module);
    let semantics = SemanticsStore::from_module(module)
        .map_err(|source| CorrelateError::Semantics { module: module.name.clone(), source })?;
    debug!(
        module = %module.name,
        code_blocks = index.code_blocks().len(),
        semantic_records = semantics.len(),
        "indexed module"
    );

    let diagnostic = compare_identity_sets(&module.name, &index.code_ids(), &semantics.ids());
    if let Some(diag) = &diagnostic {
        warn!("{diag}");
    }

    let tables = FunctionTables::from_module(module).map_err(NamingError::from)?;
    let names = names
        .get_or_resolve(module.uuid, || resolve_module_names(&index, &tables, flow))?
        .clone();

    Ok((PreparedModule { index, semantics, names }, diagnostic))
}

/// Collect phase: every opcode word any correlated instruction will need.
/// Unaligned blocks and out-of-bounds slices abort here, before the
/// disassembler is ever started.
fn collect_opcode_words(
    modules: &[PreparedModule<'_>],
    width: usize,
) -> Result<BTreeSet<OpcodeWord>, CorrelateError> {
    let mut words = BTreeSet::new();
    for module in modules {
        for entry in module.index.code_blocks() {
            instruction_count(entry, width)?;
        }
        for (entry, record) in module.correlated_blocks() {
            let count = instruction_count(entry, width)?.min(record.len());
            for i in 0..count {
                words.insert(OpcodeWord::new(slice_instruction(entry, i, width)?));
            }
        }
    }
    debug!(distinct = words.len(), "collected opcode words");
    Ok(words)
}

fn correlate_module(
    module: &PreparedModule<'_>,
    flow: &ControlFlow<'_>,
    table: &MnemonicTable,
    width: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<ModuleCorrelation, CorrelateError> {
    let names = &module.names;
    let mut blocks = Vec::new();
    for (entry, record) in module.correlated_blocks() {
        let structural = instruction_count(entry, width)?;
        if structural != record.len() {
            let diag = Diagnostic::InstructionCountMismatch {
                block: entry.id,
                structural,
                semantic: record.len(),
            };
            warn!("{diag}");
            diagnostics.push(diag);
        }

        let count = structural.min(record.len());
        let mut code = Vec::with_capacity(count);
        for (i, semantics) in record.iter().take(count).enumerate() {
            let word = OpcodeWord::new(slice_instruction(entry, i, width)?);
            let assembly = table.get(&word).ok_or_else(|| CorrelateError::MissingMnemonic {
                block: entry.id,
                word: word.to_string(),
            })?;
            code.push(InstructionRecord {
                address: entry.address().wrapping_add((i * width) as u64),
                assembly: assembly.clone(),
                semantics: semantics.clone(),
            });
        }

        blocks.push(BlockRecord {
            id: entry.id,
            name: names.display_name(entry.id),
            address: entry.address(),
            code,
            successors: successors(&module.index, names, flow, entry.id),
        });
    }

    let module_ref = module.index.module();
    debug!(module = %module_ref.name, blocks = blocks.len(), "correlated module");
    Ok(ModuleCorrelation { module: module_ref.uuid, module_name: module_ref.name.clone(), blocks })
}

/// Successor map keyed by resolved target name. Edges that resolve to the
/// same name share one entry with their labels joined by `"; "`.
fn successors(
    index: &BlockIndex<'_>,
    names: &ModuleNames,
    flow: &ControlFlow<'_>,
    id: BlockId,
) -> IndexMap<String, String> {
    let mut out: IndexMap<String, String> = IndexMap::new();
    for edge in flow.successors(id) {
        let target = edge.target_uuid;
        let (key, unresolved) = match index.lookup(target) {
            Some(BlockRef::Code(_)) => (names.display_name(target), false),
            Some(BlockRef::Proxy { symbol, .. }) => {
                (symbol.map(str::to_string).unwrap_or_else(|| target.to_string()), true)
            }
            None => (target.to_string(), false),
        };
        let label = edge.label.describe(unresolved);
        out.entry(key)
            .and_modify(|existing| {
                existing.push_str("; ");
                existing.push_str(&label);
            })
            .or_insert(label);
    }
    out
}

/// Instructions implied by the block's size; the size must be a whole
/// number of instructions.
pub fn instruction_count(entry: &CodeBlockEntry<'_>, width: usize) -> Result<usize, CorrelateError> {
    let width_u64 = width as u64;
    if width == 0 || entry.size % width_u64 != 0 {
        return Err(CorrelateError::UnalignedBlock { block: entry.id, size: entry.size, width });
    }
    Ok((entry.size / width_u64) as usize)
}

/// Bytes of instruction `index`, checked against both the block's declared
/// size and the interval's actual contents.
pub fn slice_instruction<'a>(
    entry: &CodeBlockEntry<'a>,
    index: usize,
    width: usize,
) -> Result<&'a [u8], CorrelateError> {
    let out_of_bounds = |start: u64, end: u64, bound: u64| CorrelateError::SliceOutOfBounds {
        block: entry.id,
        index,
        start,
        end,
        bound,
    };

    let rel = (index as u64).saturating_mul(width as u64);
    let start = entry.offset.saturating_add(rel);
    let end = start.saturating_add(width as u64);
    let block_end = entry.offset.saturating_add(entry.size);
    if end > block_end {
        return Err(out_of_bounds(start, end, block_end));
    }
    let available = entry.contents.len() as u64;
    if end > available {
        return Err(out_of_bounds(start, end, available));
    }
    Ok(&entry.contents[start as usize..end as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backends::BackendError;
    use serde_json::json;

    fn id(n: u8) -> NodeId {
        NodeId::from_bytes([n; 16])
    }

    fn sid(n: u8) -> String {
        id(n).to_string()
    }

    /// Knows the two opcodes of the fixture and nothing else.
    struct Arm64Stub;

    impl DisassemblyBackend for Arm64Stub {
        fn name(&self) -> &str {
            "arm64-stub"
        }

        fn disassemble(&self, request: &str) -> Result<String, BackendError> {
            let bytes: Vec<&str> = request.split_whitespace().collect();
            let mut out = String::from("\t.text\n");
            for word in bytes.chunks(4) {
                let line = match word.join(" ").as_str() {
                    "0x00 0x00 0x80 0x52" => "\tmov\tw0, #0",
                    "0xc0 0x03 0x5f 0xd6" => "\tret",
                    _ => "\tnop",
                };
                out.push_str(line);
                out.push('\n');
            }
            Ok(out)
        }
    }

    /// Module 1 with code block 1 (8 bytes at 0x400000: mov; ret), a
    /// call edge to proxy 4 (symbol `exit`), and function 50 `main`.
    fn ir(block_size: u64, semantics: serde_json::Value) -> Ir {
        let value = json!({
            "uuid": sid(0),
            "modules": [{
                "uuid": sid(1),
                "name": "a.out",
                "sections": [{
                    "uuid": sid(2),
                    "name": ".text",
                    "byte_intervals": [{
                        "uuid": sid(3),
                        "has_address": true,
                        "address": "4194304",
                        "contents": "AACAUsADX9Y=",
                        "blocks": [{"offset": "0", "code": {"uuid": sid(10), "size": block_size.to_string()}}]
                    }]
                }],
                "proxies": [{"uuid": sid(4)}],
                "symbols": [
                    {"uuid": sid(5), "name": "exit", "referent_uuid": sid(4)},
                    {"uuid": sid(150), "name": "main"}
                ],
                "aux_data": {
                    "ast": {"type_name": "string", "_decoded": semantics},
                    "functionBlocks": {"_decoded": {sid(50): [sid(10)]}},
                    "functionEntries": {"_decoded": {sid(50): [sid(10)]}},
                    "functionNames": {"_decoded": {sid(50): sid(150)}}
                }
            }],
            "cfg": {"edges": [
                {"source_uuid": sid(10), "target_uuid": sid(4), "label": {"type": "Type_Call", "direct": true}}
            ]}
        });
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn mov_ret_block_correlates_in_address_order() {
        let ir = ir(8, json!({ sid(10): [["A1", "A2"], ["B1"]] }));
        let config = CorrelateConfig::default();
        let result = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap();

        assert!(result.diagnostics.is_empty());
        assert_eq!(result.disassembler_invocations, 1);
        let block = &result.modules[0].blocks[0];
        assert_eq!(block.name, "main(exit)* [1/1]");
        assert_eq!(block.address, 0x400000);
        assert_eq!(
            block.code,
            vec![
                InstructionRecord {
                    address: 0x400000,
                    assembly: "mov w0, #0".into(),
                    semantics: vec!["A1".into(), "A2".into()],
                },
                InstructionRecord {
                    address: 0x400004,
                    assembly: "ret".into(),
                    semantics: vec!["B1".into()],
                },
            ]
        );
        assert_eq!(
            block.successors.get("exit").map(String::as_str),
            Some("Unresolved Call, unconditional, direct")
        );
    }

    #[test]
    fn short_semantic_record_warns_once_and_truncates() {
        let mut ir = ir(12, json!({ sid(10): [["A"], ["B"]] }));
        let interval = &mut ir.modules[0].sections[0].byte_intervals[0];
        interval.contents.extend_from_slice(&[0x1f, 0x20, 0x03, 0xd5]);
        let config = CorrelateConfig::default();
        let result = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap();

        assert_eq!(
            result.diagnostics,
            vec![Diagnostic::InstructionCountMismatch { block: id(10), structural: 3, semantic: 2 }]
        );
        assert_eq!(result.modules[0].blocks[0].code.len(), 2);
    }

    #[test]
    fn identity_mismatch_keeps_the_intersection() {
        let ir = ir(8, json!({ sid(10): [["A"], ["B"]], sid(99): [["Z"]] }));
        let config = CorrelateConfig::default();
        let result = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap();

        assert_eq!(result.block_count(), 1);
        assert!(matches!(
            &result.diagnostics[..],
            [Diagnostic::IdentityMismatch { semantic_only, structural_only, .. }]
                if semantic_only == &vec![id(99)] && structural_only.is_empty()
        ));
    }

    #[test]
    fn slice_past_interval_contents_is_fatal() {
        // Block claims 12 bytes; the interval only holds 8.
        let ir = ir(12, json!({ sid(10): [["A"], ["B"], ["C"]] }));
        let config = CorrelateConfig::default();
        let err = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap_err();
        match err {
            CorrelateError::SliceOutOfBounds { index, start, end, bound, .. } => {
                assert_eq!((index, start, end, bound), (2, 8, 12, 8));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unaligned_block_is_fatal() {
        let ir = ir(6, json!({ sid(10): [["A"], ["B"]] }));
        let config = CorrelateConfig::default();
        let err = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap_err();
        assert!(matches!(err, CorrelateError::UnalignedBlock { size: 6, width: 4, .. }));
    }

    #[test]
    fn unnamed_proxy_is_keyed_by_its_id() {
        let mut ir = ir(8, json!({ sid(10): [["A"], ["B"]] }));
        ir.modules[0].symbols.retain(|symbol| symbol.name != "exit");
        let config = CorrelateConfig::default();
        let result = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap();

        let block = &result.modules[0].blocks[0];
        assert_eq!(block.name, "main* [1/1]");
        assert_eq!(
            block.successors.get(&sid(4)).map(String::as_str),
            Some("Unresolved Call, unconditional, direct")
        );
    }

    #[test]
    fn interval_without_address_starts_at_zero() {
        let mut ir = ir(8, json!({ sid(10): [["A"], ["B"]] }));
        ir.modules[0].sections[0].byte_intervals[0].has_address = false;
        let config = CorrelateConfig::default();
        let result = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap();

        let block = &result.modules[0].blocks[0];
        assert_eq!(block.address, 0);
        let addresses: Vec<u64> = block.code.iter().map(|insn| insn.address).collect();
        assert_eq!(addresses, vec![0, 4]);
    }

    #[test]
    fn semantics_error_names_the_module() {
        let mut ir = ir(8, json!({}));
        ir.modules[0].aux_data.get_mut("ast").unwrap().decoded = Some(json!("[not json"));
        let config = CorrelateConfig::default();
        let err = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap_err();
        assert!(matches!(&err, CorrelateError::Semantics { module, .. } if module == "a.out"));
        assert!(err.to_string().starts_with("module 'a.out': "), "unexpected error: {err}");
    }

    #[test]
    fn missing_function_table_is_fatal() {
        let mut ir = ir(8, json!({ sid(10): [["A"], ["B"]] }));
        ir.modules[0].aux_data.remove("functionNames");
        let config = CorrelateConfig::default();
        let err = Correlator::new(&config, &Arm64Stub).run(&ir).unwrap_err();
        assert!(err.to_string().contains("functionNames"), "unexpected error: {err}");
    }
}
