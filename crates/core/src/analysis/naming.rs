//! Display names for code blocks.
//!
//! A block that belongs to a function group is named
//! `<function><(proxy-symbol)><*> [<ordinal>/<N>]`, with ordinals assigned
//! by ascending address and zero-padded to the width of `N`. The proxy
//! symbol is shown when the block's only outgoing edge targets a named
//! proxy; `*` marks function entries. Other blocks fall back to their id.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use crate::model::{
    AuxDataError, BlockId, BlockIndex, BlockRef, CodeBlockEntry, ControlFlow, FunctionTables,
    NodeId,
};

pub const ENTRY_MARKER: &str = "*";

#[derive(Debug, Error)]
pub enum NamingError {
    #[error(transparent)]
    AuxData(#[from] AuxDataError),

    #[error("function {function} has no entry set")]
    MissingEntries { function: NodeId },

    #[error("function {function} has no name symbol")]
    MissingFunctionName { function: NodeId },

    #[error("function {function} names symbol {symbol}, which is not in the module")]
    MissingSymbol { function: NodeId, symbol: NodeId },
}

/// Block id → display name for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNames {
    module: NodeId,
    names: BTreeMap<BlockId, String>,
}

impl ModuleNames {
    pub fn module(&self) -> NodeId {
        self.module
    }

    pub fn get(&self, id: BlockId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Group-derived name, or the raw id for blocks outside every group.
    pub fn display_name(&self, id: BlockId) -> String {
        self.get(id).map(str::to_string).unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Per-module name cache. Each module's names are computed once from its
/// own tables and never consulted for another module.
#[derive(Debug, Default)]
pub struct NameCache {
    modules: HashMap<NodeId, ModuleNames>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: NodeId) -> Option<&ModuleNames> {
        self.modules.get(&module)
    }

    pub fn get_or_resolve(
        &mut self,
        module: NodeId,
        resolve: impl FnOnce() -> Result<ModuleNames, NamingError>,
    ) -> Result<&ModuleNames, NamingError> {
        match self.modules.entry(module) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => Ok(slot.insert(resolve()?)),
        }
    }
}

/// Compute display names for every grouped code block of the indexed module.
///
/// Groups are visited in function-id order; a block claimed by more than
/// one group keeps the first name it was given.
pub fn resolve_module_names(
    index: &BlockIndex<'_>,
    tables: &FunctionTables,
    flow: &ControlFlow<'_>,
) -> Result<ModuleNames, NamingError> {
    let module = index.module();
    let mut names = BTreeMap::new();

    for (&function, members) in &tables.blocks {
        let entries = tables.entries.get(&function).ok_or(NamingError::MissingEntries { function })?;
        let symbol_id =
            *tables.names.get(&function).ok_or(NamingError::MissingFunctionName { function })?;
        let symbol = module
            .symbol(symbol_id)
            .ok_or(NamingError::MissingSymbol { function, symbol: symbol_id })?;

        let mut ordered: Vec<&CodeBlockEntry<'_>> =
            members.iter().filter_map(|&id| index.code_block(id)).collect();
        ordered.sort_by_key(|entry| (entry.address(), entry.id));

        let total = ordered.len();
        for (position, entry) in ordered.into_iter().enumerate() {
            if names.contains_key(&entry.id) {
                continue;
            }
            let proxy = sole_proxy_target(index, flow, entry.id);
            let name = format_display_name(
                &symbol.name,
                proxy,
                entries.contains(&entry.id),
                position + 1,
                total,
            );
            names.insert(entry.id, name);
        }
    }

    debug!(module = %module.name, named = names.len(), "resolved block names");
    Ok(ModuleNames { module: module.uuid, names })
}

fn sole_proxy_target<'a>(
    index: &BlockIndex<'a>,
    flow: &ControlFlow<'_>,
    id: BlockId,
) -> Option<&'a str> {
    match flow.successors(id) {
        [edge] => match index.lookup(edge.target_uuid) {
            Some(BlockRef::Proxy { symbol, .. }) => symbol,
            _ => None,
        },
        _ => None,
    }
}

pub fn format_display_name(
    function: &str,
    proxy: Option<&str>,
    entry: bool,
    ordinal: usize,
    total: usize,
) -> String {
    let proxy = proxy.map(|p| format!("({p})")).unwrap_or_default();
    let marker = if entry { ENTRY_MARKER } else { "" };
    let width = ordinal_width(total);
    format!("{function}{proxy}{marker} [{ordinal:0width$}/{total}]")
}

/// Decimal digits of `total`.
pub fn ordinal_width(total: usize) -> usize {
    total.to_string().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ByteInterval, Cfg, CodeBlock, DataBlock, Edge, EdgeLabel, IntervalBlock, Module,
        ProxyBlock, Section, Symbol,
    };
    use std::collections::BTreeSet;

    fn id(n: u8) -> NodeId {
        NodeId::from_bytes([n; 16])
    }

    /// One `.text` interval at 0x1000 with the given `(block, offset)` pairs
    /// of 4-byte code blocks, one proxy (id 200) named `puts`, and function
    /// name symbols 100+n for each `n` in `functions`.
    fn module(module_id: u8, blocks: &[(u8, u64)], functions: &[(u8, &str)]) -> Module {
        let mut symbols: Vec<Symbol> = functions
            .iter()
            .map(|&(f, name)| Symbol { uuid: id(100 + f), name: name.into(), referent_uuid: None })
            .collect();
        symbols.push(Symbol { uuid: id(201), name: "puts".into(), referent_uuid: Some(id(200)) });
        Module {
            uuid: id(module_id),
            name: format!("m{module_id}"),
            sections: vec![Section {
                uuid: id(250),
                name: ".text".into(),
                byte_intervals: vec![ByteInterval {
                    uuid: id(251),
                    has_address: true,
                    address: 0x1000,
                    size: 0x100,
                    contents: vec![0; 0x100],
                    blocks: blocks
                        .iter()
                        .map(|&(b, offset)| IntervalBlock {
                            offset,
                            code: Some(CodeBlock {
                                uuid: id(b),
                                size: 4,
                                decode_mode: serde_json::Value::Null,
                            }),
                            data: None,
                        })
                        .collect(),
                }],
            }],
            symbols,
            proxies: vec![ProxyBlock { uuid: id(200) }],
            aux_data: Default::default(),
        }
    }

    fn tables(groups: &[(u8, Vec<u8>, Vec<u8>)]) -> FunctionTables {
        let mut t = FunctionTables::default();
        for (f, members, entries) in groups {
            let f = *f;
            t.blocks.insert(id(f), members.iter().map(|&b| id(b)).collect());
            t.entries.insert(id(f), entries.iter().map(|&b| id(b)).collect());
            t.names.insert(id(f), id(100 + f));
        }
        t
    }

    fn edge(from: u8, to: u8) -> Edge {
        Edge { source_uuid: id(from), target_uuid: id(to), label: EdgeLabel::default() }
    }

    #[test]
    fn ordinals_cover_one_to_n_with_padding() {
        let blocks: Vec<(u8, u64)> = (1..=12u8).map(|b| (b, u64::from(12 - b) * 4)).collect();
        let module = module(1, &blocks, &[(50, "main")]);
        let members: Vec<u8> = (1..=12).collect();
        let tables = tables(&[(50, members, vec![12])]);
        let cfg = Cfg::default();
        let names =
            resolve_module_names(&BlockIndex::new(&module), &tables, &ControlFlow::new(&cfg))
                .unwrap();

        // Block 12 sits at the lowest address.
        assert_eq!(names.get(id(12)), Some("main* [01/12]"));
        assert_eq!(names.get(id(1)), Some("main [12/12]"));
        let ordinals: BTreeSet<String> = (1..=12u8)
            .map(|b| {
                let name = names.get(id(b)).unwrap();
                name[name.find('[').unwrap() + 1..name.find('/').unwrap()].to_string()
            })
            .collect();
        let expected: BTreeSet<String> = (1..=12).map(|i| format!("{i:02}")).collect();
        assert_eq!(ordinals, expected);
    }

    #[test]
    fn sole_proxy_successor_adds_symbol() {
        let module = module(1, &[(1, 0), (2, 4)], &[(50, "main")]);
        let tables = tables(&[(50, vec![1, 2], vec![1])]);
        let cfg = Cfg { vertices: vec![], edges: vec![edge(1, 200), edge(2, 200), edge(2, 1)] };
        let names =
            resolve_module_names(&BlockIndex::new(&module), &tables, &ControlFlow::new(&cfg))
                .unwrap();
        assert_eq!(names.get(id(1)), Some("main(puts)* [1/2]"));
        assert_eq!(names.get(id(2)), Some("main [2/2]"));
    }

    #[test]
    fn ungrouped_blocks_fall_back_to_id() {
        let module = module(1, &[(1, 0), (2, 4)], &[(50, "main")]);
        let tables = tables(&[(50, vec![1], vec![])]);
        let cfg = Cfg::default();
        let names =
            resolve_module_names(&BlockIndex::new(&module), &tables, &ControlFlow::new(&cfg))
                .unwrap();
        assert_eq!(names.display_name(id(1)), "main [1/1]");
        assert_eq!(names.display_name(id(2)), id(2).to_string());
    }

    #[test]
    fn data_members_take_no_ordinal() {
        let mut module = module(1, &[(1, 0), (2, 8)], &[(50, "f")]);
        module.sections[0].byte_intervals[0].blocks.push(IntervalBlock {
            offset: 4,
            code: None,
            data: Some(DataBlock { uuid: id(3), size: 4 }),
        });
        let tables = tables(&[(50, vec![1, 2, 3], vec![])]);
        let cfg = Cfg::default();
        let names =
            resolve_module_names(&BlockIndex::new(&module), &tables, &ControlFlow::new(&cfg))
                .unwrap();
        assert_eq!(names.get(id(1)), Some("f [1/2]"));
        assert_eq!(names.get(id(2)), Some("f [2/2]"));
        assert_eq!(names.get(id(3)), None);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn equal_addresses_are_ordered_by_id() {
        let module = module(1, &[(9, 0), (4, 0)], &[(50, "f")]);
        let tables = tables(&[(50, vec![9, 4], vec![9])]);
        let cfg = Cfg::default();
        let names =
            resolve_module_names(&BlockIndex::new(&module), &tables, &ControlFlow::new(&cfg))
                .unwrap();
        assert_eq!(names.get(id(4)), Some("f [1/2]"));
        assert_eq!(names.get(id(9)), Some("f* [2/2]"));
    }

    #[test]
    fn unnamed_proxy_adds_nothing() {
        let mut module = module(1, &[(1, 0)], &[(50, "main")]);
        module.symbols.retain(|symbol| symbol.name != "puts");
        let tables = tables(&[(50, vec![1], vec![1])]);
        let cfg = Cfg { vertices: vec![], edges: vec![edge(1, 200)] };
        let names =
            resolve_module_names(&BlockIndex::new(&module), &tables, &ControlFlow::new(&cfg))
                .unwrap();
        assert_eq!(names.get(id(1)), Some("main* [1/1]"));
    }

    #[test]
    fn first_group_keeps_shared_block() {
        let module = module(1, &[(1, 0), (2, 4)], &[(50, "alpha"), (60, "beta")]);
        let tables = tables(&[(50, vec![1], vec![]), (60, vec![1, 2], vec![2])]);
        let cfg = Cfg::default();
        let names =
            resolve_module_names(&BlockIndex::new(&module), &tables, &ControlFlow::new(&cfg))
                .unwrap();
        assert_eq!(names.get(id(1)), Some("alpha [1/1]"));
        assert_eq!(names.get(id(2)), Some("beta* [2/2]"));
    }

    #[test]
    fn missing_tables_entries_are_fatal() {
        let module = module(1, &[(1, 0)], &[(50, "main")]);
        let mut t = tables(&[(50, vec![1], vec![1])]);
        t.entries.clear();
        let cfg = Cfg::default();
        let err = resolve_module_names(&BlockIndex::new(&module), &t, &ControlFlow::new(&cfg))
            .unwrap_err();
        assert!(matches!(err, NamingError::MissingEntries { .. }));

        let mut t = tables(&[(50, vec![1], vec![1])]);
        t.names.insert(id(50), id(99));
        let err = resolve_module_names(&BlockIndex::new(&module), &t, &ControlFlow::new(&cfg))
            .unwrap_err();
        assert!(matches!(err, NamingError::MissingSymbol { .. }));
    }

    #[test]
    fn cache_keeps_modules_apart() {
        let first = module(1, &[(1, 0)], &[(50, "main")]);
        let second = module(2, &[(1, 0)], &[(50, "other")]);
        let cfg = Cfg::default();
        let flow = ControlFlow::new(&cfg);
        let t = tables(&[(50, vec![1], vec![1])]);

        let mut cache = NameCache::new();
        for module in [&first, &second] {
            let index = BlockIndex::new(module);
            cache.get_or_resolve(module.uuid, || resolve_module_names(&index, &t, &flow)).unwrap();
        }
        assert_eq!(cache.get(first.uuid).unwrap().get(id(1)), Some("main* [1/1]"));
        assert_eq!(cache.get(second.uuid).unwrap().get(id(1)), Some("other* [1/1]"));

        // A second lookup does not recompute.
        let names = cache
            .get_or_resolve(first.uuid, || panic!("names for a cached module were recomputed"))
            .unwrap();
        assert_eq!(names.module(), first.uuid);
    }
}
