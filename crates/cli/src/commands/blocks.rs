use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use gts_core::model::{BlockIndex, Ir};

#[derive(Debug, Serialize)]
pub struct BlockInfo {
    pub id: String,
    pub section: String,
    pub address: u64,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct ModuleBlocks {
    pub module: String,
    pub name: String,
    pub blocks: Vec<BlockInfo>,
}

/// Code blocks of every module, in traversal order.
pub fn collect_blocks(ir: &Ir) -> Vec<ModuleBlocks> {
    ir.modules
        .iter()
        .map(|module| ModuleBlocks {
            module: module.uuid.to_string(),
            name: module.name.clone(),
            blocks: BlockIndex::new(module)
                .code_blocks()
                .iter()
                .map(|entry| BlockInfo {
                    id: entry.id.to_string(),
                    section: entry.section.to_string(),
                    address: entry.address(),
                    offset: entry.offset,
                    size: entry.size,
                })
                .collect(),
        })
        .collect()
}

/// List code blocks found by structural traversal.
pub fn blocks_command(input: &Path, converter: Option<&str>, json: bool) -> Result<()> {
    let ir = crate::commands::util::load_input(input, converter)?;
    let modules = collect_blocks(&ir);

    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    for module in &modules {
        println!("Module {} ({}): {} code block(s)", module.name, module.module, module.blocks.len());
        for block in &module.blocks {
            println!(
                "  - {} {} 0x{:016x} size {}",
                block.id, block.section, block.address, block.size
            );
        }
    }
    Ok(())
}
