//! Non-fatal findings collected during a correlation run.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::model::BlockId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Structural block ids and semantic record ids disagree for a module.
    IdentityMismatch {
        module: String,
        structural_only: Vec<BlockId>,
        semantic_only: Vec<BlockId>,
    },
    /// A block's size implies a different instruction count than its
    /// semantic record holds.
    InstructionCountMismatch { block: BlockId, structural: usize, semantic: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::IdentityMismatch { module, structural_only, semantic_only } => {
                write!(
                    f,
                    "module '{module}': {} block(s) without semantics, {} semantic record(s) without a block",
                    structural_only.len(),
                    semantic_only.len()
                )?;
                for id in structural_only {
                    write!(f, "\n  block only: {id}")?;
                }
                for id in semantic_only {
                    write!(f, "\n  semantics only: {id}")?;
                }
                Ok(())
            }
            Diagnostic::InstructionCountMismatch { block, structural, semantic } => write!(
                f,
                "block {block}: size implies {structural} instruction(s) but semantics has {semantic}"
            ),
        }
    }
}

/// Report the symmetric difference of the two id sets, if any.
pub fn compare_identity_sets(
    module: &str,
    structural: &BTreeSet<BlockId>,
    semantic: &BTreeSet<BlockId>,
) -> Option<Diagnostic> {
    let structural_only: Vec<BlockId> = structural.difference(semantic).copied().collect();
    let semantic_only: Vec<BlockId> = semantic.difference(structural).copied().collect();
    if structural_only.is_empty() && semantic_only.is_empty() {
        return None;
    }
    Some(Diagnostic::IdentityMismatch { module: module.to_string(), structural_only, semantic_only })
}
