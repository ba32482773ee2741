//! Services that talk to external collaborators.

pub mod backends;
pub mod disasm;
