pub mod blocks;
pub mod config;
pub mod correlate;
pub mod util;

pub use blocks::*;
pub use config::*;
pub use correlate::*;
pub use util::*;
