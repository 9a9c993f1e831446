//! Data models

mod record;
mod vm;

pub use record::*;
pub use vm::*;
