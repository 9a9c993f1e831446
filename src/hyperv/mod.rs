//! Hyper-V backed implementations of the platform traits

mod commands;

pub use commands::{HyperV, PingProbe};
