//! Error types for hvbackup

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Hyper-V management interface unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("Insufficient privileges - run as Administrator")]
    NotElevated,

    #[error("VM not found: {0}")]
    VmNotFound(String),

    #[error(
        "Insufficient space on volume holding {}: {available} bytes free, {required} bytes required",
        path.display()
    )]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("VM {vm} did not shut down within {timeout_secs}s")]
    ShutdownTimeout { vm: String, timeout_secs: u64 },

    #[error("Shutdown of {vm} failed: {reason}")]
    Shutdown { vm: String, reason: String },

    #[error("Export of {vm} failed: {reason}")]
    Export { vm: String, reason: String },

    #[error("Start of {vm} failed: {reason}")]
    Start { vm: String, reason: String },

    #[error("Health check for {vm} failed after {attempts} attempts")]
    HealthCheck { vm: String, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("PowerShell error: {0}")]
    PowerShell(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    Windows(#[from] windows::core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors that abort the whole run before any VM is touched
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::PlatformUnavailable(_) | Error::NotElevated | Error::Config(_)
        )
    }
}
