//! Tracing setup for the operator console and the run transcript

use crate::{Error, Result};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "hvbackup=debug" } else { "hvbackup=info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Console-only subscriber, for work that must not create files yet
pub fn console_subscriber(verbose: bool) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_target(false))
}

/// Open `path` for appending without rotation. Missing parent directories
/// are created.
fn transcript_appender(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Config(format!("transcript path {} has no usable file name", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open transcript {}: {}", path.display(), e)))
}

/// Install the global subscriber: console output plus, when `transcript` is
/// given, a plain-text copy appended to that file.
pub fn init(verbose: bool, transcript: Option<&Path>) -> Result<()> {
    let transcript_layer = match transcript {
        Some(path) => {
            let appender = transcript_appender(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(appender))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_target(false))
        .with(transcript_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    if let Some(path) = transcript {
        tracing::debug!(transcript = %path.display(), "Transcript logging enabled");
    }
    Ok(())
}
