//! Hyper-V Maintenance Backup
//!
//! Sequential stop → export → restart maintenance for a list of Hyper-V VMs,
//! with a reachability gate between VMs and an append-only audit trail.
//!
//! # Key Features
//!
//! - **Capacity pre-check** - skips a VM whose export would not fit
//! - **Graceful first** - guest shutdown, forced power-off only after a timeout
//! - **Always restart** - one best-effort restart when anything goes wrong
//! - **Health gate** - a VM that does not answer after restart halts the queue
//!
//! # Example
//!
//! ```no_run
//! use hvbackup::{HyperV, LocalHost, MaintenanceConfig, Orchestrator, PingProbe, RunIdentity, SystemClock};
//!
//! let config = MaintenanceConfig::builder()
//!     .vms(["AD01", "AD02"])
//!     .probe_target("AD01", "ad01.corp.local")
//!     .build_validated()?;
//!
//! let hyperv = HyperV::new();
//! let orchestrator = Orchestrator::new(
//!     &config,
//!     &hyperv,
//!     &LocalHost,
//!     &PingProbe,
//!     &SystemClock,
//!     RunIdentity::from_env(),
//! );
//!
//! let summary = orchestrator.run()?;
//! std::process::exit(summary.exit_code());
//! # Ok::<(), hvbackup::Error>(())
//! ```

pub mod audit;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod destination;
pub mod error;
pub mod health;
pub mod host;
pub mod hyperv;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod wait;

pub use audit::AuditRecorder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigOverrides, MaintenanceConfig, ProbeTargets};
pub use error::{Error, Result};
pub use host::{LocalHost, RunIdentity};
pub use hyperv::{HyperV, PingProbe};
pub use models::{RunOutcome, RunSummary, VmRunRecord, VmState};
pub use orchestrator::{Orchestrator, VmCheck};
pub use platform::{HostSystem, ReachabilityProbe, VmPlatform};
