//! Run records - the audit units of a maintenance pass

use chrono::{DateTime, Local};
use std::path::PathBuf;
use uuid::Uuid;

/// Final outcome of processing one VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stopped, exported and restarted
    Success,
    /// Lifecycle failed; the VM was restarted or was never left off
    Failure(String),
    /// Lifecycle failed and the recovery restart failed too
    FailureVmLeftOff(String),
    /// VM is not in the host inventory
    SkippedNotFound,
    /// Destination volume lacks headroom for the export
    SkippedInsufficientSpace { required: u64, available: u64 },
}

impl RunOutcome {
    /// Stable tag written to the audit log
    pub fn tag(&self) -> &'static str {
        match self {
            RunOutcome::Success => "Success",
            RunOutcome::Failure(_) => "Failure",
            RunOutcome::FailureVmLeftOff(_) => "FailureVmLeftOff",
            RunOutcome::SkippedNotFound => "SkippedNotFound",
            RunOutcome::SkippedInsufficientSpace { .. } => "SkippedInsufficientSpace",
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            RunOutcome::Failure(reason) | RunOutcome::FailureVmLeftOff(reason) => Some(reason.clone()),
            RunOutcome::SkippedInsufficientSpace { required, available } => Some(format!(
                "required {} GB, available {} GB",
                crate::capacity::to_gb(*required),
                crate::capacity::to_gb(*available)
            )),
            RunOutcome::Success | RunOutcome::SkippedNotFound => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            RunOutcome::SkippedNotFound | RunOutcome::SkippedInsufficientSpace { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failure(_) | RunOutcome::FailureVmLeftOff(_))
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({})", self.tag(), reason),
            None => write!(f, "{}", self.tag()),
        }
    }
}

/// Result of the post-restart reachability gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub vm: String,
    /// Host name or address that was probed
    pub target: String,
    pub passed: bool,
    pub attempts: u32,
}

/// A record opened when processing of a VM begins.
///
/// It cannot be written to the audit log until [`PendingRecord::finish`]
/// supplies an outcome.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    run_id: Uuid,
    vm: String,
    host: String,
    user: String,
    started_at: DateTime<Local>,
    export_path: Option<PathBuf>,
}

impl PendingRecord {
    pub fn begin(
        run_id: Uuid,
        vm: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            run_id,
            vm: vm.into(),
            host: host.into(),
            user: user.into(),
            started_at,
            export_path: None,
        }
    }

    pub fn set_export_path(&mut self, path: impl Into<PathBuf>) {
        self.export_path = Some(path.into());
    }

    pub fn finish(self, outcome: RunOutcome, ended_at: DateTime<Local>) -> VmRunRecord {
        VmRunRecord {
            run_id: self.run_id,
            vm: self.vm,
            host: self.host,
            user: self.user,
            started_at: self.started_at,
            ended_at,
            export_path: self.export_path,
            outcome,
            health: None,
        }
    }
}

/// One VM's finalized outcome for one maintenance pass
#[derive(Debug, Clone, PartialEq)]
pub struct VmRunRecord {
    pub run_id: Uuid,
    pub vm: String,
    pub host: String,
    pub user: String,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub export_path: Option<PathBuf>,
    pub outcome: RunOutcome,
    /// Filled after the record is persisted, once the health gate has run
    pub health: Option<HealthCheckResult>,
}

/// Audit entry written when the health gate halts the queue
#[derive(Debug, Clone, PartialEq)]
pub struct AbortRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Local>,
    pub host: String,
    pub user: String,
    /// VM whose health gate failed
    pub vm: String,
    /// First VM that will not be attempted
    pub next_vm: String,
    pub message: String,
}

impl AbortRecord {
    pub fn health_gate(
        record: &VmRunRecord,
        result: &HealthCheckResult,
        next_vm: impl Into<String>,
        timestamp: DateTime<Local>,
    ) -> Self {
        let next_vm = next_vm.into();
        let message = format!(
            "Health check for {} (target {}) failed after {} attempts; aborting, {} will not be processed",
            result.vm, result.target, result.attempts, next_vm
        );
        Self {
            run_id: record.run_id,
            timestamp,
            host: record.host.clone(),
            user: record.user.clone(),
            vm: result.vm.clone(),
            next_vm,
            message,
        }
    }
}

/// Everything one orchestration pass produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub records: Vec<VmRunRecord>,
    pub halted: Option<AbortRecord>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_failure()).count()
    }

    /// Process exit code: 3 halted, 2 any VM failed, otherwise 0
    pub fn exit_code(&self) -> i32 {
        if self.halted.is_some() {
            3
        } else if self.failed() > 0 {
            2
        } else {
            0
        }
    }
}
