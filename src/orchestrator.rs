//! Orchestrator for a sequential maintenance pass over the configured VMs
//!
//! Every VM that is attempted produces exactly one audit record, whatever
//! happens to it. Only a failed health gate stops the queue.

use crate::audit::AuditRecorder;
use crate::capacity::{to_gb, CapacityChecker, CapacityEstimate};
use crate::clock::Clock;
use crate::config::MaintenanceConfig;
use crate::destination::ExportDestination;
use crate::health::{HealthGate, HealthGatePolicy};
use crate::host::RunIdentity;
use crate::lifecycle::{LifecycleController, LifecycleFailure, LifecyclePhase, LifecyclePolicy, RecoveryOutcome};
use crate::models::{AbortRecord, PendingRecord, RunOutcome, RunSummary, VmRunRecord, VmState};
use crate::platform::{HostSystem, ReachabilityProbe, VmPlatform};
use crate::{Error, Result};
use uuid::Uuid;

/// Read-only assessment of one VM, produced by [`Orchestrator::check`]
#[derive(Debug, Clone, PartialEq)]
pub struct VmCheck {
    pub vm: String,
    /// `None` when the VM is not in the inventory
    pub state: Option<VmState>,
    pub estimate: Option<CapacityEstimate>,
    /// Bytes required on the destination volume (estimate plus reserve)
    pub required: Option<u64>,
    pub available: Option<u64>,
    /// Why a `run` would skip or fail this VM
    pub problem: Option<String>,
}

impl VmCheck {
    pub fn is_ready(&self) -> bool {
        self.problem.is_none()
    }
}

/// What processing a single VM produced
struct VmPass {
    record: VmRunRecord,
    lifecycle_attempted: bool,
}

pub struct Orchestrator<'a> {
    config: &'a MaintenanceConfig,
    platform: &'a dyn VmPlatform,
    host: &'a dyn HostSystem,
    probe: &'a dyn ReachabilityProbe,
    clock: &'a dyn Clock,
    identity: RunIdentity,
    run_id: Uuid,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a MaintenanceConfig,
        platform: &'a dyn VmPlatform,
        host: &'a dyn HostSystem,
        probe: &'a dyn ReachabilityProbe,
        clock: &'a dyn Clock,
        identity: RunIdentity,
    ) -> Self {
        Self {
            config,
            platform,
            host,
            probe,
            clock,
            identity,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Verify the hypervisor is usable and the process is elevated.
    /// Touches nothing on disk.
    pub fn preflight(&self) -> Result<()> {
        match self.platform.is_available() {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::PlatformUnavailable(
                    "Hyper-V management service is not running".to_string(),
                ))
            }
            Err(Error::PlatformUnavailable(reason)) => return Err(Error::PlatformUnavailable(reason)),
            Err(e) => return Err(Error::PlatformUnavailable(e.to_string())),
        }

        if !self.host.is_elevated()? {
            return Err(Error::NotElevated);
        }

        tracing::info!(host = %self.identity.host, user = %self.identity.user, "Preflight passed");
        Ok(())
    }

    /// Preflight, then process the whole queue
    pub fn run(&self) -> Result<RunSummary> {
        self.preflight()?;
        self.process_queue()
    }

    /// Process every configured VM in order. Callers must have passed
    /// [`Orchestrator::preflight`] first.
    pub fn process_queue(&self) -> Result<RunSummary> {
        std::fs::create_dir_all(&self.config.backup_root)?;
        let mut audit = AuditRecorder::open(self.config.audit_log_path())?;

        tracing::info!(
            run_id = %self.run_id,
            vms = ?self.config.vms,
            backup_root = %self.config.backup_root.display(),
            audit_log = %audit.path().display(),
            "Maintenance run started"
        );

        let mut summary = RunSummary {
            run_id: self.run_id,
            records: Vec::with_capacity(self.config.vms.len()),
            halted: None,
        };

        for (index, vm) in self.config.vms.iter().enumerate() {
            let VmPass { mut record, lifecycle_attempted } = self.process_vm(vm);
            audit.append(&record)?;

            match &record.outcome {
                RunOutcome::Success => tracing::info!(vm = %vm, outcome = %record.outcome, "VM processed"),
                outcome if outcome.is_skipped() => tracing::warn!(vm = %vm, outcome = %outcome, "VM skipped"),
                outcome => tracing::error!(vm = %vm, outcome = %outcome, "VM failed"),
            }

            let next_vm = self.config.vms.get(index + 1);
            if let (true, Some(next_vm)) = (lifecycle_attempted, next_vm) {
                let gate = HealthGate::new(self.probe, self.clock);
                let target = self.config.probe_targets.target_for(vm);
                let result = gate.await_healthy(vm, target, &HealthGatePolicy::from_config(self.config));
                record.health = Some(result.clone());

                if !result.passed {
                    let abort = AbortRecord::health_gate(&record, &result, next_vm.as_str(), self.clock.wall());
                    audit.append_abort(&abort)?;
                    let error = Error::HealthCheck {
                        vm: vm.clone(),
                        attempts: result.attempts,
                    };
                    tracing::error!(
                        vm = %vm,
                        next_vm = %next_vm,
                        "{}. Halting: {} will not be processed; investigate {} before rerunning",
                        error,
                        next_vm,
                        vm
                    );
                    summary.records.push(record);
                    summary.halted = Some(abort);
                    break;
                }
            }

            summary.records.push(record);
        }

        tracing::info!(
            run_id = %self.run_id,
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            halted = summary.halted.is_some(),
            "Maintenance run finished"
        );
        Ok(summary)
    }

    /// Preflight, then report what a run would do for each VM without
    /// touching any of them
    pub fn check(&self) -> Result<Vec<VmCheck>> {
        self.preflight()?;
        let checker = CapacityChecker::new(self.platform, self.host);
        let reserve = self.config.min_free_bytes();

        let checks = self
            .config
            .vms
            .iter()
            .map(|vm| {
                let mut check = VmCheck {
                    vm: vm.clone(),
                    state: None,
                    estimate: None,
                    required: None,
                    available: None,
                    problem: None,
                };

                match self.platform.get_vm(vm) {
                    Ok(Some(info)) => check.state = Some(info.state),
                    Ok(None) => {
                        check.problem = Some(Error::VmNotFound(vm.clone()).to_string());
                        return check;
                    }
                    Err(e) => {
                        check.problem = Some(e.to_string());
                        return check;
                    }
                }

                let estimate = match checker.estimate_size(vm) {
                    Ok(estimate) => estimate,
                    Err(e) => {
                        check.problem = Some(format!("size estimate failed: {}", e));
                        return check;
                    }
                };
                check.estimate = Some(estimate);
                check.required = Some(reserve.saturating_add(estimate.bytes));

                match checker.check_free_space(&self.config.backup_root, reserve, estimate.bytes) {
                    Ok(available) => check.available = Some(available),
                    Err(Error::InsufficientSpace { available, .. }) => {
                        check.available = Some(available);
                        check.problem = Some(format!(
                            "insufficient space: {} GB required, {} GB available",
                            to_gb(reserve.saturating_add(estimate.bytes)),
                            to_gb(available)
                        ));
                    }
                    Err(e) => check.problem = Some(format!("free space query failed: {}", e)),
                }
                check
            })
            .collect();

        Ok(checks)
    }

    fn process_vm(&self, vm: &str) -> VmPass {
        let pending = PendingRecord::begin(
            self.run_id,
            vm,
            self.identity.host.as_str(),
            self.identity.user.as_str(),
            self.clock.wall(),
        );
        tracing::info!(vm, "Processing VM");

        let (outcome, pending, lifecycle_attempted) = self.evaluate(vm, pending);
        VmPass {
            record: pending.finish(outcome, self.clock.wall()),
            lifecycle_attempted,
        }
    }

    fn evaluate(&self, vm: &str, mut pending: PendingRecord) -> (RunOutcome, PendingRecord, bool) {
        match self.platform.get_vm(vm) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(vm, "VM not found in inventory, skipping");
                return (RunOutcome::SkippedNotFound, pending, false);
            }
            Err(e) => {
                return (RunOutcome::Failure(format!("lookup failed: {}", e)), pending, false);
            }
        }

        let destination = ExportDestination::resolve(&self.config.backup_root, vm, self.clock.wall());

        let checker = CapacityChecker::new(self.platform, self.host);
        let estimate = match checker.estimate_size(vm) {
            Ok(estimate) => estimate,
            Err(e) => {
                return (RunOutcome::Failure(format!("size estimate failed: {}", e)), pending, false);
            }
        };
        match checker.check_free_space(&self.config.backup_root, self.config.min_free_bytes(), estimate.bytes) {
            Ok(_) => {}
            Err(Error::InsufficientSpace { required, available, .. }) => {
                tracing::warn!(
                    vm,
                    required_gb = to_gb(required),
                    available_gb = to_gb(available),
                    "Not enough free space for export, skipping"
                );
                return (RunOutcome::SkippedInsufficientSpace { required, available }, pending, false);
            }
            Err(e) => {
                return (RunOutcome::Failure(format!("free space query failed: {}", e)), pending, false);
            }
        }

        let controller = LifecycleController::new(
            self.platform,
            self.clock,
            LifecyclePolicy::from_config(self.config),
        );
        let outcome = match controller.run(vm, &destination) {
            Ok(report) => {
                pending.set_export_path(report.export_path);
                RunOutcome::Success
            }
            Err(failure) => {
                if failure.phases.contains(&LifecyclePhase::Exporting) {
                    pending.set_export_path(destination.path());
                }
                failure_outcome(&failure)
            }
        };
        (outcome, pending, true)
    }
}

fn failure_outcome(failure: &LifecycleFailure) -> RunOutcome {
    match &failure.recovery {
        RecoveryOutcome::Failed(reason) => RunOutcome::FailureVmLeftOff(format!(
            "{}; recovery restart failed: {}",
            failure.error, reason
        )),
        RecoveryOutcome::Restarted | RecoveryOutcome::NotNeeded(_) => RunOutcome::Failure(failure.error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::VmInfo;
    use crate::platform::{MockHostSystem, MockReachabilityProbe, MockVmPlatform};
    use tempfile::TempDir;

    fn config(temp: &TempDir, vms: &[&str]) -> MaintenanceConfig {
        MaintenanceConfig::builder()
            .vms(vms.iter().copied())
            .backup_root(temp.path().join("backups"))
            .build()
    }

    fn identity() -> RunIdentity {
        RunIdentity::new("HV01", r"CORP\ops")
    }

    fn elevated_host(free: u64) -> MockHostSystem {
        let mut host = MockHostSystem::new();
        host.expect_is_elevated().returning(|| Ok(true));
        host.expect_free_space().returning(move |_| Ok(free));
        host
    }

    fn audit_lines(config: &MaintenanceConfig) -> Vec<String> {
        std::fs::read_to_string(config.audit_log_path())
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_preflight_not_elevated_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, &["AD01"]);
        let clock = ManualClock::new();
        let probe = MockReachabilityProbe::new();

        let mut platform = MockVmPlatform::new();
        platform.expect_is_available().returning(|| Ok(true));
        platform.expect_get_vm().never();
        let mut host = MockHostSystem::new();
        host.expect_is_elevated().returning(|| Ok(false));

        let orch = Orchestrator::new(&config, &platform, &host, &probe, &clock, identity());
        let err = orch.run().unwrap_err();

        assert!(matches!(err, Error::NotElevated));
        assert!(err.is_fatal());
        assert!(!config.backup_root.exists());
    }

    #[test]
    fn test_preflight_platform_unavailable() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, &["AD01"]);
        let clock = ManualClock::new();
        let probe = MockReachabilityProbe::new();

        let mut platform = MockVmPlatform::new();
        platform.expect_is_available().returning(|| Ok(false));
        let mut host = MockHostSystem::new();
        host.expect_is_elevated().never();

        let orch = Orchestrator::new(&config, &platform, &host, &probe, &clock, identity());
        let err = orch.run().unwrap_err();

        assert!(matches!(err, Error::PlatformUnavailable(_)));
        assert!(!config.backup_root.exists());
    }

    #[test]
    fn test_insufficient_space_skips_lifecycle() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, &["AD01"]);
        let clock = ManualClock::new();
        let probe = MockReachabilityProbe::new();

        let mut platform = MockVmPlatform::new();
        platform.expect_is_available().returning(|| Ok(true));
        platform
            .expect_get_vm()
            .returning(|_| Ok(Some(VmInfo::new("AD01", VmState::Running))));
        platform.expect_disk_paths().returning(|_| Ok(Vec::new()));
        platform.expect_stop_vm().never();
        platform.expect_turn_off_vm().never();
        platform.expect_export_vm().never();
        platform.expect_start_vm().never();
        // less than the 20 GB reserve
        let host = elevated_host(5 * 1024 * 1024 * 1024);

        let orch = Orchestrator::new(&config, &platform, &host, &probe, &clock, identity());
        let summary = orch.run().unwrap();

        assert_eq!(summary.records.len(), 1);
        assert!(matches!(
            summary.records[0].outcome,
            RunOutcome::SkippedInsufficientSpace { .. }
        ));
        assert_eq!(summary.exit_code(), 0);
        let lines = audit_lines(&config);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("outcome=SkippedInsufficientSpace"));
    }

    #[test]
    fn test_estimate_error_is_failure_without_lifecycle() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, &["AD01", "AD02"]);
        let clock = ManualClock::new();
        let mut probe = MockReachabilityProbe::new();
        probe.expect_probe().never();

        let mut platform = MockVmPlatform::new();
        platform.expect_is_available().returning(|| Ok(true));
        platform.expect_get_vm().returning(|name| Ok(Some(VmInfo::new(name, VmState::Off))));
        platform
            .expect_disk_paths()
            .returning(|_| Err(Error::PowerShell("Get-VMHardDiskDrive: access denied".into())));
        platform.expect_export_vm().never();
        platform.expect_start_vm().never();
        let host = elevated_host(u64::MAX);

        let orch = Orchestrator::new(&config, &platform, &host, &probe, &clock, identity());
        let summary = orch.run().unwrap();

        assert_eq!(summary.records.len(), 2);
        assert!(summary.records.iter().all(|r| r.outcome.is_failure()));
        assert!(summary.halted.is_none());
        assert_eq!(summary.exit_code(), 2);
        assert_eq!(clock.elapsed(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_failure_outcome_mapping() {
        let failure = |recovery| LifecycleFailure {
            vm: "AD01".into(),
            error: Error::Export {
                vm: "AD01".into(),
                reason: "disk full".into(),
            },
            phases: vec![LifecyclePhase::Exporting],
            recovery,
        };

        assert_eq!(
            failure_outcome(&failure(RecoveryOutcome::Restarted)),
            RunOutcome::Failure("Export of AD01 failed: disk full".into())
        );
        assert!(matches!(
            failure_outcome(&failure(RecoveryOutcome::Failed("Start-VM failed".into()))),
            RunOutcome::FailureVmLeftOff(reason) if reason.contains("Start-VM failed")
        ));
    }

    #[test]
    fn test_check_reports_without_touching_vms() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, &["AD01", "GHOST"]);
        let clock = ManualClock::new();
        let probe = MockReachabilityProbe::new();

        let mut platform = MockVmPlatform::new();
        platform.expect_is_available().returning(|| Ok(true));
        platform.expect_get_vm().returning(|name| {
            Ok((name == "AD01").then(|| VmInfo::new("AD01", VmState::Running)))
        });
        platform.expect_disk_paths().returning(|_| Ok(Vec::new()));
        platform.expect_stop_vm().never();
        platform.expect_export_vm().never();
        let host = elevated_host(100 * 1024 * 1024 * 1024);

        let orch = Orchestrator::new(&config, &platform, &host, &probe, &clock, identity());
        let checks = orch.check().unwrap();

        assert_eq!(checks.len(), 2);
        assert!(checks[0].is_ready());
        assert_eq!(checks[0].state, Some(VmState::Running));
        assert_eq!(checks[0].required, Some(config.min_free_bytes()));
        assert!(!checks[1].is_ready());
        assert!(checks[1].problem.as_deref().unwrap_or("").contains("GHOST"));
        assert!(!config.audit_log_path().exists());
    }
}
