//! Per-VM stop → export → start state machine
//!
//! A running VM gets a graceful shutdown request. If it is not off within the
//! shutdown timeout it is powered off hard, and the controller then waits for
//! `Off` without a deadline. After export the VM is started and confirmed
//! `Running`. Any failure once the lifecycle has begun triggers exactly one
//! best-effort restart if the VM is observed off.

use crate::clock::Clock;
use crate::destination::ExportDestination;
use crate::models::VmState;
use crate::platform::VmPlatform;
use crate::wait::{poll_until, PollOutcome, PollPolicy};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Phases a VM passes through, in the order they were entered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecyclePhase {
    Observed(VmState),
    /// Waiting for a transitional state to resolve before stopping
    Settling(VmState),
    StoppingGraceful,
    StoppingForced,
    Stopped,
    Exporting,
    Exported,
    Starting,
    Started,
    Succeeded,
    Failed(String),
}

/// What happened to the best-effort restart after a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// VM was not off, no restart issued
    NotNeeded(VmState),
    /// Restart request accepted
    Restarted,
    /// Restart failed or the VM state could not be read; it may be left off
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleReport {
    pub vm: String,
    pub phases: Vec<LifecyclePhase>,
    pub forced_off: bool,
    pub export_path: PathBuf,
}

#[derive(Debug)]
pub struct LifecycleFailure {
    pub vm: String,
    pub error: Error,
    pub phases: Vec<LifecyclePhase>,
    pub recovery: RecoveryOutcome,
}

impl LifecycleFailure {
    /// True when the recovery restart could not bring the VM back
    pub fn vm_left_off(&self) -> bool {
        matches!(self.recovery, RecoveryOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub shutdown_timeout: Duration,
    pub start_timeout: Duration,
    pub poll_interval: Duration,
}

impl LifecyclePolicy {
    pub fn from_config(config: &crate::MaintenanceConfig) -> Self {
        Self {
            shutdown_timeout: config.shutdown_timeout(),
            start_timeout: config.start_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

pub struct LifecycleController<'a> {
    platform: &'a dyn VmPlatform,
    clock: &'a dyn Clock,
    policy: LifecyclePolicy,
}

impl<'a> LifecycleController<'a> {
    pub fn new(platform: &'a dyn VmPlatform, clock: &'a dyn Clock, policy: LifecyclePolicy) -> Self {
        Self { platform, clock, policy }
    }

    /// Drive `vm` through stop, export and start
    pub fn run(
        &self,
        vm: &str,
        destination: &ExportDestination,
    ) -> std::result::Result<LifecycleReport, LifecycleFailure> {
        let mut phases = Vec::new();
        let mut forced_off = false;

        match self.drive(vm, destination, &mut phases, &mut forced_off) {
            Ok(()) => {
                phases.push(LifecyclePhase::Succeeded);
                tracing::info!(vm, forced_off, "Lifecycle completed");
                Ok(LifecycleReport {
                    vm: vm.to_string(),
                    phases,
                    forced_off,
                    export_path: destination.path().to_path_buf(),
                })
            }
            Err(error) => {
                tracing::error!(vm, error = %error, "Lifecycle failed, attempting recovery");
                let recovery = self.recover(vm);
                phases.push(LifecyclePhase::Failed(error.to_string()));
                Err(LifecycleFailure {
                    vm: vm.to_string(),
                    error,
                    phases,
                    recovery,
                })
            }
        }
    }

    fn drive(
        &self,
        vm: &str,
        destination: &ExportDestination,
        phases: &mut Vec<LifecyclePhase>,
        forced_off: &mut bool,
    ) -> Result<()> {
        let state = self.observe(vm)?;
        phases.push(LifecyclePhase::Observed(state));
        tracing::info!(vm, state = %state, "Observed VM state");

        let state = match state {
            VmState::Starting | VmState::Other => self.await_settled(vm, state, phases)?,
            settled => settled,
        };

        match state {
            // an unsettled VM may still be running, so it gets the same treatment
            VmState::Running | VmState::Starting | VmState::Other => {
                phases.push(LifecyclePhase::StoppingGraceful);
                tracing::info!(vm, state = %state, "Requesting graceful shutdown");
                self.platform.stop_vm(vm).map_err(|e| Error::Shutdown {
                    vm: vm.to_string(),
                    reason: e.to_string(),
                })?;
                *forced_off = self.await_off_or_force(vm, phases)?;
            }
            VmState::Stopping => {
                phases.push(LifecyclePhase::StoppingGraceful);
                tracing::info!(vm, "Shutdown already in progress, waiting");
                *forced_off = self.await_off_or_force(vm, phases)?;
            }
            // saved and paused VMs export as they are
            VmState::Off | VmState::Saved | VmState::Paused => {}
        }
        phases.push(LifecyclePhase::Stopped);

        phases.push(LifecyclePhase::Exporting);
        tracing::info!(vm, path = %destination.path().display(), "Exporting");
        destination
            .create()
            .and_then(|_| self.platform.export_vm(vm, destination.path()))
            .map_err(|e| Error::Export {
                vm: vm.to_string(),
                reason: e.to_string(),
            })?;
        phases.push(LifecyclePhase::Exported);

        phases.push(LifecyclePhase::Starting);
        tracing::info!(vm, "Starting");
        self.start_and_confirm(vm)?;
        phases.push(LifecyclePhase::Started);

        Ok(())
    }

    /// Wait up to the start timeout for a transitional state to resolve.
    /// Returns the last observed state, which may still be unsettled.
    fn await_settled(&self, vm: &str, observed: VmState, phases: &mut Vec<LifecyclePhase>) -> Result<VmState> {
        phases.push(LifecyclePhase::Settling(observed));
        tracing::info!(vm, state = %observed, "Waiting for VM to reach a settled state");

        let mut last = observed;
        let policy = PollPolicy::deadline(self.policy.poll_interval, self.policy.start_timeout);
        let outcome = poll_until(self.clock, &policy, |_| -> Result<Option<VmState>> {
            last = self.observe(vm)?;
            Ok((!matches!(last, VmState::Starting | VmState::Other)).then_some(last))
        })?;

        match outcome {
            PollOutcome::Ready { value, .. } => {
                phases.push(LifecyclePhase::Observed(value));
                tracing::info!(vm, state = %value, "VM settled");
                Ok(value)
            }
            PollOutcome::Exhausted { .. } => {
                tracing::warn!(vm, state = %last, "VM did not settle, stopping it anyway");
                Ok(last)
            }
        }
    }

    /// Returns true if a forced power-off was needed
    fn await_off_or_force(&self, vm: &str, phases: &mut Vec<LifecyclePhase>) -> Result<bool> {
        let graceful = PollPolicy::deadline(self.policy.poll_interval, self.policy.shutdown_timeout);
        if poll_until(self.clock, &graceful, |_| self.is_off(vm))?.is_ready() {
            tracing::info!(vm, "VM is off");
            return Ok(false);
        }

        let timeout = Error::ShutdownTimeout {
            vm: vm.to_string(),
            timeout_secs: self.policy.shutdown_timeout.as_secs(),
        };
        tracing::warn!(vm, "{}, forcing power off", timeout);
        phases.push(LifecyclePhase::StoppingForced);
        self.platform.turn_off_vm(vm).map_err(|e| Error::Shutdown {
            vm: vm.to_string(),
            reason: e.to_string(),
        })?;

        // no deadline once power has been cut
        let forced = PollPolicy::unbounded(self.policy.poll_interval);
        poll_until(self.clock, &forced, |_| self.is_off(vm))?;
        tracing::info!(vm, "VM is off after forced power off");
        Ok(true)
    }

    fn start_and_confirm(&self, vm: &str) -> Result<()> {
        let start_error = |reason: String| Error::Start {
            vm: vm.to_string(),
            reason,
        };

        self.platform.start_vm(vm).map_err(|e| start_error(e.to_string()))?;

        let policy = PollPolicy::deadline(self.policy.poll_interval, self.policy.start_timeout);
        let outcome = poll_until(self.clock, &policy, |_| -> Result<Option<()>> {
            Ok((self.observe(vm)? == VmState::Running).then_some(()))
        })
        .map_err(|e| start_error(e.to_string()))?;

        if !outcome.is_ready() {
            return Err(start_error(format!(
                "not running after {}s",
                self.policy.start_timeout.as_secs()
            )));
        }
        tracing::info!(vm, "VM is running");
        Ok(())
    }

    /// One restart attempt, only if the VM is observed off. Never fails.
    fn recover(&self, vm: &str) -> RecoveryOutcome {
        let state = match self.observe(vm) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(vm, error = %e, "Cannot read VM state for recovery; VM may be left off");
                return RecoveryOutcome::Failed(format!("state unknown: {}", e));
            }
        };

        if !state.is_off() {
            tracing::info!(vm, state = %state, "VM is not off, no recovery restart needed");
            return RecoveryOutcome::NotNeeded(state);
        }

        match self.platform.start_vm(vm) {
            Ok(()) => {
                tracing::warn!(vm, "Recovery restart issued");
                RecoveryOutcome::Restarted
            }
            Err(e) => {
                tracing::error!(vm, error = %e, "Recovery restart failed; VM is left off");
                RecoveryOutcome::Failed(e.to_string())
            }
        }
    }

    fn observe(&self, vm: &str) -> Result<VmState> {
        self.platform
            .get_vm(vm)?
            .map(|info| info.state)
            .ok_or_else(|| Error::VmNotFound(vm.to_string()))
    }

    fn is_off(&self, vm: &str) -> Result<Option<()>> {
        Ok(self.observe(vm)?.is_off().then_some(()))
    }
}
