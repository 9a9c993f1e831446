//! Post-restart reachability gate

use crate::clock::Clock;
use crate::models::HealthCheckResult;
use crate::platform::ReachabilityProbe;
use crate::wait::{poll_until, PollPolicy};
use std::convert::Infallible;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthGatePolicy {
    /// Fixed wait before the first probe, covers guest boot and service start
    pub cool_down: Duration,
    /// Echo requests per attempt
    pub ping_count: u32,
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl HealthGatePolicy {
    pub fn from_config(config: &crate::MaintenanceConfig) -> Self {
        Self {
            cool_down: config.cool_down(),
            ping_count: config.ping_count,
            max_retries: config.health_retries,
            retry_interval: config.retry_interval(),
        }
    }
}

pub struct HealthGate<'a> {
    probe: &'a dyn ReachabilityProbe,
    clock: &'a dyn Clock,
}

impl<'a> HealthGate<'a> {
    pub fn new(probe: &'a dyn ReachabilityProbe, clock: &'a dyn Clock) -> Self {
        Self { probe, clock }
    }

    /// Wait out the cool-down, then probe `target` up to `max_retries` times.
    /// Probe errors count as failed attempts.
    pub fn await_healthy(&self, vm: &str, target: &str, policy: &HealthGatePolicy) -> HealthCheckResult {
        tracing::info!(
            vm,
            target,
            cool_down_secs = policy.cool_down.as_secs(),
            "Waiting before health probe"
        );
        self.clock.sleep(policy.cool_down);

        let retries = PollPolicy::attempts(policy.retry_interval, policy.max_retries);
        let outcome = poll_until(self.clock, &retries, |attempt| -> Result<Option<()>, Infallible> {
            match self.probe.probe(target, policy.ping_count) {
                Ok(true) => {
                    tracing::info!(vm, target, attempt, "Health probe passed");
                    Ok(Some(()))
                }
                Ok(false) => {
                    tracing::warn!(vm, target, attempt, max = policy.max_retries, "Health probe got no reply");
                    Ok(None)
                }
                Err(e) => {
                    tracing::warn!(vm, target, attempt, error = %e, "Health probe errored");
                    Ok(None)
                }
            }
        })
        .unwrap_or_else(|never| match never {});

        HealthCheckResult {
            vm: vm.to_string(),
            target: target.to_string(),
            passed: outcome.is_ready(),
            attempts: outcome.attempts(),
        }
    }
}
