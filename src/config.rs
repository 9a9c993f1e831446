//! Maintenance run configuration with builder pattern

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default backup root on the Hyper-V host
pub const DEFAULT_BACKUP_ROOT: &str = r"D:\HyperV-Backups";

pub const AUDIT_LOG_NAME: &str = "maintenance-audit.log";
pub const TRANSCRIPT_LOG_NAME: &str = "maintenance-transcript.log";

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// VM name to health-probe target. VMs without an entry are probed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeTargets(BTreeMap<String, String>);

impl ProbeTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vm: impl Into<String>, target: impl Into<String>) {
        self.0.insert(vm.into(), target.into());
    }

    pub fn target_for<'a>(&'a self, vm: &'a str) -> &'a str {
        self.0.get(vm).map(String::as_str).unwrap_or(vm)
    }

    /// Parse a `VM=TARGET` override
    pub fn parse_entry(entry: &str) -> crate::Result<(String, String)> {
        match entry.split_once('=') {
            Some((vm, target)) if !vm.trim().is_empty() && !target.trim().is_empty() => {
                Ok((vm.trim().to_string(), target.trim().to_string()))
            }
            _ => Err(crate::Error::Config(format!(
                "probe mapping '{}' must look like VM=TARGET",
                entry
            ))),
        }
    }
}

/// Command-line overrides layered on top of the defaults or a config file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Replaces the configured VM list when non-empty
    pub vms: Vec<String>,
    /// `VM=TARGET` entries merged into the configured probe targets
    pub probes: Vec<String>,
    pub backup_root: Option<PathBuf>,
    pub shutdown_timeout_secs: Option<u64>,
    pub min_free_gb: Option<u64>,
    pub cool_down_secs: Option<u64>,
    pub ping_count: Option<u32>,
    pub health_retries: Option<u32>,
    pub retry_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// VMs to process, in order
    pub vms: Vec<String>,
    pub probe_targets: ProbeTargets,
    pub backup_root: PathBuf,
    pub shutdown_timeout_secs: u64,
    pub start_timeout_secs: u64,
    /// Interval between state checks while waiting on stop/start
    pub poll_interval_secs: u64,
    /// Headroom that must remain free after the export
    pub min_free_gb: u64,
    /// Wait after restart before the first health probe
    pub cool_down_secs: u64,
    pub ping_count: u32,
    pub health_retries: u32,
    pub retry_interval_secs: u64,
    /// Defaults to `<backup_root>/maintenance-audit.log`
    pub audit_log: Option<PathBuf>,
    /// Defaults to `<backup_root>/maintenance-transcript.log`
    pub transcript_log: Option<PathBuf>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            vms: vec!["AD01".to_string(), "AD02".to_string()],
            probe_targets: ProbeTargets::default(),
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            shutdown_timeout_secs: 300,
            start_timeout_secs: 300,
            poll_interval_secs: 5,
            min_free_gb: 20,
            cool_down_secs: 1800,
            ping_count: 4,
            health_retries: 3,
            retry_interval_secs: 60,
            audit_log: None,
            transcript_log: None,
        }
    }
}

impl MaintenanceConfig {
    pub fn builder() -> MaintenanceConfigBuilder {
        MaintenanceConfigBuilder::default()
    }

    /// Defaults, then `file` when given, then `overrides`; the result is validated
    pub fn resolve(file: Option<&Path>, overrides: &ConfigOverrides) -> crate::Result<Self> {
        let base = match file {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        MaintenanceConfigBuilder::from_config(base)
            .overrides(overrides)?
            .build_validated()
    }

    /// Load from a JSON file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            crate::Error::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.vms.is_empty() {
            return Err(crate::Error::Config("at least one VM is required".into()));
        }
        if let Some(blank) = self.vms.iter().find(|v| v.trim().is_empty()) {
            return Err(crate::Error::Config(format!("VM name '{}' is blank", blank)));
        }
        for (i, vm) in self.vms.iter().enumerate() {
            if self.vms[..i].iter().any(|other| other.eq_ignore_ascii_case(vm)) {
                return Err(crate::Error::Config(format!("VM '{}' is listed twice", vm)));
            }
        }
        if self.backup_root.as_os_str().is_empty() {
            return Err(crate::Error::Config("backup_root cannot be empty".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::Config("poll_interval_secs must be at least 1".into()));
        }
        if self.ping_count < 1 {
            return Err(crate::Error::Config("ping_count must be at least 1".into()));
        }
        if self.health_retries < 1 {
            return Err(crate::Error::Config("health_retries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_gb.saturating_mul(BYTES_PER_GB)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.backup_root.join(AUDIT_LOG_NAME))
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.transcript_log
            .clone()
            .unwrap_or_else(|| self.backup_root.join(TRANSCRIPT_LOG_NAME))
    }
}

#[derive(Default)]
pub struct MaintenanceConfigBuilder {
    config: MaintenanceConfig,
}

impl MaintenanceConfigBuilder {
    pub fn from_config(config: MaintenanceConfig) -> Self {
        Self { config }
    }

    pub fn vms<I, S>(mut self, vms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.vms = vms.into_iter().map(Into::into).collect();
        self
    }

    pub fn probe_target(mut self, vm: impl Into<String>, target: impl Into<String>) -> Self {
        self.config.probe_targets.insert(vm, target);
        self
    }

    pub fn backup_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backup_root = path.into();
        self
    }

    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_timeout_secs = secs;
        self
    }

    pub fn start_timeout_secs(mut self, secs: u64) -> Self {
        self.config.start_timeout_secs = secs;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    pub fn min_free_gb(mut self, gb: u64) -> Self {
        self.config.min_free_gb = gb;
        self
    }

    pub fn cool_down_secs(mut self, secs: u64) -> Self {
        self.config.cool_down_secs = secs;
        self
    }

    pub fn ping_count(mut self, count: u32) -> Self {
        self.config.ping_count = count;
        self
    }

    pub fn health_retries(mut self, retries: u32) -> Self {
        self.config.health_retries = retries;
        self
    }

    pub fn retry_interval_secs(mut self, secs: u64) -> Self {
        self.config.retry_interval_secs = secs;
        self
    }

    pub fn audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.audit_log = Some(path.into());
        self
    }

    pub fn transcript_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.transcript_log = Some(path.into());
        self
    }

    /// Apply every override that is set. Fails on a malformed probe entry.
    pub fn overrides(mut self, overrides: &ConfigOverrides) -> crate::Result<Self> {
        if !overrides.vms.is_empty() {
            self = self.vms(overrides.vms.iter().cloned());
        }
        for entry in &overrides.probes {
            let (vm, target) = ProbeTargets::parse_entry(entry)?;
            self = self.probe_target(vm, target);
        }
        if let Some(root) = &overrides.backup_root {
            self = self.backup_root(root.clone());
        }
        if let Some(secs) = overrides.shutdown_timeout_secs {
            self = self.shutdown_timeout_secs(secs);
        }
        if let Some(gb) = overrides.min_free_gb {
            self = self.min_free_gb(gb);
        }
        if let Some(secs) = overrides.cool_down_secs {
            self = self.cool_down_secs(secs);
        }
        if let Some(count) = overrides.ping_count {
            self = self.ping_count(count);
        }
        if let Some(retries) = overrides.health_retries {
            self = self.health_retries(retries);
        }
        if let Some(secs) = overrides.retry_interval_secs {
            self = self.retry_interval_secs(secs);
        }
        Ok(self)
    }

    pub fn build(self) -> MaintenanceConfig {
        self.config
    }

    pub fn build_validated(self) -> crate::Result<MaintenanceConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
