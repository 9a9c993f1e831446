//! Boundaries to the hypervisor, the host and the network

use crate::models::VmInfo;
use crate::Result;
use std::path::{Path, PathBuf};

/// VM inventory and control on the local hypervisor
#[cfg_attr(test, mockall::automock)]
pub trait VmPlatform {
    /// Whether the management service answers at all
    fn is_available(&self) -> Result<bool>;

    /// Look up a VM by name, `None` if it is not in the inventory
    fn get_vm(&self, name: &str) -> Result<Option<VmInfo>>;

    /// Request a guest-OS shutdown
    fn stop_vm(&self, name: &str) -> Result<()>;

    /// Cut power immediately
    fn turn_off_vm(&self, name: &str) -> Result<()>;

    fn start_vm(&self, name: &str) -> Result<()>;

    /// Export configuration and disks into `destination`
    fn export_vm(&self, name: &str, destination: &Path) -> Result<()>;

    /// Paths of the virtual disks attached to the VM
    fn disk_paths(&self, name: &str) -> Result<Vec<PathBuf>>;
}

/// Facilities of the machine the run executes on
#[cfg_attr(test, mockall::automock)]
pub trait HostSystem {
    fn is_elevated(&self) -> Result<bool>;

    /// Free bytes available to the caller on the volume holding `path`
    fn free_space(&self, path: &Path) -> Result<u64>;
}

/// Network reachability check
#[cfg_attr(test, mockall::automock)]
pub trait ReachabilityProbe {
    /// Send `count` echo requests to `target`; true if the target answered
    fn probe(&self, target: &str, count: u32) -> Result<bool>;
}
