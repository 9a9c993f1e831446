//! PowerShell wrappers for Hyper-V commands

use crate::models::{VmInfo, VmState};
use crate::platform::{ReachabilityProbe, VmPlatform};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// VM information from Hyper-V
#[derive(Debug, Clone, Deserialize)]
struct HyperVInfo {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Id")]
    id: Option<String>,
}

impl From<HyperVInfo> for VmInfo {
    fn from(info: HyperVInfo) -> Self {
        VmInfo {
            state: VmState::from_hyperv_state(&info.state),
            name: info.name,
            id: info.id,
        }
    }
}

/// Hyper-V operations on the local host
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperV;

impl HyperV {
    pub fn new() -> Self {
        Self
    }
}

impl VmPlatform for HyperV {
    /// Check the VM management service is running and the module is loaded
    fn is_available(&self) -> Result<bool> {
        let output = powershell(
            r#"if ((Get-Service -Name vmms -ErrorAction SilentlyContinue).Status -eq 'Running' -and (Get-Command Get-VM -ErrorAction SilentlyContinue)) { 'True' } else { 'False' }"#,
        )?;
        parse_bool(&output)
    }

    fn get_vm(&self, name: &str) -> Result<Option<VmInfo>> {
        let output = powershell(&format!(
            r#"Get-VM | Where-Object {{ $_.Name -eq '{}' }} | Select-Object Name, @{{N='State';E={{$_.State.ToString()}}}}, @{{N='Id';E={{$_.Id.ToString()}}}} | ConvertTo-Json -Compress"#,
            escape_ps(name)
        ))?;
        parse_vm_json(&output)
    }

    /// Graceful shutdown; returns once the guest has accepted the request
    fn stop_vm(&self, name: &str) -> Result<()> {
        powershell(&graceful_shutdown_script(name))?;
        Ok(())
    }

    /// Turn off VM immediately (like pulling power)
    fn turn_off_vm(&self, name: &str) -> Result<()> {
        powershell(&format!(
            "Stop-VM -Name '{}' -TurnOff -Force -Confirm:$false",
            escape_ps(name)
        ))?;
        Ok(())
    }

    fn start_vm(&self, name: &str) -> Result<()> {
        powershell(&format!("Start-VM -Name '{}'", escape_ps(name)))?;
        Ok(())
    }

    fn export_vm(&self, name: &str, destination: &Path) -> Result<()> {
        powershell(&format!(
            "Export-VM -Name '{}' -Path '{}'",
            escape_ps(name),
            escape_ps(&destination.to_string_lossy())
        ))?;
        Ok(())
    }

    fn disk_paths(&self, name: &str) -> Result<Vec<PathBuf>> {
        let output = powershell(&format!(
            "Get-VMHardDiskDrive -VMName '{}' | Select-Object -ExpandProperty Path",
            escape_ps(name)
        ))?;
        Ok(parse_lines(&output).map(PathBuf::from).collect())
    }
}

/// ICMP reachability through `Test-Connection`
#[derive(Debug, Default, Clone, Copy)]
pub struct PingProbe;

impl ReachabilityProbe for PingProbe {
    fn probe(&self, target: &str, count: u32) -> Result<bool> {
        let output = powershell(&format!(
            "Test-Connection -ComputerName '{}' -Count {} -Quiet",
            escape_ps(target),
            count.max(1)
        ))?;
        parse_bool(&output)
    }
}

/// Execute PowerShell command
fn powershell(script: &str) -> Result<String> {
    tracing::trace!(script, "powershell");
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
            script,
        ])
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(Error::PowerShell(format!(
            "Exit code: {:?}\nStderr: {}\nStdout: {}",
            output.status.code(),
            stderr.trim(),
            stdout.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Ask the guest to shut down through the shutdown integration service.
///
/// `InitiateShutdown` returns as soon as the guest accepts the request, so the
/// request does not depend on this PowerShell process staying alive.
/// Return value 0 is completed, 4096 is a started job.
fn graceful_shutdown_script(name: &str) -> String {
    format!(
        r#"$vm = Get-CimInstance -Namespace root\virtualization\v2 -ClassName Msvm_ComputerSystem | Where-Object {{ $_.ElementName -eq '{name}' }} | Select-Object -First 1
if (-not $vm) {{ throw "VM '{name}' not found" }}
$sc = Get-CimAssociatedInstance -InputObject $vm -ResultClassName Msvm_ShutdownComponent
if (-not $sc) {{ throw "Shutdown integration service is not available for '{name}'" }}
$r = Invoke-CimMethod -InputObject $sc -MethodName InitiateShutdown -Arguments @{{ Force = $true; Reason = 'hvbackup maintenance export' }}
if ($r.ReturnValue -ne 0 -and $r.ReturnValue -ne 4096) {{ throw "InitiateShutdown returned $($r.ReturnValue)" }}"#,
        name = escape_ps(name)
    )
}

/// Escape string for PowerShell
fn escape_ps(s: &str) -> String {
    s.replace('\'', "''")
}

/// `ConvertTo-Json` emits nothing for no match, an object for one and an array for many
fn parse_vm_json(output: &str) -> Result<Option<VmInfo>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let info = if trimmed.starts_with('[') {
        let all: Vec<HyperVInfo> = serde_json::from_str(trimmed)?;
        all.into_iter().next()
    } else {
        Some(serde_json::from_str::<HyperVInfo>(trimmed)?)
    };
    Ok(info.map(VmInfo::from))
}

fn parse_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty())
}

fn parse_bool(output: &str) -> Result<bool> {
    match output.trim() {
        s if s.eq_ignore_ascii_case("true") => Ok(true),
        s if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(Error::Parse(format!("expected True/False, got '{}'", other))),
    }
}
