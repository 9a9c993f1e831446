//! Local host facilities: privilege check, volume capacity, operator identity

use crate::platform::HostSystem;
use crate::Result;
use std::path::{Path, PathBuf};

/// The machine this process runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHost;

impl HostSystem for LocalHost {
    fn is_elevated(&self) -> Result<bool> {
        token_is_elevated()
    }

    fn free_space(&self, path: &Path) -> Result<u64> {
        let existing = existing_ancestor(path);
        tracing::debug!(path = %existing.display(), "Querying free space");
        volume_free_bytes(&existing)
    }
}

/// Nearest ancestor of `path` (itself included) that exists on disk.
/// The export destination is usually not created yet when capacity is checked.
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(windows)]
fn token_is_elevated() -> Result<bool> {
    use std::ffi::c_void;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)?;

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        let queried = GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        );
        let _ = CloseHandle(token);
        queried?;

        Ok(elevation.TokenIsElevated != 0)
    }
}

#[cfg(not(windows))]
fn token_is_elevated() -> Result<bool> {
    Ok(false)
}

#[cfg(windows)]
fn volume_free_bytes(path: &Path) -> Result<u64> {
    use windows::core::{HSTRING, PCWSTR};
    use windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    let dir = HSTRING::from(path.to_string_lossy().as_ref());
    let mut free_to_caller = 0u64;
    unsafe {
        GetDiskFreeSpaceExW(PCWSTR(dir.as_ptr()), Some(&mut free_to_caller), None, None)?;
    }
    Ok(free_to_caller)
}

#[cfg(not(windows))]
fn volume_free_bytes(path: &Path) -> Result<u64> {
    Err(crate::Error::PlatformUnavailable(format!(
        "volume capacity query for {} requires Windows",
        path.display()
    )))
}

/// Who ran the maintenance pass and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub host: String,
    pub user: String,
}

impl RunIdentity {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
        }
    }

    /// Read from `COMPUTERNAME`, `USERDOMAIN` and `USERNAME`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = non_empty("COMPUTERNAME")
            .or_else(|| non_empty("HOSTNAME"))
            .unwrap_or_else(|| "unknown".to_string());

        let user = match (non_empty("USERDOMAIN"), non_empty("USERNAME")) {
            (Some(domain), Some(name)) => format!(r"{}\{}", domain, name),
            (None, Some(name)) => name,
            _ => non_empty("USER").unwrap_or_else(|| "unknown".to_string()),
        };

        Self { host, user }
    }
}
