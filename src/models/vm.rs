//! VM model


/// Observed state of a VM as reported by Hyper-V
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Powered off
    Off,
    /// Currently executing
    Running,
    /// State saved to disk
    Saved,
    /// Paused in memory
    Paused,
    /// Boot in progress
    Starting,
    /// Shutdown in progress
    Stopping,
    /// Any other transitional or error state
    Other,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Off => write!(f, "Off"),
            VmState::Running => write!(f, "Running"),
            VmState::Saved => write!(f, "Saved"),
            VmState::Paused => write!(f, "Paused"),
            VmState::Starting => write!(f, "Starting"),
            VmState::Stopping => write!(f, "Stopping"),
            VmState::Other => write!(f, "Other"),
        }
    }
}

impl VmState {
    /// Parse the textual `State` property of `Get-VM`
    pub fn from_hyperv_state(state: &str) -> Self {
        match state.trim() {
            s if s.eq_ignore_ascii_case("Off") => VmState::Off,
            s if s.eq_ignore_ascii_case("Running") => VmState::Running,
            s if s.eq_ignore_ascii_case("Saved") => VmState::Saved,
            s if s.eq_ignore_ascii_case("Paused") => VmState::Paused,
            s if s.eq_ignore_ascii_case("Starting") => VmState::Starting,
            s if s.eq_ignore_ascii_case("Stopping") => VmState::Stopping,
            _ => VmState::Other,
        }
    }

    pub fn is_off(&self) -> bool {
        *self == VmState::Off
    }
}

/// A VM as seen in the host inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    /// Hyper-V VM name
    pub name: String,
    /// Current state
    pub state: VmState,
    /// Hyper-V VM GUID, if reported
    pub id: Option<String>,
}

impl VmInfo {
    pub fn new(name: impl Into<String>, state: VmState) -> Self {
        Self {
            name: name.into(),
            state,
            id: None,
        }
    }
}
