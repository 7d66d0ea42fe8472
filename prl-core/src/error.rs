//! Error types for driver operations.
//!
//! Only a handful of these ever cross the driver boundary: a failed control
//! utility invocation, a missing control utility, and exhausted adapter slots.
//! Malformed CLI output is never an error; see `prl_driver::json`.

use thiserror::Error;

/// Errors that can occur while driving the virtualization product's control utilities.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The control utility exited non-zero outside of an interrupted session.
    #[error("Command failed: {command}\n\nstderr:\n{stderr}")]
    Execution { command: String, stderr: String },

    #[error("Control utility not found or misconfigured: {0}")]
    ToolNotFound(String),

    #[error("Unsupported Parallels Desktop version: {0}")]
    UnsupportedVersion(String),

    #[error("Not enough network adapter slots: {requested} requested, {available} available")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("Operation '{operation}' requires a VM, but the driver is not bound to one")]
    VmNotBound { operation: &'static str },

    #[error("No shared network adapter is configured on this VM")]
    SharedAdapterNotFound,

    #[error("Unexpected control utility output: {0}")]
    UnexpectedOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Build an execution failure from the arguments that were run.
    pub fn execution<S: AsRef<str>>(args: &[S], stderr: impl Into<String>) -> Self {
        Self::Execution {
            command: format!(
                "{:?}",
                args.iter().map(|a| a.as_ref()).collect::<Vec<_>>()
            ),
            stderr: stderr.into(),
        }
    }

    /// Whether the retry policy should try this failure again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }

    /// Convert the error to a user-facing message with a hint where one helps.
    pub fn user_friendly(&self) -> String {
        match self {
            Self::ToolNotFound(detail) => format!(
                "{}\n💡 Install Parallels Desktop, or point `tools.prlctl` in the config at it ({})",
                "Parallels Desktop command-line utilities are not available", detail
            ),
            Self::Execution { stderr, .. } if stderr.contains("Login failed") => format!(
                "{}\n💡 Make sure Parallels Desktop is running and you are logged in",
                self
            ),
            Self::CapacityExceeded { available, .. } => format!(
                "{}\n💡 Parallels Desktop supports at most {} network adapters per VM",
                self, available
            ),
            Self::UnsupportedVersion(_) => {
                format!("{}\n💡 Upgrade to Parallels Desktop 10 or newer", self)
            }
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => format!(
                "{}\n💡 Check permissions on the Parallels Desktop command-line utilities",
                self
            ),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
