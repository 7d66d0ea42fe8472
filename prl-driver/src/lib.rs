//! Parallels Desktop driver library.
//!
//! This library drives Parallels Desktop through its command-line utilities,
//! `prlctl` and `prlsrvctl`. It defines the [`Driver`] contract that every
//! version-specific driver implements, the [`CommandRunner`] they all execute
//! through, and [`detect`] to pick the right driver for the installed release.

// Standard library
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// External crates
use serde_json::Value;

// Re-export common types for convenience
pub use command::{Command, CommandOptions, Tool, PRIMARY_TOOL, SERVICE_TOOL};
pub use dialect::{Dialect, Pd10, Pd11, Pd12};
pub use json::json;
pub use meta::{detect, detect_with_runner, parse_version, read_version};
pub use network::{
    AdapterKind, BridgedInterface, DhcpRange, ForwardedPort, HostNetwork,
    HostOnlyNetworkOptions, NetworkAdapterSpec, NetworkInterface, NicType, Protocol,
    VirtualNetwork,
};
pub use prl_core::{DriverError, ExecutionResult, Notify, OutputEvent, Result};
pub use prlctl::{Pd10Driver, Pd11Driver, Pd12Driver, PrlctlDriver};
pub use runner::{CommandRunner, ToolPaths};

pub mod command;
pub mod dialect;
pub mod json;
pub mod meta;
pub mod network;
pub mod prlctl;
pub mod progress;
pub mod runner;

/// Adapter slot count assumed by drivers that do not know better.
pub const DEFAULT_MAX_NETWORK_ADAPTERS: usize = 16;

/// Lifecycle state of a VM. Exactly one holds at any observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmState {
    Running,
    Stopped,
    Suspended,
    /// Registered, but its configuration cannot be read
    Inaccessible,
    NotCreated,
}

impl VmState {
    /// Map a `prlctl list -o status` value. Transitional states map to the
    /// state the VM is still in; unknown values yield `None`.
    pub fn from_status(status: &str) -> Option<Self> {
        match status.trim() {
            "" => Some(VmState::NotCreated),
            "running" | "starting" | "resuming" | "stopping" | "restoring" | "resetting" => {
                Some(VmState::Running)
            }
            "stopped" => Some(VmState::Stopped),
            "suspended" | "suspending" | "paused" | "pausing" => Some(VmState::Suspended),
            "invalid" => Some(VmState::Inaccessible),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Running => "running",
            VmState::Stopped => "stopped",
            VmState::Suspended => "suspended",
            VmState::Inaccessible => "inaccessible",
            VmState::NotCreated => "not_created",
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a VM window is presented on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    #[default]
    Headless,
    Gui,
}

/// A host directory shared into the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFolder {
    pub name: String,
    pub host_path: PathBuf,
}

/// The contract every version-specific Parallels Desktop driver implements.
///
/// Per-VM operations act on the VM the driver was constructed for and fail
/// with [`DriverError::VmNotBound`] when there is none.
pub trait Driver {
    /// Driver name, e.g. `pd11`.
    fn name(&self) -> &'static str;

    /// Product version the driver was selected for.
    fn version(&self) -> &str;

    /// UUID of the VM this driver operates on, if any.
    fn uuid(&self) -> Option<&str>;

    /// The runner all commands go through.
    fn runner(&self) -> &CommandRunner;

    /// Check that the control utility is present and answers.
    /// Call before any other operation in a session.
    fn verify(&self) -> Result<()>;

    fn vm_exists(&self, id: &str) -> Result<bool>;

    fn read_state(&self) -> Result<VmState>;

    /// UUIDs of every registered VM and template.
    fn read_vms(&self) -> Result<BTreeSet<String>>;

    /// Registered VM and template names mapped to their UUIDs.
    fn read_vm_names(&self) -> Result<BTreeMap<String, String>>;

    /// Full `prlctl list --info` record of the bound VM. Empty object when
    /// the utility's output is not JSON.
    fn read_settings(&self) -> Result<Value>;

    fn start(&self, mode: StartMode) -> Result<()>;

    /// Shut the VM down; `force` kills it instead of an ACPI shutdown.
    fn halt(&self, force: bool) -> Result<()>;

    fn suspend(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    fn delete(&self) -> Result<()>;

    fn register(&self, path: &Path) -> Result<()>;

    fn unregister(&self, id: &str) -> Result<()>;

    /// Import a VM bundle as a new VM and return the new VM's UUID.
    fn import(&self, source: &Path) -> Result<String>;

    /// Export the bound VM as a template bundle at `dest`.
    fn export(&self, dest: &Path, on_progress: Option<&mut dyn FnMut(u8)>) -> Result<()>;

    /// Enabled adapters keyed by slot.
    fn read_network_interfaces(&self) -> Result<BTreeMap<u8, NetworkInterface>>;

    /// Configure adapters. Fails with [`DriverError::CapacityExceeded`]
    /// before running anything if the adapters do not fit.
    fn enable_adapters(&self, adapters: &[NetworkAdapterSpec]) -> Result<()>;

    fn read_bridged_interfaces(&self) -> Result<Vec<BridgedInterface>>;

    fn read_host_only_interfaces(&self) -> Result<Vec<HostNetwork>>;

    fn read_shared_interface(&self) -> Result<HostNetwork>;

    fn create_host_only_network(&self, options: &HostOnlyNetworkOptions) -> Result<HostNetwork>;

    /// Remove host-only networks created beyond the product defaults that no
    /// VM adapter references.
    fn delete_unused_host_only_networks(&self) -> Result<()>;

    /// NAT rules on the shared network; all of them when `global`, else only
    /// those targeting the bound VM.
    fn read_forwarded_ports(&self, global: bool) -> Result<Vec<ForwardedPort>>;

    fn forward_ports(&self, ports: &[ForwardedPort]) -> Result<()>;

    fn clear_forwarded_ports(&self, ports: &[ForwardedPort]) -> Result<()>;

    /// MAC address of the shared adapter.
    fn read_mac_address(&self) -> Result<String>;

    /// Set the shared adapter's MAC address (`auto` lets the product pick).
    fn set_mac_address(&self, mac: &str) -> Result<()>;

    fn set_name(&self, name: &str) -> Result<()>;

    fn share_folders(&self, folders: &[SharedFolder]) -> Result<()>;

    fn clear_shared_folders(&self) -> Result<()>;

    fn read_guest_tools_version(&self) -> Result<Option<String>>;

    /// Host port forwarding to `expected_guest_port`, or the guest port itself
    /// when the guest is reached directly.
    fn ssh_port(&self, expected_guest_port: u16) -> Result<u16>;

    fn max_network_adapters(&self) -> usize {
        DEFAULT_MAX_NETWORK_ADAPTERS
    }

    /// Run an arbitrary control utility command.
    fn execute_command(&self, command: &Command) -> Result<String> {
        self.runner().execute(command)
    }
}
