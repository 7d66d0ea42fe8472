//! The `prlctl`/`prlsrvctl` backed driver, parameterized by release dialect.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::path::Path;
use std::thread;

use chrono::Utc;
use prl_core::OutputEvent;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::dialect::{Dialect, Pd10, Pd11, Pd12};
use crate::json::json;
use crate::meta::read_version;
use crate::network::{
    adapter_ifaces, parse_adapters, parse_forwarded_ports, parse_network_info, AdapterKind,
    BridgedInterface, ForwardedPort, HostNetwork, HostOnlyNetworkOptions, NetworkAdapterSpec,
    NetworkInterface, Protocol, VirtualNetwork,
};
use crate::progress::{PercentParser, ProgressParser};
use crate::runner::CommandRunner;
use crate::{Driver, DriverError, Result, SharedFolder, StartMode, VmState};

/// Name of the product's NAT network.
const SHARED_NETWORK: &str = "Shared";

/// Shared-network adapter slot; never disabled when re-configuring adapters.
const SHARED_DEVICE: &str = "net0";

/// Host-only adapters below this index are product defaults and never deleted.
const FIRST_USER_HOST_ONLY_INDEX: u32 = 2;

/// Attempts `vm_exists` makes while the dispatcher reports a login failure.
const LOGIN_RETRIES: usize = 5;

pub type Pd10Driver = PrlctlDriver<Pd10>;
pub type Pd11Driver = PrlctlDriver<Pd11>;
pub type Pd12Driver = PrlctlDriver<Pd12>;

#[derive(Debug, Deserialize)]
struct VmListEntry {
    #[serde(default)]
    name: String,
    uuid: String,
}

/// Driver for one Parallels Desktop release family.
pub struct PrlctlDriver<D: Dialect> {
    runner: CommandRunner,
    uuid: Option<String>,
    version: String,
    clone_name_separator: String,
    clone_suffix: fn(&str) -> String,
    _dialect: PhantomData<fn() -> D>,
}

impl<D: Dialect> PrlctlDriver<D> {
    pub fn new(runner: CommandRunner, uuid: Option<String>, version: impl Into<String>) -> Self {
        Self {
            runner,
            uuid,
            version: version.into(),
            clone_name_separator: "_".to_string(),
            clone_suffix: generated_clone_suffix,
            _dialect: PhantomData,
        }
    }

    pub fn with_clone_name_separator(mut self, separator: impl Into<String>) -> Self {
        self.clone_name_separator = separator.into();
        self
    }

    /// Replace the generator for the part of a cloned VM's name that follows
    /// the template name. It receives the configured separator.
    pub fn with_clone_suffix(mut self, suffix: fn(&str) -> String) -> Self {
        self.clone_suffix = suffix;
        self
    }

    fn vm(&self, operation: &'static str) -> Result<&str> {
        self.uuid
            .as_deref()
            .ok_or(DriverError::VmNotBound { operation })
    }

    fn run(&self, command: Command) -> Result<String> {
        self.runner.execute(&command)
    }

    fn read_vm_list(&self, scope: &str) -> Result<Vec<VmListEntry>> {
        let out = self.run(
            Command::new(["list", scope, "--no-header", "--json", "-o", "name,uuid"]).retryable(),
        )?;
        Ok(json(&out, Vec::new()))
    }

    /// `--info` records for every VM and template.
    fn read_vms_info(&self) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        for scope in ["--all", "--template"] {
            let out = self.run(
                Command::new(["list", scope, "--info", "--no-header", "--json"]).retryable(),
            )?;
            records.extend(json::<Vec<Value>>(&out, Vec::new()));
        }
        Ok(records)
    }

    fn read_host_info(&self) -> Result<Value> {
        let out = self.run(Command::service(["info", "--json"]).retryable())?;
        Ok(json(&out, Value::Object(Map::new())))
    }

    fn read_virtual_networks(&self) -> Result<Vec<VirtualNetwork>> {
        let out = self.run(Command::service(["net", "list", "--json"]).retryable())?;
        Ok(json(&out, Vec::new()))
    }

    fn read_network_info(&self, network_id: &str) -> Result<HostNetwork> {
        let out = self.run(Command::service(["net", "info", network_id, "--json"]).retryable())?;
        let info = json(&out, Value::Object(Map::new()));
        Ok(parse_network_info(network_id, &info))
    }

    fn read_shared_network_info(&self) -> Result<Value> {
        let out =
            self.run(Command::service(["net", "info", SHARED_NETWORK, "--json"]).retryable())?;
        Ok(json(&out, Value::Object(Map::new())))
    }

    /// Find a registered VM or template by its bundle path.
    fn find_by_home(&self, bundle: &Path) -> Result<Option<(String, String)>> {
        let wanted = bundle.to_string_lossy();
        let wanted = wanted.trim_end_matches('/');
        Ok(self.read_vms_info()?.into_iter().find_map(|vm| {
            let home = vm.get("Home").and_then(Value::as_str)?;
            if home.trim_end_matches('/') != wanted {
                return None;
            }
            let uuid = vm.get("ID").and_then(Value::as_str)?.to_string();
            let name = vm
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or(&uuid)
                .to_string();
            Some((name, uuid))
        }))
    }

    fn clone_name(&self, template: &str) -> String {
        let sep = &self.clone_name_separator;
        format!("{template}{sep}{}", (self.clone_suffix)(sep))
    }
}

/// `<millis><sep><random>`, unique enough for repeated imports of one template.
fn generated_clone_suffix(sep: &str) -> String {
    format!(
        "{millis}{sep}{random}",
        millis = Utc::now().timestamp_millis(),
        random = rand::random::<u32>() % 100_000,
    )
}

impl<D: Dialect> Driver for PrlctlDriver<D> {
    fn name(&self) -> &'static str {
        D::NAME
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    fn verify(&self) -> Result<()> {
        read_version(&self.runner).map(|_| ())
    }

    fn vm_exists(&self, id: &str) -> Result<bool> {
        let command = Command::new(["list", id]);
        for _ in 0..LOGIN_RETRIES {
            let result = self.runner.raw(&command, None)?;
            if result.success() {
                return Ok(true);
            }
            // The dispatcher service occasionally rejects requests right after
            // it starts. Anything else means the VM is not there.
            if !result.stderr.contains("Login failed:") {
                return Ok(false);
            }
            thread::sleep(self.runner.retry().delay());
        }

        // Still failing: a checked run surfaces the error.
        self.runner.execute(&command)?;
        Ok(true)
    }

    fn read_state(&self) -> Result<VmState> {
        let uuid = self.vm("read_state")?;
        let command = Command::new(["list", uuid, "--no-header", "-o", "status"]);
        match self.runner.execute(&command) {
            Ok(out) => Ok(VmState::from_status(&out).unwrap_or_else(|| {
                warn!(status = out.trim(), "unknown VM status, treating as inaccessible");
                VmState::Inaccessible
            })),
            Err(DriverError::Execution { stderr, .. })
                if stderr.contains("could not be found") || stderr.contains("does not exist") =>
            {
                Ok(VmState::NotCreated)
            }
            Err(e) => Err(e),
        }
    }

    fn read_vms(&self) -> Result<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        for scope in ["--all", "--template"] {
            ids.extend(self.read_vm_list(scope)?.into_iter().map(|vm| vm.uuid));
        }
        Ok(ids)
    }

    fn read_vm_names(&self) -> Result<BTreeMap<String, String>> {
        let mut names = BTreeMap::new();
        for scope in ["--all", "--template"] {
            names.extend(
                self.read_vm_list(scope)?
                    .into_iter()
                    .map(|vm| (vm.name, vm.uuid)),
            );
        }
        Ok(names)
    }

    fn read_settings(&self) -> Result<Value> {
        let uuid = self.vm("read_settings")?;
        let out = self.run(
            Command::new(["list", uuid, "--info", "--no-header", "--json"]).retryable(),
        )?;
        Ok(json::<Vec<Value>>(&out, Vec::new())
            .into_iter()
            .next()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    fn start(&self, mode: StartMode) -> Result<()> {
        let uuid = self.vm("start")?;
        if D::SUPPORTS_HEADLESS {
            let view = match mode {
                StartMode::Headless => "headless",
                StartMode::Gui => "window",
            };
            self.run(Command::new(["set", uuid, "--startup-view", view]).retryable())?;
        }
        self.run(Command::new(["start", uuid]))?;
        Ok(())
    }

    fn halt(&self, force: bool) -> Result<()> {
        let uuid = self.vm("halt")?;
        let mut command = Command::new(["stop", uuid]);
        if force {
            command = command.arg("--kill");
        }
        self.run(command)?;
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        let uuid = self.vm("suspend")?;
        self.run(Command::new(["suspend", uuid]))?;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let uuid = self.vm("resume")?;
        self.run(Command::new(["resume", uuid]))?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let uuid = self.vm("delete")?;
        self.run(Command::new(["delete", uuid]))?;
        Ok(())
    }

    fn register(&self, path: &Path) -> Result<()> {
        self.run(
            Command::new(["register"])
                .arg(path.to_string_lossy())
                .arg("--preserve-uuid")
                .retryable(),
        )?;
        Ok(())
    }

    fn unregister(&self, id: &str) -> Result<()> {
        self.run(Command::new(["unregister", id]).retryable())?;
        Ok(())
    }

    fn import(&self, source: &Path) -> Result<String> {
        let (template_name, template_uuid) = match self.find_by_home(source)? {
            Some(found) => found,
            None => {
                self.register(source)?;
                self.find_by_home(source)?.ok_or_else(|| {
                    DriverError::UnexpectedOutput(format!(
                        "registered {} but it is not listed",
                        source.display()
                    ))
                })?
            }
        };

        let vm_name = self.clone_name(&template_name);
        info!(template = %template_name, name = %vm_name, "cloning imported template");
        let mut command =
            Command::new(["clone", template_uuid.as_str(), "--name", vm_name.as_str()]);
        if D::REGENERATE_SRC_UUID {
            command = command.arg("--regenerate-src-uuid");
        }

        let mut log_progress = |event: OutputEvent<'_>| debug!("clone: {}", event.line());
        let cloned = self
            .runner
            .execute_with_output(&command, Some(&mut log_progress));
        // The template is unregistered whether or not the clone succeeded.
        let unregistered = self.unregister(&template_uuid);
        cloned?;
        unregistered?;

        self.read_vm_names()?.remove(&vm_name).ok_or_else(|| {
            DriverError::UnexpectedOutput(format!("cloned VM '{vm_name}' is not listed"))
        })
    }

    fn export(&self, dest: &Path, on_progress: Option<&mut dyn FnMut(u8)>) -> Result<()> {
        let uuid = self.vm("export")?;
        let name = dest
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DriverError::UnexpectedOutput(format!("no bundle name in {}", dest.display()))
            })?;
        let dst_dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let command = Command::new(["clone", uuid, "--name", name.as_str(), "--template", "--dst"])
            .arg(dst_dir.to_string_lossy());

        match on_progress {
            Some(report) => {
                let mut parser = PercentParser::new(report);
                let mut sink = |event: OutputEvent<'_>| parser.parse_line(event.line());
                self.runner.execute_with_output(&command, Some(&mut sink))?;
                parser.finish();
            }
            None => {
                self.runner.execute(&command)?;
            }
        }
        Ok(())
    }

    fn read_network_interfaces(&self) -> Result<BTreeMap<u8, NetworkInterface>> {
        Ok(parse_adapters(&self.read_settings()?))
    }

    fn enable_adapters(&self, adapters: &[NetworkAdapterSpec]) -> Result<()> {
        let available = self.max_network_adapters();
        let highest_slot = adapters
            .iter()
            .map(|a| usize::from(a.slot) + 1)
            .max()
            .unwrap_or(0);
        let requested = adapters.len().max(highest_slot);
        if requested > available {
            return Err(DriverError::CapacityExceeded {
                requested,
                available,
            });
        }

        let uuid = self.vm("enable_adapters")?;
        let settings = self.read_settings()?;
        let existing: Vec<String> = settings
            .get("Hardware")
            .and_then(Value::as_object)
            .map(|hw| {
                hw.keys()
                    .filter(|name| name.starts_with("net"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for device in existing.iter().filter(|d| d.as_str() != SHARED_DEVICE) {
            self.run(Command::new(["set", uuid, "--device-set", device.as_str(), "--disable"]))?;
        }

        for adapter in adapters {
            let device = adapter.device_name();
            let mut command = Command::new(["set", uuid]);
            command = if existing.contains(&device) {
                command.args(["--device-set", device.as_str(), "--enable"])
            } else {
                command.args(["--device-add", "net"])
            };

            command = match &adapter.kind {
                AdapterKind::HostOnly { network } => {
                    command.args(["--type", "host", "--iface", network.as_str()])
                }
                AdapterKind::Bridged { interface } => {
                    command.args(["--type", "bridged", "--iface", interface.as_str()])
                }
                AdapterKind::Shared => command.args(["--type", "shared"]),
            };

            if let Some(mac) = &adapter.mac_address {
                command = command.args(["--mac", mac.as_str()]);
            }

            match adapter.nic_type {
                Some(nic) if D::SUPPORTS_ADAPTER_TYPE => {
                    command = command.args(["--adapter-type", nic.as_str()]);
                }
                Some(nic) => debug!(
                    nic = nic.as_str(),
                    driver = D::NAME,
                    "adapter type not supported, ignoring"
                ),
                None => {}
            }

            self.run(command)?;
        }
        Ok(())
    }

    fn read_bridged_interfaces(&self) -> Result<Vec<BridgedInterface>> {
        let host_info = self.read_host_info()?;
        let Some(hardware) = host_info.get("Hardware info").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        Ok(hardware
            .iter()
            .filter(|(_, params)| params.get("type").and_then(Value::as_str) == Some("net"))
            .filter(|(name, _)| !name.starts_with("vnic"))
            .map(|(name, _)| BridgedInterface { name: name.clone() })
            .collect())
    }

    fn read_host_only_interfaces(&self) -> Result<Vec<HostNetwork>> {
        self.read_virtual_networks()?
            .into_iter()
            .filter(VirtualNetwork::is_host_only)
            .map(|net| self.read_network_info(&net.id))
            .collect()
    }

    fn read_shared_interface(&self) -> Result<HostNetwork> {
        Ok(parse_network_info(
            SHARED_NETWORK,
            &self.read_shared_network_info()?,
        ))
    }

    fn create_host_only_network(&self, options: &HostOnlyNetworkOptions) -> Result<HostNetwork> {
        let id = options.network_id.as_str();
        self.run(Command::service(["net", "add", id, "--type", "host-only"]))?;

        let mut command = Command::service(["net", "set", id, "--ip"])
            .arg(format!("{}/{}", options.adapter_ip, options.netmask));
        if let Some(dhcp) = &options.dhcp {
            command = command
                .arg("--dhcp-ip")
                .arg(dhcp.server.to_string())
                .arg("--ip-scope-start")
                .arg(dhcp.lower.to_string())
                .arg("--ip-scope-end")
                .arg(dhcp.upper.to_string());
        }
        self.run(command)?;

        Ok(HostNetwork {
            name: options.network_id.clone(),
            bound_to: None,
            ip: Some(options.adapter_ip),
            netmask: Some(options.netmask),
            dhcp: options.dhcp.clone(),
        })
    }

    fn delete_unused_host_only_networks(&self) -> Result<()> {
        let mut candidates: Vec<VirtualNetwork> = self
            .read_virtual_networks()?
            .into_iter()
            .filter(|net| {
                net.is_host_only()
                    && net
                        .adapter_index()
                        .is_some_and(|i| i >= FIRST_USER_HOST_ONLY_INDEX)
            })
            .collect();

        for vm in self.read_vms_info()? {
            let used = adapter_ifaces(&vm);
            candidates.retain(|net| {
                net.bound_to
                    .as_ref()
                    .map_or(true, |bound| !used.contains(bound))
            });
        }

        for net in candidates {
            info!(network = %net.id, "deleting unused host-only network");
            self.run(Command::service(["net", "del", net.id.as_str()]))?;
        }
        Ok(())
    }

    fn read_forwarded_ports(&self, global: bool) -> Result<Vec<ForwardedPort>> {
        let ports = parse_forwarded_ports(&self.read_shared_network_info()?);
        if global {
            return Ok(ports);
        }
        let uuid = self.vm("read_forwarded_ports")?;
        Ok(ports
            .into_iter()
            .filter(|p| p.target.as_deref() == Some(uuid))
            .collect())
    }

    fn forward_ports(&self, ports: &[ForwardedPort]) -> Result<()> {
        if ports.is_empty() {
            return Ok(());
        }
        let uuid = self.vm("forward_ports")?;
        let mut command = Command::service(["net", "set", SHARED_NETWORK]);
        for port in ports {
            command = command.arg(format!("--nat-{}-add", port.protocol.as_str())).arg(format!(
                "{},{},{},{}",
                port.name, port.host_port, uuid, port.guest_port
            ));
        }
        self.run(command)?;
        Ok(())
    }

    fn clear_forwarded_ports(&self, ports: &[ForwardedPort]) -> Result<()> {
        if ports.is_empty() {
            return Ok(());
        }
        let mut command = Command::service(["net", "set", SHARED_NETWORK]);
        for port in ports {
            command = command
                .arg(format!("--nat-{}-del", port.protocol.as_str()))
                .arg(port.name.as_str());
        }
        self.run(command)?;
        Ok(())
    }

    fn read_mac_address(&self) -> Result<String> {
        parse_adapters(&self.read_settings()?)
            .into_values()
            .find(|nic| nic.kind == AdapterKind::Shared)
            .and_then(|nic| nic.mac_address)
            .ok_or(DriverError::SharedAdapterNotFound)
    }

    fn set_mac_address(&self, mac: &str) -> Result<()> {
        let uuid = self.vm("set_mac_address")?;
        self.run(Command::new([
            "set",
            uuid,
            "--device-set",
            SHARED_DEVICE,
            "--type",
            "shared",
            "--mac",
            mac,
        ]))?;
        Ok(())
    }

    fn set_name(&self, name: &str) -> Result<()> {
        let uuid = self.vm("set_name")?;
        self.run(Command::new(["set", uuid, "--name", name]).retryable())?;
        Ok(())
    }

    fn share_folders(&self, folders: &[SharedFolder]) -> Result<()> {
        let uuid = self.vm("share_folders")?;
        for folder in folders {
            self.run(
                Command::new(["set", uuid, "--shf-host-add", folder.name.as_str(), "--path"])
                    .arg(folder.host_path.to_string_lossy()),
            )?;
        }
        Ok(())
    }

    fn clear_shared_folders(&self) -> Result<()> {
        let uuid = self.vm("clear_shared_folders")?;
        let settings = self.read_settings()?;
        let names: Vec<String> = settings
            .get("Host Shared Folders")
            .and_then(Value::as_object)
            .map(|folders| {
                folders
                    .keys()
                    .filter(|name| name.as_str() != "enabled")
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for name in names {
            self.run(Command::new(["set", uuid, "--shf-host-del", name.as_str()]))?;
        }
        Ok(())
    }

    fn read_guest_tools_version(&self) -> Result<Option<String>> {
        Ok(D::guest_tools_version(&self.read_settings()?))
    }

    fn ssh_port(&self, expected_guest_port: u16) -> Result<u16> {
        Ok(self
            .read_forwarded_ports(false)?
            .into_iter()
            .find(|p| p.protocol == Protocol::Tcp && p.guest_port == expected_guest_port)
            .map_or(expected_guest_port, |p| p.host_port))
    }

    fn max_network_adapters(&self) -> usize {
        D::MAX_NETWORK_ADAPTERS
    }
}
