// Command handlers

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use prl_config::DriverConfig;
use prl_driver::{detect, Command as DriverCommand, Driver, HostNetwork, StartMode};
use tracing::debug;

use crate::cli::{Args, Command};

/// Main command dispatcher
pub fn execute_command(args: Args) -> Result<()> {
    let config =
        DriverConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let driver = detect(&config, resolve_vm(&config, args.vm.as_deref())?)?;
    debug!(driver = driver.name(), command = ?args.command, "dispatching");

    match args.command {
        Command::Verify => {
            driver.verify()?;
            println!("Parallels Desktop {} ({})", driver.version(), driver.name());
        }
        Command::List { json } => {
            let vms = driver.read_vm_names()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&vms)?);
            } else {
                for (name, uuid) in &vms {
                    println!("{name}\t{uuid}");
                }
            }
        }
        Command::State => println!("{}", driver.read_state()?),
        Command::Start { gui } => {
            let mode = if gui { StartMode::Gui } else { StartMode::Headless };
            driver.start(mode)?;
        }
        Command::Halt { force } => driver.halt(force)?,
        Command::Suspend => driver.suspend()?,
        Command::Resume => driver.resume()?,
        Command::Delete => driver.delete()?,
        Command::Import { path } => {
            let uuid = driver
                .import(&path)
                .with_context(|| format!("Failed to import {}", path.display()))?;
            println!("{uuid}");
        }
        Command::Export { dest } => export(driver.as_ref(), &dest)?,
        Command::Mac => println!("{}", driver.read_mac_address()?),
        Command::Bridged => {
            for iface in driver.read_bridged_interfaces()? {
                println!("{}", iface.name);
            }
        }
        Command::Networks => {
            print_network(&driver.read_shared_interface()?);
            for net in driver.read_host_only_interfaces()? {
                print_network(&net);
            }
        }
        Command::Exec { retry, args } => {
            let mut command = DriverCommand::new(args);
            if retry {
                command = command.retryable();
            }
            print!("{}", driver.execute_command(&command)?);
        }
    }
    Ok(())
}

/// `--vm` accepts either a UUID or a registered name. Commands that need no
/// VM skip the lookup.
fn resolve_vm(config: &DriverConfig, vm: Option<&str>) -> Result<Option<String>> {
    let Some(vm) = vm else {
        return Ok(None);
    };
    if vm.starts_with('{') {
        return Ok(Some(vm.to_string()));
    }
    let lookup = detect(config, None)?;
    Ok(Some(
        lookup
            .read_vm_names()?
            .remove(vm)
            .unwrap_or_else(|| vm.to_string()),
    ))
}

fn export(driver: &dyn Driver, dest: &std::path::Path) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.set_message(format!("Exporting to {}", dest.display()));

    let mut on_progress = |percent: u8| bar.set_position(u64::from(percent));
    let result = driver.export(dest, Some(&mut on_progress));
    match result {
        Ok(()) => {
            bar.finish_with_message("Export complete");
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message("Export failed");
            Err(e.into())
        }
    }
}

fn print_network(net: &HostNetwork) {
    let addr = match (net.ip, net.netmask) {
        (Some(ip), Some(mask)) => format!("{ip}/{mask}"),
        (Some(ip), None) => ip.to_string(),
        _ => "-".to_string(),
    };
    let bound = net.bound_to.as_deref().unwrap_or("-");
    match &net.dhcp {
        Some(dhcp) => println!(
            "{}\t{}\t{}\tdhcp {}-{}",
            net.name, bound, addr, dhcp.lower, dhcp.upper
        ),
        None => println!("{}\t{}\t{}", net.name, bound, addr),
    }
}
