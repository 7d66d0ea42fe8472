// CLI argument parsing and definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "prlvm")]
#[command(about = "Drive Parallels Desktop VMs through prlctl")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a driver configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// UUID or name of the VM to operate on
    #[arg(long, global = true)]
    pub vm: Option<String>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check that the Parallels Desktop utilities are installed and answer
    Verify,
    /// List registered VMs and templates
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the VM's state
    State,
    /// Start the VM
    Start {
        /// Open the VM window instead of running headless
        #[arg(long)]
        gui: bool,
    },
    /// Shut the VM down
    Halt {
        /// Kill the VM instead of an ACPI shutdown
        #[arg(short, long)]
        force: bool,
    },
    /// Suspend the VM
    Suspend,
    /// Resume a suspended VM
    Resume,
    /// Delete the VM and its files
    Delete,
    /// Import a VM bundle as a new VM
    Import {
        /// Path to the .pvm bundle
        path: PathBuf,
    },
    /// Export the VM as a template bundle
    Export {
        /// Destination bundle path
        dest: PathBuf,
    },
    /// Show the MAC address of the shared adapter
    Mac,
    /// List host interfaces adapters can bridge to
    Bridged,
    /// List the shared and host-only virtual networks
    Networks,
    /// Run a raw prlctl command (start with `prlsrvctl` to target the service utility)
    Exec {
        /// Retry on failure using the configured attempts
        #[arg(long)]
        retry: bool,
        /// Arguments passed to the utility
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
}
