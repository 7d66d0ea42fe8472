//! Installed product detection and driver selection.

use std::sync::OnceLock;

use prl_config::DriverConfig;
use regex::Regex;
use tracing::{debug, info};

use crate::command::Command;
use crate::prlctl::{Pd10Driver, Pd11Driver, Pd12Driver};
use crate::runner::CommandRunner;
use crate::{Driver, DriverError, Result};

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+\.\d+\.\d+)")
            .expect("Hardcoded version regex pattern should always compile")
    })
}

/// Extract the `X.Y.Z` version from `prlctl --version` output.
pub fn parse_version(output: &str) -> Option<String> {
    version_regex()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Ask `prlctl` for the installed product version.
///
/// Any failure to get a version out of the utility means the product is not
/// usable and is reported as [`DriverError::ToolNotFound`].
pub fn read_version(runner: &CommandRunner) -> Result<String> {
    let result = runner.raw(&Command::new(["--version"]), None)?;
    if !result.success() {
        debug!(exit_code = result.exit_code, stderr = %result.stderr, "prlctl --version failed");
        return Err(DriverError::ToolNotFound(format!(
            "prlctl --version exited with {}",
            result.exit_code
        )));
    }
    parse_version(&result.stdout).ok_or_else(|| {
        DriverError::ToolNotFound(format!(
            "no version in prlctl output: {}",
            result.stdout.trim()
        ))
    })
}

/// Detect the installed release and build the matching driver for `uuid`.
pub fn detect(config: &DriverConfig, uuid: Option<String>) -> Result<Box<dyn Driver>> {
    detect_with_runner(CommandRunner::from_config(config), config, uuid)
}

/// [`detect`] with a caller-supplied runner.
pub fn detect_with_runner(
    runner: CommandRunner,
    config: &DriverConfig,
    uuid: Option<String>,
) -> Result<Box<dyn Driver>> {
    let version = read_version(&runner)?;
    let major: u32 = version
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .ok_or_else(|| DriverError::UnsupportedVersion(version.clone()))?;

    let separator = config.network.clone_name_separator.clone();
    let driver: Box<dyn Driver> = match major {
        10 => Box::new(Pd10Driver::new(runner, uuid, version).with_clone_name_separator(separator)),
        11 => Box::new(Pd11Driver::new(runner, uuid, version).with_clone_name_separator(separator)),
        m if m >= 12 => {
            Box::new(Pd12Driver::new(runner, uuid, version).with_clone_name_separator(separator))
        }
        _ => return Err(DriverError::UnsupportedVersion(version)),
    };

    info!(driver = driver.name(), version = driver.version(), "selected driver");
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ToolPaths;
    use prl_config::RetrySettings;
    use prl_core::testing::ScriptedInvoker;
    use std::io::ErrorKind;
    use std::sync::Arc;

    fn runner(invoker: &Arc<ScriptedInvoker>) -> CommandRunner {
        CommandRunner::new(
            ToolPaths::new("prlctl", "prlsrvctl"),
            invoker.clone(),
            RetrySettings::default(),
        )
    }

    fn detect_for(output: &str) -> Result<Box<dyn Driver>> {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_ok(output);
        detect_with_runner(runner(&invoker), &DriverConfig::default(), Some("{vm}".into()))
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(
            parse_version("prlctl version 11.1.2 (32408)").as_deref(),
            Some("11.1.2")
        );
        assert_eq!(parse_version("prlctl version unknown"), None);
    }

    #[test]
    fn test_detect_picks_driver_by_major_version() {
        assert_eq!(detect_for("prlctl version 10.4.0 (29337)\n").unwrap().name(), "pd10");
        assert_eq!(detect_for("prlctl version 11.2.1 (32626)\n").unwrap().name(), "pd11");
        assert_eq!(detect_for("prlctl version 12.0.0 (41273)\n").unwrap().name(), "pd12");
        assert_eq!(detect_for("prlctl version 14.1.3 (45485)\n").unwrap().name(), "pd12");
    }

    #[test]
    fn test_detected_driver_keeps_version_and_uuid() {
        let driver = detect_for("prlctl version 11.1.2 (32408)").unwrap();
        assert_eq!(driver.version(), "11.1.2");
        assert_eq!(driver.uuid(), Some("{vm}"));
    }

    #[test]
    fn test_old_release_is_unsupported() {
        match detect_for("prlctl version 9.0.24251 (9.0.24251)") {
            Err(DriverError::UnsupportedVersion(v)) => assert_eq!(v, "9.0.24251"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(d) => panic!("unexpected driver {}", d.name()),
        }
    }

    #[test]
    fn test_failed_version_query_is_tool_not_found() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_failure(1, "license expired");
        assert!(matches!(
            read_version(&runner(&invoker)),
            Err(DriverError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_missing_utility_is_tool_not_found() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_spawn_error(ErrorKind::NotFound);
        assert!(matches!(
            read_version(&runner(&invoker)),
            Err(DriverError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_garbage_version_output_is_tool_not_found() {
        assert!(matches!(
            detect_for("command not understood"),
            Err(DriverError::ToolNotFound(_))
        ));
    }
}
