//! Command execution against the control utilities.
//!
//! [`CommandRunner::raw`] runs one command under the interruption guard and
//! hands back whatever the utility produced. [`CommandRunner::execute`] layers
//! the retry policy and exit code translation on top of it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use prl_config::{DriverConfig, RetrySettings, ToolSettings};
use prl_core::command_stream::resolve_tool;
use prl_core::{
    interrupt, DriverError, DuctInvoker, ExecutionResult, Notify, OutputEvent, OutputSink,
    ProcessInvoker, Result,
};
use tracing::{debug, info, warn};

use crate::command::{Command, Tool, PRIMARY_TOOL, SERVICE_TOOL};

/// Executable paths of the two control utilities, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    primary: PathBuf,
    service: PathBuf,
}

impl ToolPaths {
    pub fn new(primary: impl Into<PathBuf>, service: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            service: service.into(),
        }
    }

    /// Configured paths win; otherwise look the utilities up on `PATH`, and
    /// fall back to the bare names so a missing utility surfaces at `verify`.
    pub fn resolve(settings: &ToolSettings) -> Self {
        let lookup = |configured: &Option<PathBuf>, name: &str| {
            configured
                .clone()
                .or_else(|| resolve_tool(name))
                .unwrap_or_else(|| PathBuf::from(name))
        };
        Self {
            primary: lookup(&settings.prlctl, PRIMARY_TOOL),
            service: lookup(&settings.prlsrvctl, SERVICE_TOOL),
        }
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Primary => &self.primary,
            Tool::Service => &self.service,
        }
    }
}

/// Runs control utility commands for one driver session.
///
/// The session is considered interrupted from the first SIGINT observed
/// during any command until the runner is dropped. While interrupted,
/// non-zero exits are tolerated: a utility killed by the user's Ctrl-C is not
/// reported as a failure. A genuine failure racing with the interrupt is
/// swallowed the same way.
pub struct CommandRunner {
    tools: ToolPaths,
    invoker: Arc<dyn ProcessInvoker>,
    retry: RetrySettings,
    interrupted: AtomicBool,
}

impl CommandRunner {
    pub fn new(tools: ToolPaths, invoker: Arc<dyn ProcessInvoker>, retry: RetrySettings) -> Self {
        Self {
            tools,
            invoker,
            retry,
            interrupted: AtomicBool::new(false),
        }
    }

    /// Runner that spawns the real utilities.
    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(
            ToolPaths::resolve(&config.tools),
            Arc::new(DuctInvoker),
            config.retry.clone(),
        )
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub fn retry(&self) -> &RetrySettings {
        &self.retry
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Mark the session interrupted as if SIGINT had arrived mid-command.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn simulate_interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Run a command once and return its result without judging the exit code.
    ///
    /// Both streams are requested when `on_output` is supplied.
    pub fn raw(
        &self,
        command: &Command,
        on_output: Option<OutputSink<'_>>,
    ) -> Result<ExecutionResult> {
        let (tool, args) = command.dispatch();
        let program = self.tools.path(tool);
        let notify = if on_output.is_some() {
            Notify::BOTH
        } else {
            command.options().notify
        };

        let result = interrupt::guard(
            || self.invoker.invoke(program, args, notify, on_output),
            || {
                self.interrupted.store(true, Ordering::SeqCst);
                info!("Interrupted.");
            },
        );

        result.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                DriverError::ToolNotFound(format!("{}: {}", program.display(), e))
            }
            _ => DriverError::Io(e),
        })
    }

    /// Run a command, retrying execution failures when it is retryable, and
    /// return its stdout.
    pub fn execute(&self, command: &Command) -> Result<String> {
        self.execute_with_output(command, None)
    }

    /// [`execute`](Self::execute) with streamed output delivered to `on_output`.
    pub fn execute_with_output(
        &self,
        command: &Command,
        mut on_output: Option<OutputSink<'_>>,
    ) -> Result<String> {
        let attempts = if command.is_retryable() {
            self.retry.attempts.max(1)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            // Reborrow the sink for this attempt only.
            let sink = match on_output {
                Some(ref mut f) => Some(&mut **f as &mut dyn FnMut(OutputEvent<'_>)),
                None => None,
            };
            match self.attempt(command, sink) {
                Ok(stdout) => return Ok(stdout),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, attempts, "Retrying after failure: {}", e);
                    thread::sleep(self.retry.delay());
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(&self, command: &Command, on_output: Option<OutputSink<'_>>) -> Result<String> {
        let result = self.raw(command, on_output)?;
        if !result.success() {
            if self.is_interrupted() {
                info!(
                    exit_code = result.exit_code,
                    "Exit code != 0, but interrupted. Ignoring."
                );
            } else {
                debug!(exit_code = result.exit_code, stderr = %result.stderr, "command failed");
                return Err(DriverError::execution(command.as_args(), result.stderr));
            }
        }
        Ok(result.stdout.replace("\r\n", "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prl_core::testing::ScriptedInvoker;
    use std::io::ErrorKind;

    fn runner(invoker: &Arc<ScriptedInvoker>) -> CommandRunner {
        CommandRunner::new(
            ToolPaths::new("/opt/bin/prlctl", "/opt/bin/prlsrvctl"),
            invoker.clone(),
            RetrySettings {
                attempts: 3,
                delay_ms: 0,
            },
        )
    }

    #[test]
    fn test_version_returns_stdout() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_ok("prlctl version 11.1.2 (32408)\n");
        let runner = runner(&invoker);

        let out = runner.execute(&Command::new(["--version"])).unwrap();
        assert_eq!(out, "prlctl version 11.1.2 (32408)\n");
        assert_eq!(invoker.call_count(), 1);
    }

    #[test]
    fn test_non_retryable_failure_runs_once() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_failure(1, "boom").push_ok("would succeed");
        let runner = runner(&invoker);

        let err = runner.execute(&Command::new(["list", "x"])).unwrap_err();
        assert!(matches!(err, DriverError::Execution { ref stderr, .. } if stderr == "boom"));
        assert_eq!(invoker.call_count(), 1);
    }

    #[test]
    fn test_retryable_failure_exhausts_three_attempts() {
        let invoker = Arc::new(
            ScriptedInvoker::new().with_fallback(ExecutionResult::new(1, "", "bad flag")),
        );
        let runner = runner(&invoker);

        let err = runner
            .execute(&Command::new(["list", "badflag"]).retryable())
            .unwrap_err();
        match err {
            DriverError::Execution { command, stderr } => {
                assert_eq!(command, r#"["list", "badflag"]"#);
                assert_eq!(stderr, "bad flag");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(invoker.call_count(), 3);
    }

    #[test]
    fn test_retry_stops_at_first_success() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_failure(1, "busy").push_ok("done").push_ok("unused");
        let runner = runner(&invoker);

        let out = runner.execute(&Command::new(["set", "vm"]).retryable()).unwrap();
        assert_eq!(out, "done");
        assert_eq!(invoker.call_count(), 2);
    }

    #[test]
    fn test_last_stderr_is_reported() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker
            .push_failure(1, "first")
            .push_failure(1, "second")
            .push_failure(1, "third");
        let runner = runner(&invoker);

        let err = runner.execute(&Command::new(["start", "vm"]).retryable()).unwrap_err();
        assert!(matches!(err, DriverError::Execution { ref stderr, .. } if stderr == "third"));
    }

    #[test]
    fn test_configured_attempts_bound_retries() {
        let invoker =
            Arc::new(ScriptedInvoker::new().with_fallback(ExecutionResult::new(2, "", "")));
        let runner = CommandRunner::new(
            ToolPaths::new("prlctl", "prlsrvctl"),
            invoker.clone(),
            RetrySettings {
                attempts: 5,
                delay_ms: 0,
            },
        );
        assert!(runner.execute(&Command::new(["list"]).retryable()).is_err());
        assert_eq!(invoker.call_count(), 5);
    }

    #[test]
    fn test_interrupted_session_tolerates_nonzero_exit() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push(ExecutionResult::new(130, "partial\r\noutput", "interrupted"));
        let runner = runner(&invoker);
        runner.simulate_interrupt();

        let out = runner.execute(&Command::new(["stop", "vm"]).retryable()).unwrap();
        assert_eq!(out, "partial\noutput");
        assert_eq!(invoker.call_count(), 1);
        assert!(runner.is_interrupted());
    }

    #[test]
    fn test_crlf_is_normalized() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_ok("a\r\nb\r\n");
        let runner = runner(&invoker);
        assert_eq!(runner.execute(&Command::new(["list"])).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_service_commands_use_service_path() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let runner = runner(&invoker);

        runner.execute(&Command::service(["net", "list"])).unwrap();
        runner.execute(&Command::new(["list", "--all"])).unwrap();

        let calls = invoker.calls();
        assert_eq!(calls[0].program, PathBuf::from("/opt/bin/prlsrvctl"));
        assert_eq!(calls[0].args_str(), ["net", "list"]);
        assert_eq!(calls[1].program, PathBuf::from("/opt/bin/prlctl"));
        assert_eq!(calls[1].args_str(), ["list", "--all"]);
    }

    #[test]
    fn test_raw_never_translates_exit_codes() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_failure(3, "nope");
        let runner = runner(&invoker);

        let result = runner.raw(&Command::new(["list", "x"]), None).unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "nope");
    }

    #[test]
    fn test_output_callback_requests_both_streams() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push(ExecutionResult::new(0, "10%\n20%\n", "note\n"));
        let runner = runner(&invoker);

        let mut lines = Vec::new();
        let mut sink = |event: OutputEvent<'_>| lines.push(event.line().to_string());
        runner
            .execute_with_output(&Command::new(["clone", "vm"]), Some(&mut sink))
            .unwrap();

        assert_eq!(invoker.calls()[0].notify, Notify::BOTH);
        assert_eq!(lines, ["10%", "20%", "note"]);
    }

    #[test]
    fn test_output_callback_survives_retries() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker
            .push(ExecutionResult::new(1, "", "busy"))
            .push(ExecutionResult::new(1, "", "still busy"))
            .push(ExecutionResult::new(0, "40%\n100%\n", ""));
        let runner = runner(&invoker);

        let mut lines = Vec::new();
        let mut sink = |event: OutputEvent<'_>| lines.push(event.line().to_string());
        let out = runner
            .execute_with_output(&Command::new(["clone", "vm"]).retryable(), Some(&mut sink))
            .unwrap();

        assert_eq!(out, "40%\n100%\n");
        assert_eq!(invoker.call_count(), 3);
        assert_eq!(lines, ["busy", "still busy", "40%", "100%"]);
        assert!(invoker.calls().iter().all(|c| c.notify == Notify::BOTH));
    }

    #[test]
    fn test_command_notify_is_passed_without_callback() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let runner = runner(&invoker);

        runner.execute(&Command::new(["list"])).unwrap();
        runner
            .execute(&Command::new(["list"]).notify(Notify::BOTH))
            .unwrap();

        let calls = invoker.calls();
        assert_eq!(calls[0].notify, Notify::NONE);
        assert_eq!(calls[1].notify, Notify::BOTH);
    }

    #[test]
    fn test_missing_tool_is_not_retried() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_spawn_error(ErrorKind::NotFound);
        let runner = runner(&invoker);

        let err = runner.execute(&Command::new(["list"]).retryable()).unwrap_err();
        assert!(matches!(err, DriverError::ToolNotFound(_)));
        assert_eq!(invoker.call_count(), 1);
    }

    #[test]
    fn test_other_spawn_errors_are_io() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.push_spawn_error(ErrorKind::PermissionDenied);
        let runner = runner(&invoker);

        let err = runner.execute(&Command::new(["list"])).unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));
    }

    #[test]
    fn test_resolve_prefers_configured_paths() {
        let settings = ToolSettings {
            prlctl: Some(PathBuf::from("/custom/prlctl")),
            prlsrvctl: None,
        };
        let tools = ToolPaths::resolve(&settings);
        assert_eq!(tools.path(Tool::Primary), Path::new("/custom/prlctl"));
        assert!(tools.path(Tool::Service).ends_with("prlsrvctl"));
    }
}
