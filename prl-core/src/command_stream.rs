// Standard library
use std::io::{self, BufRead, BufReader};
use std::path::Path;

// External crates
use duct::cmd;
use tracing::debug;
use which::which;

/// Exit code reported for a child that was terminated by a signal.
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// Captured outcome of one control utility invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn from_output(output: &std::process::Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(SIGNALED_EXIT_CODE),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Which output streams are surfaced incrementally while a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Notify {
    pub stdout: bool,
    pub stderr: bool,
}

impl Notify {
    pub const NONE: Notify = Notify {
        stdout: false,
        stderr: false,
    };
    pub const BOTH: Notify = Notify {
        stdout: true,
        stderr: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.stdout && !self.stderr
    }
}

/// One line of output surfaced while a process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent<'a> {
    Stdout(&'a str),
    Stderr(&'a str),
}

impl<'a> OutputEvent<'a> {
    pub fn line(&self) -> &'a str {
        match self {
            OutputEvent::Stdout(line) | OutputEvent::Stderr(line) => line,
        }
    }
}

/// Callback receiving streamed output lines.
pub type OutputSink<'a> = &'a mut dyn FnMut(OutputEvent<'_>);

/// Runs an external program and captures its result.
///
/// Implementations never treat a non-zero exit as an error; the returned
/// `io::Error` is reserved for failures to spawn or wait on the process.
pub trait ProcessInvoker: Send + Sync {
    fn invoke(
        &self,
        program: &Path,
        args: &[String],
        notify: Notify,
        on_output: Option<OutputSink<'_>>,
    ) -> io::Result<ExecutionResult>;
}

/// Process invoker backed by `duct`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuctInvoker;

impl ProcessInvoker for DuctInvoker {
    fn invoke(
        &self,
        program: &Path,
        args: &[String],
        notify: Notify,
        on_output: Option<OutputSink<'_>>,
    ) -> io::Result<ExecutionResult> {
        debug!(program = %program.display(), ?args, "invoking");

        // A bare name must go through PATH lookup; duct would run a
        // single-component `Path` relative to the working directory.
        let program = program.as_os_str();

        let Some(sink) = on_output.filter(|_| !notify.is_empty()) else {
            let output = cmd(program, args)
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .run()?;
            return Ok(ExecutionResult::from_output(&output));
        };

        // stdout is streamed as it arrives; stderr is captured and replayed on exit.
        let handle = cmd(program, args).stderr_capture().unchecked().reader()?;
        let mut stdout = String::new();
        {
            let mut lines = BufReader::new(&handle);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                if lines.read_until(b'\n', &mut buf)? == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                stdout.push_str(&line);
                if notify.stdout {
                    sink(OutputEvent::Stdout(line.trim_end_matches(['\r', '\n'])));
                }
            }
        }

        let output = handle
            .try_wait()?
            .ok_or_else(|| io::Error::other("process output closed before it exited"))?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if notify.stderr {
            for line in stderr.lines() {
                sink(OutputEvent::Stderr(line));
            }
        }

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(SIGNALED_EXIT_CODE),
            stdout,
            stderr,
        })
    }
}

/// Checks if a command-line tool is available in the system's PATH.
pub fn is_tool_installed(tool_name: &str) -> bool {
    which(tool_name).is_ok()
}

/// Resolve a tool name to an absolute path when it is on the PATH.
pub fn resolve_tool(tool_name: &str) -> Option<std::path::PathBuf> {
    which(tool_name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_constants() {
        assert!(Notify::NONE.is_empty());
        assert!(!Notify::BOTH.is_empty());
        assert!(Notify::default().is_empty());
    }

    #[test]
    fn test_output_event_line() {
        assert_eq!(OutputEvent::Stdout("a").line(), "a");
        assert_eq!(OutputEvent::Stderr("b").line(), "b");
    }

    #[test]
    fn test_is_tool_installed_missing() {
        assert!(!is_tool_installed("prl-definitely-not-a-real-tool"));
        assert!(resolve_tool("prl-definitely-not-a-real-tool").is_none());
    }
}
