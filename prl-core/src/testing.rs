//! Scripted process invoker for exercising drivers without Parallels Desktop.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::command_stream::{ExecutionResult, Notify, OutputEvent, OutputSink, ProcessInvoker};

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub notify: Notify,
}

impl Invocation {
    pub fn args_str(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }
}

enum Reply {
    Result(ExecutionResult),
    SpawnError(io::ErrorKind),
}

/// Replays queued results in order and records every call.
///
/// Once the queue is drained, the fallback result (exit 0, empty output by
/// default) is returned for every further call.
pub struct ScriptedInvoker {
    replies: Mutex<VecDeque<Reply>>,
    fallback: ExecutionResult,
    calls: Mutex<Vec<Invocation>>,
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: ExecutionResult::default(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Result returned once the scripted replies run out.
    pub fn with_fallback(mut self, result: ExecutionResult) -> Self {
        self.fallback = result;
        self
    }

    pub fn push(&self, result: ExecutionResult) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Result(result));
        self
    }

    pub fn push_ok(&self, stdout: &str) -> &Self {
        self.push(ExecutionResult::new(0, stdout, ""))
    }

    pub fn push_failure(&self, exit_code: i32, stderr: &str) -> &Self {
        self.push(ExecutionResult::new(exit_code, "", stderr))
    }

    pub fn push_spawn_error(&self, kind: io::ErrorKind) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::SpawnError(kind));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ProcessInvoker for ScriptedInvoker {
    fn invoke(
        &self,
        program: &Path,
        args: &[String],
        notify: Notify,
        on_output: Option<OutputSink<'_>>,
    ) -> io::Result<ExecutionResult> {
        self.calls.lock().unwrap().push(Invocation {
            program: program.to_path_buf(),
            args: args.to_vec(),
            notify,
        });

        let reply = self.replies.lock().unwrap().pop_front();
        let result = match reply {
            Some(Reply::Result(result)) => result,
            Some(Reply::SpawnError(kind)) => {
                return Err(io::Error::new(kind, "scripted spawn failure"))
            }
            None => self.fallback.clone(),
        };

        if let Some(sink) = on_output {
            if notify.stdout {
                result.stdout.lines().for_each(|l| sink(OutputEvent::Stdout(l)));
            }
            if notify.stderr {
                result.stderr.lines().for_each(|l| sink(OutputEvent::Stderr(l)));
            }
        }
        Ok(result)
    }
}
