//! Control utility command lines.

use prl_core::Notify;

/// Name of the per-VM control utility.
pub const PRIMARY_TOOL: &str = "prlctl";

/// Name of the host-wide service utility. A command whose first argument is
/// this name is dispatched to the service utility instead.
pub const SERVICE_TOOL: &str = "prlsrvctl";

/// Which control utility a command is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Primary,
    Service,
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandOptions {
    /// Retry on execution failure, up to the configured attempt budget
    pub retryable: bool,
    /// Streams surfaced incrementally while the command runs
    pub notify: Notify,
}

/// An ordered argument list plus its execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<String>,
    options: CommandOptions,
}

impl Command {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            options: CommandOptions::default(),
        }
    }

    /// A command for the service utility.
    pub fn service<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = Self::new([SERVICE_TOOL]);
        command.args.extend(args.into_iter().map(Into::into));
        command
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn retryable(mut self) -> Self {
        self.options.retryable = true;
        self
    }

    pub fn notify(mut self, notify: Notify) -> Self {
        self.options.notify = notify;
        self
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    pub fn as_args(&self) -> &[String] {
        &self.args
    }

    pub fn options(&self) -> CommandOptions {
        self.options
    }

    pub fn is_retryable(&self) -> bool {
        self.options.retryable
    }

    /// Split off the target utility. A leading service utility token is
    /// consumed; any other argument list is passed through unchanged.
    pub fn dispatch(&self) -> (Tool, &[String]) {
        match self.args.split_first() {
            Some((first, rest)) if first == SERVICE_TOOL => (Tool::Service, rest),
            _ => (Tool::Primary, &self.args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_dispatch_keeps_all_args() {
        let command = Command::new(["list", "--all"]);
        let (tool, args) = command.dispatch();
        assert_eq!(tool, Tool::Primary);
        assert_eq!(args, ["list", "--all"]);
    }

    #[test]
    fn test_service_dispatch_drops_leading_token() {
        let command = Command::service(["net", "list"]);
        assert_eq!(command.as_args(), ["prlsrvctl", "net", "list"]);
        let (tool, args) = command.dispatch();
        assert_eq!(tool, Tool::Service);
        assert_eq!(args, ["net", "list"]);
    }

    #[test]
    fn test_service_token_only_counts_in_first_position() {
        let command = Command::new(["exec", "vm", "prlsrvctl"]);
        let (tool, args) = command.dispatch();
        assert_eq!(tool, Tool::Primary);
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_empty_command_dispatches_to_primary() {
        let command = Command::new(Vec::<String>::new());
        assert_eq!(command.dispatch(), (Tool::Primary, &[][..]));
    }

    #[test]
    fn test_options_default_and_builders() {
        let command = Command::new(["list"]);
        assert!(!command.is_retryable());
        assert!(command.options().notify.is_empty());

        let command = command.retryable().notify(Notify::BOTH).arg("-j");
        assert!(command.is_retryable());
        assert_eq!(command.options().notify, Notify::BOTH);
        assert_eq!(command.as_args(), ["list", "-j"]);
    }
}
