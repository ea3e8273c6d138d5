use crate::cli::Command;
use std::env;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// One-shot commands run by an operator from a terminal.
    Interactive,
    /// Long-running resume poller; console stays quiet unless configured.
    Daemon,
}

impl ExecutionContext {
    pub fn disables_console(self) -> bool {
        matches!(self, ExecutionContext::Daemon)
    }
}

/// Derive the active execution context from a parsed CLI command.
///
/// `OMNIFLOW_DAEMON=1` forces the daemon context for wrappers that run
/// one-shot commands from a supervisor.
pub fn detect_context(command: &Command) -> ExecutionContext {
    if daemon_override_enabled() {
        return ExecutionContext::Daemon;
    }
    match command {
        Command::Poll(_) => ExecutionContext::Daemon,
        Command::Validate(_)
        | Command::Publish(_)
        | Command::Dot(_)
        | Command::Trigger(_)
        | Command::Resume(_)
        | Command::Deliver(_)
        | Command::Wake
        | Command::Cancel(_)
        | Command::Status(_)
        | Command::History(_) => ExecutionContext::Interactive,
    }
}

fn daemon_override_enabled() -> bool {
    env::var("OMNIFLOW_DAEMON")
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}
