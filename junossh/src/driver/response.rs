//! Result type for command execution.

use std::time::Duration;

use serde::Serialize;

/// Outcome of one command.
///
/// Output is normalized: the command echo, the trailing prompt, routing-engine
/// banners and `[edit]` context lines are gone, and CLI diagnostics have been
/// moved from `stdout` to `stderr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// The command as sent.
    pub command: String,

    /// The command line as echoed by the device.
    pub echo: String,

    /// Normalized output: trailing whitespace is trimmed from each line,
    /// and blank lines at either end are dropped. See `raw` for the bytes
    /// as received.
    pub stdout: String,

    /// Diagnostic lines (`error: ...`, `unknown command.`, caret markers).
    pub stderr: String,

    /// 0 when `stderr` is empty, 1 otherwise.
    pub exit_status: i32,

    /// Everything between the echo and the prompt, before normalization.
    pub raw: String,

    /// The prompt that ended the read.
    pub prompt: String,

    /// Time from sending the command to seeing the prompt.
    pub elapsed: Duration,
}

impl CommandResult {
    /// Check if the device reported no error.
    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }

    /// Get the output lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    /// Check if the output contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.stdout.contains(pattern)
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stdout)
    }
}
