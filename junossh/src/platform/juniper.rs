//! Juniper JunOS CLI vocabulary.
//!
//! Prompt shapes live in [`crate::channel::JUNOS_PROMPT`]; this module holds
//! the commands the session and prober send and the markers they look for.

/// Platform name reported in [`DeviceFacts`](super::DeviceFacts).
pub const PLATFORM_NAME: &str = "juniper";

/// Sent once after the first prompt so output is never paginated.
pub const ON_OPEN_COMMANDS: &[&str] = &["set cli screen-length 0", "set cli screen-width 511"];

/// Structured version query.
pub const SHOW_VERSION_XML: &str = "show version | display xml";

/// Plain-text version query, used when the XML carries no version.
pub const SHOW_VERSION: &str = "show version";

/// Chassis inventory, source of the serial number.
pub const SHOW_CHASSIS_XML: &str = "show chassis hardware | display xml";

/// Prefix for [`read_file`](crate::driver::JunosDriver::read_file).
pub const FILE_SHOW: &str = "file show";

/// Output lines starting with any of these are diagnostics, not data.
pub const FAILURE_PATTERNS: &[&str] = &[
    "unknown command",
    "syntax error",
    "error:",
    "missing argument",
    "missing mandatory argument",
    "invalid numeric value",
    "invalid value",
    "No valid completions",
];

/// Whether `line` is a CLI diagnostic.
///
/// Anchored at the start of the line so that log output quoting an error
/// (`rpd[1234]: error: ...`) stays in standard output.
pub fn is_failure_line(line: &str) -> bool {
    let trimmed = line.trim();
    FAILURE_PATTERNS
        .iter()
        .any(|pattern| trimmed.starts_with(pattern))
        || trimmed.ends_with("is ambiguous.")
}

/// A line that only points at a syntax error, such as `        ^`.
pub fn is_caret_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '^')
}

/// Routing-engine banner such as `{master:0}` or `{backup:1}`.
pub fn is_banner_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() > 2
        && trimmed.starts_with('{')
        && trimmed.ends_with('}')
        && !trimmed[1..trimmed.len() - 1].contains(char::is_whitespace)
}

/// Configuration-mode context line such as `[edit interfaces]`.
pub fn is_edit_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("[edit") && trimmed.ends_with(']')
}
