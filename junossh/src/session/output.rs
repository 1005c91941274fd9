//! Turning a prompt-delimited read into a [`CommandResult`].

use std::time::Duration;

use crate::channel::PromptRead;
use crate::driver::CommandResult;
use crate::platform::juniper;

/// Split a read into standard output and diagnostics.
///
/// Trailing whitespace is cut from every line: JunOS pads table columns
/// out to the screen width. `raw` keeps the padding.
pub(crate) fn normalize(command: &str, read: PromptRead, elapsed: Duration) -> CommandResult {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    for line in read.body.lines() {
        let line = line.trim_end();
        if juniper::is_banner_line(line) || juniper::is_edit_line(line) {
            continue;
        }
        if juniper::is_caret_line(line) || juniper::is_failure_line(line) {
            stderr.push(line);
        } else {
            stdout.push(line);
        }
    }

    let stdout = join_trimmed(&stdout);
    let stderr = join_trimmed(&stderr);
    let exit_status = if stderr.is_empty() { 0 } else { 1 };

    CommandResult {
        command: command.to_string(),
        echo: read.echo,
        stdout,
        stderr,
        exit_status,
        raw: read.body,
        prompt: read.prompt.trim_end().to_string(),
        elapsed,
    }
}

/// Join lines, dropping blank lines at either end.
fn join_trimmed(lines: &[&str]) -> String {
    let Some(first) = lines.iter().position(|line| !line.trim().is_empty()) else {
        return String::new();
    };
    let last = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .unwrap_or(first);
    lines[first..=last].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(body: &str) -> PromptRead {
        PromptRead {
            echo: "show version".to_string(),
            body: body.to_string(),
            prompt: "admin@r1> ".to_string(),
        }
    }

    #[test]
    fn test_plain_output() {
        let result = normalize(
            "show version",
            read("Hostname: r1\nModel: mx204\n"),
            Duration::ZERO,
        );
        assert_eq!(result.stdout, "Hostname: r1\nModel: mx204");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.prompt, "admin@r1>");
        assert_eq!(result.echo, "show version");
        assert!(result.is_success());
    }

    #[test]
    fn test_banners_and_edit_lines_removed() {
        let result = normalize(
            "show configuration system host-name",
            read("[edit]\nhost-name r1;\n\n{master:0}\n"),
            Duration::ZERO,
        );
        assert_eq!(result.stdout, "host-name r1;");
        assert_eq!(result.raw, "[edit]\nhost-name r1;\n\n{master:0}\n");
    }

    #[test]
    fn test_caret_and_error_go_to_stderr() {
        let result = normalize(
            "show bogus",
            read("                  ^\nunknown command.\n"),
            Duration::ZERO,
        );
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "                  ^\nunknown command.");
        assert_eq!(result.exit_status, 1);
        assert!(!result.is_success());
    }

    #[test]
    fn test_mixed_output_keeps_data() {
        let result = normalize(
            "show interfaces ge-0/0/9",
            read("\nerror: device ge-0/0/9 not found\n\n"),
            Duration::ZERO,
        );
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "error: device ge-0/0/9 not found");
    }

    #[test]
    fn test_inner_blank_lines_kept() {
        let result = normalize("show x", read("\n\na\n\nb\n\n"), Duration::ZERO);
        assert_eq!(result.stdout, "a\n\nb");
        assert_eq!(result.lines().count(), 3);
    }

    #[test]
    fn test_column_padding_trimmed_but_kept_in_raw() {
        let body = "Interface  Admin Link  \nge-0/0/0   up    up    \n";
        let result = normalize("show interfaces terse", read(body), Duration::ZERO);
        assert_eq!(result.stdout, "Interface  Admin Link\nge-0/0/0   up    up");
        assert_eq!(result.raw, body);
    }

    #[test]
    fn test_empty_body() {
        let result = normalize("set cli screen-length 0", read(""), Duration::ZERO);
        assert_eq!(result.stdout, "");
        assert_eq!(result.exit_status, 0);
    }
}
