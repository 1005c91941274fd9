//! Native password-capable proxy (PuTTY `plink`).
//!
//! Used on Windows, where OpenSSH ignores `SSH_ASKPASS` for proxy
//! subprocesses. Each hop is one `plink -nc` invocation; a hop behind
//! another hop reaches it through plink's own `-proxycmd`, so every hop
//! gets its own `-l`/`-pw`.
//!
//! Passwords passed with `-pw` are visible in the local process list for
//! the lifetime of the proxy. That is inherent to this strategy.
//!
//! Host keys: a hop with verification disabled gets `-hostkey *` (PuTTY
//! 0.78 and later). plink in `-batch` mode cannot learn a new key, so
//! `AcceptNew` behaves like `Strict`: the key must already be in PuTTY's
//! cache.

use std::path::Path;

use log::warn;
use secrecy::ExposeSecret;

use super::command::ProxyCommand;
use crate::error::{ConfigError, Result};
use crate::transport::config::{clone_secret, BastionHop, HostKeyVerification};

/// Executable name looked up on the search path.
pub const PLINK: &str = "plink";

/// Build the plink invocation that carries the target's SSH stream.
///
/// `hops` is ordered outermost first and must not be empty.
pub fn plink_command(
    program: &Path,
    hops: &[BastionHop],
    target_host: &str,
    target_port: u16,
) -> Result<ProxyCommand> {
    let Some(last) = hops.len().checked_sub(1) else {
        return Err(ConfigError::Missing { field: "bastions" }.into());
    };
    let mut command = ProxyCommand::new(program);

    if last > 0 {
        // Nested command line, secrets included; masked as a whole.
        let inner = nested_command_line(program, &hops[..last], &hops[last]);
        command = command
            .arg("-proxycmd")
            .secret_arg(secrecy::SecretString::from(inner));
    }

    command = with_hop_args(command, &hops[last]);
    Ok(command
        .arg("-nc")
        .arg(format!("{}:{}", target_host, target_port))
        .arg(hops[last].host.clone()))
}

fn with_hop_args(mut command: ProxyCommand, hop: &BastionHop) -> ProxyCommand {
    command = command
        .args(["-ssh", "-batch", "-P"])
        .arg(hop.port.to_string())
        .arg("-l")
        .arg(hop.username.clone());
    if let Some(words) = host_key_args(hop) {
        command = command.args(words);
    }
    if let Some(password) = &hop.credentials.password {
        command = command.arg("-pw").secret_arg(clone_secret(password));
    }
    if let Some(key) = &hop.credentials.private_key {
        command = command.arg("-i").arg(key.display().to_string());
    }
    command
}

/// Command line (as one string) reaching `next` through `hops`.
fn nested_command_line(program: &Path, hops: &[BastionHop], next: &BastionHop) -> String {
    let last = hops.len() - 1;
    let hop = &hops[last];
    let mut words = vec![program.display().to_string()];

    if last > 0 {
        words.push("-proxycmd".to_string());
        words.push(nested_command_line(program, &hops[..last], hop));
    }

    words.extend(["-ssh", "-batch", "-P"].map(String::from));
    words.push(hop.port.to_string());
    words.push("-l".to_string());
    words.push(hop.username.clone());
    if let Some(extra) = host_key_args(hop) {
        words.extend(extra.map(String::from));
    }
    if let Some(password) = &hop.credentials.password {
        words.push("-pw".to_string());
        words.push(password.expose_secret().to_string());
    }
    if let Some(key) = &hop.credentials.private_key {
        words.push("-i".to_string());
        words.push(key.display().to_string());
    }
    words.push("-nc".to_string());
    words.push(format!("{}:{}", next.host, next.port));
    words.push(hop.host.clone());

    words
        .iter()
        .map(|w| quote_windows(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extra arguments carrying `hop`'s host key policy.
fn host_key_args(hop: &BastionHop) -> Option<[&'static str; 2]> {
    match hop.host_key_verification {
        Some(HostKeyVerification::Disabled) => Some(["-hostkey", "*"]),
        Some(HostKeyVerification::AcceptNew) => {
            warn!(
                "plink cannot learn new host keys in batch mode; {} must already be in the PuTTY cache",
                hop.host
            );
            None
        }
        Some(HostKeyVerification::Strict) | None => None,
    }
}

/// Quote one word for a Windows command line (CommandLineToArgvW rules).
fn quote_windows(word: &str) -> String {
    if !word.is_empty() && !word.contains([' ', '\t', '"']) {
        return word.to_string();
    }
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in word.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
                continue;
            }
            _ => {}
        }
        if c != '\\' {
            quoted.extend(std::iter::repeat_n('\\', backslashes));
            backslashes = 0;
            quoted.push(c);
        }
    }
    quoted.extend(std::iter::repeat_n('\\', backslashes * 2));
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn program() -> PathBuf {
        PathBuf::from(r"C:\Program Files\PuTTY\plink.exe")
    }

    #[test]
    fn test_single_hop() {
        let hops = vec![BastionHop::new("10.0.0.254", "jump").with_password("x")];
        let cmd = plink_command(&program(), &hops, "10.0.0.1", 22).unwrap();
        let args: Vec<&str> = cmd.exposed_args().collect();
        assert_eq!(
            args,
            vec![
                "-ssh", "-batch", "-P", "22", "-l", "jump", "-pw", "x", "-nc", "10.0.0.1:22",
                "10.0.0.254"
            ]
        );
        assert!(!cmd.to_string().contains(" x "));
    }

    #[test]
    fn test_two_hops_nest_proxycmd() {
        let hops = vec![
            BastionHop::new("outer", "u1").with_password("p1"),
            BastionHop::new("inner", "u2").with_port(2222).with_password("p2"),
        ];
        let cmd = plink_command(&program(), &hops, "router", 22).unwrap();
        let args: Vec<&str> = cmd.exposed_args().collect();
        assert_eq!(args[0], "-proxycmd");
        assert!(args[1].contains("-nc inner:2222 outer"));
        assert!(args[1].contains("-pw p1"));
        assert!(args[1].starts_with("\"C:\\Program Files\\PuTTY\\plink.exe\""));
        assert_eq!(&args[2..], &[
            "-ssh", "-batch", "-P", "2222", "-l", "u2", "-pw", "p2", "-nc", "router:22", "inner"
        ]);
        let shown = cmd.to_string();
        assert!(!shown.contains("p1"));
        assert!(!shown.contains("p2"));
    }

    #[test]
    fn test_disabled_host_key_check_accepts_any_key() {
        let mut relaxed = BastionHop::new("outer", "u1").with_password("p1");
        relaxed.host_key_verification = Some(HostKeyVerification::Disabled);
        let mut strict = BastionHop::new("inner", "u2").with_password("p2");
        strict.host_key_verification = Some(HostKeyVerification::Strict);

        let cmd = plink_command(&program(), &[relaxed.clone()], "router", 22).unwrap();
        let args: Vec<&str> = cmd.exposed_args().collect();
        assert_eq!(
            args,
            vec![
                "-ssh", "-batch", "-P", "22", "-l", "u1", "-hostkey", "*", "-pw", "p1", "-nc",
                "router:22", "outer"
            ]
        );

        let cmd = plink_command(&program(), &[relaxed, strict], "router", 22).unwrap();
        let args: Vec<&str> = cmd.exposed_args().collect();
        assert!(args[1].contains("-l u1 -hostkey * -pw p1"));
        assert!(!args[2..].contains(&"-hostkey"));
    }

    #[test]
    fn test_accept_new_adds_nothing() {
        let mut hop = BastionHop::new("10.0.0.254", "jump").with_password("x");
        hop.host_key_verification = Some(HostKeyVerification::AcceptNew);
        let cmd = plink_command(&program(), &[hop], "10.0.0.1", 22).unwrap();
        assert!(!cmd.exposed_args().any(|a| a == "-hostkey"));
    }

    #[test]
    fn test_no_hops_is_config_error() {
        let err = plink_command(&program(), &[], "router", 22).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::Missing { field: "bastions" })
        ));
    }

    #[test]
    fn test_quote_windows() {
        assert_eq!(quote_windows("plain"), "plain");
        assert_eq!(quote_windows("two words"), "\"two words\"");
        assert_eq!(quote_windows("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_windows(r"C:\my dir\"), r#""C:\my dir\\""#);
        assert_eq!(quote_windows(""), "\"\"");
    }
}
