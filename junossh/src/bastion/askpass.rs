//! Password-injection helper for OpenSSH (`SSH_ASKPASS`).
//!
//! A short shell script is written to a private temporary directory and
//! handed to an `ssh -W` proxy subprocess through its own environment.
//! OpenSSH runs the script with the prompt text as `$1`; the script answers
//! with the password of whichever hop the prompt names.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use secrecy::ExposeSecret;
use tempfile::TempDir;

use super::command::ProxyCommand;
use crate::error::{ConfigError, ProxyError, Result};
use crate::transport::config::{BastionHop, HostKeyVerification};

const SCRIPT_NAME: &str = "askpass.sh";

/// The on-disk helper. Removed when dropped.
#[derive(Debug)]
pub struct AskpassHelper {
    dir: Option<TempDir>,
    script: PathBuf,
}

impl AskpassHelper {
    /// Write a helper answering password prompts for `hops`.
    ///
    /// The directory and the script are readable only by the current user.
    #[cfg(unix)]
    pub fn create(hops: &[BastionHop]) -> Result<Self> {
        use std::fs::{self, OpenOptions, Permissions};
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let helper_err = |source: io::Error| ProxyError::Helper { source };

        let dir = tempfile::Builder::new()
            .prefix("junossh-askpass-")
            .tempdir()
            .map_err(helper_err)?;
        fs::set_permissions(dir.path(), Permissions::from_mode(0o700)).map_err(helper_err)?;

        let script = dir.path().join(SCRIPT_NAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&script)
            .map_err(helper_err)?;
        file.write_all(render_script(hops).as_bytes())
            .map_err(helper_err)?;
        file.sync_all().map_err(helper_err)?;

        debug!("wrote password helper at {}", script.display());
        Ok(Self {
            dir: Some(dir),
            script,
        })
    }

    /// Shell helpers need a POSIX shell.
    #[cfg(not(unix))]
    pub fn create(_hops: &[BastionHop]) -> Result<Self> {
        Err(ProxyError::Unsupported {
            strategy: "password injection script",
            platform: super::HostPlatform::current().name(),
        }
        .into())
    }

    /// Path of the helper script.
    pub fn path(&self) -> &Path {
        &self.script
    }

    /// Remove the helper now, reporting failure.
    pub fn remove(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

impl Drop for AskpassHelper {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("failed to remove password helper {}: {}", path.display(), e);
            } else {
                debug!("removed password helper {}", path.display());
            }
        }
    }
}

/// Script body: one `case` arm per distinct `user@host`.
fn render_script(hops: &[BastionHop]) -> String {
    let mut script = String::from("#!/bin/sh\ncase \"$1\" in\n");
    let mut seen = Vec::new();
    for hop in hops {
        let Some(password) = &hop.credentials.password else {
            continue;
        };
        let who = format!("{}@{}", hop.username, hop.host);
        if seen.contains(&who) {
            continue;
        }
        script.push_str(&format!(
            "*{}*) printf '%s\\n' {} ;;\n",
            shell_quote(&who),
            shell_quote(password.expose_secret())
        ));
        seen.push(who);
    }
    script.push_str("*) exit 1 ;;\nesac\n");
    script
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Options shared by every leg of the OpenSSH proxy.
pub struct SshProxyOptions<'a> {
    pub host_key_verification: HostKeyVerification,
    pub known_hosts_path: Option<&'a Path>,
    pub connect_timeout: Duration,
}

/// `ssh -W` invocation reaching `target_host:target_port` through `hops`.
///
/// Earlier hops are passed with `-J`; the last hop is the ssh destination.
pub fn ssh_command(
    helper: &AskpassHelper,
    hops: &[BastionHop],
    target_host: &str,
    target_port: u16,
    options: &SshProxyOptions<'_>,
) -> Result<ProxyCommand> {
    let Some(last) = hops.last() else {
        return Err(ConfigError::Missing { field: "bastions" }.into());
    };
    let mut command = ProxyCommand::new("ssh").args([
        "-T",
        "-o",
        "BatchMode=no",
        "-o",
        "NumberOfPasswordPrompts=1",
        "-o",
        "LogLevel=ERROR",
    ]);

    command = command.arg("-o").arg(format!(
        "StrictHostKeyChecking={}",
        options.host_key_verification.openssh_value()
    ));
    if options.host_key_verification == HostKeyVerification::Disabled {
        command = command.arg("-o").arg("UserKnownHostsFile=/dev/null");
    } else if let Some(path) = options.known_hosts_path {
        command = command
            .arg("-o")
            .arg(format!("UserKnownHostsFile={}", path.display()));
    }
    command = command.arg("-o").arg(format!(
        "ConnectTimeout={}",
        options.connect_timeout.as_secs().max(1)
    ));

    if hops.len() > 1 {
        let jumps: Vec<String> = hops[..hops.len() - 1]
            .iter()
            .map(BastionHop::jump_spec)
            .collect();
        command = command.arg("-J").arg(jumps.join(","));
    }
    if let Some(key) = &last.credentials.private_key {
        command = command.arg("-i").arg(key.display().to_string());
    }

    command = command
        .arg("-p")
        .arg(last.port.to_string())
        .arg("-l")
        .arg(last.username.clone())
        .arg("-W")
        .arg(format!("{}:{}", target_host, target_port))
        .arg(last.host.clone())
        .env("SSH_ASKPASS", helper.path().as_os_str())
        .env("SSH_ASKPASS_REQUIRE", "force");

    // OpenSSH before 8.4 only consults SSH_ASKPASS when DISPLAY is set.
    if std::env::var_os("DISPLAY").is_none() {
        command = command.env("DISPLAY", OsString::from(":0"));
    }
    Ok(command)
}
