//! Proxy subprocess parameters.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

/// One argument of a proxy command line.
#[derive(Debug)]
pub enum ProxyArg {
    /// Logged as-is.
    Plain(String),
    /// Passed to the process but masked in logs.
    Secret(SecretString),
}

impl ProxyArg {
    fn expose(&self) -> &str {
        match self {
            ProxyArg::Plain(value) => value,
            ProxyArg::Secret(value) => value.expose_secret(),
        }
    }
}

/// A fully specified subprocess: program, arguments and the environment
/// entries set for that process only.
///
/// Built by the bastion adapters, spawned by the transport. The environment
/// entries never touch the calling process's own environment.
#[derive(Debug)]
pub struct ProxyCommand {
    program: PathBuf,
    args: Vec<ProxyArg>,
    env: Vec<(String, OsString)>,
}

impl ProxyCommand {
    /// Start a command line for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append a plain argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(ProxyArg::Plain(arg.into()));
        self
    }

    /// Append several plain arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|a| ProxyArg::Plain(a.into())));
        self
    }

    /// Append an argument that must not appear in logs.
    pub fn secret_arg(mut self, arg: SecretString) -> Self {
        self.args.push(ProxyArg::Secret(arg));
        self
    }

    /// Set an environment variable for the subprocess only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The program to execute.
    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Arguments with secrets exposed, for handing to the OS.
    pub fn exposed_args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(ProxyArg::expose)
    }

    /// Environment entries for the subprocess.
    pub fn envs(&self) -> &[(String, OsString)] {
        &self.env
    }

    /// Look up a subprocess environment entry.
    pub fn env_value(&self, key: &str) -> Option<&OsString> {
        self.env.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether any argument carries a secret.
    pub fn has_secret_args(&self) -> bool {
        self.args.iter().any(|a| matches!(a, ProxyArg::Secret(_)))
    }

    /// Build an OpenSSH-style `ProxyCommand` run through the platform shell.
    ///
    /// `%h`, `%p` and `%r` expand to target host, port and user; `%%` is a
    /// literal percent sign.
    pub fn from_template(template: &str, host: &str, port: u16, user: &str) -> Self {
        let mut expanded = String::with_capacity(template.len());
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                expanded.push(c);
                continue;
            }
            match chars.next() {
                Some('h') => expanded.push_str(host),
                Some('p') => expanded.push_str(&port.to_string()),
                Some('r') => expanded.push_str(user),
                Some('%') => expanded.push('%'),
                Some(other) => {
                    expanded.push('%');
                    expanded.push(other);
                }
                None => expanded.push('%'),
            }
        }

        if cfg!(windows) {
            Self::new("cmd").args(["/C".to_string(), expanded])
        } else {
            Self::new("/bin/sh").args(["-c".to_string(), expanded])
        }
    }
}

impl fmt::Display for ProxyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            match arg {
                ProxyArg::Plain(value) => write!(f, " {}", value)?,
                ProxyArg::Secret(_) => write!(f, " ********")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_masks_secrets() {
        let cmd = ProxyCommand::new("plink")
            .arg("-pw")
            .secret_arg(SecretString::from("hunter2".to_string()))
            .arg("jump");
        assert_eq!(cmd.to_string(), "plink -pw ******** jump");
        assert!(cmd.has_secret_args());
        let exposed: Vec<&str> = cmd.exposed_args().collect();
        assert_eq!(exposed, vec!["-pw", "hunter2", "jump"]);
    }

    #[test]
    fn test_env_is_per_command() {
        let cmd = ProxyCommand::new("ssh").env("SSH_ASKPASS_REQUIRE", "force");
        assert_eq!(
            cmd.env_value("SSH_ASKPASS_REQUIRE"),
            Some(&OsString::from("force"))
        );
        assert!(cmd.env_value("DISPLAY").is_none());
    }

    #[test]
    fn test_template_expansion() {
        let cmd = ProxyCommand::from_template("nc -x proxy:1080 %h %p # %r 100%%", "r1", 830, "admin");
        let args: Vec<&str> = cmd.exposed_args().collect();
        assert_eq!(args.last().copied(), Some("nc -x proxy:1080 r1 830 # admin 100%"));
    }
}
