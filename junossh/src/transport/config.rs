//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::{ConfigError, Result};

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts. This is the default.
    #[default]
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    AcceptNew,

    /// Accept all keys without checking. For testing and lab use only.
    Disabled,
}

impl HostKeyVerification {
    /// Parse the names used by `JUNIPER_HOST_KEY_CHECKING` and OpenSSH.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" | "yes" => Some(Self::Strict),
            "accept-new" | "accept_new" => Some(Self::AcceptNew),
            "disabled" | "no" | "off" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// The equivalent OpenSSH `StrictHostKeyChecking` value.
    pub fn openssh_value(&self) -> &'static str {
        match self {
            Self::Strict => "yes",
            Self::AcceptNew => "accept-new",
            Self::Disabled => "no",
        }
    }
}

/// The set of secrets offered to one hop.
///
/// Password and key material are not exclusive: authentication tries the
/// private key, then the SSH agent, then the password.
#[derive(Debug, Default)]
pub struct Credentials {
    /// Password for password authentication.
    pub password: Option<SecretString>,

    /// Path to a private key file.
    pub private_key: Option<PathBuf>,

    /// Passphrase for an encrypted private key.
    pub passphrase: Option<SecretString>,

    /// Offer identities held by the running SSH agent.
    pub use_agent: bool,
}

impl Credentials {
    /// Password-only credentials.
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(SecretString::from(password.into())),
            ..Default::default()
        }
    }

    /// Private-key-only credentials.
    pub fn private_key(path: impl Into<PathBuf>) -> Self {
        Self {
            private_key: Some(path.into()),
            ..Default::default()
        }
    }

    /// Agent-only credentials.
    pub fn agent() -> Self {
        Self {
            use_agent: true,
            ..Default::default()
        }
    }

    /// Whether any authentication method is configured.
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.private_key.is_none() && !self.use_agent
    }

    /// Whether a password is configured.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            password: self.password.as_ref().map(clone_secret),
            private_key: self.private_key.clone(),
            passphrase: self.passphrase.as_ref().map(clone_secret),
            use_agent: self.use_agent,
        }
    }
}

pub(crate) fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

/// One jump host in a bastion chain.
#[derive(Debug, Clone)]
pub struct BastionHop {
    /// Bastion hostname or IP address.
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username on the bastion.
    pub username: String,

    /// Credentials for this bastion only.
    pub credentials: Credentials,

    /// Overrides the connection-wide host key mode for this hop.
    pub host_key_verification: Option<HostKeyVerification>,
}

impl BastionHop {
    /// Create a hop with no credentials on the standard port.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            credentials: Credentials::default(),
            host_key_verification: None,
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set a password for this hop.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials.password = Some(SecretString::from(password.into()));
        self
    }

    /// `user@host:port`, as used in jump specifications.
    pub fn jump_spec(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Full configuration of one device connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username on the target.
    pub username: String,

    /// Credentials for the target only.
    pub credentials: Credentials,

    /// Timeout for each hop's connect, handshake and authentication.
    pub timeout: Duration,

    /// Inactivity timeout while waiting for a command's prompt.
    pub command_timeout: Duration,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file (default: ~/.ssh/known_hosts).
    pub known_hosts_path: Option<PathBuf>,

    /// Ordered bastion chain, outermost first.
    pub bastions: Vec<BastionHop>,

    /// Send the target password to bastions that have none of their own.
    pub reuse_password_for_bastion: bool,

    /// OpenSSH-style proxy command (`%h`, `%p`, `%r` are substituted).
    pub proxy_command: Option<String>,

    /// Total connect attempts for transient network failures.
    pub connect_attempts: u32,

    /// Delay before the first reconnect; doubled on each further attempt.
    pub retry_delay: Duration,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,
}

impl ConnectionConfig {
    /// Create a configuration with defaults for everything but host and user.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            credentials: Credentials::default(),
            timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            host_key_verification: HostKeyVerification::Strict,
            known_hosts_path: None,
            bastions: Vec::new(),
            reuse_password_for_bastion: false,
            proxy_command: None,
            connect_attempts: 3,
            retry_delay: Duration::from_secs(1),
            terminal_width: 511,
            terminal_height: 24,
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a bastion chain is configured.
    pub fn has_bastion(&self) -> bool {
        !self.bastions.is_empty()
    }

    /// Whether any bastion hop will authenticate with a password.
    pub fn bastion_password_present(&self) -> bool {
        self.effective_bastions()
            .iter()
            .any(|hop| hop.credentials.has_password())
    }

    /// Bastion hops with credential reuse applied.
    ///
    /// The target password only reaches a bastion when
    /// `reuse_password_for_bastion` is set and the hop has no password.
    pub fn effective_bastions(&self) -> Vec<BastionHop> {
        self.bastions
            .iter()
            .map(|hop| {
                let mut hop = hop.clone();
                if self.reuse_password_for_bastion && hop.credentials.password.is_none() {
                    hop.credentials.password = self.credentials.password.as_ref().map(clone_secret);
                }
                hop
            })
            .collect()
    }

    /// Host key mode for a bastion hop.
    pub fn bastion_host_key_verification(&self, hop: &BastionHop) -> HostKeyVerification {
        hop.host_key_verification
            .unwrap_or(self.host_key_verification)
    }

    /// Check the configuration before any strategy or network work.
    pub fn validate(&self) -> Result<()> {
        validate_host("host", &self.host)?;
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing { field: "username" }.into());
        }
        if self.port == 0 {
            return Err(invalid("port", "must be between 1 and 65535"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout", "must be greater than zero"));
        }
        if self.command_timeout.is_zero() {
            return Err(invalid("command_timeout", "must be greater than zero"));
        }
        if self.connect_attempts == 0 {
            return Err(invalid("connect_attempts", "must be at least 1"));
        }
        if self.credentials.is_empty() {
            return Err(ConfigError::Missing {
                field: "password or private_key",
            }
            .into());
        }
        if self.reuse_password_for_bastion && self.credentials.password.is_none() {
            return Err(invalid(
                "reuse_password_for_bastion",
                "no target password to reuse",
            ));
        }
        if self.has_bastion() && self.proxy_command.is_some() {
            return Err(ConfigError::Conflict {
                message: "cannot specify both a bastion host and a proxy command".to_string(),
            }
            .into());
        }
        if let Some(command) = &self.proxy_command {
            if command.trim().is_empty() {
                return Err(invalid("proxy_command", "must not be empty"));
            }
        }
        for hop in &self.bastions {
            validate_host("bastion_host", &hop.host)?;
            if hop.port == 0 {
                return Err(invalid("bastion_port", "must be between 1 and 65535"));
            }
            if hop.username.trim().is_empty() {
                return Err(ConfigError::Missing {
                    field: "bastion_user",
                }
                .into());
            }
        }
        Ok(())
    }
}

fn validate_host(field: &'static str, host: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(ConfigError::Missing { field }.into());
    }
    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid(field, "must not contain whitespace"));
    }
    Ok(())
}

fn invalid(field: &'static str, message: &str) -> crate::error::Error {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
    .into()
}
