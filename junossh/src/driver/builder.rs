//! Builder for creating device drivers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::manager::JunosDriver;
use super::retry::RetryPolicy;
use crate::bastion::{HostPlatform, SearchPath, ToolLocator};
use crate::channel::MockConnector;
use crate::error::{ConfigError, Result};
use crate::transport::{
    BastionHop, ConnectionConfig, Connector, Credentials, HostKeyVerification, SshConnector,
};

/// Builder for constructing a [`JunosDriver`].
///
/// # Example
///
/// ```rust,no_run
/// use junossh::DriverBuilder;
///
/// # async fn example() -> Result<(), junossh::Error> {
/// let mut driver = DriverBuilder::new("10.0.0.1")
///     .username("admin")
///     .password("secret")
///     .bastion("10.0.0.254")
///     .bastion_password("jump-secret")
///     .build()?;
///
/// driver.open().await?;
/// let result = driver.run_command("show system uptime").await?;
/// println!("{}", result.stdout);
/// driver.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct DriverBuilder {
    config: ConnectionConfig,
    bastion_host: Option<String>,
    bastion_port: u16,
    bastion_username: Option<String>,
    bastion_password: Option<SecretString>,
    bastion_private_key: Option<PathBuf>,
    extra_hops: Vec<BastionHop>,
    host_platform: HostPlatform,
    tool_locator: Arc<dyn ToolLocator>,
}

impl std::fmt::Debug for DriverBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverBuilder")
            .field("config", &self.config)
            .field("bastion_host", &self.bastion_host)
            .field("bastion_port", &self.bastion_port)
            .field("bastion_username", &self.bastion_username)
            .field("bastion_password", &self.bastion_password)
            .field("extra_hops", &self.extra_hops)
            .field("host_platform", &self.host_platform)
            .finish_non_exhaustive()
    }
}

impl DriverBuilder {
    /// Create a new driver builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        let mut config = ConnectionConfig::new(host, String::new());
        config.credentials.use_agent = true;
        Self {
            config,
            bastion_host: None,
            bastion_port: 22,
            bastion_username: None,
            bastion_password: None,
            bastion_private_key: None,
            extra_hops: Vec::new(),
            host_platform: HostPlatform::current(),
            tool_locator: Arc::new(SearchPath),
        }
    }

    /// Configure from `JUNIPER_*` environment variables.
    ///
    /// `JUNIPER_HOST` is required. Numbers that do not parse are
    /// configuration errors rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let host = var("JUNIPER_HOST").ok_or(ConfigError::Missing {
            field: "JUNIPER_HOST",
        })?;
        let mut builder = Self::new(host.trim());

        if let Some(port) = var("JUNIPER_PORT") {
            builder = builder.port(parse_number("JUNIPER_PORT", &port)?);
        }
        if let Some(user) = var("JUNIPER_USER") {
            builder = builder.username(user);
        }
        if let Some(password) = var("JUNIPER_PASSWORD") {
            builder = builder.password(password);
        }
        if let Some(key) = var("JUNIPER_KEY_FILE") {
            builder = builder.private_key(key);
        }
        if let Some(secs) = var("JUNIPER_TIMEOUT") {
            builder = builder.timeout(Duration::from_secs(parse_number("JUNIPER_TIMEOUT", &secs)?));
        }
        if let Some(secs) = var("JUNIPER_COMMAND_TIMEOUT") {
            builder = builder.command_timeout(Duration::from_secs(parse_number(
                "JUNIPER_COMMAND_TIMEOUT",
                &secs,
            )?));
        }
        if let Some(host) = var("JUNIPER_BASTION_HOST") {
            builder = builder.bastion(host.trim());
        }
        if let Some(port) = var("JUNIPER_BASTION_PORT") {
            builder = builder.bastion_port(parse_number("JUNIPER_BASTION_PORT", &port)?);
        }
        if let Some(user) = var("JUNIPER_BASTION_USER") {
            builder = builder.bastion_username(user);
        }
        if let Some(password) = var("JUNIPER_BASTION_PASSWORD") {
            builder = builder.bastion_password(password);
        }
        if let Some(command) = var("JUNIPER_PROXY_COMMAND") {
            builder = builder.proxy_command(command);
        }
        if let Some(mode) = var("JUNIPER_HOST_KEY_CHECKING") {
            let mode = HostKeyVerification::parse(&mode).ok_or_else(|| ConfigError::Invalid {
                field: "JUNIPER_HOST_KEY_CHECKING",
                message: format!("expected strict, accept-new or disabled, got {:?}", mode),
            })?;
            builder = builder.host_key_verification(mode);
        }
        Ok(builder)
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    /// Set the target password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.credentials.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set a private key file for the target.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.config.credentials.private_key = Some(key_path.into());
        self
    }

    /// Set the passphrase of the private key.
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.config.credentials.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }

    /// Offer SSH agent identities (default: on).
    pub fn agent(mut self, enabled: bool) -> Self {
        self.config.credentials.use_agent = enabled;
        self
    }

    /// Per-hop connect, handshake and authentication timeout (default: 30s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Inactivity timeout while waiting for a command's prompt (default: 30s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Host key verification mode (default: strict).
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.config.host_key_verification = mode;
        self
    }

    /// Use this known_hosts file instead of `~/.ssh/known_hosts`.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.known_hosts_path = Some(path.into());
        self
    }

    /// Reach the target through this jump host.
    pub fn bastion(mut self, host: impl Into<String>) -> Self {
        self.bastion_host = Some(host.into());
        self
    }

    /// Port of the jump host (default: 22).
    pub fn bastion_port(mut self, port: u16) -> Self {
        self.bastion_port = port;
        self
    }

    /// User on the jump host (default: the target user).
    pub fn bastion_username(mut self, username: impl Into<String>) -> Self {
        self.bastion_username = Some(username.into());
        self
    }

    /// Password for the jump host. Never defaults to the target password.
    pub fn bastion_password(mut self, password: impl Into<String>) -> Self {
        self.bastion_password = Some(SecretString::from(password.into()));
        self
    }

    /// Private key for the jump host.
    pub fn bastion_private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.bastion_private_key = Some(key_path.into());
        self
    }

    /// Append a further hop after the one set with [`bastion`](Self::bastion).
    pub fn jump_host(mut self, hop: BastionHop) -> Self {
        self.extra_hops.push(hop);
        self
    }

    /// Send the target password to bastions that have none of their own.
    pub fn reuse_password_for_bastion(mut self) -> Self {
        self.config.reuse_password_for_bastion = true;
        self
    }

    /// OpenSSH-style `ProxyCommand` (`%h`, `%p`, `%r` substituted).
    pub fn proxy_command(mut self, command: impl Into<String>) -> Self {
        self.config.proxy_command = Some(command.into());
        self
    }

    /// Connect attempts for transient network failures, and the delay
    /// before the first retry (doubled each time).
    pub fn retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.config.connect_attempts = attempts;
        self.config.retry_delay = delay;
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.config.terminal_width = width;
        self.config.terminal_height = height;
        self
    }

    /// Pretend to run on another OS when choosing a bastion strategy.
    pub fn host_platform(mut self, platform: HostPlatform) -> Self {
        self.host_platform = platform;
        self
    }

    /// Find proxy executables with `locator` instead of `PATH`.
    pub fn tool_locator(mut self, locator: impl ToolLocator + 'static) -> Self {
        self.tool_locator = Arc::new(locator);
        self
    }

    /// The configuration as it stands, bastion settings folded in.
    pub fn config(&self) -> ConnectionConfig {
        let mut config = self.config.clone();
        if let Some(host) = &self.bastion_host {
            let username = self
                .bastion_username
                .clone()
                .unwrap_or_else(|| config.username.clone());
            let mut hop = BastionHop::new(host.clone(), username).with_port(self.bastion_port);
            hop.credentials = Credentials {
                password: self
                    .bastion_password
                    .as_ref()
                    .map(crate::transport::config::clone_secret),
                private_key: self.bastion_private_key.clone(),
                passphrase: None,
                use_agent: config.credentials.use_agent,
            };
            config.bastions.push(hop);
        }
        config.bastions.extend(self.extra_hops.iter().cloned());
        config
    }

    /// Build the driver.
    ///
    /// This checks the configuration but does not connect. Call `open()` on
    /// the returned driver to establish the connection.
    pub fn build(self) -> Result<JunosDriver<SshConnector>> {
        self.build_with(SshConnector)
    }

    /// Build a driver that opens its shells through `connector`.
    pub fn build_with<C: Connector>(self, connector: C) -> Result<JunosDriver<C>> {
        let config = self.config();
        config.validate()?;
        let retry = RetryPolicy::new(config.connect_attempts, config.retry_delay);
        Ok(JunosDriver::new(
            config,
            connector,
            self.host_platform,
            self.tool_locator,
            retry,
        ))
    }

    /// Build a driver wired to the in-memory JunOS simulator.
    ///
    /// No network is involved, so a missing username or credential is
    /// filled with a placeholder.
    pub fn build_mock(mut self) -> Result<JunosDriver<MockConnector>> {
        if self.config.username.trim().is_empty() {
            self.config.username = "admin".to_string();
        }
        self.build_with(MockConnector::juniper())
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::Invalid {
            field,
            message: format!("{:?} is not a valid number", value),
        }
        .into()
    })
}
