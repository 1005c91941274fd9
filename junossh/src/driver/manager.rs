//! Connection manager.
//!
//! [`JunosDriver`] ties the pieces together: it validates the
//! configuration, picks a bastion strategy once, connects with bounded
//! retries, probes the device and then hands commands to the session.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::response::CommandResult;
use super::retry::RetryPolicy;
use crate::bastion::{self, BastionStrategy, HostPlatform, ToolLocator};
use crate::error::{DriverError, Result};
use crate::platform::juniper::FILE_SHOW;
use crate::platform::{DeviceFacts, PlatformProber};
use crate::session::{Session, SessionState};
use crate::transport::{ConnectionConfig, Connector, SshConnector};

/// A managed connection to one JunOS device.
pub struct JunosDriver<C: Connector = SshConnector> {
    config: ConnectionConfig,
    connector: C,
    host_platform: HostPlatform,
    tool_locator: Arc<dyn ToolLocator>,
    retry: RetryPolicy,
    prober: PlatformProber,
    strategy: Option<BastionStrategy>,
    session: Option<Session<C::Link>>,
    facts: Option<DeviceFacts>,
}

impl<C: Connector + std::fmt::Debug> std::fmt::Debug for JunosDriver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JunosDriver")
            .field("config", &self.config)
            .field("connector", &self.connector)
            .field("host_platform", &self.host_platform)
            .field("strategy", &self.strategy)
            .field("facts", &self.facts)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> JunosDriver<C> {
    pub(crate) fn new(
        config: ConnectionConfig,
        connector: C,
        host_platform: HostPlatform,
        tool_locator: Arc<dyn ToolLocator>,
        retry: RetryPolicy,
    ) -> Self {
        let prober = PlatformProber::new(config.command_timeout);
        Self {
            config,
            connector,
            host_platform,
            tool_locator,
            retry,
            prober,
            strategy: None,
            session: None,
            facts: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The strategy chosen by the last `open()`.
    pub fn strategy(&self) -> Option<&BastionStrategy> {
        self.strategy.as_ref()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect, wait for the CLI and identify the device.
    ///
    /// The bastion strategy is resolved before any socket is opened, so a
    /// missing proxy executable fails here without network traffic. Only
    /// transient network failures are retried; a fresh password helper is
    /// written for each attempt and removed as soon as it ends.
    pub async fn open(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            if session.state().await.is_ready() {
                return Err(DriverError::AlreadyConnected.into());
            }
        }

        self.config.validate()?;
        let strategy = bastion::resolve(&self.config, self.host_platform, &*self.tool_locator)?;
        info!(
            "opening {} as {} (bastion strategy: {})",
            self.config.socket_addr(),
            self.config.username,
            strategy.name()
        );

        let session = Session::new(self.config.command_timeout);
        let config = &self.config;
        let connector = &self.connector;
        let chosen = &strategy;
        let current = &session;
        self.retry
            .run("connect", move || async move {
                let prepared = bastion::prepare(chosen, config)?;
                let result = current.connect(connector, &prepared.plan).await;
                if let Some(helper) = prepared.helper {
                    if let Err(e) = helper.remove() {
                        warn!("failed to remove password helper: {}", e);
                    }
                }
                result
            })
            .await?;

        let facts = match self.prober.probe(&session).await {
            Ok(facts) => facts,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!("closing after failed probe: {}", close_err);
                }
                return Err(e);
            }
        };
        info!(
            "connected to {} ({} {}, Junos {})",
            self.config.host, facts.hostname, facts.model, facts.version
        );

        self.strategy = Some(strategy);
        self.facts = Some(facts);
        self.session = Some(session);
        Ok(())
    }

    /// Run one CLI command with the configured command timeout.
    pub async fn run_command(&self, command: &str) -> Result<CommandResult> {
        self.run_command_with_timeout(command, self.config.command_timeout)
            .await
    }

    /// Run one CLI command, waiting at most `timeout` between chunks.
    pub async fn run_command_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        check_command(command)?;
        let session = self.session.as_ref().ok_or(DriverError::NotConnected)?;
        session.execute(command.trim(), Some(timeout)).await
    }

    /// Run several commands in order, stopping at the first error.
    pub async fn run_commands(&self, commands: &[&str]) -> Result<Vec<CommandResult>> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            results.push(self.run_command(command).await?);
        }
        Ok(results)
    }

    /// Facts gathered by the last probe.
    pub fn platform(&self) -> Result<&DeviceFacts> {
        self.facts
            .as_ref()
            .ok_or_else(|| DriverError::NotConnected.into())
    }

    /// Probe the device again.
    pub async fn refresh_platform(&mut self) -> Result<&DeviceFacts> {
        let session = self.ready_session().await?;
        let facts = self.prober.probe(session).await?;
        Ok(self.facts.insert(facts))
    }

    /// A stable identifier for the device: the chassis serial number, or
    /// the hostname when the chassis does not report one.
    pub async fn unique_identifier(&mut self) -> Result<String> {
        let session = self.session.as_ref().ok_or(DriverError::NotConnected)?;
        let facts = self.facts.as_mut().ok_or(DriverError::NotConnected)?;
        self.prober.serial(session, facts).await
    }

    /// Content of a file on the device, via `file show`.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        let path = path.trim();
        if path.is_empty() || path.contains(char::is_whitespace) {
            return Err(DriverError::UnsafeCommand {
                command: format!("{} {}", FILE_SHOW, path),
                reason: "path must be a single non-empty word",
            }
            .into());
        }
        let result = self.run_command(&format!("{} {}", FILE_SHOW, path)).await?;
        if !result.is_success() {
            return Err(DriverError::CommandFailed {
                command: result.command,
                message: result.stderr,
            }
            .into());
        }
        Ok(result.stdout)
    }

    /// Whether the session is ready for commands.
    pub async fn is_open(&self) -> bool {
        match &self.session {
            Some(session) => session.state().await.is_ready(),
            None => false,
        }
    }

    /// Lifecycle state of the session.
    pub async fn state(&self) -> SessionState {
        match &self.session {
            Some(session) => session.state().await,
            None => SessionState::Unconnected,
        }
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            session.close().await?;
            debug!("closed {}", self.config.socket_addr());
        }
        Ok(())
    }

    async fn ready_session(&self) -> Result<&Session<C::Link>> {
        let session = self.session.as_ref().ok_or(DriverError::NotConnected)?;
        match session.state().await {
            SessionState::Ready => Ok(session),
            SessionState::Closed => Err(DriverError::SessionClosed.into()),
            _ => Err(DriverError::NotConnected.into()),
        }
    }
}

/// Reject commands that would break prompt framing or smuggle in a second
/// command. The JunOS pipe `|` is fine.
pub(crate) fn check_command(command: &str) -> Result<()> {
    let reject = |reason: &'static str| -> Result<()> {
        Err(DriverError::UnsafeCommand {
            command: command.to_string(),
            reason,
        }
        .into())
    };

    if command.trim().is_empty() {
        return reject("empty command");
    }
    if command.chars().any(char::is_control) {
        return reject("control characters are not allowed");
    }
    for (needle, reason) in [
        (";", "';' is not allowed"),
        ("&", "'&' is not allowed"),
        ("`", "backticks are not allowed"),
        ("$(", "'$(' is not allowed"),
    ] {
        if command.contains(needle) {
            return reject(reason);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bastion::BastionStrategy;
    use crate::channel::mock::MOCK_VERSION_TEXT;
    use crate::channel::{MockConnector, MockDevice, MockReply};
    use crate::driver::DriverBuilder;
    use crate::error::{Error, ErrorKind, TransportError};
    use std::path::PathBuf;

    fn builder() -> DriverBuilder {
        DriverBuilder::new("10.0.0.1")
            .username("admin")
            .password("secret")
            .timeout(Duration::from_millis(500))
            .command_timeout(Duration::from_millis(500))
            .retries(3, Duration::from_millis(1))
    }

    fn no_tools(_: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    fn test_check_command() {
        assert!(check_command("show interfaces terse | match ge-").is_ok());
        assert!(check_command("show version").is_ok());
        for bad in [
            "",
            "   ",
            "show version\nrequest system reboot",
            "show version\t",
            "show version; request system halt",
            "show version && start shell",
            "show `id`",
            "show $(id)",
        ] {
            let err = check_command(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage, "{:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_open_probe_run_close() {
        let mut driver = builder().build_with(MockConnector::juniper()).unwrap();
        assert!(!driver.is_open().await);

        driver.open().await.unwrap();
        assert!(driver.is_open().await);
        assert_eq!(driver.strategy(), Some(&BastionStrategy::None));
        assert_eq!(driver.connector().opens(), 1);

        let facts = driver.platform().unwrap();
        assert_eq!(facts.version, "21.4R3.15");
        assert_eq!(facts.model, "mx204");

        let result = driver.run_command("show version").await.unwrap();
        assert_eq!(result.stdout, MOCK_VERSION_TEXT);
        assert_eq!(result.exit_status, 0);

        driver.close().await.unwrap();
        driver.close().await.unwrap();
        assert!(!driver.is_open().await);
        assert_eq!(driver.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let mut driver = builder().build_with(MockConnector::juniper()).unwrap();

        let err = driver.run_command("show version").await.unwrap_err();
        assert!(matches!(err, Error::Driver(DriverError::NotConnected)));
        assert!(driver.platform().is_err());

        driver.open().await.unwrap();
        let err = driver.open().await.unwrap_err();
        assert!(matches!(err, Error::Driver(DriverError::AlreadyConnected)));

        driver.close().await.unwrap();
        let err = driver.run_command("show version").await.unwrap_err();
        assert!(matches!(err, Error::Driver(DriverError::SessionClosed)));
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn test_reopen_after_close() {
        let mut driver = builder().build_with(MockConnector::juniper()).unwrap();
        driver.open().await.unwrap();
        driver.close().await.unwrap();
        driver.open().await.unwrap();
        assert!(driver.is_open().await);
        assert_eq!(driver.connector().opens(), 2);
    }

    #[tokio::test]
    async fn test_windows_without_plink_fails_before_connecting() {
        let mut driver = DriverBuilder::new("10.0.0.1")
            .username("admin")
            .password("secret")
            .bastion("10.0.0.254")
            .bastion_password("x")
            .host_platform(HostPlatform::Windows)
            .tool_locator(no_tools)
            .build_with(MockConnector::juniper())
            .unwrap();

        let err = driver.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProxyConfiguration);
        assert!(err.to_string().contains("native proxy executable not found"));
        assert_eq!(driver.connector().opens(), 0);
        assert!(!driver.is_open().await);
    }

    #[tokio::test]
    async fn test_windows_with_plink_uses_native_proxy() {
        let mut driver = builder()
            .bastion("10.0.0.254")
            .bastion_password("x")
            .host_platform(HostPlatform::Windows)
            .tool_locator(|program: &str| {
                (program == "plink").then(|| PathBuf::from(r"C:\Program Files\PuTTY\plink.exe"))
            })
            .build_with(MockConnector::juniper())
            .unwrap();

        driver.open().await.unwrap();
        assert!(matches!(
            driver.strategy(),
            Some(BastionStrategy::NativeProxyBinary { .. })
        ));
    }

    #[tokio::test]
    async fn test_key_only_bastion_uses_no_proxy() {
        let mut driver = builder()
            .bastion("10.0.0.254")
            .host_platform(HostPlatform::Windows)
            .tool_locator(no_tools)
            .build_with(MockConnector::juniper())
            .unwrap();
        driver.open().await.unwrap();
        assert_eq!(driver.strategy(), Some(&BastionStrategy::None));
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let mut driver = builder()
            .build_with(MockConnector::juniper().refuse_first(2))
            .unwrap();
        driver.open().await.unwrap();
        assert_eq!(driver.connector().opens(), 3);
        assert!(driver.is_open().await);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mut driver = builder()
            .build_with(MockConnector::juniper().refuse_first(5))
            .unwrap();
        let err = driver.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(driver.connector().opens(), 3);
        assert!(matches!(driver.state().await, SessionState::Unconnected));
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let mut driver = builder()
            .build_with(MockConnector::juniper().reject_auth())
            .unwrap();
        let err = driver.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!err.to_string().contains("secret"));
        assert_eq!(driver.connector().opens(), 1);
    }

    #[tokio::test]
    async fn test_stalled_auth_not_retried() {
        let mut driver = builder()
            .build_with(MockConnector::juniper().stall_auth())
            .unwrap();
        let err = driver.open().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::AuthTimeout { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(driver.connector().opens(), 1);
    }

    #[tokio::test]
    async fn test_unique_identifier_and_read_file() {
        let connector = MockConnector::new(|| {
            MockDevice::juniper().with_reply(
                "file show /var/tmp/notes.txt",
                MockReply::Output("hello\nworld".into()),
            )
        });
        let mut driver = builder().build_with(connector).unwrap();
        driver.open().await.unwrap();

        assert_eq!(driver.unique_identifier().await.unwrap(), "JN1234ABCDEF");
        assert_eq!(
            driver.platform().unwrap().serial.as_deref(),
            Some("JN1234ABCDEF")
        );

        assert_eq!(driver.read_file("/var/tmp/notes.txt").await.unwrap(), "hello\nworld");
        let err = driver.read_file("/var/tmp/a b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = driver.read_file("/var/tmp/missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_unsafe_command_never_sent() {
        let device = MockDevice::juniper();
        let history = device.history();
        let slot = std::sync::Mutex::new(Some(device));
        let connector = MockConnector::new(move || {
            slot.lock()
                .unwrap()
                .take()
                .unwrap_or_else(MockDevice::juniper)
        });
        let mut driver = builder().build_with(connector).unwrap();
        driver.open().await.unwrap();
        let before = history.lock().unwrap().len();

        let err = driver
            .run_command("show version\nrequest system reboot")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Driver(DriverError::UnsafeCommand { .. })));
        assert_eq!(history.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_build_mock() {
        let mut driver = DriverBuilder::new("mock").build_mock().unwrap();
        driver.open().await.unwrap();
        assert_eq!(driver.platform().unwrap().hostname, "mock-r1");
        let results = driver
            .run_commands(&["show version", "show chassis hardware | display xml"])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        driver.close().await.unwrap();
    }
}
