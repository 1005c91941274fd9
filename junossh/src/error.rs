//! Error types for junossh.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Which leg of the connection an error belongs to.
///
/// Bastion indices are zero-based internally and rendered one-based
/// (`bastion-1` is the first jump host).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// The target device, reached without any bastion.
    Direct,
    /// The n-th bastion hop.
    Bastion(usize),
    /// The target device, reached through one or more bastions.
    Target,
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hop::Direct => write!(f, "direct"),
            Hop::Bastion(index) => write!(f, "bastion-{}", index + 1),
            Hop::Target => write!(f, "target"),
        }
    }
}

/// Main error type for junossh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or contradictory configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No usable bastion proxy strategy
    #[error("Proxy configuration error: {0}")]
    Proxy(#[from] ProxyError),

    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Driver-level errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Platform probing errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or contradictory settings. Never retried.
    Configuration,
    /// No viable bastion strategy on this host. Never retried.
    ProxyConfiguration,
    /// Socket-level failure. Retried at connect time only.
    Network,
    /// Credential or host-key rejection. Never retried.
    Authentication,
    /// No prompt observed before the inactivity deadline.
    CommandTimeout,
    /// Output could not be parsed into the expected structure.
    Protocol,
    /// API misuse, such as running a command on a closed session.
    Usage,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Proxy(_) => ErrorKind::ProxyConfiguration,
            Error::Transport(e) => e.kind(),
            Error::Channel(ChannelError::CommandTimeout { .. }) => ErrorKind::CommandTimeout,
            Error::Channel(ChannelError::InvalidPattern(_)) => ErrorKind::Configuration,
            Error::Channel(_) => ErrorKind::Network,
            Error::Driver(DriverError::CommandFailed { .. }) => ErrorKind::Protocol,
            Error::Driver(_) => ErrorKind::Usage,
            Error::Platform(_) => ErrorKind::Protocol,
        }
    }

    /// Whether a fresh connect attempt may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_transient(),
            _ => false,
        }
    }

    /// The hop this error is attributed to, if any.
    pub fn hop(&self) -> Option<Hop> {
        match self {
            Error::Transport(e) => e.hop(),
            _ => None,
        }
    }
}

/// Configuration errors, raised before any network activity.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required setting is missing
    #[error("missing required setting '{field}'")]
    Missing { field: &'static str },

    /// A setting has an unusable value
    #[error("invalid value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },

    /// Two settings cannot be combined
    #[error("conflicting settings: {message}")]
    Conflict { message: String },
}

/// Bastion proxy strategy errors.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The native proxy executable is required but absent
    #[error("native proxy executable not found: '{tool}' is required on {platform} to send a bastion password")]
    ToolNotFound {
        tool: &'static str,
        platform: &'static str,
    },

    /// The platform cannot run the requested strategy at all
    #[error("{strategy} is not supported on {platform}")]
    Unsupported {
        strategy: &'static str,
        platform: &'static str,
    },

    /// The password helper could not be created
    #[error("failed to prepare password helper: {source}")]
    Helper {
        #[source]
        source: io::Error,
    },

    /// The proxy subprocess could not be started
    #[error("failed to start proxy command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Transport layer errors (sockets, SSH handshake, authentication).
///
/// Messages name the hop and the user but never a password or passphrase.
#[derive(Error, Debug)]
pub enum TransportError {
    /// TCP connection to a hop failed
    #[error("[{hop}] connection to {host}:{port} failed: {source}")]
    ConnectionFailed {
        hop: Hop,
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// A hop did not answer in time
    #[error("[{hop}] timed out after {timeout:?}")]
    Timeout { hop: Hop, timeout: Duration },

    /// The hop accepted the connection but authentication never finished
    #[error("[{hop}] authentication did not complete within {timeout:?}")]
    AuthTimeout { hop: Hop, timeout: Duration },

    /// The proxy subprocess went away before the target answered
    #[error("[{hop}] proxy command failed: {detail}")]
    ProxyExited { hop: Hop, detail: String },

    /// A tunnel through a bastion could not be opened
    #[error("[{hop}] failed to open tunnel to {host}:{port}: {source}")]
    Tunnel {
        hop: Hop,
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    /// Every configured credential was rejected
    #[error("[{hop}] authentication failed for user '{user}'")]
    AuthenticationFailed { hop: Hop, user: String },

    /// Host key not present in known_hosts (strict mode)
    #[error("[{hop}] host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { hop: Hop, host: String, port: u16 },

    /// The proxy subprocess refused a hop's host key
    #[error("[{hop}] host key rejected: {detail}")]
    HostKeyRejected { hop: Hop, detail: String },

    /// Host key differs from the one recorded in known_hosts
    #[error("[{hop}] host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged {
        hop: Hop,
        host: String,
        port: u16,
        line: usize,
    },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Private key could not be loaded
    #[error("[{hop}] SSH key error: {message}")]
    Key { hop: Hop, message: String },

    /// SSH handshake or protocol error
    #[error("[{hop}] SSH error: {source}")]
    Ssh {
        hop: Hop,
        #[source]
        source: russh::Error,
    },
}

impl TransportError {
    /// Classify this transport error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::AuthenticationFailed { .. }
            | TransportError::AuthTimeout { .. }
            | TransportError::HostKeyUnknown { .. }
            | TransportError::HostKeyRejected { .. }
            | TransportError::HostKeyChanged { .. }
            | TransportError::Key { .. } => ErrorKind::Authentication,
            TransportError::KnownHosts(_) => ErrorKind::Configuration,
            _ => ErrorKind::Network,
        }
    }

    /// Only socket-level failures qualify for a reconnect.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
                    | io::ErrorKind::Interrupted
            ),
            TransportError::Timeout { .. } => true,
            TransportError::ProxyExited { detail, .. } => names_socket_failure(detail),
            _ => false,
        }
    }

    /// The hop this error is attributed to.
    pub fn hop(&self) -> Option<Hop> {
        match self {
            TransportError::ConnectionFailed { hop, .. }
            | TransportError::Timeout { hop, .. }
            | TransportError::AuthTimeout { hop, .. }
            | TransportError::ProxyExited { hop, .. }
            | TransportError::Tunnel { hop, .. }
            | TransportError::AuthenticationFailed { hop, .. }
            | TransportError::HostKeyUnknown { hop, .. }
            | TransportError::HostKeyRejected { hop, .. }
            | TransportError::HostKeyChanged { hop, .. }
            | TransportError::Key { hop, .. }
            | TransportError::Ssh { hop, .. } => Some(*hop),
            TransportError::KnownHosts(_) => None,
        }
    }
}

/// Socket-level failures as OpenSSH and plink word them on stderr.
const SOCKET_FAILURES: &[&str] = &[
    "Connection refused",
    "Connection timed out",
    "Operation timed out",
    "Connection reset",
    "Network is unreachable",
    "No route to host",
];

fn names_socket_failure(detail: &str) -> bool {
    SOCKET_FAILURES.iter().any(|marker| detail.contains(marker))
}

/// Channel layer errors (PTY shell, prompt detection).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Failed to open the PTY shell channel
    #[error("failed to open PTY shell: {0}")]
    PtyOpenFailed(russh::Error),

    /// No prompt within the inactivity timeout
    #[error("no prompt after '{command}' within {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// The device closed the channel
    #[error("channel closed by device")]
    Closed,

    /// Output of an earlier timed-out command never ended, so replies can no
    /// longer be matched to commands
    #[error("output of a timed-out command still running after {timeout:?}; session abandoned")]
    Desynchronized { timeout: Duration },

    /// SSH protocol error on the channel
    #[error("channel SSH error: {0}")]
    Ssh(russh::Error),

    /// Invalid regex pattern
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Driver layer errors (lifecycle misuse, rejected commands).
#[derive(Error, Debug)]
pub enum DriverError {
    /// Driver not connected
    #[error("not connected - call open() first")]
    NotConnected,

    /// Driver already connected
    #[error("already connected")]
    AlreadyConnected,

    /// Session was closed
    #[error("session is closed")]
    SessionClosed,

    /// Command rejected before sending
    #[error("refusing to send command {command:?}: {reason}")]
    UnsafeCommand { command: String, reason: &'static str },

    /// The device answered a helper command with a diagnostic
    #[error("'{command}' failed: {message}")]
    CommandFailed { command: String, message: String },
}

/// Platform probing errors.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Probe output was not in the expected shape
    #[error("unparsable '{command}' output: {message}")]
    Parse { command: String, message: String },
}

/// Result type alias using junossh's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_display() {
        assert_eq!(Hop::Direct.to_string(), "direct");
        assert_eq!(Hop::Bastion(0).to_string(), "bastion-1");
        assert_eq!(Hop::Bastion(2).to_string(), "bastion-3");
        assert_eq!(Hop::Target.to_string(), "target");
    }

    #[test]
    fn test_refused_is_transient() {
        let err: Error = TransportError::ConnectionFailed {
            hop: Hop::Direct,
            host: "10.0.0.1".into(),
            port: 22,
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        }
        .into();
        assert!(err.is_transient());
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.hop(), Some(Hop::Direct));
    }

    #[test]
    fn test_dns_failure_is_not_transient() {
        let err: Error = TransportError::ConnectionFailed {
            hop: Hop::Bastion(0),
            host: "nowhere.invalid".into(),
            port: 22,
            source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
        }
        .into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_auth_failure_is_fatal() {
        let err: Error = TransportError::AuthenticationFailed {
            hop: Hop::Target,
            user: "admin".into(),
        }
        .into();
        assert!(!err.is_transient());
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(
            err.to_string(),
            "Transport error: [target] authentication failed for user 'admin'"
        );
    }

    #[test]
    fn test_proxy_exit_transient_only_for_socket_failures() {
        let refused = TransportError::ProxyExited {
            hop: Hop::Bastion(0),
            detail: "ssh: connect to host 10.0.0.254 port 22: Connection refused".into(),
        };
        assert!(refused.is_transient());
        assert_eq!(refused.kind(), ErrorKind::Network);

        let plink = TransportError::ProxyExited {
            hop: Hop::Bastion(0),
            detail: "FATAL ERROR: Network error: Connection timed out".into(),
        };
        assert!(plink.is_transient());

        let other = TransportError::ProxyExited {
            hop: Hop::Bastion(0),
            detail: "channel 0: open failed: administratively prohibited".into(),
        };
        assert!(!other.is_transient());
    }

    #[test]
    fn test_auth_timeout_is_fatal() {
        let err: Error = TransportError::AuthTimeout {
            hop: Hop::Bastion(1),
            timeout: Duration::from_secs(10),
        }
        .into();
        assert!(!err.is_transient());
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.hop(), Some(Hop::Bastion(1)));
    }

    #[test]
    fn test_host_key_rejection_is_fatal() {
        let err: Error = TransportError::HostKeyRejected {
            hop: Hop::Bastion(0),
            detail: "Host key verification failed.".into(),
        }
        .into();
        assert!(!err.is_transient());
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_timeout_kind() {
        let err: Error = ChannelError::CommandTimeout {
            command: "show version".into(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::CommandTimeout);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_proxy_error_names_capability() {
        let err: Error = ProxyError::ToolNotFound {
            tool: "plink",
            platform: "windows",
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ProxyConfiguration);
        assert!(err.to_string().contains("native proxy executable not found"));
    }
}
