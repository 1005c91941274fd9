//! Fully resolved connection parameters handed to a connector.

use std::path::PathBuf;
use std::time::Duration;

use crate::bastion::{BastionStrategy, ProxyCommand};
use crate::error::Hop;
use crate::transport::config::{BastionHop, ConnectionConfig, Credentials, HostKeyVerification};

/// One SSH endpoint with its own credentials and host key policy.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Label used in errors and logs.
    pub hop: Hop,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
    pub host_key_verification: HostKeyVerification,
    pub known_hosts_path: Option<PathBuf>,
}

impl Endpoint {
    /// The target device described by `config`.
    pub fn target(config: &ConnectionConfig) -> Self {
        let proxied = config.has_bastion() || config.proxy_command.is_some();
        Self {
            hop: if proxied { Hop::Target } else { Hop::Direct },
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            credentials: config.credentials.clone(),
            host_key_verification: config.host_key_verification,
            known_hosts_path: config.known_hosts_path.clone(),
        }
    }

    /// The `index`-th bastion of `config`.
    pub fn bastion(config: &ConnectionConfig, index: usize, hop: &BastionHop) -> Self {
        Self {
            hop: Hop::Bastion(index),
            host: hop.host.clone(),
            port: hop.port,
            username: hop.username.clone(),
            credentials: hop.credentials.clone(),
            host_key_verification: config.bastion_host_key_verification(hop),
            known_hosts_path: config.known_hosts_path.clone(),
        }
    }
}

/// How the target's SSH stream is reached.
#[derive(Debug)]
pub enum Route {
    /// TCP straight to the target.
    Direct,

    /// In-process SSH through each bastion in order, using `direct-tcpip`
    /// tunnels.
    Chain(Vec<Endpoint>),

    /// A local subprocess whose stdin/stdout carry the target's SSH stream.
    Proxy {
        command: ProxyCommand,
        /// Hop blamed when the subprocess fails and its stderr names no
        /// bastion.
        hop: Hop,
        /// Bastion hosts traversed, outermost first.
        hosts: Vec<String>,
        /// Number of network legs the subprocess traverses.
        legs: u32,
    },
}

impl Route {
    /// Number of SSH sessions this route opens before the target.
    pub fn bastion_count(&self) -> usize {
        match self {
            Route::Direct => 0,
            Route::Chain(hops) => hops.len(),
            Route::Proxy { legs, .. } => *legs as usize,
        }
    }
}

/// Everything a connector needs to produce an authenticated shell.
#[derive(Debug)]
pub struct ConnectPlan {
    pub strategy: BastionStrategy,
    pub target: Endpoint,
    pub route: Route,
    /// Per-hop connect timeout.
    pub timeout: Duration,
    pub terminal_width: u32,
    pub terminal_height: u32,
}
