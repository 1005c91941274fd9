//! russh client handler with known_hosts verification.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use russh::client;
use russh::keys::PublicKey;

use super::config::HostKeyVerification;
use super::plan::Endpoint;
use crate::error::{Hop, TransportError};

/// Slot where the handler leaves a detailed host key error, so the
/// connector can report it instead of russh's generic `UnknownKey`.
pub(crate) type HostKeyErrorSlot = Arc<Mutex<Option<TransportError>>>;

/// SSH client handler for one hop.
pub(crate) struct SshHandler {
    hop: Hop,
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    host_key_error: HostKeyErrorSlot,
}

impl SshHandler {
    pub(crate) fn new(endpoint: &Endpoint) -> (Self, HostKeyErrorSlot) {
        let slot: HostKeyErrorSlot = Arc::new(Mutex::new(None));
        let handler = Self {
            hop: endpoint.hop,
            host: endpoint.host.clone(),
            port: endpoint.port,
            host_key_verification: endpoint.host_key_verification,
            known_hosts_path: endpoint.known_hosts_path.clone(),
            host_key_error: slot.clone(),
        };
        (handler, slot)
    }

    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err(TransportError::HostKeyChanged)` if key changed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, pubkey),
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                hop: self.hop,
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey),
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        *self
            .host_key_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error);
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    info!("[{}] learning host key for {}:{}", self.hop, self.host, self.port);
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("[{}] failed to save host key: {}", self.hop, e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    hop: self.hop,
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}

/// Take the stashed host key error, if any.
pub(crate) fn take_host_key_error(slot: &HostKeyErrorSlot) -> Option<TransportError> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}
