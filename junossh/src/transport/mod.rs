//! SSH transport layer wrapping russh.
//!
//! This module turns a [`ConnectPlan`] into a live interactive shell. The
//! rest of the crate only sees the [`ChannelIo`] byte pipe, so the session
//! logic can be driven by an in-memory device in tests.

mod auth;
pub mod config;
mod handler;
pub mod plan;
mod proxy_stream;
mod ssh;

use std::future::Future;

use bytes::Bytes;

pub use config::{BastionHop, ConnectionConfig, Credentials, HostKeyVerification};
pub use plan::{ConnectPlan, Endpoint, Route};
pub use ssh::{SshConnector, SshLink};

use crate::error::Result;

/// A bidirectional byte pipe to an interactive shell.
pub trait ChannelIo: Send {
    /// Write raw bytes to the shell.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Next chunk of output. `Ok(None)` means the device closed the shell.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Tear down the shell and everything under it. Safe to call twice.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Produces a shell for a plan.
pub trait Connector: Send + Sync {
    type Link: ChannelIo + 'static;

    /// Open, authenticate and start a PTY shell. One call is one attempt;
    /// retries are the caller's business.
    fn open(&self, plan: &ConnectPlan) -> impl Future<Output = Result<Self::Link>> + Send;
}
