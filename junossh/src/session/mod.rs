//! Session executor.
//!
//! A [`Session`] owns one live channel to the device and runs commands on
//! it one at a time. The device answers with unframed text, so a command is
//! finished when the prompt comes back; two commands in flight would make
//! their outputs indistinguishable. Every operation therefore takes the
//! session lock for its full duration.

mod output;
mod state;

pub use state::SessionState;

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::channel::{JunosPrompt, PtyChannel, PtyConfig};
use crate::driver::CommandResult;
use crate::error::{ChannelError, DriverError, Result};
use crate::platform::juniper::ON_OPEN_COMMANDS;
use crate::transport::{ChannelIo, ConnectPlan, Connector};

struct Inner<L> {
    state: SessionState,
    channel: Option<PtyChannel<L>>,
}

/// One interactive CLI session.
pub struct Session<L> {
    inner: Mutex<Inner<L>>,
    command_timeout: Duration,
    search_depth: usize,
}

impl<L> std::fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl<L: ChannelIo> Session<L> {
    /// A session that has not connected yet. `command_timeout` applies to
    /// every `execute` that does not pass its own.
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Unconnected,
                channel: None,
            }),
            command_timeout,
            search_depth: PtyConfig::default().search_depth,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    /// Open the route in `plan`, wait for the CLI prompt and switch off
    /// paging.
    ///
    /// Allowed from `Unconnected` and `Failed`. On failure the link is torn
    /// down and the session is left `Failed`.
    pub async fn connect<C>(&self, connector: &C, plan: &ConnectPlan) -> Result<()>
    where
        C: Connector<Link = L>,
    {
        let mut inner = self.inner.lock().await;
        if !inner.state.can_connect() {
            return Err(match inner.state {
                SessionState::Closed => DriverError::SessionClosed,
                _ => DriverError::AlreadyConnected,
            }
            .into());
        }
        let prompt = JunosPrompt::new().map_err(ChannelError::from)?;
        inner.state = SessionState::Connecting;
        debug!(
            "connecting to {}:{} ({} bastion hop(s), strategy {})",
            plan.target.host,
            plan.target.port,
            plan.route.bastion_count(),
            plan.strategy.name()
        );

        let link = match connector.open(plan).await {
            Ok(link) => link,
            Err(e) => {
                inner.state = SessionState::Failed(e.to_string());
                return Err(e);
            }
        };

        let config = PtyConfig {
            timeout: plan.timeout,
            search_depth: self.search_depth,
        };
        let mut channel = PtyChannel::new(link, config, prompt);

        match self.prepare(&mut channel).await {
            Ok(prompt) => {
                info!("session ready on {} ({})", plan.target.host, prompt.trim_end());
                inner.channel = Some(channel);
                inner.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    debug!("closing failed session: {}", close_err);
                }
                inner.state = SessionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn prepare(&self, channel: &mut PtyChannel<L>) -> Result<String> {
        let prompt = channel.read_initial_prompt().await?;
        for command in ON_OPEN_COMMANDS {
            let read = channel.send_command(command, self.command_timeout).await?;
            debug!("{}: {}", command, read.body.trim());
        }
        Ok(prompt)
    }

    /// Run one command and wait for the prompt.
    ///
    /// `timeout` overrides the session's inactivity timeout. A timeout
    /// leaves the session `Ready`; the late output is discarded before the
    /// next command. If that late output still has not ended within the next
    /// command's timeout, the next command is not sent and the session is
    /// closed. End of stream from the device closes the session too.
    pub async fn execute(&self, command: &str, timeout: Option<Duration>) -> Result<CommandResult> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Ready => {}
            SessionState::Closed => return Err(DriverError::SessionClosed.into()),
            _ => return Err(DriverError::NotConnected.into()),
        }
        let Some(channel) = inner.channel.as_mut() else {
            return Err(DriverError::NotConnected.into());
        };

        let timeout = timeout.unwrap_or(self.command_timeout);
        let start = Instant::now();
        match channel.send_command(command, timeout).await {
            Ok(read) => {
                let result = output::normalize(command, read, start.elapsed());
                debug!(
                    "{:?} finished in {:?} (exit {})",
                    command, result.elapsed, result.exit_status
                );
                Ok(result)
            }
            Err(e) => {
                if !channel.is_open() {
                    warn!("session unusable after {:?}: {}", command, e);
                    if let Some(mut channel) = inner.channel.take() {
                        if let Err(close_err) = channel.close().await {
                            debug!("closing dead session: {}", close_err);
                        }
                    }
                    inner.state = SessionState::Closed;
                }
                Err(e)
            }
        }
    }

    /// Tear down every hop, innermost first. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Closed;
        if let Some(mut channel) = inner.channel.take() {
            debug!("closing session");
            channel.close().await?;
        }
        Ok(())
    }
}
