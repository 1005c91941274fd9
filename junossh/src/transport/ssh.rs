//! SSH transport implementation using russh.
//!
//! Every route ends in the same place: an authenticated session to the
//! target with an interactive PTY shell. Only the byte stream under the
//! target's handshake differs (TCP, a tunnel through the previous hop, or a
//! proxy subprocess).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, ChannelStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::auth;
use super::handler::{SshHandler, take_host_key_error};
use super::plan::{ConnectPlan, Endpoint, Route};
use super::proxy_stream::{self, ProxyProcess};
use super::{ChannelIo, Connector};
use crate::error::{ChannelError, Error, Hop, Result, TransportError};

/// Keepalive interval for every hop.
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Opens real SSH connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    type Link = SshLink;

    async fn open(&self, plan: &ConnectPlan) -> Result<SshLink> {
        let (target, jumps, proxy) = match &plan.route {
            Route::Direct => {
                let tcp = tcp_connect(&plan.target, plan.timeout).await?;
                (handshake(&plan.target, tcp, plan.timeout).await?, Vec::new(), None)
            }
            Route::Chain(hops) => {
                let (target, jumps) = connect_chain(hops, &plan.target, plan.timeout).await?;
                (target, jumps, None)
            }
            Route::Proxy {
                command, hop, hosts, ..
            } => {
                let (stream, mut process) = proxy_stream::spawn(command, *hop, hosts)?;
                match handshake(&plan.target, stream, plan.timeout).await {
                    Ok(handle) => (handle, Vec::new(), Some(process)),
                    Err(Error::Transport(TransportError::Ssh { source, .. })) => {
                        let err = process.failure(source).await;
                        process.kill().await;
                        return Err(err.into());
                    }
                    Err(e) => {
                        process.kill().await;
                        return Err(e);
                    }
                }
            }
        };

        let channel = match open_shell(&target, plan).await {
            Ok(channel) => channel,
            Err(e) => {
                let link = SshLink {
                    channel: None,
                    target,
                    jumps,
                    proxy,
                };
                link.teardown().await;
                return Err(e);
            }
        };

        info!(
            "[{}] shell open on {}:{} via {}",
            plan.target.hop,
            plan.target.host,
            plan.target.port,
            plan.strategy.name()
        );
        Ok(SshLink {
            channel: Some(channel),
            target,
            jumps,
            proxy,
        })
    }
}

/// TCP connect with a deadline. Socket errors keep their io kind so retry
/// logic can tell refusals from DNS failures.
async fn tcp_connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    debug!("[{}] connecting to {}:{}", endpoint.hop, endpoint.host, endpoint.port);
    let stream = tokio::time::timeout(
        timeout,
        TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await
    .map_err(|_| TransportError::Timeout {
        hop: endpoint.hop,
        timeout,
    })?
    .map_err(|source| TransportError::ConnectionFailed {
        hop: endpoint.hop,
        host: endpoint.host.clone(),
        port: endpoint.port,
        source,
    })?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("[{}] TCP_NODELAY not set: {}", endpoint.hop, e);
    }
    Ok(stream)
}

/// SSH handshake and authentication over an established stream.
async fn handshake<S>(endpoint: &Endpoint, stream: S, timeout: Duration) -> Result<Handle<SshHandler>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ssh_config = Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE),
        keepalive_max: 3,
        ..Default::default()
    });
    let (handler, host_key_error) = SshHandler::new(endpoint);

    let mut handle = tokio::time::timeout(timeout, client::connect_stream(ssh_config, stream, handler))
        .await
        .map_err(|_| TransportError::Timeout {
            hop: endpoint.hop,
            timeout,
        })?
        .map_err(|source| {
            // Prefer the handler's detailed host key error over russh's
            // generic UnknownKey.
            take_host_key_error(&host_key_error).unwrap_or(TransportError::Ssh {
                hop: endpoint.hop,
                source,
            })
        })?;

    // The socket is up by now; a stall here is not worth a reconnect.
    tokio::time::timeout(timeout, auth::authenticate(&mut handle, endpoint))
        .await
        .map_err(|_| TransportError::AuthTimeout {
            hop: endpoint.hop,
            timeout,
        })??;

    Ok(handle)
}

/// Open a `direct-tcpip` tunnel from `via` to `next`.
async fn tunnel(
    via: &Handle<SshHandler>,
    via_hop: Hop,
    next: &Endpoint,
    timeout: Duration,
) -> Result<ChannelStream<Msg>> {
    debug!("[{}] opening tunnel to {}:{}", via_hop, next.host, next.port);
    let channel = tokio::time::timeout(
        timeout,
        via.channel_open_direct_tcpip(next.host.clone(), u32::from(next.port), "127.0.0.1", 0),
    )
    .await
    .map_err(|_| TransportError::Timeout {
        hop: via_hop,
        timeout,
    })?
    .map_err(|source| TransportError::Tunnel {
        hop: via_hop,
        host: next.host.clone(),
        port: next.port,
        source,
    })?;
    Ok(channel.into_stream())
}

/// Connect through each bastion in turn, then to the target.
///
/// Returns the target handle and the bastion handles, outermost first.
async fn connect_chain(
    hops: &[Endpoint],
    target: &Endpoint,
    timeout: Duration,
) -> Result<(Handle<SshHandler>, Vec<Handle<SshHandler>>)> {
    let Some(first) = hops.first() else {
        let tcp = tcp_connect(target, timeout).await?;
        return Ok((handshake(target, tcp, timeout).await?, Vec::new()));
    };

    let tcp = tcp_connect(first, timeout).await?;
    let mut current = handshake(first, tcp, timeout).await?;
    let mut current_hop = first.hop;
    let mut jumps = Vec::with_capacity(hops.len());

    for next in hops[1..].iter().chain(std::iter::once(target)) {
        let step = async {
            let stream = tunnel(&current, current_hop, next, timeout).await?;
            handshake(next, stream, timeout).await
        }
        .await;

        match step {
            Ok(handle) => {
                jumps.push(std::mem::replace(&mut current, handle));
                current_hop = next.hop;
            }
            Err(e) => {
                jumps.push(current);
                disconnect_all(jumps).await;
                return Err(e);
            }
        }
    }

    Ok((current, jumps))
}

/// Request a PTY and an interactive shell on the target.
async fn open_shell(target: &Handle<SshHandler>, plan: &ConnectPlan) -> Result<Channel<Msg>> {
    let channel = target
        .channel_open_session()
        .await
        .map_err(ChannelError::PtyOpenFailed)?;

    channel
        .request_pty(
            true,
            "xterm",
            plan.terminal_width,
            plan.terminal_height,
            0,
            0,
            &[],
        )
        .await
        .map_err(ChannelError::PtyOpenFailed)?;

    channel
        .request_shell(true)
        .await
        .map_err(ChannelError::PtyOpenFailed)?;

    Ok(channel)
}

/// Disconnect handles innermost first.
async fn disconnect_all(handles: Vec<Handle<SshHandler>>) {
    for handle in handles.into_iter().rev() {
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("disconnect: {}", e);
        }
    }
}

/// A live shell on the target plus everything keeping it reachable.
pub struct SshLink {
    channel: Option<Channel<Msg>>,
    target: Handle<SshHandler>,
    /// Bastion sessions, outermost first.
    jumps: Vec<Handle<SshHandler>>,
    proxy: Option<ProxyProcess>,
}

impl SshLink {
    async fn teardown(mut self) {
        self.shutdown().await;
    }

    /// Close channel, target, bastions, then the proxy.
    async fn shutdown(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.eof().await {
                debug!("channel eof: {}", e);
            }
            if let Err(e) = channel.close().await {
                debug!("channel close: {}", e);
            }
        }

        if let Err(e) = self
            .target
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("target disconnect: {}", e);
        }

        disconnect_all(std::mem::take(&mut self.jumps)).await;

        if let Some(proxy) = self.proxy.take() {
            proxy.kill().await;
        }
    }
}

impl ChannelIo for SshLink {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(ChannelError::Closed)?;
        channel.data(data).await.map_err(ChannelError::Ssh)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(None);
        };
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(Bytes::copy_from_slice(&data))),
                // Merged into the same stream, as a terminal would show it.
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Ok(Some(Bytes::copy_from_slice(&data)));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!("shell channel closed by device");
                    return Ok(None);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("shell exited with status {}", exit_status);
                }
                Some(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

impl Drop for SshLink {
    fn drop(&mut self) {
        if self.channel.is_some() {
            warn!("SSH link dropped without close(); connection torn down by drop");
        }
    }
}
