//! Byte stream over a proxy subprocess's stdin/stdout.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::bastion::ProxyCommand;
use crate::error::{Hop, ProxyError, Result, TransportError};

/// Upper bound on retained proxy stderr.
const STDERR_TAIL: usize = 4096;

/// OpenSSH and plink wording for a refused or unverifiable host key.
const HOST_KEY_FAILURES: &[&str] = &[
    "host key verification failed",
    "remote host identification has changed",
    "cannot confirm a host key",
    "host key is not cached",
    "potential security breach",
];

/// Wording for rejected credentials.
const AUTH_FAILURES: &[&str] = &[
    "Permission denied",
    "Access denied",
    "Too many authentication failures",
    "No supported authentication methods",
];

/// The subprocess's pipes as one duplex stream for `connect_stream`.
pub(crate) struct ProxyStream {
    stdout: ChildStdout,
    stdin: ChildStdin,
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

/// Owns the running proxy. Killed when dropped.
pub(crate) struct ProxyProcess {
    child: Child,
    hop: Hop,
    /// Bastion hosts the proxy traverses, outermost first.
    hosts: Vec<String>,
    stderr: Arc<Mutex<String>>,
}

impl ProxyProcess {
    /// Last lines the proxy wrote to stderr.
    pub(crate) fn stderr_tail(&self) -> String {
        self.stderr
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .trim()
            .to_string()
    }

    /// Translate a failed handshake over this proxy into a hop error.
    ///
    /// The proxy's own diagnostics say more than russh's view of a closed
    /// pipe, so they take precedence.
    pub(crate) async fn failure(&mut self, fallback: russh::Error) -> TransportError {
        // Give the process a moment to flush stderr and exit.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(200), self.child.wait()).await;
        let tail = self.stderr_tail();
        let hop = self.blame(&tail);

        let lower = tail.to_lowercase();
        if HOST_KEY_FAILURES.iter().any(|marker| lower.contains(marker)) {
            return TransportError::HostKeyRejected { hop, detail: tail };
        }
        if AUTH_FAILURES.iter().any(|marker| tail.contains(marker)) {
            return TransportError::AuthenticationFailed {
                hop,
                user: auth_user_hint(&tail),
            };
        }
        if tail.is_empty() {
            return TransportError::Ssh {
                hop,
                source: fallback,
            };
        }
        TransportError::ProxyExited { hop, detail: tail }
    }

    /// The bastion named by the most recent stderr line that names one,
    /// else the hop the proxy was started for.
    fn blame(&self, tail: &str) -> Hop {
        tail.lines()
            .rev()
            .find_map(|line| {
                line.split(|c: char| c.is_whitespace() || "@:'\"(),[]".contains(c))
                    .find_map(|word| self.hosts.iter().position(|host| host == word))
            })
            .map(Hop::Bastion)
            .unwrap_or(self.hop)
    }

    /// Stop the proxy.
    pub(crate) async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("[{}] proxy already gone: {}", self.hop, e);
        }
    }
}

/// `user@host: Permission denied` carries the user; otherwise unknown.
fn auth_user_hint(stderr: &str) -> String {
    stderr
        .lines()
        .find_map(|line| {
            let (who, _) = line.split_once('@')?;
            let user = who.rsplit(|c: char| c.is_whitespace() || c == '(').next()?;
            (!user.is_empty()).then(|| user.to_string())
        })
        .unwrap_or_else(|| "<bastion>".to_string())
}

/// Start `command` with piped stdio.
///
/// `hosts` lists the bastions the command traverses, outermost first, so a
/// failure can be pinned on the hop that reported it.
pub(crate) fn spawn(
    command: &ProxyCommand,
    hop: Hop,
    hosts: &[String],
) -> Result<(ProxyStream, ProxyProcess)> {
    let mut cmd = Command::new(command.program());
    cmd.args(command.exposed_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in command.envs() {
        cmd.env(key, value);
    }

    debug!("[{}] spawning proxy: {}", hop, command);
    let mut child = cmd.spawn().map_err(|source| ProxyError::Spawn {
        program: command.program().display().to_string(),
        source,
    })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(ProxyError::Spawn {
            program: command.program().display().to_string(),
            source: io::Error::other("proxy stdio not captured"),
        }
        .into());
    };

    let tail = Arc::new(Mutex::new(String::new()));
    if let Some(stderr) = child.stderr.take() {
        let tail = tail.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        warn!("[{}] proxy: {}", hop, line);
                        let mut buf = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        buf.push_str(&line);
                        buf.push('\n');
                        if buf.len() > STDERR_TAIL {
                            let cut = buf.len() - STDERR_TAIL;
                            let cut = (cut..buf.len())
                                .find(|i| buf.is_char_boundary(*i))
                                .unwrap_or(buf.len());
                            buf.drain(..cut);
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });
    }

    Ok((
        ProxyStream { stdout, stdin },
        ProxyProcess {
            child,
            hop,
            hosts: hosts.to_vec(),
            stderr: tail,
        },
    ))
}
