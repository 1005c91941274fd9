//! PTY channel abstraction for interactive sessions.
//!
//! JunOS gives no message framing: a command's output ends when the CLI
//! prompt comes back. [`PtyChannel`] writes a line, accumulates cleaned
//! output, and stops when the last unterminated line after the command's
//! own echo is the device prompt.

use std::time::Duration;

use log::{debug, trace};

use super::buffer::PatternBuffer;
use super::patterns::{JunosPrompt, PromptMatcher};
use crate::error::{ChannelError, Error, Result};
use crate::transport::ChannelIo;

/// Configuration for PTY channel behavior.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Inactivity timeout: the longest silence tolerated while waiting for
    /// the prompt. Restarted by every chunk received.
    pub timeout: Duration,

    /// Search depth for pattern matching.
    pub search_depth: usize,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            search_depth: 1000,
        }
    }
}

/// Output of one prompt-delimited read, `\r` and ANSI already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRead {
    /// The command line as echoed by the device.
    pub echo: String,
    /// Everything between the echo and the prompt line.
    pub body: String,
    /// The prompt line itself.
    pub prompt: String,
}

/// High-level PTY channel for interactive device sessions.
pub struct PtyChannel<L> {
    link: L,
    config: PtyConfig,
    buffer: PatternBuffer,
    prompt: JunosPrompt,
    is_open: bool,

    /// A previous read timed out; its output may still be arriving.
    dirty: bool,
}

impl<L: ChannelIo> PtyChannel<L> {
    pub fn new(link: L, config: PtyConfig, prompt: JunosPrompt) -> Self {
        Self {
            link,
            buffer: PatternBuffer::new(config.search_depth),
            config,
            prompt,
            is_open: true,
            dirty: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Whether unread output from a timed-out command may be pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn prompt(&self) -> &JunosPrompt {
        &self.prompt
    }

    pub fn config(&self) -> &PtyConfig {
        &self.config
    }

    /// Wait for the login prompt and pin prompt detection to it.
    ///
    /// If the device stays quiet, one bare newline is sent to coax a prompt
    /// out of it.
    pub async fn read_initial_prompt(&mut self) -> Result<String> {
        let timeout = self.config.timeout;
        let read = match self.read_until_prompt(false, "<login>", timeout).await {
            Ok(read) => read,
            Err(Error::Channel(ChannelError::CommandTimeout { .. })) => {
                debug!("no prompt after login, sending newline");
                self.link.send(b"\n").await?;
                self.read_until_prompt(false, "<login>", timeout).await?
            }
            Err(e) => return Err(e),
        };
        self.dirty = false;
        self.prompt.learn(read.prompt.as_bytes());
        debug!("device prompt: {:?}", read.prompt);
        Ok(read.prompt)
    }

    /// Send one command line and read up to the next prompt.
    pub async fn send_command(&mut self, command: &str, timeout: Duration) -> Result<PromptRead> {
        if !self.is_open {
            return Err(ChannelError::Closed.into());
        }
        if self.dirty {
            self.drain(timeout).await?;
        }

        self.buffer.clear();
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        trace!("send: {:?}", command);
        self.link.send(&line).await?;

        self.read_until_prompt(true, command, timeout).await
    }

    /// Consume the rest of a timed-out command's output.
    ///
    /// If no prompt turns up within `timeout` the earlier command is still
    /// running, and nothing read from here on can be attributed to a
    /// command. The channel is then marked closed.
    async fn drain(&mut self, timeout: Duration) -> Result<()> {
        debug!("draining output of a timed-out command");
        match self.read_until_prompt(false, "<drain>", timeout).await {
            Ok(read) => {
                trace!("discarded {} bytes", read.body.len());
                self.dirty = false;
                Ok(())
            }
            Err(Error::Channel(ChannelError::CommandTimeout { .. })) => {
                self.is_open = false;
                Err(ChannelError::Desynchronized { timeout }.into())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_until_prompt(
        &mut self,
        skip_echo: bool,
        label: &str,
        timeout: Duration,
    ) -> Result<PromptRead> {
        loop {
            if let Some(read) = self.take_prompt(skip_echo) {
                return Ok(read);
            }

            let chunk = match tokio::time::timeout(timeout, self.link.recv()).await {
                Ok(result) => result?,
                Err(_) => {
                    self.dirty = true;
                    debug!(
                        "no prompt after {:?} within {:?} ({} bytes buffered)",
                        label,
                        timeout,
                        self.buffer.len()
                    );
                    return Err(ChannelError::CommandTimeout {
                        command: label.to_string(),
                        timeout,
                    }
                    .into());
                }
            };

            match chunk {
                Some(data) => {
                    trace!("recv {} bytes", data.len());
                    self.buffer.extend(&data);
                }
                None => {
                    self.is_open = false;
                    return Err(ChannelError::Closed.into());
                }
            }
        }
    }

    /// Split the buffer at the prompt, if the buffer now ends in one.
    fn take_prompt(&mut self, skip_echo: bool) -> Option<PromptRead> {
        let from = if skip_echo {
            self.buffer.line_end_after(0)?
        } else {
            0
        };
        let (start, line) = self.buffer.trailing_line(from)?;
        if !self.prompt.is_prompt(line) {
            return None;
        }
        let prompt = String::from_utf8_lossy(line).into_owned();

        let data = self.buffer.take();
        Some(PromptRead {
            echo: String::from_utf8_lossy(&data[..from])
                .trim_end_matches('\n')
                .to_string(),
            body: String::from_utf8_lossy(&data[from..start]).into_owned(),
            prompt,
        })
    }

    /// Close the underlying link. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        self.is_open = false;
        self.buffer.clear();
        self.link.close().await
    }
}
