//! In-memory JunOS device.
//!
//! Speaks the same byte protocol as a real PTY shell: a login banner and a
//! prompt, then for every line written an echo, the command's output and a
//! fresh prompt, all with `\r\n` line endings. Used by the test suite and by
//! `DriverBuilder::build_mock()`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::{Hop, Result, TransportError};
use crate::transport::{ChannelIo, ConnectPlan, Connector};

/// What the device does with a command.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Print this text, then the prompt.
    Output(String),
    /// Print this text in pieces of at most `chunk` bytes, then the prompt.
    Chunked { text: String, chunk: usize },
    /// Echo the command and then say nothing, ever.
    Silent,
    /// Echo the command and drop the connection.
    Close,
}

pub const MOCK_VERSION_XML: &str = r#"<rpc-reply xmlns:junos="http://xml.juniper.net/junos/21.4R0/junos">
    <software-information>
        <host-name>mock-r1</host-name>
        <product-model>mx204</product-model>
        <product-name>mx204</product-name>
        <junos-version>21.4R3.15</junos-version>
        <package-information>
            <name>junos</name>
            <comment>JUNOS Software Release [21.4R3.15]</comment>
        </package-information>
        <architecture>amd64</architecture>
    </software-information>
    <cli>
        <banner>{master:0}</banner>
    </cli>
</rpc-reply>"#;

pub const MOCK_VERSION_TEXT: &str = "Hostname: mock-r1
Model: mx204
Junos: 21.4R3.15
JUNOS OS Kernel 64-bit  [20220509.a3b2a9a_builder_stable_12]";

pub const MOCK_CHASSIS_XML: &str = r#"<rpc-reply xmlns:junos="http://xml.juniper.net/junos/21.4R0/junos">
    <chassis-inventory xmlns="http://xml.juniper.net/junos/21.4R0/junos-chassis">
        <chassis junos:style="inventory">
            <name>Chassis</name>
            <serial-number>JN1234ABCDEF</serial-number>
            <description>MX204</description>
            <chassis-module>
                <name>Routing Engine 0</name>
                <serial-number>RE-SERIAL-0</serial-number>
            </chassis-module>
        </chassis>
    </chassis-inventory>
</rpc-reply>"#;

/// A scripted JunOS shell.
#[derive(Debug)]
pub struct MockDevice {
    prompt: String,
    replies: HashMap<String, MockReply>,
    pending: VecDeque<Bytes>,
    line: Vec<u8>,
    closed: bool,
    /// Routing-engine banner printed above each prompt, e.g. `master:0`.
    re_banner: Option<String>,
    /// Every command line received, in order.
    history: Arc<Mutex<Vec<String>>>,
}

impl MockDevice {
    /// A device showing `prompt` (for example `"admin@r1> "`) with no
    /// scripted commands beyond the CLI settings the session sends.
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let mut device = Self {
            prompt,
            replies: HashMap::new(),
            pending: VecDeque::new(),
            line: Vec::new(),
            closed: false,
            re_banner: None,
            history: Arc::new(Mutex::new(Vec::new())),
        };
        device.reply("set cli screen-length 0", MockReply::Output("Screen length set to 0".into()));
        device.reply("set cli screen-width 511", MockReply::Output("Screen width set to 511".into()));
        device.queue("\r\n--- JUNOS 21.4R3.15 Kernel 64-bit  JNPR-12.1-20220509\r\n");
        device.queue_prompt();
        device
    }

    /// A device with canned `show version` and chassis inventory answers.
    pub fn juniper() -> Self {
        Self::new("admin@mock-r1> ")
            .with_reply("show version | display xml", MockReply::Output(MOCK_VERSION_XML.into()))
            .with_reply("show version", MockReply::Output(MOCK_VERSION_TEXT.into()))
            .with_reply(
                "show chassis hardware | display xml",
                MockReply::Output(MOCK_CHASSIS_XML.into()),
            )
    }

    /// Print `{tag}` above every later prompt, as dual-RE systems do.
    pub fn with_re_banner(mut self, tag: impl Into<String>) -> Self {
        self.re_banner = Some(tag.into());
        self
    }

    /// Script a reply.
    pub fn with_reply(mut self, command: impl Into<String>, reply: MockReply) -> Self {
        self.reply(command, reply);
        self
    }

    fn reply(&mut self, command: impl Into<String>, reply: MockReply) {
        self.replies.insert(command.into(), reply);
    }

    /// Shared view of the commands received so far.
    pub fn history(&self) -> Arc<Mutex<Vec<String>>> {
        self.history.clone()
    }

    fn queue(&mut self, text: &str) {
        if !text.is_empty() {
            self.pending.push_back(Bytes::from(text.to_string()));
        }
    }

    fn queue_prompt(&mut self) {
        if let Some(tag) = &self.re_banner {
            let banner = format!("\r\n{{{}}}\r\n", tag);
            self.queue(&banner);
        }
        let prompt = self.prompt.clone();
        self.queue(&prompt);
    }

    fn respond(&mut self, command: String) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.clone());
        self.queue(&format!("{}\r\n", command));

        if command.trim().is_empty() {
            self.queue_prompt();
            return;
        }

        let reply = self.replies.get(command.trim()).cloned().unwrap_or_else(|| {
            MockReply::Output(format!(
                "{}^\nunknown command.",
                " ".repeat(self.prompt.len())
            ))
        });

        match reply {
            MockReply::Output(text) => {
                self.queue(&crlf(&text));
                self.queue_prompt();
            }
            MockReply::Chunked { text, chunk } => {
                let bytes = crlf(&text).into_bytes();
                for piece in bytes.chunks(chunk.max(1)) {
                    self.pending.push_back(Bytes::copy_from_slice(piece));
                }
                self.queue_prompt();
            }
            MockReply::Silent => {}
            MockReply::Close => self.closed = true,
        }
    }
}

/// Body text as the device prints it: CRLF line endings, terminated.
fn crlf(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut out = text.replace('\n', "\r\n");
    if !out.ends_with("\r\n") {
        out.push_str("\r\n");
    }
    out
}

impl ChannelIo for MockDevice {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.line)
                    .trim_end_matches('\r')
                    .to_string();
                self.line.clear();
                self.respond(line);
            } else {
                self.line.push(byte);
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if self.closed {
            return Ok(None);
        }
        // A real device that has nothing to say just keeps quiet.
        std::future::pending::<Result<Option<Bytes>>>().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }
}

/// Hands out [`MockDevice`]s, optionally failing first.
#[derive(Clone)]
pub struct MockConnector {
    factory: Arc<dyn Fn() -> MockDevice + Send + Sync>,
    opens: Arc<AtomicUsize>,
    refuse_first: usize,
    reject_auth: bool,
    stall_auth: bool,
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("opens", &self.opens())
            .field("refuse_first", &self.refuse_first)
            .field("reject_auth", &self.reject_auth)
            .field("stall_auth", &self.stall_auth)
            .finish()
    }
}

impl MockConnector {
    /// Every open yields a fresh device from `factory`.
    pub fn new(factory: impl Fn() -> MockDevice + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            opens: Arc::new(AtomicUsize::new(0)),
            refuse_first: 0,
            reject_auth: false,
            stall_auth: false,
        }
    }

    /// The canned JunOS device.
    pub fn juniper() -> Self {
        Self::new(MockDevice::juniper)
    }

    /// Refuse the first `attempts` connections as if nothing listened.
    pub fn refuse_first(mut self, attempts: usize) -> Self {
        self.refuse_first = attempts;
        self
    }

    /// Reject every login.
    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    /// Accept the socket but never finish authenticating.
    pub fn stall_auth(mut self) -> Self {
        self.stall_auth = true;
        self
    }

    /// Connection attempts so far, including failed ones.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Link = MockDevice;

    async fn open(&self, plan: &ConnectPlan) -> Result<MockDevice> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        let hop = match plan.route.bastion_count() {
            0 => plan.target.hop,
            _ => Hop::Bastion(0),
        };
        if attempt < self.refuse_first {
            return Err(TransportError::ConnectionFailed {
                hop,
                host: plan.target.host.clone(),
                port: plan.target.port,
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            }
            .into());
        }
        if self.stall_auth {
            return Err(TransportError::AuthTimeout {
                hop: plan.target.hop,
                timeout: plan.timeout,
            }
            .into());
        }
        if self.reject_auth {
            return Err(TransportError::AuthenticationFailed {
                hop: plan.target.hop,
                user: plan.target.username.clone(),
            }
            .into());
        }
        Ok((self.factory)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(device: &mut MockDevice) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = device.pending.pop_front() {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_banner_then_prompt() {
        let mut device = MockDevice::new("admin@r1> ");
        let text = drain(&mut device);
        assert!(text.ends_with("\r\nadmin@r1> "));
    }

    #[tokio::test]
    async fn test_echo_output_prompt() {
        let mut device = MockDevice::new("admin@r1> ").with_reply("show foo", MockReply::Output("a\nb".into()));
        drain(&mut device);
        device.send(b"show foo\n").await.unwrap();
        assert_eq!(drain(&mut device), "show foo\r\na\r\nb\r\nadmin@r1> ");
        let history = device.history();
        assert_eq!(*history.lock().unwrap(), vec!["show foo".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let mut device = MockDevice::new("r1> ");
        drain(&mut device);
        device.send(b"show bogus\n").await.unwrap();
        let text = drain(&mut device);
        assert!(text.contains("unknown command."));
        assert!(text.ends_with("r1> "));
    }

    #[tokio::test]
    async fn test_close_reply_ends_stream() {
        let mut device = MockDevice::new("r1> ").with_reply("exit", MockReply::Close);
        drain(&mut device);
        device.send(b"exit\n").await.unwrap();
        assert_eq!(device.recv().await.unwrap().as_deref(), Some(&b"exit\r\n"[..]));
        assert!(device.recv().await.unwrap().is_none());
    }
}
