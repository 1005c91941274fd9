//! Platform prober.
//!
//! Asks the device who it is with `show version | display xml` and reads
//! the software version, model, hostname and architecture from the reply.
//! Nothing here fails because of what the device said: a missing or
//! malformed field becomes [`UNKNOWN`]. Only a dead session is an error.

use std::time::Duration;

use log::{debug, warn};

use super::facts::{DeviceFacts, UNKNOWN, family_for};
use super::juniper::{SHOW_CHASSIS_XML, SHOW_VERSION, SHOW_VERSION_XML};
use super::xml;
use crate::error::{ErrorKind, PlatformError, Result};
use crate::session::Session;
use crate::transport::ChannelIo;

/// Fields read from one version reply; `None` means not reported.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: Option<String>,
    pub model: Option<String>,
    pub hostname: Option<String>,
    pub arch: Option<String>,
}

impl VersionInfo {
    /// Fill the gaps in `self` from `other`.
    fn or(self, other: VersionInfo) -> VersionInfo {
        VersionInfo {
            version: self.version.or(other.version),
            model: self.model.or(other.model),
            hostname: self.hostname.or(other.hostname),
            arch: self.arch.or(other.arch),
        }
    }
}

/// Parse `show version | display xml`.
///
/// The version comes from `<junos-version>`, or failing that from the
/// bracketed release in the first package comment
/// (`JUNOS Software Release [21.4R3.15]`). Unknown tags are ignored.
pub fn parse_version_xml(reply: &str) -> VersionInfo {
    if !xml::is_rpc_reply(reply) {
        return VersionInfo::default();
    }
    let version = xml::first_text(reply, "junos-version").or_else(|| {
        xml::all_text(reply, "comment")
            .iter()
            .find_map(|comment| bracketed(comment))
    });
    VersionInfo {
        version,
        model: xml::first_text(reply, "product-model"),
        hostname: xml::first_text(reply, "host-name"),
        arch: xml::first_text(reply, "architecture").or_else(|| xml::first_text(reply, "arch")),
    }
}

/// Parse plain `show version` output, best effort.
pub fn parse_version_text(text: &str) -> VersionInfo {
    let mut info = VersionInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            if info.version.is_none() && line.trim_start().starts_with("JUNOS") {
                info.version = bracketed(line);
            }
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match key.trim() {
            "Hostname" => &mut info.hostname,
            "Model" => &mut info.model,
            "Junos" => &mut info.version,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
    info
}

/// Chassis serial number from `show chassis hardware | display xml`.
pub fn parse_chassis_serial(reply: &str) -> Option<String> {
    if !xml::is_rpc_reply(reply) {
        return None;
    }
    xml::element(reply, "chassis")
        .and_then(|chassis| xml::first_text(chassis, "serial-number"))
        .or_else(|| xml::first_text(reply, "serial-number"))
}

/// `21.4R3.15` out of `JUNOS Software Release [21.4R3.15]`.
fn bracketed(text: &str) -> Option<String> {
    let start = text.find('[')? + 1;
    let end = start + text[start..].find(']')?;
    let inner = text[start..end].trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

enum Reply {
    Output(String),
    Failed,
    TimedOut,
}

/// Runs the probe commands on a ready session.
#[derive(Debug, Clone)]
pub struct PlatformProber {
    timeout: Duration,
}

impl PlatformProber {
    /// `timeout` bounds each probe command's silence.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Populate [`DeviceFacts`] for the device behind `session`.
    pub async fn probe<L: ChannelIo>(&self, session: &Session<L>) -> Result<DeviceFacts> {
        let mut facts = DeviceFacts::unknown();

        let mut info = match self.run(session, &mut facts, SHOW_VERSION_XML).await? {
            Reply::Output(reply) => {
                let info = parse_version_xml(&reply);
                if info == VersionInfo::default() {
                    warn!("no usable fields in '{}' reply", SHOW_VERSION_XML);
                }
                Some(info)
            }
            Reply::Failed => Some(VersionInfo::default()),
            Reply::TimedOut => None,
        };

        if let Some(xml_info) = info.take_if(|info| info.version.is_none()) {
            debug!("version missing from XML, trying '{}'", SHOW_VERSION);
            info = Some(match self.run(session, &mut facts, SHOW_VERSION).await? {
                Reply::Output(text) => xml_info.or(parse_version_text(&text)),
                Reply::Failed | Reply::TimedOut => xml_info,
            });
        }

        let info = info.unwrap_or_default();
        facts.version = info.version.unwrap_or_else(|| UNKNOWN.to_string());
        facts.model = info.model.unwrap_or_else(|| UNKNOWN.to_string());
        facts.hostname = info.hostname.unwrap_or_else(|| UNKNOWN.to_string());
        facts.arch = info.arch.unwrap_or_else(|| UNKNOWN.to_string());
        facts.family = family_for(&facts.version).to_string();

        debug!(
            "device facts: {} {} {} ({}, {})",
            facts.hostname, facts.model, facts.version, facts.family, facts.arch
        );
        Ok(facts)
    }

    /// Chassis serial number, falling back to the hostname.
    ///
    /// The answer is cached in `facts`, so the device is asked at most
    /// once per probe.
    pub async fn serial<L: ChannelIo>(
        &self,
        session: &Session<L>,
        facts: &mut DeviceFacts,
    ) -> Result<String> {
        if let Some(serial) = &facts.serial {
            return Ok(serial.clone());
        }

        let serial = match self.run(session, facts, SHOW_CHASSIS_XML).await? {
            Reply::Output(reply) => parse_chassis_serial(&reply),
            Reply::Failed | Reply::TimedOut => None,
        };
        let serial = match serial {
            Some(serial) => serial,
            None if DeviceFacts::is_known(&facts.hostname) => {
                warn!("no chassis serial number, using hostname {}", facts.hostname);
                facts.hostname.clone()
            }
            None => {
                return Err(PlatformError::Parse {
                    command: SHOW_CHASSIS_XML.to_string(),
                    message: "no serial number and no hostname".to_string(),
                }
                .into());
            }
        };
        facts.serial = Some(serial.clone());
        Ok(serial)
    }

    async fn run<L: ChannelIo>(
        &self,
        session: &Session<L>,
        facts: &mut DeviceFacts,
        command: &str,
    ) -> Result<Reply> {
        match session.execute(command, Some(self.timeout)).await {
            Ok(result) => {
                facts.raw.insert(command.to_string(), result.stdout.clone());
                if result.is_success() {
                    Ok(Reply::Output(result.stdout))
                } else {
                    warn!("'{}' rejected by device: {}", command, result.stderr);
                    Ok(Reply::Failed)
                }
            }
            Err(e) if e.kind() == ErrorKind::CommandTimeout => {
                warn!("'{}' timed out, facts will be incomplete", command);
                Ok(Reply::TimedOut)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bastion::{BastionStrategy, prepare};
    use crate::channel::mock::{MOCK_CHASSIS_XML, MOCK_VERSION_XML};
    use crate::channel::{MockConnector, MockDevice, MockReply};
    use crate::transport::{ConnectionConfig, Credentials};

    async fn session(connector: MockConnector) -> Session<MockDevice> {
        let mut config = ConnectionConfig::new("10.0.0.1", "admin");
        config.credentials = Credentials::password("secret");
        config.timeout = Duration::from_millis(500);
        let plan = prepare(&BastionStrategy::None, &config).unwrap().plan;
        let session = Session::new(Duration::from_millis(500));
        session.connect(&connector, &plan).await.unwrap();
        session
    }

    fn prober() -> PlatformProber {
        PlatformProber::new(Duration::from_millis(200))
    }

    #[test]
    fn test_parse_version_xml() {
        let info = parse_version_xml(MOCK_VERSION_XML);
        assert_eq!(info.version.as_deref(), Some("21.4R3.15"));
        assert_eq!(info.model.as_deref(), Some("mx204"));
        assert_eq!(info.hostname.as_deref(), Some("mock-r1"));
        assert_eq!(info.arch.as_deref(), Some("amd64"));
    }

    #[test]
    fn test_version_from_package_comment() {
        let reply = r#"<rpc-reply>
            <software-information>
                <host-name>old-r1</host-name>
                <product-model>mx480</product-model>
                <package-information>
                    <name>junos</name>
                    <comment>JUNOS Base OS boot [12.3R12.4]</comment>
                </package-information>
            </software-information>
        </rpc-reply>"#;
        let info = parse_version_xml(reply);
        assert_eq!(info.version.as_deref(), Some("12.3R12.4"));
        assert_eq!(info.arch, None);
    }

    #[test]
    fn test_malformed_xml_yields_nothing() {
        assert_eq!(parse_version_xml("error: syntax error"), VersionInfo::default());
        assert_eq!(
            parse_version_xml("<rpc-reply><junos-version>21.4"),
            VersionInfo::default()
        );
    }

    #[test]
    fn test_parse_version_text() {
        let info = parse_version_text(
            "Hostname: r1\nModel: ex4300-48t\nJunos: 22.4R1.10-EVO\nJUNOS OS Kernel 64-bit [20220509]",
        );
        assert_eq!(info.hostname.as_deref(), Some("r1"));
        assert_eq!(info.model.as_deref(), Some("ex4300-48t"));
        assert_eq!(info.version.as_deref(), Some("22.4R1.10-EVO"));

        let old = parse_version_text("Hostname: r2\nJUNOS Base OS boot [12.3R12.4]");
        assert_eq!(old.version.as_deref(), Some("12.3R12.4"));
    }

    #[test]
    fn test_parse_chassis_serial() {
        assert_eq!(
            parse_chassis_serial(MOCK_CHASSIS_XML).as_deref(),
            Some("JN1234ABCDEF")
        );
        assert_eq!(parse_chassis_serial("error: permission denied"), None);
    }

    #[tokio::test]
    async fn test_probe_mock_device() {
        let session = session(MockConnector::juniper()).await;
        let facts = prober().probe(&session).await.unwrap();
        assert_eq!(facts.name, "juniper");
        assert_eq!(facts.version, "21.4R3.15");
        assert_eq!(facts.model, "mx204");
        assert_eq!(facts.hostname, "mock-r1");
        assert_eq!(facts.arch, "amd64");
        assert_eq!(facts.family, "bsd");
        assert!(facts.raw_output(SHOW_VERSION_XML).is_some());
        assert!(facts.raw_output(SHOW_VERSION).is_none());
    }

    #[tokio::test]
    async fn test_missing_arch_is_unknown() {
        let reply = MOCK_VERSION_XML.replace("<architecture>amd64</architecture>", "");
        let session = session(MockConnector::new(move || {
            MockDevice::juniper().with_reply(SHOW_VERSION_XML, MockReply::Output(reply.clone()))
        }))
        .await;
        let facts = prober().probe(&session).await.unwrap();
        assert_eq!(facts.arch, "unknown");
        assert_eq!(facts.version, "21.4R3.15");
    }

    #[tokio::test]
    async fn test_text_fallback_when_xml_unsupported() {
        let session = session(MockConnector::new(|| {
            MockDevice::new("admin@r1> ").with_reply(
                SHOW_VERSION,
                MockReply::Output("Hostname: r1\nModel: qfx5120\nJunos: 23.2R1.13-EVO".into()),
            )
        }))
        .await;
        let facts = prober().probe(&session).await.unwrap();
        assert_eq!(facts.version, "23.2R1.13-EVO");
        assert_eq!(facts.family, "linux");
        assert_eq!(facts.model, "qfx5120");
        assert_eq!(facts.arch, "unknown");
        assert!(facts.raw_output(SHOW_VERSION).is_some());
    }

    #[tokio::test]
    async fn test_probe_timeout_degrades() {
        let session = session(MockConnector::new(|| {
            MockDevice::new("admin@r1> ").with_reply(SHOW_VERSION_XML, MockReply::Silent)
        }))
        .await;
        let facts = prober().probe(&session).await.unwrap();
        assert_eq!(facts, DeviceFacts::unknown());
    }

    #[tokio::test]
    async fn test_serial_is_cached() {
        let device = MockDevice::juniper();
        let history = device.history();
        let slot = std::sync::Mutex::new(Some(device));
        let session = session(MockConnector::new(move || {
            slot.lock()
                .unwrap()
                .take()
                .unwrap_or_else(MockDevice::juniper)
        }))
        .await;

        let prober = prober();
        let mut facts = prober.probe(&session).await.unwrap();
        assert_eq!(prober.serial(&session, &mut facts).await.unwrap(), "JN1234ABCDEF");
        assert_eq!(prober.serial(&session, &mut facts).await.unwrap(), "JN1234ABCDEF");

        let asked = history
            .lock()
            .unwrap()
            .iter()
            .filter(|command| command.as_str() == SHOW_CHASSIS_XML)
            .count();
        assert_eq!(asked, 1);
        assert!(facts.raw_output(SHOW_CHASSIS_XML).is_some());
    }

    #[tokio::test]
    async fn test_serial_falls_back_to_hostname() {
        let session = session(MockConnector::new(|| {
            MockDevice::juniper().with_reply(SHOW_CHASSIS_XML, MockReply::Output("error: permission denied".into()))
        }))
        .await;
        let prober = prober();
        let mut facts = prober.probe(&session).await.unwrap();
        assert_eq!(prober.serial(&session, &mut facts).await.unwrap(), "mock-r1");
    }
}
