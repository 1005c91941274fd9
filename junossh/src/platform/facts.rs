//! Device identity.

use indexmap::IndexMap;
use serde::Serialize;

use super::juniper::PLATFORM_NAME;

/// Placeholder for any field the device did not report.
pub const UNKNOWN: &str = "unknown";

/// What the prober learned about the device.
///
/// Every string field is populated; missing data reads [`UNKNOWN`]. `raw`
/// keeps the unparsed output of each probe command, keyed by command, in
/// the order the commands ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFacts {
    /// Always `"juniper"`.
    pub name: String,
    /// `"bsd"` for Junos OS, `"linux"` for Junos OS Evolved.
    pub family: String,
    pub version: String,
    pub arch: String,
    pub hostname: String,
    pub model: String,
    /// Chassis serial number, once [`unique_identifier`] has asked for it.
    ///
    /// [`unique_identifier`]: crate::driver::JunosDriver::unique_identifier
    pub serial: Option<String>,
    pub raw: IndexMap<String, String>,
}

impl DeviceFacts {
    /// Facts with every field unknown.
    pub fn unknown() -> Self {
        Self {
            name: PLATFORM_NAME.to_string(),
            family: UNKNOWN.to_string(),
            version: UNKNOWN.to_string(),
            arch: UNKNOWN.to_string(),
            hostname: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
            serial: None,
            raw: IndexMap::new(),
        }
    }

    pub fn is_known(value: &str) -> bool {
        value != UNKNOWN
    }

    /// Raw output of a probe command, if it ran.
    pub fn raw_output(&self, command: &str) -> Option<&str> {
        self.raw.get(command).map(String::as_str)
    }
}

impl Default for DeviceFacts {
    fn default() -> Self {
        Self::unknown()
    }
}

/// OS family for a release string.
pub(crate) fn family_for(version: &str) -> &'static str {
    if version == UNKNOWN {
        UNKNOWN
    } else if version.to_ascii_uppercase().ends_with("-EVO") {
        "linux"
    } else {
        "bsd"
    }
}
