//! Device identification.
//!
//! The prober runs right after the session becomes ready and turns the
//! device's version reply into [`DeviceFacts`].

mod facts;
pub mod juniper;
mod probe;
pub mod xml;

pub use facts::{DeviceFacts, UNKNOWN};
pub use probe::{
    PlatformProber, VersionInfo, parse_chassis_serial, parse_version_text, parse_version_xml,
};
