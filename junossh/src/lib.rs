//! # junossh
//!
//! Async SSH session engine for Juniper JunOS devices.
//!
//! junossh opens an interactive CLI session on a JunOS device, directly or
//! through one or more bastion hosts, and runs operational commands on it.
//! The device gives no message framing, so a command's output ends where
//! the CLI prompt reappears.
//!
//! ## Features
//!
//! - Async SSH connections via russh, with in-process jump-host tunnels
//! - Bastion passwords through PuTTY `plink` on Windows or a temporary
//!   `SSH_ASKPASS` helper elsewhere
//! - Prompt-delimited command execution with inactivity timeouts
//! - Device identification from `show version | display xml`
//! - Bounded reconnects for transient network failures
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use junossh::DriverBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), junossh::Error> {
//!     let mut driver = DriverBuilder::new("192.168.1.1")
//!         .username("admin")
//!         .password("secret")
//!         .build()?;
//!
//!     driver.open().await?;
//!
//!     let facts = driver.platform()?;
//!     println!("{} runs Junos {}", facts.hostname, facts.version);
//!
//!     let result = driver.run_command("show interfaces terse").await?;
//!     println!("{}", result.stdout);
//!
//!     driver.close().await?;
//!     Ok(())
//! }
//! ```

pub mod bastion;
pub mod channel;
pub mod driver;
pub mod error;
pub mod platform;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use bastion::{BastionStrategy, HostPlatform, ToolLocator};
pub use driver::{CommandResult, DriverBuilder, JunosDriver, RetryPolicy};
pub use error::{Error, ErrorKind, Hop, Result};
pub use platform::DeviceFacts;
pub use session::{Session, SessionState};
pub use transport::{BastionHop, ConnectionConfig, Credentials, HostKeyVerification};
