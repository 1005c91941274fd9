//! High-level driver for device interaction.
//!
//! The driver layer is the main API: build a [`JunosDriver`] with
//! [`DriverBuilder`], `open()` it, run commands, `close()` it.

mod builder;
mod manager;
pub(crate) mod response;
mod retry;

pub use builder::DriverBuilder;
pub use manager::JunosDriver;
pub use response::CommandResult;
pub use retry::RetryPolicy;
