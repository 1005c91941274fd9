//! Channel layer for pattern matching and PTY operations.
//!
//! This module handles prompt-delimited reads over an interactive shell,
//! including ANSI stripping and JunOS prompt detection.

mod buffer;
pub mod mock;
mod patterns;
mod pty;

pub use buffer::PatternBuffer;
pub use mock::{MockConnector, MockDevice, MockReply};
pub use patterns::{JUNOS_PROMPT, JunosPrompt, PromptMatcher};
pub use pty::{PromptRead, PtyChannel, PtyConfig};
