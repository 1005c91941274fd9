//! Pattern matching utilities for prompt detection.

use regex::bytes::Regex;

/// Trait for prompt matching - regex by default, extensible for custom parsers.
pub trait PromptMatcher: Send + Sync {
    /// Whether `line` (one unterminated line, no `\n`) is a prompt.
    fn is_prompt(&self, line: &[u8]) -> bool;
}

impl PromptMatcher for Regex {
    fn is_prompt(&self, line: &[u8]) -> bool {
        self.is_match(line)
    }
}

/// JunOS CLI prompt in any mode.
///
/// Covers operational `user@host> `, configuration `user@host# `, the
/// FreeBSD/Linux shell `%`, and optional `{master:0}` / `[edit ...]` banner
/// prefixes when they end up on the same line.
pub const JUNOS_PROMPT: &str =
    r"^(?:\{[\w:\-]+\}\s*)?(?:\[edit[^\]]*\]\s*)?[\w\-@()/:.~]{1,63}[>#%]\s?$";

/// Prompt matcher that also learns the device's exact prompt.
///
/// Before the first prompt is seen, any line matching the generic JunOS
/// pattern counts. Once the session has recorded the real prompt (for
/// example `admin@r1> `), a candidate must share its user@host stem. If
/// the real prompt ends in a space, so must the candidate: a body line
/// reading `router1>` is not the `router1> ` prompt, even when a read
/// happens to stop right after it.
#[derive(Debug, Clone)]
pub struct JunosPrompt {
    pattern: Regex,
    learned: Option<Vec<u8>>,
    trailing_space: bool,
}

impl JunosPrompt {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_pattern(JUNOS_PROMPT)
    }

    /// Use a custom prompt regex.
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            learned: None,
            trailing_space: false,
        })
    }

    /// Pin detection to the prompt actually shown by the device.
    pub fn learn(&mut self, prompt: &[u8]) {
        let stem = prompt_stem(prompt);
        if !stem.is_empty() {
            self.learned = Some(stem.to_vec());
            self.trailing_space = prompt.last().is_some_and(u8::is_ascii_whitespace);
        }
    }

    /// The learned stem (`user@host`), if any.
    pub fn learned(&self) -> Option<&[u8]> {
        self.learned.as_deref()
    }

    pub fn regex(&self) -> &Regex {
        &self.pattern
    }
}

impl PromptMatcher for JunosPrompt {
    fn is_prompt(&self, line: &[u8]) -> bool {
        if !self.pattern.is_match(line) {
            return false;
        }
        let Some(stem) = &self.learned else {
            return true;
        };
        if self.trailing_space && !line.last().is_some_and(u8::is_ascii_whitespace) {
            return false;
        }
        prompt_stem(line) == stem.as_slice()
    }
}

/// `user@host` part of a prompt line: banners and the mode character
/// stripped.
fn prompt_stem(line: &[u8]) -> &[u8] {
    let mut line = trim_ascii_end(line);
    if let Some(pos) = line.iter().rposition(|b| *b == b'}' || *b == b']') {
        line = trim_ascii_start(&line[pos + 1..]);
    }
    match line.last() {
        Some(b'>' | b'#' | b'%') => &line[..line.len() - 1],
        _ => line,
    }
}

fn trim_ascii_end(mut s: &[u8]) -> &[u8] {
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

fn trim_ascii_start(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}
