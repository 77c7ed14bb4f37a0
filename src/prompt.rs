//! Prompt recognition.
//!
//! A device is waiting for input when the trailing, newline-less fragment of
//! its output looks like a prompt. [`PromptResolver`] owns that decision and
//! the text surgery around it (echo stripping, trailing prompt removal,
//! pagination markers). It does no I/O; the session feeds it buffers.

use regex::RegexSet;

use crate::device::{DeviceProfile, IGNORE_START_LINE};
use crate::error::ConnectError;

/// Terminators accepted for every device family.
pub const DEFAULT_PROMPT_TERMINATORS: &[&str] = &["#", ">", "$"];

#[derive(Debug, Clone)]
pub struct PromptResolver {
    terminators: Vec<String>,
    patterns: Option<RegexSet>,
    more: Option<RegexSet>,
}

fn build_set(
    patterns: &[String],
    anchored: bool,
    what: &str,
    profile: &str,
) -> Result<Option<RegexSet>, ConnectError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    // Prompts may be preceded by stray NULs and one CR.
    let sources = patterns.iter().map(|p| {
        if anchored {
            format!(r"^\x00*\r{{0,1}}{}", p.trim_start_matches('^'))
        } else {
            p.clone()
        }
    });
    RegexSet::new(sources).map(Some).map_err(|err| {
        ConnectError::InvalidDeviceProfile(format!(
            "invalid {what} regex for '{profile}': {err}"
        ))
    })
}

impl PromptResolver {
    pub fn new(extra_terminators: &[String]) -> Self {
        let mut terminators: Vec<String> = DEFAULT_PROMPT_TERMINATORS
            .iter()
            .map(|t| t.to_string())
            .collect();
        for t in extra_terminators {
            if !t.is_empty() && !terminators.contains(t) {
                terminators.push(t.clone());
            }
        }
        Self {
            terminators,
            patterns: None,
            more: None,
        }
    }

    pub fn from_profile(profile: &DeviceProfile) -> Result<Self, ConnectError> {
        let mut resolver = Self::new(&profile.prompt_suffixes);
        resolver.patterns = build_set(&profile.prompt_patterns, true, "prompt", &profile.name)?;
        resolver.more = build_set(&profile.more_patterns, false, "more", &profile.name)?;
        Ok(resolver)
    }

    /// Heuristic: a non-empty line ending in a known terminator, or matching a
    /// configured prompt pattern.
    pub fn looks_like_prompt(&self, line: &str) -> bool {
        let cleaned = IGNORE_START_LINE.replace(line, "");
        let candidate = cleaned.trim_matches(|c: char| c == '\0').trim_end();
        if candidate.is_empty() {
            return false;
        }
        if let Some(set) = self.patterns.as_ref() {
            return set.is_match(candidate);
        }
        self.terminators.iter().any(|t| candidate.ends_with(t.as_str()))
    }

    /// True when the trailing line is a pagination marker.
    pub fn is_more(&self, line: &str) -> bool {
        self.more
            .as_ref()
            .map(|set| set.is_match(line.trim_end()))
            .unwrap_or(false)
    }

    /// Prompt text if the buffer currently ends on a prompt.
    pub fn trailing_prompt(&self, buffer: &str) -> Option<String> {
        let tail = trailing_line(buffer);
        if self.looks_like_prompt(tail) {
            Some(clean_prompt(tail))
        } else {
            None
        }
    }
}

/// The fragment after the last newline.
pub fn trailing_line(buffer: &str) -> &str {
    match buffer.rfind('\n') {
        Some(pos) => &buffer[pos + 1..],
        None => buffer,
    }
}

/// Trims control characters and whitespace around a prompt.
pub fn clean_prompt(line: &str) -> String {
    IGNORE_START_LINE
        .replace(line, "")
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Removes the device's echo of `sent` from the start of `output`.
///
/// Only the first line is considered, and it is removed only when it is the
/// echo (possibly preceded by the old prompt, e.g. `router#show ver`).
pub fn strip_echo<'a>(output: &'a str, sent: &str) -> &'a str {
    let sent = sent.trim();
    let (first, rest) = match output.find('\n') {
        Some(pos) => (&output[..pos], &output[pos + 1..]),
        None => (output, ""),
    };
    let first = IGNORE_START_LINE.replace(first, "");
    let first = first.trim();
    let is_echo = if sent.is_empty() {
        first.is_empty()
    } else {
        first == sent || first.ends_with(sent)
    };
    if is_echo { rest } else { output }
}

/// Everything before the trailing prompt line.
pub fn strip_trailing_prompt(output: &str) -> &str {
    match output.rfind('\n') {
        Some(pos) => &output[..pos],
        None => "",
    }
}

/// Normalizes CRLF and backspace noise into plain `\n`-separated lines.
pub fn normalize_output(output: &str) -> String {
    output
        .split('\n')
        .map(|line| {
            let line = IGNORE_START_LINE.replace(line, "");
            line.trim_end_matches('\r').to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
