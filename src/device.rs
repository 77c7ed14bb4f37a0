//! Device family profiles and error classification.
//!
//! Vendor differences are expressed as data: a [`DeviceProfile`] carries the
//! handshake steps, prompt shapes, pagination markers and error patterns of
//! one device family. The profile is compiled once per session into a
//! [`PromptResolver`](crate::prompt::PromptResolver) and an
//! [`ErrorPatternSet`].

use std::time::Duration;

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::ConnectError;

/// Leading carriage returns or backspace runs some devices emit before a line.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

/// Line terminator appended to every line written to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::Cr => "\r",
        }
    }
}

/// Parameters of the one-time login handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HandshakeConfig {
    /// Commands sent first, in order, with their output discarded
    /// (pagination disable, terminal width, ...).
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Privilege-escalation command such as `enable`.
    #[serde(default)]
    pub escalation_command: Option<String>,
    /// Suffix of the privileged prompt (`#` on IOS). When absent any prompt is accepted.
    #[serde(default)]
    pub privileged_suffix: Option<String>,
    /// Regex recognizing a password prompt on the trailing output line.
    #[serde(default = "default_password_prompt")]
    pub password_prompt: String,
    /// Blank lines sent at most to drain a repeated password prompt.
    #[serde(default = "default_max_password_retries")]
    pub max_password_retries: u32,
}

fn default_password_prompt() -> String {
    r"(?i)password:\s*$".to_string()
}

fn default_max_password_retries() -> u32 {
    3
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            setup_commands: Vec::new(),
            escalation_command: None,
            privileged_suffix: None,
            password_prompt: default_password_prompt(),
            max_password_retries: default_max_password_retries(),
        }
    }
}

/// Timing knobs, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TimingConfig {
    pub quiet_period_ms: u64,
    pub resolve_timeout_ms: u64,
    pub step_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub login_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: config::DEFAULT_QUIET_PERIOD_MS,
            resolve_timeout_ms: config::DEFAULT_RESOLVE_TIMEOUT_MS,
            step_timeout_ms: config::DEFAULT_STEP_TIMEOUT_MS,
            write_timeout_ms: config::DEFAULT_WRITE_TIMEOUT_MS,
            login_timeout_ms: config::DEFAULT_LOGIN_TIMEOUT_MS,
        }
    }
}

impl TimingConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }
}

/// Everything the engine needs to know about one device family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(default)]
    pub line_ending: LineEnding,
    /// Extra prompt terminators beyond `#`, `>` and `$` (e.g. `]` for VRP system view).
    #[serde(default)]
    pub prompt_suffixes: Vec<String>,
    /// Full prompt regexes; when set, a trailing line matching one of them is a prompt.
    #[serde(default)]
    pub prompt_patterns: Vec<String>,
    /// Pagination markers answered with a space.
    #[serde(default)]
    pub more_patterns: Vec<String>,
    /// Ordered error patterns, first match wins.
    #[serde(default)]
    pub error_patterns: Vec<String>,
    /// Lines matching these are never classified as errors.
    #[serde(default)]
    pub ignore_errors: Vec<String>,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Command used by the keepalive wrapper when its policy names none.
    #[serde(default)]
    pub probe_command: Option<String>,
}

impl DeviceProfile {
    /// A bare profile relying on the generic prompt heuristic only.
    pub fn generic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            line_ending: LineEnding::default(),
            prompt_suffixes: Vec::new(),
            prompt_patterns: Vec::new(),
            more_patterns: Vec::new(),
            error_patterns: Vec::new(),
            ignore_errors: Vec::new(),
            handshake: HandshakeConfig::default(),
            timing: TimingConfig::default(),
            probe_command: None,
        }
    }

    /// Parses a profile supplied as JSON by the calling layer.
    pub fn from_json(json: &str) -> Result<Self, ConnectError> {
        serde_json::from_str(json)
            .map_err(|e| ConnectError::InvalidDeviceProfile(format!("profile json: {e}")))
    }

    /// Compiles the error and ignore patterns.
    pub fn error_set(&self) -> Result<ErrorPatternSet, ConnectError> {
        ErrorPatternSet::new(&self.error_patterns, &self.ignore_errors)
    }

    /// Compiles the password prompt regex of the handshake.
    pub fn password_prompt(&self) -> Result<Regex, ConnectError> {
        Regex::new(&self.handshake.password_prompt).map_err(|err| {
            ConnectError::InvalidDeviceProfile(format!(
                "invalid password_prompt regex for '{}': {}",
                self.name, err
            ))
        })
    }
}

/// A device-reported error found in command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMatch {
    /// Source text of the pattern that matched.
    pub pattern: String,
    /// The output line that contained the match.
    pub matched: String,
}

/// Ordered, immutable set of device error regexes.
#[derive(Debug, Clone)]
pub struct ErrorPatternSet {
    sources: Vec<String>,
    set: RegexSet,
    regexes: Vec<Regex>,
    ignore: Option<RegexSet>,
}

impl ErrorPatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S], ignore: &[S]) -> Result<Self, ConnectError> {
        // Per-line anchors so `^% Invalid` matches inside multi-line output.
        let sources: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        let multiline: Vec<String> = sources.iter().map(|p| format!("(?m){p}")).collect();

        let set = RegexSet::new(&multiline).map_err(|err| {
            ConnectError::InvalidDeviceProfile(format!("failed to build error regex set: {err}"))
        })?;
        let regexes = multiline
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                ConnectError::InvalidDeviceProfile(format!("invalid error regex: {err}"))
            })?;

        let ignore = if ignore.is_empty() {
            None
        } else {
            Some(
                RegexSet::new(ignore.iter().map(|p| p.as_ref())).map_err(|err| {
                    ConnectError::InvalidDeviceProfile(format!(
                        "invalid ignore_errors regex set: {err}"
                    ))
                })?,
            )
        };

        Ok(Self {
            sources,
            set,
            regexes,
            ignore,
        })
    }

    /// A set that never matches.
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            set: RegexSet::empty(),
            regexes: Vec::new(),
            ignore: None,
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn ignored(&self, line: &str) -> bool {
        self.ignore
            .as_ref()
            .map(|set| set.is_match(line))
            .unwrap_or(false)
    }

    /// Returns the first pattern (in declaration order) matching the output.
    pub fn classify(&self, output: &str) -> Option<ErrorMatch> {
        if self.is_empty() {
            return None;
        }
        let considered = output
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| {
                let ignored = self.ignored(line);
                if ignored {
                    trace!("Ignoring error-like line: '{:?}'", line);
                }
                !ignored
            })
            .collect::<Vec<_>>()
            .join("\n");

        let index = self.set.matches(&considered).into_iter().next()?;
        let regex = self.regexes.get(index)?;
        let found = regex.find(&considered)?;

        let line_start = considered[..found.start()]
            .rfind('\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let line_end = considered[found.end()..]
            .find('\n')
            .map(|pos| found.end() + pos)
            .unwrap_or(considered.len());

        Some(ErrorMatch {
            pattern: self.sources.get(index)?.clone(),
            matched: considered[line_start..line_end].trim().to_string(),
        })
    }
}
