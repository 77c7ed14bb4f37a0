//! Interactive CLI sessions and command execution.
//!
//! This module turns a raw [`Transport`] into discrete command/response
//! transactions. It owns prompt-based framing, the login/privilege
//! handshake, error classification, keepalive probing and reconnection.
//!
//! # Main Components
//!
//! - [`Session`] - line-buffered, timeout-bounded I/O on one transport
//! - [`InitStrategy`] - one-time pagination/privilege handshake
//! - [`CommandExecutor`] - serialized command execution and classification
//! - [`KeepaliveWrapper`] - idle probing and transparent reconnect
//! - [`SessionManager`] - cache of managed device sessions

use async_ssh2_tokio::ServerCheckMethod;
use log::{debug, info, trace, warn};
use moka::future::Cache;
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::config::{self, ConnectionConfig, Credentials};
use crate::device::{DeviceProfile, ErrorPatternSet, LineEnding, TimingConfig};
use crate::error::ConnectError;
use crate::prompt::{self, PromptResolver};
use crate::transport::{Connector, LinkGuard, SshConnector, Transport};

pub use client::Session;
pub use executor::CommandExecutor;
pub use init::InitStrategy;
pub use keepalive::{KeepaliveHandle, KeepalivePolicy, KeepaliveStatus, KeepaliveWrapper};
pub use manager::SessionManager;
pub use recording::{SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder};
pub use security::{ConnectionSecurityOptions, SecurityLevel};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, handshake not finished yet.
    Initializing,
    /// Waiting at a prompt for the next command.
    Ready,
    /// A command is in flight, or one timed out and left the framing unknown.
    Busy,
    /// The transport is gone.
    Disconnected,
    /// Initialization or keepalive declared the session unusable.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Whether a command mutates the device. Affects logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandIntent {
    #[default]
    Read,
    Write,
}

/// One command to run on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Command {
    /// Literal lines sent in order; the prompt is awaited after each one.
    pub lines: Vec<String>,
    /// Timeout for the whole command in milliseconds.
    /// If None, defaults to 60 seconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub intent: CommandIntent,
}

impl Command {
    fn from_text(text: &str, intent: CommandIntent) -> Self {
        let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Self {
            lines,
            timeout_ms: None,
            intent,
        }
    }

    /// A query. Multi-line text becomes several lines.
    pub fn read(text: &str) -> Self {
        Self::from_text(text, CommandIntent::Read)
    }

    /// A mutating command.
    pub fn write(text: &str) -> Self {
        Self::from_text(text, CommandIntent::Write)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(config::DEFAULT_COMMAND_TIMEOUT_MS))
    }

    /// All lines joined by newlines, as shown in logs.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// The device reported an error matched by the error pattern set.
    DeviceError { pattern: String, matched: String },
    /// No prompt within the timeout; the output is partial.
    Timeout,
    TransportError { reason: String },
}

impl Classification {
    /// Short snake_case label used in recordings.
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::DeviceError { .. } => "device_error",
            Classification::Timeout => "timeout",
            Classification::TransportError { .. } => "transport_error",
        }
    }
}

/// Result of one executed [`Command`].
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Captured output without the command echo and the trailing prompt.
    pub output: String,
    pub classification: Classification,
    pub elapsed: Duration,
    /// Prompt seen after the command, when one was reached.
    pub prompt: Option<String>,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.classification == Classification::Success
    }

    /// Plain output on success, a typed error otherwise.
    pub fn into_output(self) -> Result<String, ConnectError> {
        match self.classification {
            Classification::Success => Ok(self.output),
            Classification::DeviceError { pattern, matched } => Err(ConnectError::DeviceError {
                pattern,
                matched,
                output: self.output,
            }),
            Classification::Timeout => Err(ConnectError::ExecTimeout(self.output)),
            Classification::TransportError { reason } => {
                Err(ConnectError::TransportError(reason))
            }
        }
    }
}

mod client;
mod executor;
mod init;
mod keepalive;
mod manager;
mod recording;
mod security;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod tests {
    use super::{Classification, Command, CommandIntent, CommandResult, SessionState};
    use crate::error::{ConnectError, ErrorKind};
    use std::time::Duration;

    #[test]
    fn command_default_timeout_is_sixty_seconds() {
        let cmd = Command::read("show version");
        assert_eq!(cmd.timeout(), Duration::from_secs(60));
        assert_eq!(cmd.intent, CommandIntent::Read);
        assert_eq!(cmd.lines, vec!["show version".to_string()]);
    }

    #[test]
    fn multi_line_text_splits_into_lines() {
        let cmd = Command::write("configure terminal\ninterface Gi0/1\nshutdown")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(cmd.lines.len(), 3);
        assert_eq!(cmd.timeout_ms, Some(5_000));
        assert_eq!(cmd.intent, CommandIntent::Write);
    }

    #[test]
    fn huge_timeout_saturates() {
        let cmd = Command::read("show version").with_timeout(Duration::MAX);
        assert_eq!(cmd.timeout_ms, Some(u64::MAX));
        assert_eq!(cmd.timeout(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn empty_text_is_a_bare_newline() {
        assert_eq!(Command::read("").lines, vec![String::new()]);
    }

    #[test]
    fn device_error_result_unwraps_into_typed_error() {
        let result = CommandResult {
            output: "% Invalid input detected".into(),
            classification: Classification::DeviceError {
                pattern: "^% Invalid".into(),
                matched: "% Invalid input detected".into(),
            },
            elapsed: Duration::from_millis(5),
            prompt: Some("r1#".into()),
        };
        let err = result.into_output().expect_err("device error expected");
        assert_eq!(err.kind(), ErrorKind::Device);
        assert!(matches!(err, ConnectError::DeviceError { ref matched, .. } if matched.contains("% Invalid input detected")));
    }

    #[test]
    fn timeout_result_keeps_partial_output() {
        let result = CommandResult {
            output: "partial".into(),
            classification: Classification::Timeout,
            elapsed: Duration::from_secs(1),
            prompt: None,
        };
        let err = result.into_output().expect_err("timeout expected");
        assert_eq!(err.partial_output(), Some("partial"));
    }

    #[test]
    fn session_state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::Disconnected).expect("encode");
        assert_eq!(json, "\"disconnected\"");
    }
}
