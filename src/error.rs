//! Error types for CLI sessions, device handshakes and command execution.
//!
//! Every failure the engine can report is a [`ConnectError`]. Callers that
//! only care about the broad category use [`ConnectError::kind`].

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

use crate::session::SessionState;

/// Broad failure category of a [`ConnectError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The connection is gone or refuses I/O.
    Transport,
    /// The device did not finish responding in time.
    Timeout,
    /// The device reported a problem matched by an error pattern.
    Device,
    /// The login/privilege handshake could not reach a usable state.
    Initialization,
    /// The session is not in a state that accepts commands.
    Unavailable,
    /// Invalid profile, template or internal bookkeeping failure.
    Config,
}

/// Errors that can occur while driving an interactive device CLI.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The shell channel was closed while reading device output.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The connection has been closed and refuses writes.
    #[error("connect closed")]
    ConnectClosedError,

    /// The transport failed while a command was in flight.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The transport did not accept a write within the write timeout.
    #[error("write timeout after {0} ms")]
    WriteTimeout(u64),

    /// Command execution timed out.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// Prompt resolution timed out; carries whatever the device emitted.
    #[error("prompt resolution timeout: {0}")]
    ResolveTimeout(String),

    /// The login handshake did not finish within the login timeout.
    #[error("init timeout: {0}")]
    InitTimeout(String),

    /// The device affirmatively reported an error.
    #[error("device error matched '{pattern}': {matched}")]
    DeviceError {
        /// Source of the error pattern that matched.
        pattern: String,
        /// Output line containing the match.
        matched: String,
        /// Full captured output of the command.
        output: String,
    },

    /// The handshake finished on a prompt that is not privileged.
    #[error("initialization failed on {device}: unexpected prompt '{prompt}'")]
    InitializationFailed { device: String, prompt: String },

    /// The session cannot accept commands in its current state.
    #[error("session {device} unavailable: {state}")]
    SessionUnavailable { device: String, state: SessionState },

    /// A pending reconnect was cancelled by its owner.
    #[error("reconnect cancelled for {0}")]
    ReconnectCancelled(String),

    /// A device profile could not be compiled.
    #[error("invalid device profile: {0}")]
    InvalidDeviceProfile(String),

    /// No built-in template exists with this name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("internal error: {0}")]
    InternalServerError(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data through the channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

impl ConnectError {
    /// Maps the error onto its broad category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectError::ChannelDisconnectError
            | ConnectError::ConnectClosedError
            | ConnectError::WriteTimeout(_)
            | ConnectError::TransportError(_)
            | ConnectError::Ssh2Error(_)
            | ConnectError::RusshError(_)
            | ConnectError::SendDataError(_) => ErrorKind::Transport,
            ConnectError::ExecTimeout(_) | ConnectError::ResolveTimeout(_) => ErrorKind::Timeout,
            ConnectError::DeviceError { .. } => ErrorKind::Device,
            ConnectError::InitializationFailed { .. } | ConnectError::InitTimeout(_) => {
                ErrorKind::Initialization
            }
            ConnectError::SessionUnavailable { .. } | ConnectError::ReconnectCancelled(_) => {
                ErrorKind::Unavailable
            }
            ConnectError::InvalidDeviceProfile(_)
            | ConnectError::TemplateNotFound(_)
            | ConnectError::InternalServerError(_) => ErrorKind::Config,
        }
    }

    /// Partial output carried by timeout errors.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ConnectError::ExecTimeout(out)
            | ConnectError::ResolveTimeout(out)
            | ConnectError::InitTimeout(out) => Some(out),
            ConnectError::DeviceError { output, .. } => Some(output),
            _ => None,
        }
    }
}
