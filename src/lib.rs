//! # netcli - Interactive CLI Session Engine for Network Devices
//!
//! `netcli` owns a live shell connection to a router, switch or CMTS and turns
//! its character stream into discrete command/response transactions. It
//! detects when the device waits for input, runs the vendor login and
//! privilege handshake, classifies device-reported errors and keeps idle
//! sessions alive, rebuilding them when the network path drops.
//!
//! ## Features
//!
//! - **Prompt Framing**: Output is complete when the trailing line looks like a prompt
//! - **Privilege Handshake**: Paging off, `enable`, bounded password re-prompt drain
//! - **Error Classification**: Ordered per-family error patterns with ignore lists
//! - **Serialized Execution**: One command in flight per device, FIFO for waiters
//! - **Keepalive/Reconnect**: Idle probes, backoff reconnect, atomic session swap
//! - **Connection Caching**: Sessions reused per `user@addr:port` while parameters match
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netcli::config::{ConnectionConfig, Credentials};
//! use netcli::session::SessionManager;
//! use netcli::templates;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::new();
//!     let config = ConnectionConfig::new(
//!         "core-1",
//!         "192.168.1.1",
//!         22,
//!         Credentials::new("admin", "password").with_enable_secret("secret"),
//!     );
//!     let profile = templates::by_name("cisco")?;
//!
//!     let output = manager
//!         .blocking_execute(&config, &profile, "show version")
//!         .await?;
//!     println!("{output}");
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::CommandExecutor`] - Serialized, classified command execution
//! - [`session::InitStrategy`] - Login and privilege-escalation handshake
//! - [`session::KeepaliveWrapper`] - Idle probing and reconnection
//! - [`session::SessionManager`] - Cache of established device sessions
//! - [`prompt::PromptResolver`] - Prompt recognition and output cleanup
//! - [`device::ErrorPatternSet`] - Ordered device error patterns
//! - [`transport::Transport`] - Channel pair over an SSH shell or a test stub
//! - [`templates`] - Built-in device family profiles

pub mod config;
pub mod device;
pub mod error;
pub mod prompt;
pub mod session;
pub mod templates;
pub mod transport;
