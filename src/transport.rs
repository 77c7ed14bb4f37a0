//! Raw bidirectional text stream to one device.
//!
//! A [`Transport`] is a pair of channels: strings written toward the device
//! and chunks read back from it. Over SSH, one spawned task pumps the shell
//! channel into and out of those queues; tests build the same pair with
//! [`Transport::from_channels`] and drive it from a scripted device.

use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use async_trait::async_trait;
use log::{debug, trace, warn};
use russh::ChannelMsg;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::config::ConnectionConfig;
use crate::error::ConnectError;
use crate::session::ConnectionSecurityOptions;

/// Reports whether the connection underneath a transport has gone away.
pub trait LinkGuard: Send + Sync {
    fn is_closed(&self) -> bool;
}

impl LinkGuard for Client {
    fn is_closed(&self) -> bool {
        Client::is_closed(self)
    }
}

/// Channel pair plus the connection keeping it alive.
pub struct Transport {
    label: String,
    pub(crate) sender: Sender<String>,
    pub(crate) recv: Receiver<String>,
    link: Option<Box<dyn LinkGuard>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Transport {
    /// Wraps an existing channel pair. `sender` carries text to the device,
    /// `recv` yields whatever the device prints.
    pub fn from_channels(
        label: impl Into<String>,
        sender: Sender<String>,
        recv: Receiver<String>,
    ) -> Self {
        Self {
            label: label.into(),
            sender,
            recv,
            link: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
            || self
                .link
                .as_ref()
                .map(|link| link.is_closed())
                .unwrap_or(false)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        Sender<String>,
        Receiver<String>,
        Option<Box<dyn LinkGuard>>,
    ) {
        (self.label, self.sender, self.recv, self.link)
    }

    /// Opens an SSH session, requests a PTY and an interactive shell.
    pub async fn connect_ssh(
        config: &ConnectionConfig,
        security: &ConnectionSecurityOptions,
    ) -> Result<Self, ConnectError> {
        let device_addr = config.device_addr();
        if !security.verifies_host_key() {
            warn!("{} connecting without host key verification", device_addr);
        }

        let ssh_config = Config {
            preferred: security.preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (config.address.clone(), config.port),
            &config.credentials.username,
            AuthMethod::with_password(&config.credentials.password),
            security.server_check.clone(),
            ssh_config,
        )
        .await?;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            let mut partial = Vec::new();
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let chunk = decode_utf8(&mut partial, data);
                                if chunk.is_empty() {
                                    continue;
                                }
                                trace!("{} <- {:?}", io_task_device_addr, chunk);
                                if sender_to_user.send(chunk).await.is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        Ok(Self {
            label: device_addr,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            link: Some(Box::new(client)),
        })
    }
}

/// Length of an unfinished multi-byte sequence at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if back < needed { back } else { 0 };
    }
    0
}

/// Decodes `data` after the bytes held back from the previous packet. A
/// character split across packets is kept in `partial` until it completes;
/// invalid bytes become U+FFFD.
fn decode_utf8(partial: &mut Vec<u8>, data: &[u8]) -> String {
    partial.extend_from_slice(data);
    let complete = partial.len() - incomplete_tail(partial);
    let text = String::from_utf8_lossy(&partial[..complete]).into_owned();
    partial.drain(..complete);
    text
}

/// Source of fresh transports, invoked by reconnect logic.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Transport, ConnectError>;
}

/// Reconnects over SSH with a fixed connection record.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: ConnectionConfig,
    security: ConnectionSecurityOptions,
}

impl SshConnector {
    pub fn new(config: ConnectionConfig, security: ConnectionSecurityOptions) -> Self {
        Self { config, security }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Transport, ConnectError> {
        Transport::connect_ssh(&self.config, &self.security).await
    }
}
