#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netcli::device::{DeviceProfile, TimingConfig};
use netcli::error::ConnectError;
use netcli::transport::{Connector, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Timings that keep the suite fast.
pub fn quick_timing() -> TimingConfig {
    TimingConfig {
        quiet_period_ms: 50,
        resolve_timeout_ms: 400,
        step_timeout_ms: 250,
        write_timeout_ms: 200,
        login_timeout_ms: 2_000,
    }
}

pub fn quick(mut profile: DeviceProfile) -> DeviceProfile {
    profile.timing = quick_timing();
    profile
}

/// A scripted device on the far side of a channel-pair transport.
///
/// The log holds `> line` for every line received, `< line` once the
/// reply to it has been sent and `! data` for input that arrived while a
/// delayed reply was still pending.
pub struct ScriptedDevice {
    transport: Mutex<Option<Transport>>,
    log: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl ScriptedDevice {
    pub fn spawn<F>(banner: &str, respond: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        Self::spawn_with_delay(banner, Duration::ZERO, respond)
    }

    pub fn spawn_with_delay<F>(banner: &str, delay: Duration, mut respond: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let (to_device, mut from_session) = mpsc::channel::<String>(64);
        let (to_session, from_device) = mpsc::channel::<String>(64);
        let log = Arc::new(Mutex::new(Vec::new()));
        let task_log = log.clone();
        let banner = banner.to_string();

        let task = tokio::spawn(async move {
            if !banner.is_empty() && to_session.send(banner).await.is_err() {
                return;
            }
            let mut pending = String::new();
            while let Some(data) = from_session.recv().await {
                pending.push_str(&data);
                while let Some(pos) = pending.find('\n') {
                    let line: String = pending.drain(..=pos).collect();
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    task_log.lock().unwrap().push(format!("> {line}"));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                        // Anything arriving before the reply was sent overlapped it.
                        while let Ok(early) = from_session.try_recv() {
                            task_log.lock().unwrap().push(format!("! {early:?}"));
                            pending.push_str(&early);
                        }
                    }
                    for chunk in respond(&line) {
                        if to_session.send(chunk).await.is_err() {
                            return;
                        }
                    }
                    task_log.lock().unwrap().push(format!("< {line}"));
                }
            }
        });

        Self {
            transport: Mutex::new(Some(Transport::from_channels(
                "admin@stub:22",
                to_device,
                from_device,
            ))),
            log,
            task,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
            .lock()
            .unwrap()
            .take()
            .expect("transport already taken")
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Lines received, in order.
    pub fn received(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("> ").map(str::to_string))
            .collect()
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn reply(text: impl Into<String>) -> Vec<String> {
    vec![text.into()]
}

/// Connector building a new scripted device per call.
pub struct ScriptedConnector<F> {
    factory: F,
    calls: AtomicUsize,
    devices: Mutex<Vec<ScriptedDevice>>,
}

impl<F> ScriptedConnector<F>
where
    F: Fn(usize) -> ScriptedDevice + Send + Sync,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            calls: AtomicUsize::new(0),
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Lines received by the `index`-th device handed out.
    pub fn received(&self, index: usize) -> Vec<String> {
        self.devices.lock().unwrap()[index].received()
    }
}

#[async_trait]
impl<F> Connector for ScriptedConnector<F>
where
    F: Fn(usize) -> ScriptedDevice + Send + Sync,
{
    async fn connect(&self) -> Result<Transport, ConnectError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let device = (self.factory)(call);
        let transport = device.transport();
        self.devices.lock().unwrap().push(device);
        Ok(transport)
    }
}
