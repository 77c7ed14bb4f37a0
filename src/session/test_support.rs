//! Scripted device used by unit tests.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::{DeviceProfile, TimingConfig};
use crate::transport::Transport;

/// Timings small enough for tests, large enough for a loaded CI box.
pub(crate) fn fast_profile() -> DeviceProfile {
    let mut profile = DeviceProfile::generic("stub");
    profile.timing = TimingConfig {
        quiet_period_ms: 50,
        resolve_timeout_ms: 300,
        step_timeout_ms: 300,
        write_timeout_ms: 200,
        login_timeout_ms: 500,
    };
    profile
}

/// A device answering each received line through a closure. Every string
/// the closure returns is delivered as a separate chunk.
pub(crate) struct StubDevice {
    transport: StdMutex<Option<Transport>>,
    received: Arc<StdMutex<Vec<String>>>,
    // Extra handle on the device output, released by `hang_up`.
    output: StdMutex<Option<mpsc::Sender<String>>>,
    task: JoinHandle<()>,
}

impl StubDevice {
    pub(crate) fn spawn<F>(banner: &str, mut respond: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let (to_device, mut from_session) = mpsc::channel::<String>(64);
        let (to_session, from_device) = mpsc::channel::<String>(64);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let log = received.clone();
        let output = to_session.clone();
        let banner = banner.to_string();

        let task = tokio::spawn(async move {
            if !banner.is_empty() && to_session.send(banner).await.is_err() {
                return;
            }
            let mut pending = String::new();
            while let Some(data) = from_session.recv().await {
                pending.push_str(&data);
                // A lone space answers pagination and carries no newline.
                if pending == " " {
                    pending.clear();
                    log.lock().expect("log lock").push(" ".to_string());
                    for chunk in respond(" ") {
                        if to_session.send(chunk).await.is_err() {
                            return;
                        }
                    }
                    continue;
                }
                while let Some(pos) = pending.find('\n') {
                    let line: String = pending.drain(..=pos).collect();
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    log.lock().expect("log lock").push(line.clone());
                    for chunk in respond(&line) {
                        if to_session.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Self {
            transport: StdMutex::new(Some(Transport::from_channels(
                "admin@stub:22",
                to_device,
                from_device,
            ))),
            received,
            output: StdMutex::new(Some(output)),
            task,
        }
    }

    /// The session side of the channel pair. Can be taken once.
    pub(crate) fn transport(&self) -> Transport {
        self.transport
            .lock()
            .expect("transport lock")
            .take()
            .expect("transport already taken")
    }

    /// Lines the device has received so far.
    pub(crate) fn received(&self) -> Vec<String> {
        self.received.lock().expect("log lock").clone()
    }

    /// Drops the connection from the device side.
    pub(crate) fn hang_up(&self) {
        self.output.lock().expect("output lock").take();
        self.task.abort();
    }
}

impl Drop for StubDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One reply chunk.
pub(crate) fn reply(text: impl Into<String>) -> Vec<String> {
    vec![text.into()]
}
