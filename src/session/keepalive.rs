use super::*;
use std::sync::Mutex as StdMutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// When and how an idle session is probed and rebuilt. All durations in ms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct KeepalivePolicy {
    /// Idle time before a probe is sent.
    pub idle_interval_ms: u64,
    /// How often the worker looks at the session.
    pub check_interval_ms: u64,
    /// Probe command; falls back to the profile's, then to a bare newline.
    pub probe_command: Option<String>,
    pub probe_timeout_ms: u64,
    /// Consecutive failed probes before the session is declared dead.
    pub max_failures: u32,
    /// First reconnect delay, doubled after every failed attempt.
    pub reconnect_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Reconnect attempts before giving up; 0 retries forever.
    pub max_reconnect_attempts: u32,
}

impl Default for KeepalivePolicy {
    fn default() -> Self {
        Self {
            idle_interval_ms: 60_000,
            check_interval_ms: 1_000,
            probe_command: None,
            probe_timeout_ms: 10_000,
            max_failures: 3,
            reconnect_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl KeepalivePolicy {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Delay after the `attempt`-th failed reconnect (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let delay = self.reconnect_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    fn gives_up_after(&self, attempt: u32) -> bool {
        self.max_reconnect_attempts != 0 && attempt >= self.max_reconnect_attempts
    }
}

/// Health reported by a running keepalive worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveStatus {
    Healthy,
    /// Some probes failed, not enough to reconnect yet.
    Degraded { consecutive_failures: u32 },
    /// The session is `Failed`; a new one is being built.
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. The session stays `Failed`.
    GaveUp,
    Stopped,
}

/// Probes an idle [`CommandExecutor`] and rebuilds its session through a
/// [`Connector`] after repeated failures.
///
/// Probes go through [`CommandExecutor::execute`], so they queue behind
/// real commands and never interleave with them.
pub struct KeepaliveWrapper {
    executor: CommandExecutor,
    connector: Arc<dyn Connector>,
    policy: KeepalivePolicy,
}

impl KeepaliveWrapper {
    pub fn new(
        executor: CommandExecutor,
        connector: Arc<dyn Connector>,
        policy: KeepalivePolicy,
    ) -> Self {
        Self {
            executor,
            connector,
            policy,
        }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn policy(&self) -> &KeepalivePolicy {
        &self.policy
    }

    fn probe_command(&self) -> Command {
        let text = self
            .policy
            .probe_command
            .as_deref()
            .or(self.executor.profile().probe_command.as_deref())
            .unwrap_or("");
        Command::read(text).with_timeout(self.policy.probe_timeout())
    }

    /// Sends one probe. Any answer from the device, even an error message,
    /// counts as alive.
    pub async fn probe(&self) -> Result<(), ConnectError> {
        let result = self.executor.execute(&self.probe_command()).await?;
        match result.classification {
            Classification::Success | Classification::DeviceError { .. } => Ok(()),
            Classification::Timeout => Err(ConnectError::ExecTimeout(result.output)),
            Classification::TransportError { reason } => Err(ConnectError::TransportError(reason)),
        }
    }

    async fn record_probe_failure(&self, consecutive_failures: u32, reason: &ConnectError) {
        if let Some(recorder) = self.executor.recorder().await {
            let _ = recorder.record_event(SessionEvent::ProbeFailed {
                consecutive_failures,
                reason: reason.to_string(),
            });
        }
    }

    /// Reconnects with exponential backoff until success, exhaustion or
    /// cancellation.
    async fn reconnect_with_backoff(
        &self,
        cancel: &CancellationToken,
        status: &watch::Sender<KeepaliveStatus>,
    ) -> Result<String, ConnectError> {
        let device = self.executor.device().to_string();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            status.send_replace(KeepaliveStatus::Reconnecting { attempt });
            info!("{} reconnect attempt {}", device, attempt);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectError::ReconnectCancelled(device)),
                outcome = self.executor.reconnect(self.connector.as_ref()) => outcome,
            };
            let err = match outcome {
                Ok(prompt) => return Ok(prompt),
                Err(err) => err,
            };
            warn!("{} reconnect attempt {} failed: {}", device, attempt, err);
            if self.policy.gives_up_after(attempt) {
                return Err(err);
            }

            let delay = self.policy.backoff(attempt);
            debug!("{} next reconnect in {} ms", device, delay.as_millis());
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectError::ReconnectCancelled(device)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run(self, cancel: CancellationToken, status: watch::Sender<KeepaliveStatus>) {
        let device = self.executor.device().to_string();
        let mut failures = 0u32;
        debug!("{} keepalive started", device);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.policy.check_interval()) => {}
            }
            // A command holds the session, so it is not idle.
            let Some(idle) = self.executor.idle_for() else {
                continue;
            };
            if idle < self.policy.idle_interval() {
                continue;
            }

            let err = match self.probe().await {
                Ok(()) => {
                    if failures > 0 {
                        info!("{} answered probe after {} failures", device, failures);
                    }
                    failures = 0;
                    status.send_replace(KeepaliveStatus::Healthy);
                    continue;
                }
                Err(err) => err,
            };

            failures += 1;
            warn!(
                "{} probe failed ({}/{}): {}",
                device, failures, self.policy.max_failures, err
            );
            self.record_probe_failure(failures, &err).await;
            if failures < self.policy.max_failures {
                status.send_replace(KeepaliveStatus::Degraded {
                    consecutive_failures: failures,
                });
                continue;
            }

            self.executor.mark_failed().await;
            match self.reconnect_with_backoff(&cancel, &status).await {
                Ok(prompt) => {
                    failures = 0;
                    debug!("{} keepalive resumed at '{}'", device, prompt);
                    status.send_replace(KeepaliveStatus::Healthy);
                }
                Err(ConnectError::ReconnectCancelled(_)) => {
                    debug!("{} reconnect cancelled", device);
                    break;
                }
                Err(err) => {
                    warn!("{} giving up on reconnect: {}", device, err);
                    status.send_replace(KeepaliveStatus::GaveUp);
                    return;
                }
            }
        }

        debug!("{} keepalive stopped", device);
        status.send_replace(KeepaliveStatus::Stopped);
    }

    /// Starts the background worker. Dropping the handle stops it.
    pub fn spawn(self) -> KeepaliveHandle {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(KeepaliveStatus::Healthy);
        let token = cancel.clone();
        let task = tokio::spawn(self.run(token, status_tx));
        KeepaliveHandle {
            cancel,
            status: status_rx,
            task: StdMutex::new(Some(task)),
        }
    }
}

/// Control handle of a running keepalive worker.
#[derive(Debug)]
pub struct KeepaliveHandle {
    cancel: CancellationToken,
    status: watch::Receiver<KeepaliveStatus>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl KeepaliveHandle {
    pub fn status(&self) -> KeepaliveStatus {
        self.status.borrow().clone()
    }

    /// A receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<KeepaliveStatus> {
        self.status.clone()
    }

    /// Stops the worker and cancels a pending reconnect. A probe already
    /// written to the device still runs to its timeout.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                debug!("keepalive worker ended abnormally: {}", err);
            }
        }
    }
}

impl Drop for KeepaliveHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
