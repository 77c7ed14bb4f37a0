use super::*;

/// Serialized command execution on one [`Session`].
///
/// Cloning is cheap; all clones share the same session, so at most one
/// command is in flight per device no matter how many callers hold one.
/// Waiters are served in submission order.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    device_id: String,
    device_addr: String,
    session: Arc<Mutex<Session>>,
    errors: Arc<ErrorPatternSet>,
    init: Arc<InitStrategy>,
    profile: Arc<DeviceProfile>,
    credentials: Arc<Credentials>,
}

/// Runs the handshake bounded by the profile's login timeout. A session that
/// did not get past `Initializing` is marked `Failed`.
async fn initialize(
    init: &InitStrategy,
    session: &mut Session,
    credentials: &Credentials,
    login_timeout: Duration,
) -> Result<String, ConnectError> {
    let outcome = tokio::time::timeout(login_timeout, init.run(session, credentials)).await;
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(ConnectError::InitTimeout(format!(
            "{} did not finish login within {} ms",
            session.device_addr(),
            login_timeout.as_millis()
        ))),
    };
    if result.is_err() && session.state() == SessionState::Initializing {
        session.set_state(SessionState::Failed);
    }
    result
}

impl CommandExecutor {
    /// Wraps a connected transport, runs the handshake and returns an
    /// executor whose session is `Ready`.
    pub async fn establish(
        device_id: impl Into<String>,
        transport: Transport,
        profile: DeviceProfile,
        credentials: Credentials,
    ) -> Result<Self, ConnectError> {
        Self::establish_recorded(device_id, transport, profile, credentials, None).await
    }

    /// Same as [`establish`](Self::establish) with a recorder attached from
    /// the first byte on.
    pub async fn establish_recorded(
        device_id: impl Into<String>,
        transport: Transport,
        profile: DeviceProfile,
        credentials: Credentials,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, ConnectError> {
        let errors = profile.error_set()?;
        let init = InitStrategy::from_profile(&profile)?;
        let mut session = Session::new(device_id, transport, &profile)?;
        session.set_recorder(recorder);

        let prompt = initialize(
            &init,
            &mut session,
            &credentials,
            profile.timing.login_timeout(),
        )
        .await?;
        info!(
            "{} ready at '{}' using profile '{}'",
            session.device_addr(),
            prompt,
            profile.name
        );

        Ok(Self {
            device_id: session.device_id().to_string(),
            device_addr: session.device_addr().to_string(),
            session: Arc::new(Mutex::new(session)),
            errors: Arc::new(errors),
            init: Arc::new(init),
            profile: Arc::new(profile),
            credentials: Arc::new(credentials),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `user@address:port` of the device.
    pub fn device(&self) -> &str {
        &self.device_addr
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Current state. A session locked by an in-flight command reports `Busy`.
    pub fn state(&self) -> SessionState {
        match self.session.try_lock() {
            Ok(session) => session.state(),
            Err(_) => SessionState::Busy,
        }
    }

    /// Time since the last byte was exchanged, `None` while a command runs.
    pub fn idle_for(&self) -> Option<Duration> {
        self.session.try_lock().ok().map(|s| s.idle_for())
    }

    pub fn is_connected(&self) -> bool {
        match self.session.try_lock() {
            Ok(session) => session.is_connected(),
            Err(_) => true,
        }
    }

    /// Last prompt seen on the device.
    pub async fn prompt(&self) -> String {
        self.session.lock().await.prompt().to_string()
    }

    pub async fn recorder(&self) -> Option<SessionRecorder> {
        self.session.lock().await.recorder().cloned()
    }

    /// Runs one command and classifies the outcome.
    ///
    /// The command timeout also covers the wait for earlier commands on the
    /// same session; a command that never got the session is reported as a
    /// `Timeout` with empty output and was never written. Lines of a
    /// multi-line command are not written once the budget is spent. A
    /// session that is not `Ready` fails fast with
    /// [`ConnectError::SessionUnavailable`].
    pub async fn execute(&self, command: &Command) -> Result<CommandResult, ConnectError> {
        let started = Instant::now();
        let timeout = command.timeout();

        let mut session = match tokio::time::timeout(timeout, self.session.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    "{} '{}' timed out waiting for the session",
                    self.device_addr,
                    command.text()
                );
                return Ok(CommandResult {
                    output: String::new(),
                    classification: Classification::Timeout,
                    elapsed: started.elapsed(),
                    prompt: None,
                });
            }
        };

        let state = session.state();
        if state != SessionState::Ready {
            debug!(
                "{} rejecting '{}' in state {}",
                self.device_addr,
                command.text(),
                state
            );
            return Err(ConnectError::SessionUnavailable {
                device: self.device_addr.clone(),
                state,
            });
        }

        session.set_state(SessionState::Busy);
        match command.intent {
            CommandIntent::Write => info!("{} write: {}", self.device_addr, command.text()),
            CommandIntent::Read => debug!("{} read: {}", self.device_addr, command.text()),
        }

        let mut output = String::new();
        for line in &command.lines {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                // Every earlier line ended at a prompt, so framing is intact.
                warn!(
                    "{} '{}' not sent, {} ms budget spent",
                    self.device_addr,
                    line,
                    timeout.as_millis()
                );
                session.set_state(SessionState::Ready);
                return Ok(self.finish(
                    &session,
                    command,
                    output,
                    Classification::Timeout,
                    started,
                ));
            }
            session.discard_pending();

            if let Err(err) = session.write(line).await {
                let classification = Classification::TransportError {
                    reason: err.to_string(),
                };
                return Ok(self.finish(&session, command, output, classification, started));
            }

            match session.read_until_prompt(line, remaining).await {
                Ok(raw) => {
                    let body = prompt::strip_trailing_prompt(prompt::strip_echo(&raw, line));
                    append_body(&mut output, &prompt::normalize_output(body));
                }
                Err(ConnectError::ExecTimeout(partial)) => {
                    append_body(
                        &mut output,
                        &prompt::normalize_output(prompt::strip_echo(&partial, line)),
                    );
                    warn!(
                        "{} '{}' timed out after {} ms, session left busy",
                        self.device_addr,
                        line,
                        timeout.as_millis()
                    );
                    return Ok(self.finish(
                        &session,
                        command,
                        output,
                        Classification::Timeout,
                        started,
                    ));
                }
                Err(err) => {
                    warn!("{} lost while running '{}': {}", self.device_addr, line, err);
                    let classification = Classification::TransportError {
                        reason: err.to_string(),
                    };
                    return Ok(self.finish(&session, command, output, classification, started));
                }
            }
        }

        let classification = match self.errors.classify(&output) {
            Some(found) => {
                debug!(
                    "{} '{}' matched error pattern '{}'",
                    self.device_addr,
                    command.text(),
                    found.pattern
                );
                Classification::DeviceError {
                    pattern: found.pattern,
                    matched: found.matched,
                }
            }
            None => Classification::Success,
        };
        session.set_state(SessionState::Ready);
        Ok(self.finish(&session, command, output, classification, started))
    }

    fn finish(
        &self,
        session: &Session,
        command: &Command,
        output: String,
        classification: Classification,
        started: Instant,
    ) -> CommandResult {
        let elapsed = started.elapsed();
        let prompt = match classification {
            Classification::Success | Classification::DeviceError { .. } => {
                Some(session.prompt().to_string())
            }
            _ => None,
        };
        if let Some(recorder) = session.recorder() {
            let matched = match &classification {
                Classification::DeviceError { matched, .. } => Some(matched.clone()),
                Classification::TransportError { reason } => Some(reason.clone()),
                _ => None,
            };
            let _ = recorder.record_event(SessionEvent::CommandCompleted {
                command: command.text(),
                intent: command.intent,
                outcome: classification.label().to_string(),
                matched,
                content: output.clone(),
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        CommandResult {
            output,
            classification,
            elapsed,
            prompt,
        }
    }

    /// Runs `text` as a read command with the default timeout and returns its
    /// output, or the classified failure as an error.
    pub async fn blocking_execute(&self, text: &str) -> Result<String, ConnectError> {
        self.execute(&Command::read(text)).await?.into_output()
    }

    /// Brings a session left `Busy` by a timed-out command back to `Ready`
    /// by resolving the prompt again. Returns the prompt.
    ///
    /// If the device does not show a recognizable prompt within the resolve
    /// timeout the session stays `Busy` and the read output is returned in
    /// [`ConnectError::ResolveTimeout`].
    pub async fn recover(&self) -> Result<String, ConnectError> {
        let mut session = self.session.lock().await;
        match session.state() {
            SessionState::Ready => Ok(session.prompt().to_string()),
            SessionState::Busy => {
                let prompt = session.resolve_prompt().await?;
                info!("{} recovered at '{}'", self.device_addr, prompt);
                session.set_state(SessionState::Ready);
                Ok(prompt)
            }
            state => Err(ConnectError::SessionUnavailable {
                device: self.device_addr.clone(),
                state,
            }),
        }
    }

    /// Declares the session unusable; commands fail fast until a reconnect.
    pub async fn mark_failed(&self) {
        self.session.lock().await.set_state(SessionState::Failed);
    }

    /// Opens a new transport, runs the handshake on it and only then swaps
    /// it in. The old session keeps serving (or failing) callers meanwhile;
    /// on error it stays in place untouched.
    pub async fn reconnect(&self, connector: &dyn Connector) -> Result<String, ConnectError> {
        let login_timeout = self.profile.timing.login_timeout();
        let transport = match tokio::time::timeout(login_timeout, connector.connect()).await {
            Ok(connected) => connected?,
            Err(_) => {
                return Err(ConnectError::TransportError(format!(
                    "connect to {} timed out after {} ms",
                    self.device_addr,
                    login_timeout.as_millis()
                )));
            }
        };
        let recorder = self.recorder().await;

        let mut fresh = Session::new(self.device_id.clone(), transport, &self.profile)?;
        fresh.set_recorder(recorder.clone());
        let prompt = initialize(&self.init, &mut fresh, &self.credentials, login_timeout).await?;

        let mut previous = {
            let mut session = self.session.lock().await;
            std::mem::replace(&mut *session, fresh)
        };
        if let Err(err) = previous.close().await {
            debug!("{} closing replaced session: {}", self.device_addr, err);
        }

        if let Some(recorder) = recorder {
            let _ = recorder.record_event(SessionEvent::Reconnected {
                device_addr: self.device_addr.clone(),
                prompt: prompt.clone(),
            });
        }
        info!("{} reconnected at '{}'", self.device_addr, prompt);
        Ok(prompt)
    }

    /// Closes the session. Later commands fail with `SessionUnavailable`.
    pub async fn close(&self) -> Result<(), ConnectError> {
        self.session.lock().await.close().await
    }
}

fn append_body(output: &mut String, body: &str) {
    if body.is_empty() {
        return;
    }
    if !output.is_empty() {
        output.push('\n');
    }
    output.push_str(body);
}
