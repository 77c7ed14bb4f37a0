use super::*;

/// One live CLI session on top of a [`Transport`].
pub struct Session {
    device_id: String,
    device_addr: String,
    state: SessionState,
    line_ending: LineEnding,
    prompt: String,
    last_activity: Instant,
    sender: Sender<String>,
    recv: Receiver<String>,
    resolver: PromptResolver,
    timing: TimingConfig,
    recorder: Option<SessionRecorder>,
    _link: Option<Box<dyn LinkGuard>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("device_addr", &self.device_addr)
            .field("state", &self.state)
            .field("prompt", &self.prompt)
            .finish()
    }
}

const MASKED: &str = "******";

/// Longest wait honored; larger timeouts mean "no practical limit".
const MAX_WAIT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_WAIT)).unwrap_or(now)
}

impl Session {
    /// Wraps a freshly connected transport. The session starts in
    /// [`SessionState::Initializing`]; run an [`InitStrategy`] to make it ready.
    pub fn new(
        device_id: impl Into<String>,
        transport: Transport,
        profile: &DeviceProfile,
    ) -> Result<Self, ConnectError> {
        let resolver = PromptResolver::from_profile(profile)?;
        let (device_addr, sender, recv, link) = transport.into_parts();
        Ok(Self {
            device_id: device_id.into(),
            device_addr,
            state: SessionState::Initializing,
            line_ending: profile.line_ending,
            prompt: String::new(),
            last_activity: Instant::now(),
            sender,
            recv,
            resolver,
            timing: profile.timing,
            recorder: None,
            _link: link,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last prompt seen, cached.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub fn set_recorder(&mut self, recorder: Option<SessionRecorder>) {
        if let Some(r) = recorder.as_ref() {
            let _ = r.record_event(SessionEvent::SessionOpened {
                device_addr: self.device_addr.clone(),
            });
        }
        self.recorder = recorder;
    }

    /// True while the transport is up and the session was not torn down.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
            && !matches!(
                self.state,
                SessionState::Disconnected | SessionState::Failed
            )
    }

    pub(crate) fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug!("{} state {} -> {}", self.device_addr, self.state, next);
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::StateChanged {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
    }

    fn remember_prompt(&mut self, prompt: String) {
        if self.prompt != prompt {
            trace!("{} prompt is now {:?}", self.device_addr, prompt);
            if let Some(recorder) = self.recorder.as_ref() {
                let _ = recorder.record_event(SessionEvent::PromptChanged {
                    prompt: prompt.clone(),
                });
            }
            self.prompt = prompt;
        }
    }

    fn transport_lost(&mut self) -> ConnectError {
        self.set_state(SessionState::Disconnected);
        ConnectError::ChannelDisconnectError
    }

    async fn transmit(&mut self, data: String, shown: &str) -> Result<(), ConnectError> {
        if self.sender.is_closed() {
            self.set_state(SessionState::Disconnected);
            return Err(ConnectError::ConnectClosedError);
        }
        trace!("{} >> {:?}", self.device_addr, shown);
        let write_timeout = self.timing.write_timeout();
        match tokio::time::timeout(write_timeout, self.sender.send(data)).await {
            Ok(Ok(())) => {
                self.last_activity = Instant::now();
                Ok(())
            }
            Ok(Err(err)) => {
                self.set_state(SessionState::Disconnected);
                Err(ConnectError::SendDataError(err))
            }
            Err(_) => {
                self.set_state(SessionState::Disconnected);
                Err(ConnectError::WriteTimeout(
                    u64::try_from(write_timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    /// Sends one line terminated by the negotiated line ending.
    pub async fn write(&mut self, text: &str) -> Result<(), ConnectError> {
        let data = format!("{}{}", text, self.line_ending.as_str());
        self.transmit(data, text).await
    }

    /// Like [`write`](Self::write), but the text never reaches logs or recordings.
    pub async fn write_secret(&mut self, secret: &str) -> Result<(), ConnectError> {
        let data = format!("{}{}", secret, self.line_ending.as_str());
        self.transmit(data, MASKED).await
    }

    /// Drops output that arrived while nobody was reading.
    pub fn discard_pending(&mut self) {
        while let Ok(stale) = self.recv.try_recv() {
            trace!("{} discarding stale output {:?}", self.device_addr, stale);
        }
    }

    /// Waits up to `wait` for the next chunk. `Ok(None)` means nothing arrived.
    async fn next_chunk(&mut self, wait: Duration) -> Result<Option<String>, ConnectError> {
        if wait.is_zero() {
            return Ok(None);
        }
        match tokio::time::timeout(wait, self.recv.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(self.transport_lost()),
            Ok(Some(chunk)) => {
                trace!("{} << {:?}", self.device_addr, chunk);
                self.last_activity = Instant::now();
                if let Some(recorder) = self.recorder.as_ref() {
                    let _ = recorder.record_raw_chunk(chunk.clone());
                }
                Ok(Some(chunk))
            }
        }
    }

    /// Accumulates output until `timeout` elapses or the device has been quiet
    /// for the quiet period after printing something. Never blocks past `timeout`.
    pub async fn read_until_timeout(&mut self, timeout: Duration) -> Result<String, ConnectError> {
        let deadline = deadline_after(timeout);
        let quiet = self.timing.quiet_period();
        let mut buffer = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let wait = if buffer.is_empty() {
                remaining
            } else {
                quiet.min(remaining)
            };
            match self.next_chunk(wait).await? {
                Some(chunk) => buffer.push_str(&chunk),
                None if !buffer.is_empty() => break,
                None => {}
            }
        }
        Ok(buffer)
    }

    /// Accumulates output until the trailing line is a prompt.
    ///
    /// Pagination markers are answered with a space and removed from the
    /// buffer. While the buffer holds only the echo of `sent`, a trailing
    /// `#`/`>` belonging to the command text is not taken for a prompt.
    /// On timeout the partial output is returned inside
    /// [`ConnectError::ExecTimeout`].
    pub async fn read_until_prompt(
        &mut self,
        sent: &str,
        timeout: Duration,
    ) -> Result<String, ConnectError> {
        let deadline = deadline_after(timeout);
        let sent = sent.trim();
        let mut buffer = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = match self.next_chunk(remaining).await? {
                Some(chunk) => chunk,
                None => return Err(ConnectError::ExecTimeout(buffer)),
            };
            buffer.push_str(&chunk);

            let tail = prompt::trailing_line(&buffer);
            if self.resolver.is_more(tail) {
                let keep = buffer.len() - tail.len();
                buffer.truncate(keep);
                trace!("{} answering pagination", self.device_addr);
                self.transmit(" ".to_string(), " ").await?;
                continue;
            }

            let echo_only = !buffer.contains('\n')
                && !sent.is_empty()
                && tail.trim_end().ends_with(sent);
            if echo_only {
                continue;
            }
            if let Some(found) = self.resolver.trailing_prompt(&buffer) {
                self.remember_prompt(found);
                return Ok(buffer);
            }
        }
    }

    /// Sends a bare newline and reads until the trailing line is recognized
    /// as a prompt. Returns the trimmed prompt and caches it.
    ///
    /// Output that never ends on a prompt (a command still printing, a
    /// progress meter) yields [`ConnectError::ResolveTimeout`] with what was
    /// read; the session state is left untouched.
    pub async fn resolve_prompt(&mut self) -> Result<String, ConnectError> {
        self.discard_pending();
        self.write("").await?;

        let deadline = deadline_after(self.timing.resolve_timeout());
        let mut buffer = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(chunk) = self.next_chunk(remaining).await? else {
                debug!(
                    "{} no prompt within {} ms, last line {:?}",
                    self.device_addr,
                    self.timing.resolve_timeout().as_millis(),
                    prompt::trailing_line(&buffer)
                );
                return Err(ConnectError::ResolveTimeout(buffer));
            };
            buffer.push_str(&chunk);
            // The echoed newline must not count as output of its own.
            let view = prompt::strip_echo(&buffer, "");
            if let Some(found) = self.resolver.trailing_prompt(view) {
                self.remember_prompt(found.clone());
                return Ok(found);
            }
        }
    }

    pub(crate) fn mark_ready(&mut self, prompt: String) {
        self.remember_prompt(prompt);
        self.set_state(SessionState::Ready);
    }

    /// Sends `exit` and stops reading. The session ends `Disconnected`.
    pub async fn close(&mut self) -> Result<(), ConnectError> {
        debug!("Closing session {}", self.device_addr);
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::SessionClosed {
                reason: "close_called".to_string(),
            });
        }
        if !self.sender.is_closed() {
            if let Err(e) = self.write("exit").await {
                debug!("Failed to send exit command: {:?}", e);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.recv.close();
        self.set_state(SessionState::Disconnected);
        Ok(())
    }
}
