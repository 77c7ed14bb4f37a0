use super::*;
use crate::device::HandshakeConfig;
use regex::Regex;

/// Brings a freshly connected session to a privileged prompt.
///
/// Steps, all bounded by the profile's step timeout:
///
/// 1. drain the login banner
/// 2. send every setup command (pagination off first) and discard the output
/// 3. resolve the prompt; already privileged means done
/// 4. send the escalation command, answer a password prompt with the secret
/// 5. drain repeated password prompts with blank lines, at most
///    `max_password_retries` times
/// 6. resolve the prompt again and require the privileged suffix
#[derive(Debug, Clone)]
pub struct InitStrategy {
    handshake: HandshakeConfig,
    password_prompt: Regex,
}

impl InitStrategy {
    pub fn from_profile(profile: &DeviceProfile) -> Result<Self, ConnectError> {
        Ok(Self {
            handshake: profile.handshake.clone(),
            password_prompt: profile.password_prompt()?,
        })
    }

    fn is_privileged(&self, prompt: &str) -> bool {
        match self.handshake.privileged_suffix.as_deref() {
            Some(suffix) => prompt.trim_end().ends_with(suffix),
            None => true,
        }
    }

    fn awaiting_password(&self, output: &str) -> bool {
        self.password_prompt
            .is_match(prompt::trailing_line(output).trim_end_matches(['\r', '\n']))
    }

    fn failed(&self, session: &mut Session, prompt: &str) -> ConnectError {
        session.set_state(SessionState::Failed);
        ConnectError::InitializationFailed {
            device: session.device_addr().to_string(),
            prompt: prompt.to_string(),
        }
    }

    /// Resolves the prompt; text that is never recognized as one fails the
    /// session.
    async fn resolve(&self, session: &mut Session) -> Result<String, ConnectError> {
        match session.resolve_prompt().await {
            Err(err @ ConnectError::ResolveTimeout(_)) => {
                session.set_state(SessionState::Failed);
                Err(err)
            }
            other => other,
        }
    }

    /// Runs the handshake. On success the session is `Ready` and the privileged
    /// prompt is returned. Transport errors leave it `Disconnected`; a prompt
    /// mismatch or no recognizable prompt at all leaves it `Failed`.
    pub async fn run(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> Result<String, ConnectError> {
        let step = session.timing().step_timeout();
        let device = session.device_addr().to_string();

        let banner = session.read_until_timeout(step).await?;
        trace!("{} login banner {:?}", device, banner);

        for command in &self.handshake.setup_commands {
            debug!("{} handshake: {}", device, command);
            session.write(command).await?;
            let discarded = session.read_until_timeout(step).await?;
            trace!("{} '{}' answered {:?}", device, command, discarded);
        }

        let current = self.resolve(session).await?;
        if self.is_privileged(&current) {
            debug!("{} already privileged at '{}'", device, current);
            session.mark_ready(current.clone());
            return Ok(current);
        }

        let Some(escalation) = self.handshake.escalation_command.as_deref() else {
            return Err(self.failed(session, &current));
        };

        debug!("{} handshake: {}", device, escalation);
        session.write(escalation).await?;
        let mut output = session.read_until_timeout(step).await?;

        if self.awaiting_password(&output) {
            session.write_secret(credentials.escalation_secret()).await?;
            output = session.read_until_timeout(step).await?;

            let mut drained = 0;
            while self.awaiting_password(&output) {
                if drained >= self.handshake.max_password_retries {
                    let shown = prompt::clean_prompt(prompt::trailing_line(&output));
                    warn!(
                        "{} still asking for a password after {} blank lines",
                        device, drained
                    );
                    return Err(self.failed(session, &shown));
                }
                warn!(
                    "{} secret rejected, draining password prompt ({}/{})",
                    device,
                    drained + 1,
                    self.handshake.max_password_retries
                );
                session.write("").await?;
                output = session.read_until_timeout(step).await?;
                drained += 1;
            }
        }

        let resolved = self.resolve(session).await?;
        if !self.is_privileged(&resolved) {
            return Err(self.failed(session, &resolved));
        }
        info!("{} privileged prompt '{}'", device, resolved);
        session.mark_ready(resolved.clone());
        Ok(resolved)
    }
}
