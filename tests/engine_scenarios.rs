mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use common::{ScriptedConnector, ScriptedDevice, quick, reply};
use netcli::config::Credentials;
use netcli::device::DeviceProfile;
use netcli::error::{ConnectError, ErrorKind};
use netcli::session::{
    Classification, Command, CommandExecutor, InitStrategy, KeepalivePolicy, KeepaliveStatus,
    KeepaliveWrapper, Session, SessionState,
};
use netcli::templates;

/// IOS-like router: starts at `r1>`, `enable` asks for a password, `s3cret`
/// is the enable secret. Like IOS it asks three times before giving up.
fn ios_router() -> ScriptedDevice {
    let mut privileged = false;
    let mut attempts = None::<u32>;
    ScriptedDevice::spawn("\r\nUser Access Verification\r\n\r\nr1>", move |line| {
        let prompt = if privileged { "r1#" } else { "r1>" };
        if let Some(tried) = attempts.as_mut() {
            if line == "s3cret" {
                attempts = None;
                privileged = true;
                return reply("\r\nr1#");
            }
            *tried += 1;
            if *tried < 3 {
                return reply("\r\nPassword: ");
            }
            attempts = None;
            return reply("\r\n% Bad secrets\r\n\r\nr1>");
        }
        match line {
            "enable" if !privileged => {
                attempts = Some(0);
                reply("enable\r\nPassword: ")
            }
            "show foo" => reply(format!(
                "show foo\r\n         ^\r\n% Invalid input detected at '^' marker.\r\n\r\n{prompt}"
            )),
            "show version" => reply(format!(
                "show version\r\nCisco IOS Software, Version 15.2(4)M\r\n{prompt}"
            )),
            other => reply(format!("{other}\r\n{prompt}")),
        }
    })
}

fn cisco_profile() -> DeviceProfile {
    quick(templates::cisco())
}

fn credentials() -> Credentials {
    Credentials::new("admin", "login-pw").with_enable_secret("s3cret")
}

#[tokio::test]
async fn invalid_command_is_reported_as_device_error() -> Result<()> {
    let device = ios_router();
    let executor =
        CommandExecutor::establish("r1", device.transport(), cisco_profile(), credentials())
            .await?;

    let result = executor.execute(&Command::read("show foo")).await?;
    match &result.classification {
        Classification::DeviceError { pattern, matched } => {
            assert_eq!(pattern, r"^% Invalid input detected at '\^' marker\.");
            assert!(matched.contains("% Invalid input detected"));
        }
        other => bail!("expected a device error, got {other:?}"),
    }
    assert!(result.output.contains("% Invalid input detected"));
    assert!(!result.output.contains("r1#"));
    assert_eq!(executor.state(), SessionState::Ready);
    Ok(())
}

#[tokio::test]
async fn enable_handshake_reaches_privileged_prompt() -> Result<()> {
    let device = ios_router();
    let profile = cisco_profile();
    let mut session = Session::new("r1", device.transport(), &profile)?;
    let strategy = InitStrategy::from_profile(&profile)?;

    let prompt = strategy.run(&mut session, &credentials()).await?;
    assert!(prompt.ends_with('#'), "prompt was {prompt}");
    assert_eq!(session.state(), SessionState::Ready);

    let sent = device.received();
    assert_eq!(&sent[..2], ["terminal length 0", "terminal width 0"]);
    assert!(sent.contains(&"s3cret".to_string()));

    // A second run finds the session privileged and does not escalate again.
    strategy.run(&mut session, &credentials()).await?;
    let escalations = device
        .received()
        .iter()
        .filter(|line| line.as_str() == "enable")
        .count();
    assert_eq!(escalations, 1);
    Ok(())
}

#[tokio::test]
async fn rejected_secret_fails_initialization_after_bounded_drain() -> Result<()> {
    let device = ios_router();
    let profile = cisco_profile();
    let creds = Credentials::new("admin", "wrong");
    let mut session = Session::new("r1", device.transport(), &profile)?;
    let strategy = InitStrategy::from_profile(&profile)?;

    let err = strategy
        .run(&mut session, &creds)
        .await
        .expect_err("wrong secret must not succeed");
    assert!(matches!(
        err,
        ConnectError::InitializationFailed { ref prompt, .. } if prompt == "r1>"
    ));
    assert_eq!(err.kind(), ErrorKind::Initialization);
    assert_eq!(session.state(), SessionState::Failed);

    let sent = device.received();
    let secret_at = sent
        .iter()
        .position(|line| line == "wrong")
        .context("secret was never sent")?;
    let blank_lines = sent[secret_at + 1..]
        .iter()
        .filter(|line| line.is_empty())
        .count();
    // Drained re-prompts plus the final prompt resolution.
    assert!(blank_lines <= profile.handshake.max_password_retries as usize + 1);
    assert!(blank_lines >= 2);
    Ok(())
}

#[tokio::test]
async fn silent_command_times_out_with_partial_output() -> Result<()> {
    let device = ScriptedDevice::spawn("", |line| match line {
        "show tech-support" => reply("show tech-support\r\n------ show clock ------\r\n"),
        other => reply(format!("{other}\r\nr1#")),
    });
    let executor = CommandExecutor::establish(
        "r1",
        device.transport(),
        quick(DeviceProfile::generic("stub")),
        credentials(),
    )
    .await?;

    let timeout = Duration::from_millis(400);
    let started = Instant::now();
    let result = executor
        .execute(&Command::read("show tech-support").with_timeout(timeout))
        .await?;
    let elapsed = started.elapsed();

    assert_eq!(result.classification, Classification::Timeout);
    assert!(result.output.contains("show clock"));
    assert!(elapsed >= timeout.saturating_sub(Duration::from_millis(10)));
    assert!(elapsed < timeout + Duration::from_millis(250), "took {elapsed:?}");
    assert_eq!(executor.state(), SessionState::Busy);

    let err = executor.blocking_execute("show clock").await.unwrap_err();
    assert!(matches!(
        err,
        ConnectError::SessionUnavailable {
            state: SessionState::Busy,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn overlapping_submissions_execute_strictly_in_sequence() -> Result<()> {
    let device = ScriptedDevice::spawn_with_delay("", Duration::from_millis(20), |line| {
        reply(format!("{line}\r\nresult of {line}\r\nr1#"))
    });
    let executor = CommandExecutor::establish(
        "r1",
        device.transport(),
        quick(DeviceProfile::generic("stub")),
        credentials(),
    )
    .await?;

    let mut tasks = Vec::new();
    for i in 0..4 {
        let executor = executor.clone();
        tasks.push(tokio::spawn(async move {
            executor.blocking_execute(&format!("show item {i}")).await
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await??, format!("result of show item {i}"));
    }

    // Every command is answered before the next one reaches the device.
    let log: Vec<String> = device
        .log()
        .into_iter()
        .filter(|entry| entry.contains("show item") || entry.starts_with('!'))
        .collect();
    let expected: Vec<String> = (0..4)
        .flat_map(|i| [format!("> show item {i}"), format!("< show item {i}")])
        .collect();
    assert_eq!(log, expected);
    Ok(())
}

#[tokio::test]
async fn keepalive_rebuilds_a_dead_session_once() -> Result<()> {
    // Answers the handshake newline, then never says anything again.
    let mut answered = false;
    let dead = ScriptedDevice::spawn("", move |line| {
        if answered {
            return Vec::new();
        }
        answered = true;
        reply(format!("{line}\r\nr1#"))
    });
    let profile = quick(DeviceProfile::generic("stub"));
    let executor =
        CommandExecutor::establish("r1", dead.transport(), profile, credentials()).await?;

    let connector = Arc::new(ScriptedConnector::new(|_| {
        ScriptedDevice::spawn("", |line| match line {
            "show clock" => reply("show clock\r\n*12:00:00.000 UTC Mon Oct 19 2026\r\nr1#"),
            other => reply(format!("{other}\r\nr1#")),
        })
    }));
    let policy = KeepalivePolicy {
        idle_interval_ms: 100,
        check_interval_ms: 20,
        probe_command: None,
        probe_timeout_ms: 200,
        max_failures: 3,
        reconnect_backoff_ms: 50,
        max_backoff_ms: 200,
        max_reconnect_attempts: 5,
    };
    let handle = KeepaliveWrapper::new(executor.clone(), connector.clone(), policy).spawn();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !(connector.calls() == 1 && handle.status() == KeepaliveStatus::Healthy) {
        if Instant::now() > deadline {
            bail!("no reconnect, status {:?}", handle.status());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    handle.shutdown().await;
    assert_eq!(handle.status(), KeepaliveStatus::Stopped);

    assert_eq!(connector.calls(), 1);
    assert_eq!(executor.state(), SessionState::Ready);
    let output = executor.blocking_execute("show clock").await?;
    assert_eq!(output, "*12:00:00.000 UTC Mon Oct 19 2026");
    assert!(connector.received(0).contains(&"show clock".to_string()));
    assert!(!dead.received().contains(&"show clock".to_string()));
    Ok(())
}
