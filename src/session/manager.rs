use super::*;
use moka::notification::RemovalCause;

/// Connection parameters of a cached device, secrets kept as SHA-256 digests.
#[derive(Debug, Clone)]
struct ConnectionParams {
    password_hash: [u8; 32],
    enable_secret_hash: Option<[u8; 32]>,
    profile: DeviceProfile,
    security: ConnectionSecurityOptions,
}

impl ConnectionParams {
    fn new(
        credentials: &Credentials,
        profile: &DeviceProfile,
        security: &ConnectionSecurityOptions,
    ) -> Self {
        Self {
            password_hash: secret_hash(&credentials.password),
            enable_secret_hash: credentials.enable_secret.as_deref().map(secret_hash),
            profile: profile.clone(),
            security: security.clone(),
        }
    }

    fn matches(&self, other: &ConnectionParams) -> bool {
        if self.password_hash != other.password_hash {
            debug!("Password hash mismatch");
            return false;
        }
        if self.enable_secret_hash != other.enable_secret_hash {
            debug!("Enable secret hash mismatch");
            return false;
        }
        if self.profile != other.profile {
            debug!("Device profile mismatch");
            return false;
        }
        if self.security != other.security {
            debug!("Security options mismatch");
            return false;
        }
        true
    }
}

fn secret_hash(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

#[derive(Clone)]
struct ManagedDevice {
    executor: CommandExecutor,
    keepalive: Option<Arc<KeepaliveHandle>>,
    params: ConnectionParams,
}

impl ManagedDevice {
    async fn shutdown(self) {
        if let Some(keepalive) = self.keepalive.as_ref() {
            keepalive.shutdown().await;
        }
        if let Err(e) = self.executor.close().await {
            debug!("Error closing {}: {}", self.executor.device(), e);
        }
    }
}

/// Cache of established device sessions keyed by `user@address:port`.
///
/// An entry is reused while its session is connected and the caller's
/// credentials, profile and security options are unchanged; otherwise the
/// old session is closed and a new one established. Idle entries are
/// evicted after five minutes and their keepalive workers stopped.
pub struct SessionManager {
    cache: Cache<String, ManagedDevice>,
    security: ConnectionSecurityOptions,
    keepalive: Option<KeepalivePolicy>,
}

impl SessionManager {
    pub fn new() -> Self {
        // Cache up to 100 devices. Evict after 5 minutes of inactivity.
        let cache = Cache::builder()
            .max_capacity(100)
            .time_to_idle(Duration::from_secs(5 * 60))
            .eviction_listener(
                |key: Arc<String>, device: ManagedDevice, cause: RemovalCause| {
                    debug!("Cache entry {} removed: {:?}", key, cause);
                    if let Some(keepalive) = device.keepalive.as_ref() {
                        keepalive.stop();
                    }
                    // Explicit removals close the session themselves.
                    if matches!(cause, RemovalCause::Expired | RemovalCause::Size)
                        && let Ok(runtime) = tokio::runtime::Handle::try_current()
                    {
                        runtime.spawn(async move {
                            let _ = device.executor.close().await;
                        });
                    }
                },
            )
            .build();

        Self {
            cache,
            security: ConnectionSecurityOptions::default(),
            keepalive: None,
        }
    }

    /// SSH algorithm and host key policy for new connections.
    pub fn with_security(mut self, security: ConnectionSecurityOptions) -> Self {
        self.security = security;
        self
    }

    /// Runs a keepalive worker for every new session.
    pub fn with_keepalive(mut self, policy: KeepalivePolicy) -> Self {
        self.keepalive = Some(policy);
        self
    }

    /// Gets a cached session or connects over SSH.
    pub async fn get(
        &self,
        config: &ConnectionConfig,
        profile: &DeviceProfile,
    ) -> Result<CommandExecutor, ConnectError> {
        let connector = Arc::new(SshConnector::new(config.clone(), self.security.clone()));
        self.get_with_connector(config, profile, connector).await
    }

    /// Gets a cached session or builds one from `connector`. The connector is
    /// also what the keepalive worker reconnects with.
    pub async fn get_with_connector(
        &self,
        config: &ConnectionConfig,
        profile: &DeviceProfile,
        connector: Arc<dyn Connector>,
    ) -> Result<CommandExecutor, ConnectError> {
        let device_addr = config.device_addr();
        let params = ConnectionParams::new(&config.credentials, profile, &self.security);

        if let Some(cached) = self.cache.get(&device_addr).await {
            debug!("Cache hit: {}", device_addr);
            if cached.executor.is_connected() && cached.params.matches(&params) {
                debug!("Cached session usable, reusing: {}", device_addr);
                return Ok(cached.executor);
            }
            debug!("Cached session for {} unusable, recreating", device_addr);
            self.cache.invalidate(&device_addr).await;
            cached.shutdown().await;
        } else {
            debug!("Cache miss, connecting to {}...", device_addr);
        }

        let login_timeout = profile.timing.login_timeout();
        let transport = match tokio::time::timeout(login_timeout, connector.connect()).await {
            Ok(connected) => connected?,
            Err(_) => {
                return Err(ConnectError::TransportError(format!(
                    "connect to {} timed out after {} ms",
                    device_addr,
                    login_timeout.as_millis()
                )));
            }
        };
        let executor = CommandExecutor::establish(
            config.device_id.clone(),
            transport,
            profile.clone(),
            config.credentials.clone(),
        )
        .await?;

        let keepalive = self.keepalive.clone().map(|policy| {
            Arc::new(KeepaliveWrapper::new(executor.clone(), connector, policy).spawn())
        });

        self.cache
            .insert(
                device_addr.clone(),
                ManagedDevice {
                    executor: executor.clone(),
                    keepalive,
                    params,
                },
            )
            .await;
        debug!("New session for {} has been cached.", device_addr);

        Ok(executor)
    }

    /// Runs `text` on the device, connecting first when needed.
    pub async fn blocking_execute(
        &self,
        config: &ConnectionConfig,
        profile: &DeviceProfile,
        text: &str,
    ) -> Result<String, ConnectError> {
        self.get(config, profile).await?.blocking_execute(text).await
    }

    /// Keepalive status of a cached device, if it has a worker.
    pub async fn keepalive_status(&self, config: &ConnectionConfig) -> Option<KeepaliveStatus> {
        self.cache
            .get(&config.device_addr())
            .await
            .and_then(|device| device.keepalive.as_ref().map(|k| k.status()))
    }

    pub fn contains(&self, config: &ConnectionConfig) -> bool {
        self.cache.contains_key(&config.device_addr())
    }

    /// Closes and forgets a cached device.
    pub async fn disconnect(&self, config: &ConnectionConfig) -> Result<(), ConnectError> {
        let device_addr = config.device_addr();
        if let Some(device) = self.cache.remove(&device_addr).await {
            debug!("Disconnecting {}", device_addr);
            device.shutdown().await;
        }
        Ok(())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
