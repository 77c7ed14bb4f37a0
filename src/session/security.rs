use super::*;

/// Security level used for SSH algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Strict modern algorithms.
    #[default]
    Secure,
    /// Modern algorithms plus SHA-1 and CBC fallbacks.
    Balanced,
    /// Everything negotiable, for devices stuck on old firmware.
    LegacyCompatible,
}

impl SecurityLevel {
    /// Algorithm preference for this level, most preferred first.
    pub fn preferred(self) -> Preferred {
        let (kex, key, cipher, mac) = match self {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}

/// How the transport negotiates algorithms and checks host keys.
///
/// Part of the parameters a cached session is compared on, so changing
/// either field makes the next lookup reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    /// SSH algorithm policy.
    pub level: SecurityLevel,
    /// Server host key verification method.
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    /// Modern algorithms, host key checked against `~/.ssh/known_hosts`.
    pub fn secure_default() -> Self {
        Self::for_level(SecurityLevel::Secure)
    }

    /// SHA-1/CBC fallbacks for mixed fleets, known-hosts checking kept.
    pub fn balanced() -> Self {
        Self::for_level(SecurityLevel::Balanced)
    }

    /// Legacy algorithms without host key verification. Lab use only.
    pub fn legacy_compatible() -> Self {
        Self::for_level(SecurityLevel::LegacyCompatible)
    }

    /// Options for a level. Only the legacy level skips host key checking.
    pub fn for_level(level: SecurityLevel) -> Self {
        let server_check = match level {
            SecurityLevel::LegacyCompatible => ServerCheckMethod::NoCheck,
            SecurityLevel::Secure | SecurityLevel::Balanced => {
                ServerCheckMethod::DefaultKnownHostsFile
            }
        };
        Self {
            level,
            server_check,
        }
    }

    /// Checks host keys against a specific known-hosts file.
    pub fn with_known_hosts_file(mut self, path: impl Into<String>) -> Self {
        self.server_check = ServerCheckMethod::KnownHostsFile(path.into());
        self
    }

    /// Accepts only the given base64 host public key.
    pub fn with_pinned_host_key(mut self, key: impl Into<String>) -> Self {
        self.server_check = ServerCheckMethod::PublicKey(key.into());
        self
    }

    pub fn verifies_host_key(&self) -> bool {
        !matches!(self.server_check, ServerCheckMethod::NoCheck)
    }

    pub(crate) fn preferred(&self) -> Preferred {
        self.level.preferred()
    }
}
