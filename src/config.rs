//! Connection records, engine timing defaults and SSH algorithm tables.
//!
//! The algorithm tables are grouped into three profiles selected by
//! [`crate::session::SecurityLevel`]: a strict modern set, a balanced set,
//! and a legacy set that keeps old ciphers and key exchanges reachable for
//! aging routers and cable headends.

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 60_000;
/// Default quiescence window: output is considered complete after this much silence.
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 300;
/// Default upper bound on a single prompt resolution.
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 10_000;
/// Default short read used by handshake steps.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 2_000;
/// Default bound on one transport write.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
/// Default bound on waiting for the first prompt after SSH login.
pub const DEFAULT_LOGIN_TIMEOUT_MS: u64 = 60_000;

/// Login material for one device.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Separate privilege-escalation secret; the login password is used when absent.
    #[serde(default)]
    pub enable_secret: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            enable_secret: None,
        }
    }

    pub fn with_enable_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_secret = Some(secret.into());
        self
    }

    /// Secret sent at the privilege-escalation password prompt.
    pub fn escalation_secret(&self) -> &str {
        self.enable_secret.as_deref().unwrap_or(&self.password)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"******")
            .field(
                "enable_secret",
                &self.enable_secret.as_ref().map(|_| "******"),
            )
            .finish()
    }
}

/// Connection-configuration record owned by the calling layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionConfig {
    /// Logical device id used in logs and errors.
    pub device_id: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub credentials: Credentials,
}

fn default_port() -> u16 {
    22
}

impl ConnectionConfig {
    pub fn new(
        device_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        credentials: Credentials,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            address: address.into(),
            port,
            credentials,
        }
    }

    /// Cache key and log label, `user@addr:port`.
    pub fn device_addr(&self) -> String {
        format!(
            "{}@{}:{}",
            self.credentials.username, self.address, self.port
        )
    }
}

pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

pub const SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

/// Modern set plus SHA-1 group exchanges and CBC ciphers still common on switches.
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
];

pub const BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1,
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// Everything russh can negotiate, including `none` ciphers and MACs.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
    kex::DH_G1_SHA1,
    kex::DH_G14_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G15_SHA512,
    kex::DH_G16_SHA512,
    kex::DH_G17_SHA512,
    kex::DH_G18_SHA512,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::NONE,
];

pub const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::CLEAR,
    cipher::NONE,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
    cipher::CHACHA20_POLY1305,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::NONE,
    mac::HMAC_SHA1,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
];

pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

#[cfg(test)]
mod tests {
    use super::{ConnectionConfig, Credentials};

    #[test]
    fn enable_secret_falls_back_to_login_password() {
        let creds = Credentials::new("admin", "login-pw");
        assert_eq!(creds.escalation_secret(), "login-pw");

        let creds = creds.with_enable_secret("enable-pw");
        assert_eq!(creds.escalation_secret(), "enable-pw");
    }

    #[test]
    fn debug_output_masks_secrets() {
        let creds = Credentials::new("admin", "hunter2").with_enable_secret("s3cret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn connection_config_defaults_port_from_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"device_id":"r1","address":"10.0.0.1","credentials":{"username":"admin","password":"pw"}}"#,
        )
        .expect("valid config json");
        assert_eq!(config.port, 22);
        assert_eq!(config.device_addr(), "admin@10.0.0.1:22");
        assert!(config.credentials.enable_secret.is_none());
    }
}
