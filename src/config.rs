//! Connectivity configuration
//!
//! Station credentials, session (broker/topic) settings and the optional
//! TLS secrets for the encrypted broker profile.  Empty session fields are
//! replaced by the defaults below when the session bridge is initialised.

use core::fmt;

use heapless::String;
use log::info;
use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;
use crate::error::{NetError, StorageError};
use crate::utils::bounded;

/// Maximum SSID length in bytes.
pub const MAX_SSID_LEN: usize = 32;
/// Maximum passphrase length in bytes.
pub const MAX_PASSWORD_LEN: usize = 64;
/// Capacity of each session configuration field.  Matches the inbound
/// topic buffer so a configured subscribe topic can always be matched.
pub const MAX_CONFIG_FIELD_LEN: usize = crate::app::events::MAX_TOPIC_LEN;

/// Plaintext public broker.
pub const DEFAULT_BROKER_URI: &str = "mqtt://broker.hivemq.com";
/// TLS endpoint of the same broker, used by [`BrokerProfile::Tls`].
pub const DEFAULT_TLS_BROKER_URI: &str = "mqtts://broker.hivemq.com:8883";
pub const DEFAULT_SUBSCRIBE_TOPIC: &str = "esp32lvgl/temperature";
pub const DEFAULT_PUBLISH_PREFIX: &str = "esp32lvgl/buttons";

const SECRETS_NAMESPACE: &str = "mqtt_sec";
const SECRETS_KEY: &str = "secrets";
const MAX_CA_PEM_LEN: usize = 2048;
const MAX_SECRETS_BLOB: usize = MAX_CA_PEM_LEN + 2 * MAX_PASSWORD_LEN + 16;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Wi-Fi station credentials.
///
/// An empty SSID is representable (the station manager stores it) but
/// never counts as valid.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    ssid: String<MAX_SSID_LEN>,
    password: String<MAX_PASSWORD_LEN>,
}

impl Credentials {
    /// Build credentials, rejecting an SSID over 32 bytes or a passphrase
    /// over 64 bytes with [`NetError::InvalidArg`].
    pub fn new(ssid: &str, password: &str) -> Result<Self, NetError> {
        Ok(Self {
            ssid: bounded(ssid).ok_or(NetError::InvalidArg)?,
            password: bounded(password).ok_or(NetError::InvalidArg)?,
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_valid(&self) -> bool {
        !self.ssid.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session configuration
// ---------------------------------------------------------------------------

/// Which broker build variant the session connects to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerProfile {
    /// Plain TCP, no authentication.
    #[default]
    Plaintext,
    /// TLS with a pinned CA and username/password from [`BrokerSecrets`].
    Tls,
}

/// Broker address and topic layout for the session bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub broker_uri: String<MAX_CONFIG_FIELD_LEN>,
    pub subscribe_topic: String<MAX_CONFIG_FIELD_LEN>,
    pub publish_prefix: String<MAX_CONFIG_FIELD_LEN>,
    pub profile: BrokerProfile,
}

impl SessionConfig {
    /// Build a config from raw fields; empty strings mean "use default".
    pub fn new(broker_uri: &str, subscribe_topic: &str, publish_prefix: &str) -> Result<Self, NetError> {
        Ok(Self {
            broker_uri: bounded(broker_uri).ok_or(NetError::InvalidArg)?,
            subscribe_topic: bounded(subscribe_topic).ok_or(NetError::InvalidArg)?,
            publish_prefix: bounded(publish_prefix).ok_or(NetError::InvalidArg)?,
            profile: BrokerProfile::Plaintext,
        })
    }

    pub fn with_profile(mut self, profile: BrokerProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Copy of `self` with every empty field replaced by its default.
    pub fn resolved(&self) -> Self {
        let mut out = self.clone();
        if out.broker_uri.is_empty() {
            let uri = match self.profile {
                BrokerProfile::Plaintext => DEFAULT_BROKER_URI,
                BrokerProfile::Tls => DEFAULT_TLS_BROKER_URI,
            };
            out.broker_uri = default_field(uri);
        }
        if out.subscribe_topic.is_empty() {
            out.subscribe_topic = default_field(DEFAULT_SUBSCRIBE_TOPIC);
        }
        if out.publish_prefix.is_empty() {
            out.publish_prefix = default_field(DEFAULT_PUBLISH_PREFIX);
        }
        out
    }
}

fn default_field(value: &'static str) -> String<MAX_CONFIG_FIELD_LEN> {
    // Defaults are short compile-time constants.
    bounded(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// TLS secrets
// ---------------------------------------------------------------------------

/// Username, password and pinned CA certificate for the TLS profile.
///
/// Provisioned into the `mqtt_sec` NVS namespace at manufacturing time;
/// nothing here is compiled into the image.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSecrets {
    pub username: String<MAX_PASSWORD_LEN>,
    pub password: String<MAX_PASSWORD_LEN>,
    /// PEM-encoded CA certificate the broker chain must verify against.
    pub ca_pem: String<MAX_CA_PEM_LEN>,
}

impl BrokerSecrets {
    pub fn new(username: &str, password: &str, ca_pem: &str) -> Result<Self, NetError> {
        Ok(Self {
            username: bounded(username).ok_or(NetError::InvalidArg)?,
            password: bounded(password).ok_or(NetError::InvalidArg)?,
            ca_pem: bounded(ca_pem).ok_or(NetError::InvalidArg)?,
        })
    }

    /// Load provisioned secrets.  `Ok(None)` when nothing was provisioned.
    pub fn load(storage: &impl StoragePort) -> Result<Option<Self>, StorageError> {
        let mut buf = [0u8; MAX_SECRETS_BLOB];
        let len = match storage.get_blob(SECRETS_NAMESPACE, SECRETS_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let secrets: Self = postcard::from_bytes(&buf[..len]).map_err(|_| StorageError::IoError(-1))?;
        info!("BrokerSecrets: loaded (user='{}', ca={} bytes)", secrets.username, secrets.ca_pem.len());
        Ok(Some(secrets))
    }

    /// Persist and commit.
    pub fn save(&self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(self).map_err(|_| StorageError::Full)?;
        storage.set_blob(SECRETS_NAMESPACE, SECRETS_KEY, &bytes)?;
        storage.commit(SECRETS_NAMESPACE)
    }
}

impl fmt::Debug for BrokerSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSecrets")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ca_pem_len", &self.ca_pem.len())
            .finish()
    }
}
