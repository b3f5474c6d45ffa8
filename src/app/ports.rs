//! Port traits — the hexagonal boundary between the connectivity core and
//! the ESP-IDF stack.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ StationManager / SessionBridge (domain)
//! ```
//!
//! Driven adapters (NVS, Wi-Fi radio, MQTT client) implement these traits.
//! The domain types consume them via generics, so the core never touches
//! the stack directly and every policy decision is testable on the host.
//!
//! ## Contract
//!
//! Every radio and transport call is a fire-and-forget *request*: it returns
//! once the stack has accepted (or rejected) it, never after completion.
//! Completion is reported later as an event through
//! [`EventPump`](crate::events::EventPump).

use crate::error::{StackError, StorageError};

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Namespaced persistent key-value store with write-then-commit semantics.
///
/// A `set_*` is staged; it is only guaranteed durable once
/// [`commit`](Self::commit) for the same namespace returns `Ok`.
pub trait StoragePort {
    /// Initialise the backing partition.
    ///
    /// Returns [`StorageError::NeedsErase`] when the partition is full or
    /// was formatted by a newer layout; the caller erases and retries.
    fn init(&mut self) -> Result<(), StorageError>;

    /// Erase the whole partition.
    fn erase(&mut self) -> Result<(), StorageError>;

    /// Read a string value into `buf`; returns its length in bytes.
    fn get_str(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Stage a string value.
    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// Read a blob into `buf`; returns its length in bytes.
    fn get_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Stage a blob.
    fn set_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Make every staged write in `namespace` durable.
    fn commit(&mut self, namespace: &str) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Station radio port (driven adapter: domain → Wi-Fi driver)
// ───────────────────────────────────────────────────────────────

/// The Wi-Fi driver in station mode.
pub trait StationRadio {
    /// Bring up netif, the default event loop and the Wi-Fi driver.
    /// "Already initialised" conditions are tolerated by the adapter.
    fn init(&mut self) -> Result<(), StackError>;

    /// Switch the driver into station (client) mode.
    fn set_station_mode(&mut self) -> Result<(), StackError>;

    /// Load SSID/passphrase into the station configuration.
    fn apply_config(&mut self, ssid: &str, password: &str) -> Result<(), StackError>;

    /// Start the radio; completion arrives as `StationEvent::Started`.
    fn start(&mut self) -> Result<(), StackError>;

    /// Request association with the configured AP.
    fn connect(&mut self) -> Result<(), StackError>;
}

// ───────────────────────────────────────────────────────────────
// Pub/sub transport port (driven adapter: domain ↔ MQTT client)
// ───────────────────────────────────────────────────────────────

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

/// A broker client bound to one URI at construction time.
pub trait PubSubTransport {
    /// Start the session (connect to the broker in the background).
    fn start(&mut self) -> Result<(), StackError>;

    /// Stop the session and drop the broker connection.
    fn stop(&mut self) -> Result<(), StackError>;

    /// Request a subscription; returns the message id.
    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<u32, StackError>;

    /// Enqueue a publish; returns the message id.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<u32, StackError>;
}

// ───────────────────────────────────────────────────────────────
// Button event sink (driving port: UI → session)
// ───────────────────────────────────────────────────────────────

/// Where the dashboard sends button presses.  Implemented by
/// [`SessionBridge`](super::session::SessionBridge).
pub trait ButtonEventSink {
    fn publish_button_event(&self, id: &str, state: &str) -> Result<(), crate::error::NetError>;
}
