//! Station connectivity manager.
//!
//! [`StationManager`] owns the Wi-Fi station lifecycle: persistent
//! credentials, the connect/reconnect policy and fan-out of connectivity
//! notifications to at most [`MAX_LISTENERS`] listeners.
//!
//! ```text
//!  StationEvent ──▶ ┌──────────────────────┐ ──▶ listener 0..3
//!                   │    StationManager    │
//!  host calls ────▶ │  creds · state · ip  │ ──▶ StationRadio (connect)
//!                   └──────────────────────┘ ◀─▶ StoragePort (wifi_mgr)
//! ```
//!
//! ## Reconnection policy
//!
//! Every `Disconnected` event with valid credentials issues exactly one
//! immediate connect request.  There is no backoff and no attempt limit.
//!
//! ## Locking
//!
//! Three mutexes: `storage`, `radio` and `state`, always taken in that
//! order.  `state` is held only to read or update fields and never across a
//! stack call, so a driver task blocked inside the radio or the store can
//! still query the manager.  Listeners run with no lock held and may call
//! back into the manager.

use core::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::{Credentials, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use crate::error::{NetError, StorageError};
use crate::utils::lock;

use super::events::{ConnectivityEvent, ConnectivityListener, ConnectivityState, StationEvent};
use super::ports::{StationRadio, StoragePort};

/// Capacity of the listener table.
pub const MAX_LISTENERS: usize = 4;

const NVS_NAMESPACE: &str = "wifi_mgr";
const NVS_KEY_SSID: &str = "ssid";
const NVS_KEY_PASS: &str = "pass";

type Listener = Arc<dyn ConnectivityListener>;

// ───────────────────────────────────────────────────────────────
// Shared state
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    initialized: bool,
    started: bool,
    credentials: Credentials,
    state: ConnectivityState,
    ip: Option<Ipv4Addr>,
    listeners: heapless::Vec<Listener, MAX_LISTENERS>,
}

// ── Stack helpers (called with only the storage/radio lock held) ──

fn init_storage(storage: &mut impl StoragePort) -> Result<(), NetError> {
    match storage.init() {
        Ok(()) => Ok(()),
        Err(StorageError::NeedsErase) => {
            warn!("StationManager: NVS partition needs erase, reformatting");
            storage.erase().map_err(fatal)?;
            storage.init().map_err(fatal)
        }
        Err(e) => Err(fatal(e)),
    }
}

fn load_credentials(storage: &impl StoragePort) -> Option<Credentials> {
    let mut ssid_buf = [0u8; MAX_SSID_LEN + 1];
    let ssid_len = match storage.get_str(NVS_NAMESPACE, NVS_KEY_SSID, &mut ssid_buf) {
        Ok(0) | Err(StorageError::NotFound) => {
            info!("StationManager: no stored credentials");
            return None;
        }
        Ok(len) => len,
        Err(e) => {
            warn!("StationManager: reading stored SSID failed: {}", e);
            return None;
        }
    };

    let mut pass_buf = [0u8; MAX_PASSWORD_LEN + 1];
    let pass_len = storage.get_str(NVS_NAMESPACE, NVS_KEY_PASS, &mut pass_buf).unwrap_or(0);

    let Ok(ssid) = core::str::from_utf8(&ssid_buf[..ssid_len]) else {
        warn!("StationManager: stored SSID is not UTF-8, ignoring");
        return None;
    };
    let password = core::str::from_utf8(&pass_buf[..pass_len]).unwrap_or("");

    match Credentials::new(ssid, password) {
        Ok(creds) => {
            info!("StationManager: loaded credentials for '{}'", creds.ssid());
            Some(creds)
        }
        Err(e) => {
            warn!("StationManager: stored credentials rejected: {}", e);
            None
        }
    }
}

fn persist_credentials(storage: &mut impl StoragePort, creds: &Credentials) {
    let result = storage
        .set_str(NVS_NAMESPACE, NVS_KEY_SSID, creds.ssid())
        .and_then(|()| storage.set_str(NVS_NAMESPACE, NVS_KEY_PASS, creds.password()))
        .and_then(|()| storage.commit(NVS_NAMESPACE));
    match result {
        Ok(()) => info!("StationManager: credentials for '{}' persisted", creds.ssid()),
        Err(e) => warn!("StationManager: persisting credentials failed: {}", e),
    }
}

fn apply_config(radio: &mut impl StationRadio, creds: &Credentials) {
    if !creds.is_valid() {
        return;
    }
    if let Err(e) = radio.apply_config(creds.ssid(), creds.password()) {
        warn!("StationManager: applying station config failed: {}", e);
    }
}

fn fatal(e: StorageError) -> NetError {
    NetError::Fatal(e.into())
}

// ───────────────────────────────────────────────────────────────
// StationManager
// ───────────────────────────────────────────────────────────────

pub struct StationManager<S, R> {
    storage: Mutex<S>,
    radio: Mutex<R>,
    state: Mutex<State>,
}

impl<S: StoragePort, R: StationRadio> StationManager<S, R> {
    /// Construct an uninitialised manager.  Nothing touches the stack
    /// until [`init`](Self::init).
    pub fn new(storage: S, radio: R) -> Self {
        Self {
            storage: Mutex::new(storage),
            radio: Mutex::new(radio),
            state: Mutex::new(State::default()),
        }
    }

    fn with<U>(&self, f: impl FnOnce(&mut State) -> U) -> U {
        f(&mut lock(&self.state))
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Initialise storage and radio, settle credentials and start the
    /// station.  A second call is a no-op.
    ///
    /// Non-empty `initial` credentials override (and overwrite) whatever is
    /// stored; otherwise the stored pair is loaded.  Any stack failure other
    /// than a reformat-able partition is returned as [`NetError::Fatal`].
    pub fn init(&self, initial: Option<&Credentials>) -> Result<(), NetError> {
        let mut storage = lock(&self.storage);
        let mut radio = lock(&self.radio);
        if self.with(|st| st.initialized) {
            return Ok(());
        }

        init_storage(&mut *storage)?;
        radio.init()?;

        let credentials = match initial.filter(|c| c.is_valid()) {
            Some(creds) => {
                persist_credentials(&mut *storage, creds);
                creds.clone()
            }
            None => load_credentials(&*storage).unwrap_or_else(|| self.with(|st| st.credentials.clone())),
        };
        drop(storage);

        radio.set_station_mode()?;
        apply_config(&mut *radio, &credentials);
        radio.start()?;

        let valid = credentials.is_valid();
        self.with(|st| {
            st.credentials = credentials;
            st.started = true;
            st.initialized = true;
        });
        info!("StationManager: station started (credentials={})", valid);
        Ok(())
    }

    /// Append a listener.  Fails with [`NetError::NoMem`] once
    /// [`MAX_LISTENERS`] are registered.  There is no removal.
    pub fn register_event_handler(&self, listener: Arc<dyn ConnectivityListener>) -> Result<(), NetError> {
        self.with(|st| st.listeners.push(listener).map_err(|_| NetError::NoMem))
    }

    // ── Credentials ───────────────────────────────────────────

    /// Replace the in-memory credentials (even with an empty SSID).
    ///
    /// Persists when `persist` is set and the SSID is non-empty.  If the
    /// radio is running the new configuration is applied immediately, but
    /// no connect is requested.  Returns [`NetError::InvalidState`] when the
    /// resulting SSID is empty.
    pub fn set_credentials(&self, credentials: &Credentials, persist: bool) -> Result<(), NetError> {
        let started = self.with(|st| {
            st.credentials = credentials.clone();
            st.started
        });
        let valid = credentials.is_valid();
        if persist && valid {
            persist_credentials(&mut *lock(&self.storage), credentials);
        }
        if started {
            apply_config(&mut *lock(&self.radio), credentials);
        }
        if valid { Ok(()) } else { Err(NetError::InvalidState) }
    }

    /// Re-apply the configuration and request association.
    ///
    /// The result reflects whether the radio accepted the request, not
    /// whether association succeeded.
    pub fn connect(&self) -> Result<(), NetError> {
        let Some(creds) = self.get_credentials() else {
            return Err(NetError::InvalidState);
        };
        let mut radio = lock(&self.radio);
        apply_config(&mut *radio, &creds);
        info!("StationManager: connecting to '{}'", creds.ssid());
        radio.connect().map_err(|e| {
            warn!("StationManager: connect request rejected: {}", e);
            NetError::Fail
        })
    }

    pub fn get_credentials(&self) -> Option<Credentials> {
        self.with(|st| st.credentials.is_valid().then(|| st.credentials.clone()))
    }

    pub fn has_credentials(&self) -> bool {
        self.with(|st| st.credentials.is_valid())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> ConnectivityState {
        self.with(|st| st.state)
    }

    /// Address from the last `GotIp`; cleared on disconnect.
    pub fn ip_address(&self) -> Option<Ipv4Addr> {
        self.with(|st| st.ip)
    }

    pub fn is_initialized(&self) -> bool {
        self.with(|st| st.initialized)
    }

    // ── Event handling ────────────────────────────────────────

    /// Drive the state machine from one stack event.
    ///
    /// Listeners are notified first; the reconnect request (on `Started`
    /// and `Disconnected`) follows once every listener has returned.
    pub fn handle_station_event(&self, event: StationEvent) {
        let (notification, reconnect) = self.with(|st| match event {
            StationEvent::Started => {
                st.state = ConnectivityState::Started;
                (ConnectivityEvent::Started, true)
            }
            StationEvent::Connected => {
                st.state = ConnectivityState::Connected;
                (ConnectivityEvent::Connected, false)
            }
            StationEvent::Disconnected => {
                st.state = ConnectivityState::Disconnected;
                st.ip = None;
                (ConnectivityEvent::Disconnected, true)
            }
            StationEvent::GotIp(addr) => {
                st.ip = Some(addr);
                (ConnectivityEvent::GotIp(addr), false)
            }
        });

        info!("StationManager: {:?}", notification);
        self.notify(&notification);

        if reconnect && self.has_credentials() {
            if let Err(e) = lock(&self.radio).connect() {
                warn!("StationManager: connect request rejected: {}", e);
            }
        }
    }

    fn notify(&self, event: &ConnectivityEvent) {
        let listeners = self.with(|st| st.listeners.clone());
        for listener in &listeners {
            listener.on_connectivity_event(event);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
