//! Session bridge: couples the MQTT session to station connectivity.
//!
//! ```text
//!  StationManager ── GotIp ──────▶ transport.start()
//!                 ── Disconnected ▶ transport.stop()
//!
//!  transport ── Connected ───▶ subscribe(temperature, QoS1) · status(true)
//!            ── Disconnected ▶ status(false)
//!            ── Data ────────▶ topic == subscribe topic ? on_message
//!
//!  host ── publish_button_event(id, state) ──▶ "<prefix>/<id>" QoS1
//! ```
//!
//! Session state and the transport client sit behind separate mutexes.
//! The state lock is never held across a client call: `stop()` may wait for
//! the MQTT task, which in turn posts to the event pump.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::SessionConfig;
use crate::error::{NetError, StackError};
use crate::utils::{lock, push_truncated};

use super::events::{ConnectivityEvent, ConnectivityListener, MAX_TOPIC_LEN, TransportEvent};
use super::ports::{ButtonEventSink, PubSubTransport, Qos, StationRadio, StoragePort};
use super::station::StationManager;

/// Host callback for messages on the subscribe topic: `(topic, payload)`.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Host callback for broker session up/down.
pub type StatusHandler = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct State {
    initialized: bool,
    config: SessionConfig,
    connected: bool,
    on_message: Option<MessageHandler>,
    on_status: Option<StatusHandler>,
}

pub struct SessionBridge<T> {
    client: Mutex<Option<T>>,
    state: Mutex<State>,
}

impl<T> Default for SessionBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SessionBridge<T> {
    pub fn new() -> Self {
        Self {
            client: Mutex::new(None),
            state: Mutex::new(State::default()),
        }
    }

    fn with<U>(&self, f: impl FnOnce(&mut State) -> U) -> U {
        f(&mut lock(&self.state))
    }

    /// The resolved configuration (all defaults applied) once initialised.
    pub fn config(&self) -> SessionConfig {
        self.with(|st| st.config.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.with(|st| st.connected)
    }

    pub fn is_initialized(&self) -> bool {
        self.with(|st| st.initialized)
    }
}

impl<T: PubSubTransport + Send + 'static> SessionBridge<T> {
    /// Build the transport client and subscribe to station connectivity.
    ///
    /// Empty (or absent) config fields fall back to their defaults.  The
    /// client is created by `make_client` from the resolved config; a
    /// failure there is [`NetError::Fail`].  If the station manager refuses
    /// the listener its error is returned and the new client is dropped.
    /// A second call after success is a no-op.
    pub fn init<S, R, F>(
        self: &Arc<Self>,
        station: &StationManager<S, R>,
        config: Option<&SessionConfig>,
        make_client: F,
        on_message: Option<MessageHandler>,
        on_status: Option<StatusHandler>,
    ) -> Result<(), NetError>
    where
        S: StoragePort,
        R: StationRadio,
        F: FnOnce(&SessionConfig) -> Result<T, StackError>,
    {
        // Held for the whole init so a concurrent second call sees the result.
        let mut client_slot = lock(&self.client);
        if self.is_initialized() {
            return Ok(());
        }

        let resolved = config.cloned().unwrap_or_default().resolved();
        let client = make_client(&resolved).map_err(|e| {
            warn!("SessionBridge: client init for {} failed: {}", resolved.broker_uri, e);
            NetError::Fail
        })?;

        station.register_event_handler(self.clone())?;

        info!(
            "SessionBridge: broker={} sub={} prefix={} ({:?})",
            resolved.broker_uri, resolved.subscribe_topic, resolved.publish_prefix, resolved.profile
        );
        *client_slot = Some(client);
        self.with(|st| {
            st.config = resolved;
            st.on_message = on_message;
            st.on_status = on_status;
            st.initialized = true;
        });
        Ok(())
    }

    /// React to one MQTT client event.  Called from the event pump.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let topic = self.with(|st| st.config.subscribe_topic.clone());
                if let Some(client) = lock(&self.client).as_mut() {
                    match client.subscribe(&topic, Qos::AtLeastOnce) {
                        Ok(msg_id) => info!("SessionBridge: subscribe '{}' (msg_id={})", topic, msg_id),
                        Err(e) => warn!("SessionBridge: subscribe '{}' failed: {}", topic, e),
                    }
                }
                let status = self.with(|st| {
                    st.connected = true;
                    st.on_status.clone()
                });
                info!("SessionBridge: broker connected");
                if let Some(cb) = status {
                    cb(true);
                }
            }
            TransportEvent::Disconnected => {
                let status = self.with(|st| {
                    st.connected = false;
                    st.on_status.clone()
                });
                info!("SessionBridge: broker disconnected");
                if let Some(cb) = status {
                    cb(false);
                }
            }
            TransportEvent::Data(frame) => {
                let handler = self.with(|st| {
                    if frame.topic() == st.config.subscribe_topic.as_bytes() {
                        st.on_message.clone()
                    } else {
                        None
                    }
                });
                // Equal to the subscribe topic, so valid UTF-8.
                if let (Some(cb), Ok(topic)) = (handler, core::str::from_utf8(frame.topic())) {
                    cb(topic, frame.payload());
                }
            }
        }
    }

    /// Publish `state` to `"<prefix>/<id>"` with QoS 1, not retained.
    ///
    /// The topic is cut silently at 127 bytes; an empty `id` publishes to
    /// `"<prefix>/"`.  Returns [`NetError::InvalidState`] unless the broker
    /// session is up, and [`NetError::Fail`] if the client rejects the
    /// publish.
    pub fn publish_button_event(&self, id: &str, state: &str) -> Result<(), NetError> {
        let Some(topic) = self.with(|st| {
            st.connected.then(|| {
                let mut topic = heapless::String::<MAX_TOPIC_LEN>::new();
                push_truncated(&mut topic, &st.config.publish_prefix);
                push_truncated(&mut topic, "/");
                push_truncated(&mut topic, id);
                topic
            })
        }) else {
            return Err(NetError::InvalidState);
        };

        let mut client = lock(&self.client);
        let Some(client) = client.as_mut() else {
            return Err(NetError::InvalidState);
        };
        client
            .publish(&topic, state.as_bytes(), Qos::AtLeastOnce, false)
            .map(|_| ())
            .map_err(|e| {
                warn!("SessionBridge: publish to '{}' failed: {}", topic, e);
                NetError::Fail
            })
    }
}

impl<T: PubSubTransport + Send + 'static> ConnectivityListener for SessionBridge<T> {
    fn on_connectivity_event(&self, event: &ConnectivityEvent) {
        let mut client = lock(&self.client);
        let Some(client) = client.as_mut() else {
            return;
        };
        let result = match event {
            ConnectivityEvent::GotIp(_) => client.start(),
            ConnectivityEvent::Disconnected => client.stop(),
            _ => return,
        };
        if let Err(e) = result {
            warn!("SessionBridge: session {:?} request failed: {}", event, e);
        }
    }
}

impl<T: PubSubTransport + Send + 'static> ButtonEventSink for SessionBridge<T> {
    fn publish_button_event(&self, id: &str, state: &str) -> Result<(), NetError> {
        SessionBridge::publish_button_event(self, id, state)
    }
}
