//! MQTT client adapter.
//!
//! Implements [`PubSubTransport`] on the ESP-IDF `esp-mqtt` component.  The
//! client is bound to one broker at construction; [`start`] and [`stop`]
//! are driven by the session bridge as the station gains and loses its
//! address.  Client events are copied into fixed buffers and posted to the
//! [`EventPump`] as [`TransportEvent`]s.
//!
//! The raw C API is used instead of `EspMqttClient` because the latter
//! starts the session on construction and offers no start/stop.
//!
//! [`start`]: PubSubTransport::start
//! [`stop`]: PubSubTransport::stop

use log::info;

use crate::app::ports::{PubSubTransport, Qos};
use crate::config::{BrokerSecrets, SessionConfig};
use crate::error::StackError;
use crate::events::EventPump;

#[cfg(target_os = "espidf")]
use {
    crate::app::events::{InboundFrame, TransportEvent},
    crate::events::NetEvent,
    esp_idf_svc::sys::*,
    log::warn,
    std::ffi::CString,
};

#[cfg(not(target_os = "espidf"))]
use crate::{app::events::TransportEvent, config::BrokerProfile, events::NetEvent};

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct MqttAdapter {
    client: esp_mqtt_client_handle_t,
    // esp-mqtt keeps pointers into the certificate; these must outlive the
    // client handle.
    _uri: CString,
    _secrets: Option<(CString, CString, CString)>,
}

// SAFETY: the esp-mqtt client API is internally locked and may be called
// from any task.  The handle is owned exclusively by this adapter.
#[cfg(target_os = "espidf")]
unsafe impl Send for MqttAdapter {}

/// esp-mqtt event callback.
///
/// # Safety
///
/// `arg` is the `&'static EventPump` registered in [`MqttAdapter::new`] and
/// `data` is an `esp_mqtt_event_handle_t` valid for the duration of the
/// call.  Topic and payload are copied before returning.
#[cfg(target_os = "espidf")]
unsafe extern "C" fn mqtt_event_trampoline(
    arg: *mut core::ffi::c_void,
    _base: esp_event_base_t,
    event_id: i32,
    data: *mut core::ffi::c_void,
) {
    let events = unsafe { &*(arg as *const EventPump) };
    let ev = match event_id {
        id if id == esp_mqtt_event_id_t_MQTT_EVENT_CONNECTED as i32 => TransportEvent::Connected,
        id if id == esp_mqtt_event_id_t_MQTT_EVENT_DISCONNECTED as i32 => TransportEvent::Disconnected,
        id if id == esp_mqtt_event_id_t_MQTT_EVENT_DATA as i32 => {
            let event = unsafe { &*(data as esp_mqtt_event_handle_t) };
            let topic = unsafe { raw_slice(event.topic, event.topic_len) };
            let payload = unsafe { raw_slice(event.data, event.data_len) };
            TransportEvent::Data(InboundFrame::copy_from(topic, payload))
        }
        _ => return,
    };
    events.post(NetEvent::Transport(ev));
}

/// # Safety
///
/// `ptr` must be null or valid for `len` bytes.
#[cfg(target_os = "espidf")]
unsafe fn raw_slice<'a>(ptr: *const core::ffi::c_char, len: i32) -> &'a [u8] {
    if ptr.is_null() || len <= 0 {
        return &[];
    }
    unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) }
}

#[cfg(target_os = "espidf")]
fn c_string(s: &str) -> Result<CString, StackError> {
    CString::new(s).map_err(|_| StackError(ESP_ERR_INVALID_ARG as i32))
}

#[cfg(target_os = "espidf")]
fn check_msg_id(msg_id: i32) -> Result<u32, StackError> {
    u32::try_from(msg_id).map_err(|_| StackError::FAIL)
}

#[cfg(target_os = "espidf")]
impl MqttAdapter {
    /// Create (but do not start) a client for `config.broker_uri`.
    ///
    /// With `secrets` the broker chain is verified against the pinned CA and
    /// the session authenticates with username/password.
    pub fn new(
        config: &SessionConfig,
        secrets: Option<&BrokerSecrets>,
        events: &'static EventPump,
    ) -> Result<Self, StackError> {
        let uri = c_string(&config.broker_uri)?;
        let secrets = secrets
            .map(|s| Ok::<_, StackError>((c_string(&s.username)?, c_string(&s.password)?, c_string(&s.ca_pem)?)))
            .transpose()?;

        let mut cfg = esp_mqtt_client_config_t::default();
        cfg.broker.address.uri = uri.as_ptr();
        if let Some((user, pass, ca)) = secrets.as_ref() {
            cfg.broker.verification.certificate = ca.as_ptr();
            cfg.credentials.username = user.as_ptr();
            cfg.credentials.authentication.password = pass.as_ptr();
        }

        // SAFETY: every pointer in `cfg` is NUL-terminated and owned by the
        // returned adapter.
        let client = unsafe { esp_mqtt_client_init(&cfg) };
        if client.is_null() {
            warn!("MQTT(espidf): client init failed for {}", config.broker_uri);
            return Err(StackError::FAIL);
        }

        // SAFETY: `events` is 'static; the trampoline only reads through it.
        let ret = unsafe {
            esp_mqtt_client_register_event(
                client,
                esp_mqtt_event_id_t_MQTT_EVENT_ANY,
                Some(mqtt_event_trampoline),
                events as *const EventPump as *mut core::ffi::c_void,
            )
        };
        if ret != ESP_OK as esp_err_t {
            // SAFETY: `client` was created above and never started.
            unsafe { esp_mqtt_client_destroy(client) };
            return Err(StackError(ret));
        }

        info!("MQTT(espidf): client ready for {} (tls={})", config.broker_uri, secrets.is_some());
        Ok(Self {
            client,
            _uri: uri,
            _secrets: secrets,
        })
    }
}

#[cfg(target_os = "espidf")]
impl PubSubTransport for MqttAdapter {
    fn start(&mut self) -> Result<(), StackError> {
        // SAFETY: `self.client` is a live handle.
        let ret = unsafe { esp_mqtt_client_start(self.client) };
        if ret == ESP_OK as esp_err_t { Ok(()) } else { Err(StackError(ret)) }
    }

    fn stop(&mut self) -> Result<(), StackError> {
        // SAFETY: `self.client` is a live handle.
        let ret = unsafe { esp_mqtt_client_stop(self.client) };
        if ret == ESP_OK as esp_err_t { Ok(()) } else { Err(StackError(ret)) }
    }

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<u32, StackError> {
        let topic = c_string(topic)?;
        // SAFETY: `topic` is NUL-terminated; esp-mqtt copies it.
        check_msg_id(unsafe { esp_mqtt_client_subscribe_single(self.client, topic.as_ptr(), qos as i32) })
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<u32, StackError> {
        let topic = c_string(topic)?;
        // SAFETY: `payload` is valid for its length; esp-mqtt copies it
        // into the outbox before returning.
        check_msg_id(unsafe {
            esp_mqtt_client_publish(
                self.client,
                topic.as_ptr(),
                payload.as_ptr() as *const _,
                payload.len() as i32,
                qos as i32,
                i32::from(retain),
            )
        })
    }
}

#[cfg(target_os = "espidf")]
impl Drop for MqttAdapter {
    fn drop(&mut self) {
        // SAFETY: the handle is destroyed exactly once.
        unsafe { esp_mqtt_client_destroy(self.client) };
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct MqttAdapter {
    broker_uri: String,
    profile: BrokerProfile,
    authenticated: bool,
    events: &'static EventPump,
    running: bool,
    next_msg_id: u32,
    subscriptions: Vec<(String, Qos)>,
    published: Vec<(String, Vec<u8>)>,
    reject_publish: bool,
}

#[cfg(not(target_os = "espidf"))]
impl MqttAdapter {
    /// Create a recording client.  Rejects URIs without an MQTT scheme,
    /// as `esp_mqtt_client_init` does.
    pub fn new(
        config: &SessionConfig,
        secrets: Option<&BrokerSecrets>,
        events: &'static EventPump,
    ) -> Result<Self, StackError> {
        let uri = config.broker_uri.as_str();
        if !(uri.starts_with("mqtt://") || uri.starts_with("mqtts://")) {
            return Err(StackError::FAIL);
        }
        info!("MQTT(sim): client ready for {}", uri);
        Ok(Self {
            broker_uri: uri.to_owned(),
            profile: config.profile,
            authenticated: secrets.is_some(),
            events,
            running: false,
            next_msg_id: 1,
            subscriptions: Vec::new(),
            published: Vec::new(),
            reject_publish: false,
        })
    }

    pub fn broker_uri(&self) -> &str {
        &self.broker_uri
    }

    pub fn profile(&self) -> BrokerProfile {
        self.profile
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn subscriptions(&self) -> &[(String, Qos)] {
        &self.subscriptions
    }

    pub fn published(&self) -> &[(String, Vec<u8>)] {
        &self.published
    }

    pub fn set_reject_publish(&mut self, reject: bool) {
        self.reject_publish = reject;
    }

    /// Post a client event as the broker connection would.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.post(NetEvent::Transport(event))
    }

    fn take_msg_id(&mut self) -> u32 {
        let id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);
        id
    }
}

#[cfg(not(target_os = "espidf"))]
impl PubSubTransport for MqttAdapter {
    fn start(&mut self) -> Result<(), StackError> {
        self.running = true;
        info!("MQTT(sim): session started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StackError> {
        self.running = false;
        info!("MQTT(sim): session stopped");
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<u32, StackError> {
        self.subscriptions.push((topic.to_owned(), qos));
        Ok(self.take_msg_id())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], _qos: Qos, _retain: bool) -> Result<u32, StackError> {
        if self.reject_publish {
            return Err(StackError::FAIL);
        }
        self.published.push((topic.to_owned(), payload.to_vec()));
        Ok(self.take_msg_id())
    }
}
