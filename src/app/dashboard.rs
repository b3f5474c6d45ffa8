//! Dashboard glue between the touch UI and the connectivity core.
//!
//! Widget callbacks call into [`Dashboard`], which publishes button events
//! through a [`ButtonEventSink`] and forwards credentials to the station
//! manager.  Status coming back from the core (temperature readings,
//! Wi-Fi and broker state) is turned into [`UiEvent`]s on a bounded queue
//! that the render loop drains.  Nothing here touches a display.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::String;
use log::{info, warn};

use crate::config::Credentials;

use super::events::{ConnectivityEvent, ConnectivityListener};
use super::ports::{ButtonEventSink, StationRadio, StoragePort};
use super::session::{MessageHandler, StatusHandler};
use super::station::StationManager;

// ── Button identifiers (appended to the publish prefix) ───────

pub const BUTTON_MEDIA_PLAY: &str = "media/play";
pub const BUTTON_MEDIA_VOLUME_UP: &str = "media/volume_up";
pub const BUTTON_MEDIA_VOLUME_DOWN: &str = "media/volume_down";
pub const BUTTON_MEDIA_PREV: &str = "media/previous";
pub const BUTTON_MEDIA_NEXT: &str = "media/next";
pub const BUTTON_HVAC_TEMP_UP: &str = "hvac/temp_up";
pub const BUTTON_HVAC_TEMP_DOWN: &str = "hvac/temp_down";
pub const BUTTON_HVAC_POWER: &str = "hvac/power";
pub const BUTTON_HVAC_INTENSITY: &str = "hvac/intensity";
pub const BUTTON_HVAC_TEMP_SET: &str = "hvac/temp_set";

// ── Setpoint arc ──────────────────────────────────────────────

/// Arc position 0 is "LO", position `TEMP_ARC_STEPS` is "HI".
pub const TEMP_ARC_STEPS: i32 = 28;
/// Setpoint at position 0, in tenths of a degree.
pub const TEMP_MIN_TENTHS: i32 = 160;
/// Setpoint increment per arc position, in tenths of a degree.
pub const TEMP_STEP_TENTHS: i32 = 5;

const UI_QUEUE_CAP: usize = 10;
const UI_MESSAGE_LEN: usize = 64;

pub type UiText = String<UI_MESSAGE_LEN>;

/// Update for the render loop.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Temperature(f32),
    WifiStatus(UiText),
    MqttStatus(UiText),
}

/// Permissive decimal parse of the longest numeric prefix.
///
/// Leading whitespace is skipped; anything unparsable reads as `0.0`.
pub fn parse_temperature(payload: &[u8]) -> f32 {
    let text = match core::str::from_utf8(payload) {
        Ok(s) => s,
        Err(e) => core::str::from_utf8(&payload[..e.valid_up_to()]).unwrap_or_default(),
    };
    let text = text.trim_start();
    let bytes = text.as_bytes();

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }
    if digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(0.0)
}

/// Payload for an arc position: `"LO"`, `"HI"` or the setpoint in degrees
/// (`"21"`, `"21.5"`).
pub fn setpoint_payload(position: i32) -> String<8> {
    let mut out = String::new();
    if position <= 0 {
        let _ = out.push_str("LO");
    } else if position >= TEMP_ARC_STEPS {
        let _ = out.push_str("HI");
    } else {
        let tenths = TEMP_MIN_TENTHS + position * TEMP_STEP_TENTHS;
        let _ = if tenths % 10 == 0 {
            write!(out, "{}", tenths / 10)
        } else {
            write!(out, "{}.{}", tenths / 10, tenths % 10)
        };
    }
    out
}

/// Temperature label text, one decimal: `"22.5°C"`.
pub fn format_temperature(value: f32) -> String<16> {
    let mut out = String::new();
    let _ = write!(out, "{:.1}\u{00b0}C", value);
    out
}

fn ui_text(s: &str) -> UiText {
    let mut out = UiText::new();
    crate::utils::push_truncated(&mut out, s);
    out
}

// ───────────────────────────────────────────────────────────────
// Dashboard
// ───────────────────────────────────────────────────────────────

pub struct Dashboard {
    ui_events: Channel<CriticalSectionRawMutex, UiEvent, UI_QUEUE_CAP>,
    playing: AtomicBool,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    pub const fn new() -> Self {
        Self {
            ui_events: Channel::new(),
            playing: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue; the update is dropped if the render loop is
    /// behind.
    fn enqueue(&self, event: UiEvent) {
        if self.ui_events.try_send(event).is_err() {
            warn!("Dashboard: UI queue full, update dropped");
        }
    }

    pub fn next_ui_event(&self) -> Option<UiEvent> {
        self.ui_events.try_receive().ok()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    // ── Widget callbacks ──────────────────────────────────────

    /// Toggle play/pause and publish the new command.  Returns the new
    /// playing state.
    pub fn on_play_pause(&self, sink: &impl ButtonEventSink) -> bool {
        let was_playing = self.playing.fetch_xor(true, Ordering::Relaxed);
        let command = if was_playing { "stop" } else { "play" };
        publish(sink, BUTTON_MEDIA_PLAY, command);
        !was_playing
    }

    pub fn on_action_button(&self, sink: &impl ButtonEventSink, id: &str) {
        publish(sink, id, "pressed");
    }

    pub fn on_setpoint_changed(&self, sink: &impl ButtonEventSink, position: i32) {
        publish(sink, BUTTON_HVAC_TEMP_SET, &setpoint_payload(position));
    }

    /// Settings-screen "Connect": persist the entered credentials and
    /// request association.
    pub fn on_connect_pressed<S, R>(&self, station: &StationManager<S, R>, ssid: &str, password: &str)
    where
        S: StoragePort,
        R: StationRadio,
    {
        if ssid.is_empty() {
            self.enqueue(UiEvent::WifiStatus(ui_text("SSID is required")));
            return;
        }
        let accepted = Credentials::new(ssid, password)
            .and_then(|creds| station.set_credentials(&creds, true))
            .is_ok();
        if accepted {
            self.enqueue(UiEvent::WifiStatus(ui_text("Connecting...")));
            if let Err(e) = station.connect() {
                warn!("Dashboard: connect request failed: {}", e);
            }
        } else {
            self.enqueue(UiEvent::WifiStatus(ui_text("Invalid credentials")));
        }
    }

    // ── Core callbacks ────────────────────────────────────────

    pub fn on_temperature(&self, payload: &[u8]) {
        self.enqueue(UiEvent::Temperature(parse_temperature(payload)));
    }

    pub fn on_mqtt_status(&self, connected: bool) {
        let text = if connected { "MQTT connected" } else { "MQTT disconnected" };
        self.enqueue(UiEvent::MqttStatus(ui_text(text)));
    }

    /// Session bridge message callback feeding [`on_temperature`](Self::on_temperature).
    pub fn message_handler(self: &Arc<Self>) -> MessageHandler {
        let this = Arc::clone(self);
        Arc::new(move |_topic, payload| this.on_temperature(payload))
    }

    /// Session bridge status callback feeding [`on_mqtt_status`](Self::on_mqtt_status).
    pub fn status_handler(self: &Arc<Self>) -> StatusHandler {
        let this = Arc::clone(self);
        Arc::new(move |connected| this.on_mqtt_status(connected))
    }
}

impl ConnectivityListener for Dashboard {
    fn on_connectivity_event(&self, event: &ConnectivityEvent) {
        let mut text = UiText::new();
        let _ = match event {
            ConnectivityEvent::Started => text.write_str("Wi-Fi started"),
            ConnectivityEvent::Connected => text.write_str("Wi-Fi connected"),
            ConnectivityEvent::Disconnected => text.write_str("Wi-Fi disconnected"),
            ConnectivityEvent::GotIp(ip) => write!(text, "IP: {}", ip),
        };
        self.enqueue(UiEvent::WifiStatus(text));
    }
}

fn publish(sink: &impl ButtonEventSink, id: &str, state: &str) {
    match sink.publish_button_event(id, state) {
        Ok(()) => info!("Dashboard: {} -> {}", id, state),
        Err(e) => warn!("Dashboard: publish {} failed: {}", id, e),
    }
}
