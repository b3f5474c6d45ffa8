//! Dashlink Firmware — Main Entry Point
//!
//! Hexagonal architecture with a single event-delivery thread.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  NvsAdapter     WifiAdapter     MqttAdapter   LogConnectivity  │
//! │  (StoragePort)  (StationRadio)  (PubSub)      Sink (Listener)  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  StationManager ──listener──▶ SessionBridge            │    │
//! │  │        ▲                          │                    │    │
//! │  │        └──── Dashboard ◀──────────┘                    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  EventPump (net-events thread) · UI loop (main thread)         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;

use dashlink::adapters::log_sink::LogConnectivitySink;
use dashlink::adapters::mqtt::MqttAdapter;
use dashlink::adapters::nvs::NvsAdapter;
use dashlink::adapters::wifi::WifiAdapter;
use dashlink::app::dashboard::{Dashboard, UiEvent, format_temperature};
use dashlink::app::session::SessionBridge;
use dashlink::app::station::StationManager;
use dashlink::config::{BrokerProfile, BrokerSecrets, SessionConfig};
use dashlink::events::{EventPump, route};

/// Driver callbacks post here; the `net-events` thread drains it.
static EVENTS: EventPump = EventPump::new();

const EVENT_TASK_STACK: usize = 6 * 1024;
const UI_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Dashlink v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // ── 2. Core objects ───────────────────────────────────────
    let station = Arc::new(StationManager::new(
        NvsAdapter::new(),
        WifiAdapter::new(peripherals.modem, sysloop, &EVENTS),
    ));
    let bridge: Arc<SessionBridge<MqttAdapter>> = Arc::new(SessionBridge::new());
    let dashboard = Arc::new(Dashboard::new());

    station.register_event_handler(Arc::new(LogConnectivitySink::new()))?;
    station.register_event_handler(dashboard.clone())?;

    // ── 3. Station (initialises NVS, starts the radio) ────────
    station.init(None)?;
    if !station.has_credentials() {
        warn!("No Wi-Fi credentials stored; waiting for the settings screen");
    }

    // ── 4. Broker session (TLS when secrets are provisioned) ──
    let secrets = match BrokerSecrets::load(&NvsAdapter::new()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Broker secrets unreadable ({}), using plaintext profile", e);
            None
        }
    };
    let profile = if secrets.is_some() { BrokerProfile::Tls } else { BrokerProfile::Plaintext };
    let session_config = SessionConfig::default().with_profile(profile);

    bridge.init(
        &station,
        Some(&session_config),
        |cfg| MqttAdapter::new(cfg, secrets.as_ref(), &EVENTS),
        Some(dashboard.message_handler()),
        Some(dashboard.status_handler()),
    )?;

    // ── 5. Event delivery ─────────────────────────────────────
    // Started onward are queued until this thread runs; the queue depth
    // covers the events produced during bring-up.
    {
        let (station, bridge) = (station.clone(), bridge.clone());
        thread::Builder::new()
            .name("net-events".into())
            .stack_size(EVENT_TASK_STACK)
            .spawn(move || {
                EVENTS.run(|event| route(event, &station, &bridge));
            })?;
    }

    info!("Connectivity core running");

    // ── 6. UI loop ────────────────────────────────────────────
    loop {
        while let Some(event) = dashboard.next_ui_event() {
            match event {
                UiEvent::Temperature(t) => info!("UI | temperature {}", format_temperature(t)),
                UiEvent::WifiStatus(text) => info!("UI | wifi: {}", text),
                UiEvent::MqttStatus(text) => info!("UI | mqtt: {}", text),
            }
        }
        thread::sleep(UI_POLL_INTERVAL);
    }
}
