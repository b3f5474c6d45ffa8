//! WiFi station-mode adapter.
//!
//! Implements [`StationRadio`], the hexagonal boundary between the
//! station manager and the Wi-Fi driver.  Driver and IP events are
//! forwarded into the [`EventPump`] as [`StationEvent`]s.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver calls via `esp_idf_svc::wifi`.
//! - **all other targets**: recording stubs for host-side tests.

use log::info;

use crate::app::ports::StationRadio;
use crate::error::StackError;

#[cfg(target_os = "espidf")]
use {
    crate::app::events::StationEvent,
    crate::events::{EventPump, NetEvent},
    core::net::Ipv4Addr,
    esp_idf_hal::modem::Modem,
    esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System},
    esp_idf_svc::netif::IpEvent,
    esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent},
};

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct WifiAdapter {
    modem: Option<Modem>,
    sysloop: EspSystemEventLoop,
    events: &'static EventPump,
    wifi: Option<EspWifi<'static>>,
    subscriptions: Vec<EspSubscription<'static, System>>,
}

#[cfg(target_os = "espidf")]
impl WifiAdapter {
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop, events: &'static EventPump) -> Self {
        Self {
            modem: Some(modem),
            sysloop,
            events,
            wifi: None,
            subscriptions: Vec::new(),
        }
    }

    fn driver(&mut self) -> Result<&mut EspWifi<'static>, StackError> {
        self.wifi.as_mut().ok_or(StackError::FAIL)
    }

    fn subscribe_events(&mut self) -> Result<(), StackError> {
        let events = self.events;
        let wifi_sub = self.sysloop.subscribe::<WifiEvent, _>(move |event| {
            let ev = match event {
                WifiEvent::StaStarted => StationEvent::Started,
                WifiEvent::StaConnected(_) => StationEvent::Connected,
                WifiEvent::StaDisconnected(_) => StationEvent::Disconnected,
                _ => return,
            };
            events.post(NetEvent::Station(ev));
        })?;

        let ip_sub = self.sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(assignment) = event {
                let ip = Ipv4Addr::from(assignment.ip().octets());
                events.post(NetEvent::Station(StationEvent::GotIp(ip)));
            }
        })?;

        self.subscriptions.push(wifi_sub);
        self.subscriptions.push(ip_sub);
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
impl StationRadio for WifiAdapter {
    fn init(&mut self) -> Result<(), StackError> {
        if self.wifi.is_some() {
            return Ok(());
        }
        let modem = self.modem.take().ok_or(StackError::FAIL)?;
        // NVS is owned by the station manager; the driver does not persist
        // its own copy of the configuration.
        let wifi = EspWifi::new(modem, self.sysloop.clone(), None)?;
        self.wifi = Some(wifi);
        self.subscribe_events()?;
        info!("WiFi(espidf): driver initialised");
        Ok(())
    }

    fn set_station_mode(&mut self) -> Result<(), StackError> {
        self.driver()?
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        Ok(())
    }

    fn apply_config(&mut self, ssid: &str, password: &str) -> Result<(), StackError> {
        let config = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| StackError::FAIL)?,
            password: password.try_into().map_err(|_| StackError::FAIL)?,
            // Threshold only: accept any security the AP offers.
            auth_method: AuthMethod::None,
            ..Default::default()
        };
        self.driver()?.set_configuration(&Configuration::Client(config))?;
        info!("WiFi(espidf): station config set for '{}'", ssid);
        Ok(())
    }

    fn start(&mut self) -> Result<(), StackError> {
        self.driver()?.start()?;
        Ok(())
    }

    fn connect(&mut self) -> Result<(), StackError> {
        self.driver()?.connect()?;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct WifiAdapter {
    initialized: bool,
    station_mode: bool,
    started: bool,
    config: Option<(String, String)>,
    connect_requests: u32,
    reject_connect: bool,
}

#[cfg(not(target_os = "espidf"))]
impl WifiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn connect_requests(&self) -> u32 {
        self.connect_requests
    }

    /// Last configuration applied: `(ssid, password)`.
    pub fn applied_config(&self) -> Option<(&str, &str)> {
        self.config.as_ref().map(|(s, p)| (s.as_str(), p.as_str()))
    }

    /// Make subsequent connect requests fail.
    pub fn set_reject_connect(&mut self, reject: bool) {
        self.reject_connect = reject;
    }
}

#[cfg(not(target_os = "espidf"))]
impl StationRadio for WifiAdapter {
    fn init(&mut self) -> Result<(), StackError> {
        self.initialized = true;
        info!("WiFi(sim): driver initialised");
        Ok(())
    }

    fn set_station_mode(&mut self) -> Result<(), StackError> {
        if !self.initialized {
            return Err(StackError::FAIL);
        }
        self.station_mode = true;
        Ok(())
    }

    fn apply_config(&mut self, ssid: &str, password: &str) -> Result<(), StackError> {
        self.config = Some((ssid.to_owned(), password.to_owned()));
        Ok(())
    }

    fn start(&mut self) -> Result<(), StackError> {
        if !self.station_mode {
            return Err(StackError::FAIL);
        }
        self.started = true;
        Ok(())
    }

    fn connect(&mut self) -> Result<(), StackError> {
        if self.reject_connect || !self.started {
            return Err(StackError::FAIL);
        }
        self.connect_requests += 1;
        info!("WiFi(sim): connect request #{}", self.connect_requests);
        Ok(())
    }
}
