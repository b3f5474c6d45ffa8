//! Log-based connectivity listener.
//!
//! Writes every station transition to the ESP-IDF logger (UART / USB-CDC
//! in production).  Registered first so the log shows each event before
//! any other listener reacts to it.

use log::info;

use crate::app::events::{ConnectivityEvent, ConnectivityListener};

/// Listener that logs every [`ConnectivityEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogConnectivitySink;

impl LogConnectivitySink {
    pub fn new() -> Self {
        Self
    }
}

impl ConnectivityListener for LogConnectivitySink {
    fn on_connectivity_event(&self, event: &ConnectivityEvent) {
        match event {
            ConnectivityEvent::Started => info!("NET | station started"),
            ConnectivityEvent::Connected => info!("NET | associated"),
            ConnectivityEvent::Disconnected => info!("NET | link lost, reconnecting"),
            ConnectivityEvent::GotIp(ip) => info!("NET | address {}", ip),
        }
    }
}
