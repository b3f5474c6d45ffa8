//! Events flowing through the connectivity core.
//!
//! Inbound events come from the stack ([`StationEvent`], [`TransportEvent`])
//! and are delivered by the [`EventPump`](crate::events::EventPump).
//! Outbound notifications ([`ConnectivityEvent`]) are fanned out by the
//! [`StationManager`](super::station::StationManager) to every registered
//! [`ConnectivityListener`].

use core::net::Ipv4Addr;

use crate::utils::truncated_bytes;

/// Inbound topic buffer (bytes, excluding terminator).
pub const MAX_TOPIC_LEN: usize = 127;
/// Inbound payload buffer (bytes, excluding terminator).
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Raw station / IP events reported by the Wi-Fi stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationEvent {
    Started,
    Connected,
    Disconnected,
    GotIp(Ipv4Addr),
}

/// Connectivity state tracked by the station manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectivityState {
    #[default]
    Idle,
    Started,
    Connected,
    Disconnected,
}

/// Notification delivered to listeners.  Only `GotIp` carries a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Started,
    Connected,
    Disconnected,
    GotIp(Ipv4Addr),
}

/// Receiver of connectivity notifications.
///
/// Called synchronously from the event-delivery context, in registration
/// order.  Implementations must return promptly and must not block.
pub trait ConnectivityListener: Send + Sync {
    fn on_connectivity_event(&self, event: &ConnectivityEvent);
}

impl<F> ConnectivityListener for F
where
    F: Fn(&ConnectivityEvent) + Send + Sync,
{
    fn on_connectivity_event(&self, event: &ConnectivityEvent) {
        self(event);
    }
}

/// A received publish, copied into fixed buffers.
///
/// Anything beyond [`MAX_TOPIC_LEN`] / [`MAX_PAYLOAD_LEN`] bytes is dropped
/// silently at copy time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    topic: heapless::Vec<u8, MAX_TOPIC_LEN>,
    payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
}

impl InboundFrame {
    pub fn copy_from(topic: &[u8], payload: &[u8]) -> Self {
        Self {
            topic: truncated_bytes(topic),
            payload: truncated_bytes(payload),
        }
    }

    pub fn topic(&self) -> &[u8] {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Events reported by the MQTT client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Data(InboundFrame),
}
