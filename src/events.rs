//! Event delivery context.
//!
//! Events are produced by:
//! - the Wi-Fi driver and IP stack (station lifecycle, DHCP lease)
//! - the MQTT client (broker session up/down, inbound publishes)
//!
//! and consumed one at a time by a single dedicated thread that routes them
//! to the station manager or the session bridge.  Station and broker
//! up/down events have their own lossless queue; inbound publishes share a
//! separate best-effort one.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ Wi-Fi / IP  │────▶│              │     │ StationManager │
//! │             │     │  EventPump   │────▶│                │
//! │ MQTT client │────▶│ ctrl | data  │     │ SessionBridge  │
//! └─────────────┘     └──────────────┘     └────────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use futures_lite::future;
use log::warn;

use crate::app::events::{InboundFrame, StationEvent, TransportEvent};
use crate::app::ports::{PubSubTransport, StationRadio, StoragePort};
use crate::app::session::SessionBridge;
use crate::app::station::StationManager;

/// Pending station and broker up/down events.
const LIFECYCLE_QUEUE_CAP: usize = 16;
/// Pending inbound publishes.
const FRAME_QUEUE_CAP: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    Station(StationEvent),
    Transport(TransportEvent),
}

/// Two queues behind one consumer.
///
/// Lifecycle events (every station event, broker connect/disconnect) are
/// never dropped: when their queue is full `post` waits for the consumer.
/// Inbound data frames are best-effort and are dropped when their own
/// queue is full, so a burst of publishes cannot crowd out a disconnect.
/// Lifecycle events are delivered ahead of queued frames.
pub struct EventPump {
    lifecycle: Channel<CriticalSectionRawMutex, NetEvent, LIFECYCLE_QUEUE_CAP>,
    frames: Channel<CriticalSectionRawMutex, InboundFrame, FRAME_QUEUE_CAP>,
}

impl Default for EventPump {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPump {
    pub const fn new() -> Self {
        Self {
            lifecycle: Channel::new(),
            frames: Channel::new(),
        }
    }

    /// Enqueue an event from a driver callback.
    ///
    /// Data frames never block and return `false` when dropped.  Lifecycle
    /// events always return `true`; if their queue is full the caller
    /// blocks until the consumer makes room.
    pub fn post(&self, event: NetEvent) -> bool {
        match event {
            NetEvent::Transport(TransportEvent::Data(frame)) => match self.frames.try_send(frame) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("EventPump: frame queue full, dropping inbound message");
                    false
                }
            },
            event => {
                if let Err(TrySendError::Full(event)) = self.lifecycle.try_send(event) {
                    warn!("EventPump: lifecycle queue full, waiting for consumer");
                    future::block_on(self.lifecycle.send(event));
                }
                true
            }
        }
    }

    fn try_next(&self) -> Option<NetEvent> {
        self.lifecycle.try_receive().ok().or_else(|| {
            self.frames
                .try_receive()
                .ok()
                .map(|frame| NetEvent::Transport(TransportEvent::Data(frame)))
        })
    }

    /// Drain all pending events into a callback, lifecycle first, each
    /// queue in FIFO order.  Returns how many were handled.
    pub fn dispatch_pending(&self, mut handler: impl FnMut(NetEvent)) -> usize {
        let mut count = 0;
        while let Some(event) = self.try_next() {
            handler(event);
            count += 1;
        }
        count
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.lifecycle.len() + self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lifecycle.is_empty() && self.frames.is_empty()
    }

    /// Block the calling thread forever, handing each event to `handler`.
    pub fn run(&self, mut handler: impl FnMut(NetEvent)) -> ! {
        loop {
            let event = future::block_on(future::or(self.lifecycle.receive(), async {
                NetEvent::Transport(TransportEvent::Data(self.frames.receive().await))
            }));
            handler(event);
        }
    }
}

/// Hand one event to its owner.
pub fn route<S, R, T>(event: NetEvent, station: &StationManager<S, R>, bridge: &SessionBridge<T>)
where
    S: StoragePort,
    R: StationRadio,
    T: PubSubTransport + Send + 'static,
{
    match event {
        NetEvent::Station(ev) => station.handle_station_event(ev),
        NetEvent::Transport(ev) => bridge.handle_transport_event(ev),
    }
}
