//! Integration tests for the session bridge: defaults, connectivity
//! coupling, publish gating and inbound message filtering.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak, mpsc};
use std::thread;
use std::time::Duration;

use dashlink::app::events::{ConnectivityEvent, InboundFrame, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN, StationEvent, TransportEvent};
use dashlink::app::ports::Qos;
use dashlink::app::session::{MessageHandler, SessionBridge, StatusHandler};
use dashlink::app::station::{MAX_LISTENERS, StationManager};
use dashlink::config::{
    BrokerProfile, DEFAULT_BROKER_URI, DEFAULT_PUBLISH_PREFIX, DEFAULT_SUBSCRIBE_TOPIC, DEFAULT_TLS_BROKER_URI,
    SessionConfig,
};
use dashlink::error::{NetError, StackError};
use dashlink::events::{EventPump, NetEvent};

use crate::mock_net::{MockRadio, MockStorage, MockTransport, TransportCall};

type Station = StationManager<MockStorage, MockRadio>;
type Bridge = SessionBridge<MockTransport>;

struct Rig {
    station: Station,
    bridge: Arc<Bridge>,
    transport: MockTransport,
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    statuses: Arc<Mutex<Vec<bool>>>,
}

fn rig_with(config: Option<&SessionConfig>) -> Rig {
    let station = StationManager::new(MockStorage::new(), MockRadio::new());
    let bridge = Arc::new(SessionBridge::new());
    let transport = MockTransport::new();
    let messages = Arc::new(Mutex::new(Vec::new()));
    let statuses = Arc::new(Mutex::new(Vec::new()));

    let m = messages.clone();
    let on_message: MessageHandler = Arc::new(move |topic, payload| {
        m.lock().unwrap().push((topic.to_owned(), payload.to_vec()));
    });
    let s = statuses.clone();
    let on_status: StatusHandler = Arc::new(move |up| s.lock().unwrap().push(up));

    let t = transport.clone();
    bridge
        .init(&station, config, move |_| Ok(t), Some(on_message), Some(on_status))
        .unwrap();

    Rig {
        station,
        bridge,
        transport,
        messages,
        statuses,
    }
}

fn rig() -> Rig {
    rig_with(None)
}

// ── Init ──────────────────────────────────────────────────────

#[test]
fn absent_config_resolves_to_defaults() {
    let r = rig();
    let cfg = r.bridge.config();
    assert_eq!(cfg.broker_uri.as_str(), DEFAULT_BROKER_URI);
    assert_eq!(cfg.subscribe_topic.as_str(), DEFAULT_SUBSCRIBE_TOPIC);
    assert_eq!(cfg.publish_prefix.as_str(), DEFAULT_PUBLISH_PREFIX);
}

#[test]
fn client_is_built_from_resolved_config() {
    let station = StationManager::new(MockStorage::new(), MockRadio::new());
    let bridge: Arc<Bridge> = Arc::new(SessionBridge::new());
    let seen_uri = Arc::new(Mutex::new(String::new()));
    let seen = seen_uri.clone();
    let cfg = SessionConfig::new("", "home/temp", "").unwrap().with_profile(BrokerProfile::Tls);

    bridge
        .init(
            &station,
            Some(&cfg),
            move |resolved| {
                *seen.lock().unwrap() = resolved.broker_uri.to_string();
                Ok(MockTransport::new())
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(*seen_uri.lock().unwrap(), DEFAULT_TLS_BROKER_URI);
    assert_eq!(bridge.config().subscribe_topic.as_str(), "home/temp");
}

#[test]
fn second_init_is_noop() {
    let r = rig();
    let built = AtomicU32::new(0);
    r.bridge
        .init(
            &r.station,
            None,
            |_| {
                built.fetch_add(1, Ordering::Relaxed);
                Ok(MockTransport::new())
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(built.load(Ordering::Relaxed), 0);
}

#[test]
fn client_construction_failure_is_fail() {
    let station = StationManager::new(MockStorage::new(), MockRadio::new());
    let bridge: Arc<Bridge> = Arc::new(SessionBridge::new());
    let r = bridge.init(&station, None, |_| Err(StackError::FAIL), None, None);
    assert_eq!(r, Err(NetError::Fail));
    assert!(!bridge.is_initialized());
}

#[test]
fn full_listener_table_propagates_and_drops_client() {
    let station = StationManager::new(MockStorage::new(), MockRadio::new());
    for _ in 0..MAX_LISTENERS {
        station.register_event_handler(Arc::new(|_: &ConnectivityEvent| {})).unwrap();
    }

    let dropped = Arc::new(AtomicBool::new(false));
    struct DropFlag(Arc<AtomicBool>, MockTransport);
    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Relaxed);
        }
    }
    impl dashlink::app::ports::PubSubTransport for DropFlag {
        fn start(&mut self) -> Result<(), StackError> {
            self.1.start()
        }
        fn stop(&mut self) -> Result<(), StackError> {
            self.1.stop()
        }
        fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<u32, StackError> {
            self.1.subscribe(topic, qos)
        }
        fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<u32, StackError> {
            self.1.publish(topic, payload, qos, retain)
        }
    }

    let bridge: Arc<SessionBridge<DropFlag>> = Arc::new(SessionBridge::new());
    let flag = dropped.clone();
    let r = bridge.init(&station, None, move |_| Ok(DropFlag(flag, MockTransport::new())), None, None);
    assert_eq!(r, Err(NetError::NoMem));
    assert!(dropped.load(Ordering::Relaxed));
    assert!(!bridge.is_initialized());
}

// ── Connectivity coupling ─────────────────────────────────────

#[test]
fn got_ip_starts_and_disconnect_stops_session() {
    let r = rig();
    r.station.handle_station_event(StationEvent::Started);
    r.station.handle_station_event(StationEvent::Connected);
    assert!(r.transport.calls().is_empty());

    r.station.handle_station_event(StationEvent::GotIp(Ipv4Addr::new(192, 168, 1, 9)));
    r.station.handle_station_event(StationEvent::Disconnected);
    assert_eq!(r.transport.calls(), vec![TransportCall::Start, TransportCall::Stop]);
}

#[test]
fn broker_connect_subscribes_and_reports() {
    let r = rig();
    r.bridge.handle_transport_event(TransportEvent::Connected);
    assert_eq!(
        r.transport.calls(),
        vec![TransportCall::Subscribe {
            topic: DEFAULT_SUBSCRIBE_TOPIC.into(),
            qos: Qos::AtLeastOnce
        }]
    );
    assert!(r.bridge.is_connected());

    r.bridge.handle_transport_event(TransportEvent::Disconnected);
    assert!(!r.bridge.is_connected());
    assert_eq!(*r.statuses.lock().unwrap(), vec![true, false]);
}

// ── Publish ───────────────────────────────────────────────────

#[test]
fn publish_requires_broker_session() {
    let r = rig();
    assert_eq!(r.bridge.publish_button_event("media/play", "play"), Err(NetError::InvalidState));

    r.bridge.handle_transport_event(TransportEvent::Connected);
    r.bridge.handle_transport_event(TransportEvent::Disconnected);
    assert_eq!(r.bridge.publish_button_event("media/play", "play"), Err(NetError::InvalidState));
    assert!(r.transport.publishes().is_empty());
}

#[test]
fn publish_before_init_is_invalid_state() {
    let bridge: Bridge = SessionBridge::new();
    assert_eq!(bridge.publish_button_event("hvac/power", "pressed"), Err(NetError::InvalidState));
}

#[test]
fn publish_uses_prefix_qos1_no_retain() {
    let r = rig();
    r.bridge.handle_transport_event(TransportEvent::Connected);
    r.bridge.publish_button_event("hvac/power", "pressed").unwrap();

    assert_eq!(
        r.transport.calls().last(),
        Some(&TransportCall::Publish {
            topic: "esp32lvgl/buttons/hvac/power".into(),
            payload: b"pressed".to_vec(),
            qos: Qos::AtLeastOnce,
            retain: false,
        })
    );
}

#[test]
fn publish_with_empty_id_goes_to_bare_prefix() {
    let r = rig();
    r.bridge.handle_transport_event(TransportEvent::Connected);
    r.bridge.publish_button_event("", "pressed").unwrap();
    let (topic, payload) = r.transport.publishes().pop().unwrap();
    assert_eq!(topic, format!("{}/", DEFAULT_PUBLISH_PREFIX));
    assert_eq!(payload, b"pressed");
}

#[test]
fn rejected_publish_is_fail() {
    let r = rig();
    r.bridge.handle_transport_event(TransportEvent::Connected);
    r.transport.reject_publish.store(true, Ordering::Relaxed);
    assert_eq!(r.bridge.publish_button_event("media/next", "pressed"), Err(NetError::Fail));
}

#[test]
fn long_topic_is_truncated() {
    let r = rig();
    r.bridge.handle_transport_event(TransportEvent::Connected);
    let id = "x".repeat(200);
    r.bridge.publish_button_event(&id, "pressed").unwrap();

    let (topic, _) = r.transport.publishes().pop().unwrap();
    assert_eq!(topic.len(), MAX_TOPIC_LEN);
    assert!(topic.starts_with("esp32lvgl/buttons/xxx"));
}

// ── Inbound messages ──────────────────────────────────────────

#[test]
fn only_subscribe_topic_reaches_host() {
    let r = rig();
    r.bridge
        .handle_transport_event(TransportEvent::Data(InboundFrame::copy_from(b"other/topic", b"99")));
    r.bridge.handle_transport_event(TransportEvent::Data(InboundFrame::copy_from(
        DEFAULT_SUBSCRIBE_TOPIC.as_bytes(),
        b"23.4",
    )));
    assert_eq!(
        *r.messages.lock().unwrap(),
        vec![(DEFAULT_SUBSCRIBE_TOPIC.to_owned(), b"23.4".to_vec())]
    );
}

#[test]
fn topic_prefix_match_is_not_enough() {
    let r = rig();
    let topic = format!("{}/extra", DEFAULT_SUBSCRIBE_TOPIC);
    r.bridge
        .handle_transport_event(TransportEvent::Data(InboundFrame::copy_from(topic.as_bytes(), b"1")));
    assert!(r.messages.lock().unwrap().is_empty());
}

#[test]
fn oversized_payload_is_truncated() {
    let r = rig();
    let payload = vec![b'9'; 300];
    r.bridge.handle_transport_event(TransportEvent::Data(InboundFrame::copy_from(
        DEFAULT_SUBSCRIBE_TOPIC.as_bytes(),
        &payload,
    )));
    let messages = r.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1.len(), MAX_PAYLOAD_LEN);
}

#[test]
fn data_without_message_callback_is_ignored() {
    let station = StationManager::new(MockStorage::new(), MockRadio::new());
    let bridge: Arc<Bridge> = Arc::new(SessionBridge::new());
    bridge.init(&station, None, |_| Ok(MockTransport::new()), None, None).unwrap();
    bridge.handle_transport_event(TransportEvent::Data(InboundFrame::copy_from(
        DEFAULT_SUBSCRIBE_TOPIC.as_bytes(),
        b"20",
    )));
    bridge.handle_transport_event(TransportEvent::Connected);
    assert!(bridge.is_connected());
}

// ── Blocking stack calls ──────────────────────────────────────

static STOP_PUMP: EventPump = EventPump::new();

type WaitingBridge = SessionBridge<WaitingStop>;

/// Transport whose `stop()` waits for another task, the way
/// `esp_mqtt_client_stop` waits for the MQTT task to exit.  That task posts
/// to the pump and reads bridge state before finishing.
struct WaitingStop {
    bridge: Arc<OnceLock<Weak<WaitingBridge>>>,
    finished: Arc<AtomicBool>,
}

impl dashlink::app::ports::PubSubTransport for WaitingStop {
    fn start(&mut self) -> Result<(), StackError> {
        Ok(())
    }
    fn stop(&mut self) -> Result<(), StackError> {
        let bridge = self.bridge.get().and_then(Weak::upgrade);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            STOP_PUMP.post(NetEvent::Transport(TransportEvent::Disconnected));
            let _ = tx.send(bridge.map(|b| b.is_connected()));
        });
        let reply = rx.recv_timeout(Duration::from_secs(2));
        self.finished.store(matches!(reply, Ok(Some(_))), Ordering::Relaxed);
        Ok(())
    }
    fn subscribe(&mut self, _topic: &str, _qos: Qos) -> Result<u32, StackError> {
        Ok(1)
    }
    fn publish(&mut self, _topic: &str, _payload: &[u8], _qos: Qos, _retain: bool) -> Result<u32, StackError> {
        Ok(1)
    }
}

#[test]
fn stop_can_wait_on_a_task_that_posts_events() {
    let station = StationManager::new(MockStorage::new(), MockRadio::new());
    let bridge: Arc<WaitingBridge> = Arc::new(SessionBridge::new());
    let cell = Arc::new(OnceLock::new());
    let _ = cell.set(Arc::downgrade(&bridge));
    let finished = Arc::new(AtomicBool::new(false));
    let transport = WaitingStop {
        bridge: cell,
        finished: finished.clone(),
    };
    bridge.init(&station, None, move |_| Ok(transport), None, None).unwrap();
    bridge.handle_transport_event(TransportEvent::Connected);

    station.handle_station_event(StationEvent::Disconnected);

    assert!(finished.load(Ordering::Relaxed), "task blocked while stop() was pending");
    let mut seen = Vec::new();
    STOP_PUMP.dispatch_pending(|ev| seen.push(ev));
    assert_eq!(seen, vec![NetEvent::Transport(TransportEvent::Disconnected)]);
}
