//! Integration tests for the station manager: init, credential
//! persistence, reconnect policy and listener fan-out.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, OnceLock, Weak, mpsc};
use std::thread;
use std::time::Duration;

use dashlink::app::events::{ConnectivityEvent, ConnectivityState, StationEvent};
use dashlink::app::station::{MAX_LISTENERS, StationManager};
use dashlink::app::ports::StationRadio;
use dashlink::config::Credentials;
use dashlink::error::{NetError, StackError, StorageError};

use crate::mock_net::{Call, CallLog, MockRadio, MockStorage, RecordingListener, count};

fn make() -> (StationManager<MockStorage, MockRadio>, MockStorage, MockRadio) {
    let storage = MockStorage::new();
    let radio = MockRadio::new();
    let station = StationManager::new(storage.clone(), radio.clone());
    (station, storage, radio)
}

fn creds(ssid: &str, password: &str) -> Credentials {
    Credentials::new(ssid, password).unwrap()
}

// ── Init ──────────────────────────────────────────────────────

#[test]
fn init_is_idempotent() {
    let (station, _storage, radio) = make();
    station.init(None).unwrap();
    let calls_after_first = radio.log.lock().unwrap().len();

    station.init(Some(&creds("Other", "pw"))).unwrap();
    assert_eq!(radio.log.lock().unwrap().len(), calls_after_first);
    assert!(!station.has_credentials(), "second init must not apply credentials");
}

#[test]
fn init_brings_up_radio_in_order() {
    let (station, _storage, radio) = make();
    station.init(Some(&creds("HomeNet", "secret123"))).unwrap();
    assert_eq!(
        *radio.log.lock().unwrap(),
        vec![
            Call::RadioInit,
            Call::StationMode,
            Call::ApplyConfig {
                ssid: "HomeNet".into(),
                password: "secret123".into()
            },
            Call::RadioStart,
        ]
    );
    assert!(station.is_initialized());
    assert_eq!(station.state(), ConnectivityState::Idle);
}

#[test]
fn init_without_credentials_skips_config() {
    let (station, _storage, radio) = make();
    station.init(None).unwrap();
    assert_eq!(radio.last_config(), None);
    assert_eq!(count(&radio.log, |c| *c == Call::RadioStart), 1);
}

#[test]
fn credentials_survive_power_cycle() {
    let (station, storage, _radio) = make();
    station.init(Some(&creds("HomeNet", "secret123"))).unwrap();
    assert_eq!(storage.committed_str("wifi_mgr", "ssid").as_deref(), Some("HomeNet"));
    assert_eq!(storage.committed_str("wifi_mgr", "pass").as_deref(), Some("secret123"));

    let rebooted = StationManager::new(storage.power_cycle(), MockRadio::new());
    rebooted.init(None).unwrap();
    assert_eq!(rebooted.get_credentials(), Some(creds("HomeNet", "secret123")));
}

#[test]
fn empty_initial_ssid_loads_stored_credentials() {
    let (station, storage, radio) = make();
    storage.seed_str("wifi_mgr", "ssid", "Stored");
    storage.seed_str("wifi_mgr", "pass", "pw");

    station.init(Some(&creds("", "ignored"))).unwrap();
    assert_eq!(station.get_credentials(), Some(creds("Stored", "pw")));
    assert_eq!(radio.last_config(), Some(("Stored".into(), "pw".into())));
}

#[test]
fn missing_stored_password_reads_as_empty() {
    let (station, storage, _radio) = make();
    storage.seed_str("wifi_mgr", "ssid", "OpenNet");
    station.init(None).unwrap();
    assert_eq!(station.get_credentials(), Some(creds("OpenNet", "")));
}

#[test]
fn init_erases_partition_that_needs_it() {
    let (station, storage, _radio) = make();
    storage.seed_str("wifi_mgr", "ssid", "Old");
    storage.push_init_result(Err(StorageError::NeedsErase));

    station.init(None).unwrap();
    assert_eq!(storage.state.lock().unwrap().erase_count, 1);
    assert!(!station.has_credentials(), "erase wipes stored credentials");
}

#[test]
fn storage_failure_is_fatal() {
    let (station, storage, _radio) = make();
    storage.push_init_result(Err(StorageError::IoError(0x1101)));
    assert!(matches!(station.init(None), Err(NetError::Fatal(_))));
    assert!(!station.is_initialized());
}

#[test]
fn radio_failure_is_fatal() {
    let (station, _storage, radio) = make();
    radio.fail_init.store(true, std::sync::atomic::Ordering::Relaxed);
    assert!(matches!(station.init(None), Err(NetError::Fatal(e)) if e.code() == 0x3001));
}

#[test]
fn failed_persist_still_uses_credentials() {
    let (station, storage, radio) = make();
    storage.state.lock().unwrap().fail_writes = true;
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    assert!(station.has_credentials());
    assert_eq!(storage.committed_str("wifi_mgr", "ssid"), None);
    assert_eq!(radio.last_config(), Some(("HomeNet".into(), "pw".into())));
}

// ── Credentials ───────────────────────────────────────────────

#[test]
fn set_credentials_without_persist_is_not_stored() {
    let (station, storage, radio) = make();
    station.init(None).unwrap();
    station.set_credentials(&creds("Temp", "pw"), false).unwrap();

    assert_eq!(storage.committed_str("wifi_mgr", "ssid"), None);
    assert_eq!(radio.last_config(), Some(("Temp".into(), "pw".into())));
    assert_eq!(radio.connects(), 0, "set_credentials never connects");
}

#[test]
fn set_credentials_before_init_is_not_applied() {
    let (station, _storage, radio) = make();
    station.set_credentials(&creds("Early", "pw"), true).unwrap();
    assert_eq!(radio.last_config(), None);
    assert!(station.has_credentials());
}

#[test]
fn empty_ssid_is_stored_but_reported() {
    let (station, storage, _radio) = make();
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    assert_eq!(station.set_credentials(&creds("", "pw"), true), Err(NetError::InvalidState));
    assert!(!station.has_credentials());
    assert_eq!(station.get_credentials(), None);
    assert_eq!(storage.committed_str("wifi_mgr", "ssid").as_deref(), Some("HomeNet"));
}

#[test]
fn connect_reapplies_config() {
    let (station, _storage, radio) = make();
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    radio.log.lock().unwrap().clear();

    station.connect().unwrap();
    assert_eq!(
        *radio.log.lock().unwrap(),
        vec![
            Call::ApplyConfig {
                ssid: "HomeNet".into(),
                password: "pw".into()
            },
            Call::Connect,
        ]
    );
}

#[test]
fn connect_rejected_by_radio_is_fail() {
    let (station, _storage, radio) = make();
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    radio.reject_connect.store(true, std::sync::atomic::Ordering::Relaxed);
    assert_eq!(station.connect(), Err(NetError::Fail));
}

#[test]
fn connect_without_credentials_is_invalid_state() {
    let (station, _storage, radio) = make();
    station.init(None).unwrap();
    assert_eq!(station.connect(), Err(NetError::InvalidState));
    assert_eq!(radio.connects(), 0);
}

// ── Reconnect policy ──────────────────────────────────────────

#[test]
fn started_connects_only_with_credentials() {
    let (station, _storage, radio) = make();
    station.init(None).unwrap();
    station.handle_station_event(StationEvent::Started);
    assert_eq!(radio.connects(), 0);

    station.set_credentials(&creds("HomeNet", "pw"), false).unwrap();
    station.handle_station_event(StationEvent::Started);
    assert_eq!(radio.connects(), 1);
    assert_eq!(station.state(), ConnectivityState::Started);
}

#[test]
fn each_disconnect_requests_exactly_one_connect() {
    let (station, _storage, radio) = make();
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();

    for n in 1..=5 {
        station.handle_station_event(StationEvent::Disconnected);
        assert_eq!(radio.connects(), n);
    }
    assert_eq!(station.state(), ConnectivityState::Disconnected);
}

#[test]
fn connected_and_got_ip_do_not_reconnect() {
    let (station, _storage, radio) = make();
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    station.handle_station_event(StationEvent::Connected);
    station.handle_station_event(StationEvent::GotIp(Ipv4Addr::new(192, 168, 4, 2)));
    assert_eq!(radio.connects(), 0);
    assert_eq!(station.state(), ConnectivityState::Connected);
    assert_eq!(station.ip_address(), Some(Ipv4Addr::new(192, 168, 4, 2)));
}

#[test]
fn rejected_reconnect_is_not_retried() {
    let (station, _storage, radio) = make();
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    radio.reject_connect.store(true, std::sync::atomic::Ordering::Relaxed);
    station.handle_station_event(StationEvent::Disconnected);
    assert_eq!(radio.connects(), 0);
}

// ── Fan-out ───────────────────────────────────────────────────

fn shared_station() -> (StationManager<MockStorage, MockRadio>, CallLog) {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let station = StationManager::new(MockStorage::new(), MockRadio::with_log(log.clone()));
    (station, log)
}

#[test]
fn listeners_run_in_registration_order() {
    let (station, log) = shared_station();
    for id in 0..MAX_LISTENERS {
        station
            .register_event_handler(Arc::new(RecordingListener { id, log: log.clone() }))
            .unwrap();
    }
    station.handle_station_event(StationEvent::Connected);

    let notified: Vec<usize> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|c| match c {
            Call::Notified { listener, event } => {
                assert_eq!(*event, ConnectivityEvent::Connected);
                Some(*listener)
            }
            _ => None,
        })
        .collect();
    assert_eq!(notified, vec![0, 1, 2, 3]);
}

#[test]
fn fifth_listener_is_rejected() {
    let (station, log) = shared_station();
    for id in 0..MAX_LISTENERS {
        station
            .register_event_handler(Arc::new(RecordingListener { id, log: log.clone() }))
            .unwrap();
    }
    let extra = Arc::new(RecordingListener { id: 99, log: log.clone() });
    assert_eq!(station.register_event_handler(extra), Err(NetError::NoMem));

    station.handle_station_event(StationEvent::Started);
    assert_eq!(count(&log, |c| matches!(c, Call::Notified { listener: 99, .. })), 0);
    assert_eq!(count(&log, |c| matches!(c, Call::Notified { .. })), MAX_LISTENERS);
}

#[test]
fn listeners_are_notified_before_reconnect() {
    let (station, log) = shared_station();
    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    station
        .register_event_handler(Arc::new(RecordingListener { id: 0, log: log.clone() }))
        .unwrap();
    log.lock().unwrap().clear();

    station.handle_station_event(StationEvent::Disconnected);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Call::Notified {
                listener: 0,
                event: ConnectivityEvent::Disconnected
            },
            Call::Connect,
        ]
    );
}

#[test]
fn got_ip_payload_reaches_listeners() {
    let (station, log) = shared_station();
    station
        .register_event_handler(Arc::new(RecordingListener { id: 0, log: log.clone() }))
        .unwrap();
    let ip = Ipv4Addr::new(10, 1, 2, 3);
    station.handle_station_event(StationEvent::GotIp(ip));
    assert_eq!(
        log.lock().unwrap().last(),
        Some(&Call::Notified {
            listener: 0,
            event: ConnectivityEvent::GotIp(ip)
        })
    );
}

// ── Blocking stack calls ──────────────────────────────────────

type WaitingStation = StationManager<MockStorage, WaitingRadio>;

/// Radio whose `connect()` waits for another task that queries the manager.
struct WaitingRadio {
    station: Arc<OnceLock<Weak<WaitingStation>>>,
    answers: Arc<Mutex<Vec<Option<bool>>>>,
}

impl StationRadio for WaitingRadio {
    fn init(&mut self) -> Result<(), StackError> {
        Ok(())
    }
    fn set_station_mode(&mut self) -> Result<(), StackError> {
        Ok(())
    }
    fn apply_config(&mut self, _ssid: &str, _password: &str) -> Result<(), StackError> {
        Ok(())
    }
    fn start(&mut self) -> Result<(), StackError> {
        Ok(())
    }
    fn connect(&mut self) -> Result<(), StackError> {
        let station = self.station.get().and_then(Weak::upgrade);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(station.map(|s| s.has_credentials()));
        });
        let answer = rx.recv_timeout(Duration::from_secs(2)).ok().flatten();
        self.answers.lock().unwrap().push(answer);
        Ok(())
    }
}

#[test]
fn manager_stays_queryable_during_radio_calls() {
    let cell = Arc::new(OnceLock::new());
    let answers = Arc::new(Mutex::new(Vec::new()));
    let radio = WaitingRadio {
        station: cell.clone(),
        answers: answers.clone(),
    };
    let station: Arc<WaitingStation> = Arc::new(StationManager::new(MockStorage::new(), radio));
    let _ = cell.set(Arc::downgrade(&station));

    station.init(Some(&creds("HomeNet", "pw"))).unwrap();
    station.handle_station_event(StationEvent::Disconnected);
    station.connect().unwrap();

    assert_eq!(*answers.lock().unwrap(), vec![Some(true), Some(true)]);
}
