//! End-to-end tests for ControllerManager over the loopback backend

use impact_control::backend::BackendSelection;
use impact_control::{
    callback, Brightness, CcCallback, ControlEvent, ControllerManager, LoopbackBackend,
    SessionOptions, SessionState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn start(backend: &LoopbackBackend) -> ControllerManager {
    ControllerManager::with_backend(Arc::new(backend.clone()), SessionOptions::default())
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> CcCallback {
    let log = log.clone();
    callback(move |event: &ControlEvent| {
        log.lock().push(format!("{}:{}:{}", tag, event.value, event.device));
        Ok(())
    })
}

#[test]
fn test_connects_every_port() {
    let backend = LoopbackBackend::new(["Pad", "Knobs"]);
    let mut manager = start(&backend);

    assert!(manager.is_connected());
    assert_eq!(manager.connected_devices(), vec!["Pad", "Knobs"]);
    assert_eq!(manager.primary_device().as_deref(), Some("Pad"));
    assert_eq!(manager.backend_name(), Some("loopback"));
    assert!(manager
        .session_states()
        .iter()
        .all(|(_, state)| *state == SessionState::Polling));

    manager.close();
    assert!(!backend.is_open(0));
    assert!(!backend.is_open(1));
}

#[test]
fn test_failed_port_is_skipped() {
    let backend = LoopbackBackend::new(["Broken", "Pad"]);
    backend.refuse_open(0);
    let manager = start(&backend);

    assert_eq!(manager.available_ports(), vec!["Broken", "Pad"]);
    assert_eq!(manager.connected_devices(), vec!["Pad"]);

    backend.send_cc(1, 0, 21, 33);
    assert!(wait_for(|| manager.get(21, 0) == 33));
}

#[test]
fn test_control_change_updates_state() {
    let backend = LoopbackBackend::new(["Pad"]);
    let manager = start(&backend);

    assert_eq!(manager.get(74, 64), 64);
    backend.send_cc(0, 9, 74, 12);

    assert!(wait_for(|| manager.get(74, 64) == 12));
    let last = manager.last_event().unwrap();
    assert_eq!(last.controller, 74);
    assert_eq!(last.value, 12);
    assert_eq!(last.channel, 9);
    assert_eq!(&*last.device, "Pad");
}

#[test]
fn test_non_control_change_is_ignored() {
    let backend = LoopbackBackend::new(["Keys"]);
    let manager = start(&backend);
    let log = Arc::new(Mutex::new(Vec::new()));
    manager.subscribe(60, recorder(&log, "cb"));

    backend.send(0, &[0x90, 60, 100]); // Note On
    backend.send(0, &[0xE0, 0, 64]); // Pitch Bend
    backend.send(0, &[0xB0]); // too short
    backend.send_cc(0, 0, 1, 1); // marker

    assert!(wait_for(|| manager.get(1, 0) == 1));
    assert_eq!(manager.get(60, 99), 99);
    assert_eq!(manager.state().len(), 1);
    assert!(log.lock().is_empty());
}

#[test]
fn test_callbacks_in_order_with_fault_isolation() {
    let backend = LoopbackBackend::new(["Pad"]);
    let manager = start(&backend);
    let log = Arc::new(Mutex::new(Vec::new()));

    manager.subscribe(21, recorder(&log, "one"));
    manager.subscribe(21, callback(|_| panic!("visual module bug")));
    manager.subscribe(21, callback(|_| anyhow::bail!("visual module error")));
    manager.subscribe(21, recorder(&log, "four"));

    backend.send_cc(0, 0, 21, 5);
    assert!(wait_for(|| log.lock().len() == 2));

    backend.send_cc(0, 0, 21, 6);
    assert!(wait_for(|| log.lock().len() == 4));

    assert_eq!(
        *log.lock(),
        vec!["one:5:Pad", "four:5:Pad", "one:6:Pad", "four:6:Pad"]
    );
    assert_eq!(manager.session_states()[0].1, SessionState::Polling);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let backend = LoopbackBackend::new(["Pad"]);
    let manager = start(&backend);
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = recorder(&log, "a");
    let b = recorder(&log, "b");

    manager.subscribe(10, a.clone());
    manager.subscribe(10, b.clone());
    manager.subscribe(11, a.clone());

    assert!(manager.unsubscribe(10, &a));
    assert!(!manager.unsubscribe(10, &a));

    backend.send_cc(0, 0, 10, 1);
    backend.send_cc(0, 0, 11, 2);
    assert!(wait_for(|| log.lock().len() == 2));
    assert_eq!(*log.lock(), vec!["b:1:Pad", "a:2:Pad"]);
}

#[test]
fn test_last_event_follows_wall_clock_across_devices() {
    let backend = LoopbackBackend::new(["First", "Second"]);
    let manager = start(&backend);

    backend.send_cc(0, 0, 7, 10);
    assert!(wait_for(|| manager.get(7, 0) == 10));

    backend.send_cc(1, 0, 8, 20);
    assert!(wait_for(|| manager.get(8, 0) == 20));

    let last = manager.last_event().unwrap();
    assert_eq!(&*last.device, "Second");
    assert_eq!(last.controller, 8);

    // Same controller from two devices shares one slot
    backend.send_cc(0, 0, 8, 30);
    assert!(wait_for(|| manager.get(8, 0) == 30));
    assert_eq!(&*manager.last_event().unwrap().device, "First");
}

#[test]
fn test_failing_device_does_not_affect_others() {
    let backend = LoopbackBackend::new(["Flaky", "Solid"]);
    let mut manager = start(&backend);

    backend.fail_next_read(0);
    assert!(wait_for(|| manager.session_states()[0].1 == SessionState::Closed));

    backend.send_cc(1, 0, 3, 3);
    assert!(wait_for(|| manager.get(3, 0) == 3));
    assert_eq!(manager.session_states()[1].1, SessionState::Polling);

    manager.close();
    assert_eq!(backend.close_count(0), 1);
    assert_eq!(backend.close_count(1), 1);
}

#[test]
fn test_close_is_bounded_with_stuck_device() {
    let backend = LoopbackBackend::new(["Stuck", "Fine"]);
    let options = SessionOptions {
        shutdown_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    };
    let mut manager = ControllerManager::with_backend(Arc::new(backend.clone()), options);

    backend.stall_reads(0, Duration::from_millis(600));
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    manager.close();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!backend.is_open(0));
    assert!(!backend.is_open(1));
    assert!(!manager.is_connected());
}

#[test]
fn test_backend_absence_degrades_to_defaults() {
    let mut manager = ControllerManager::from_selection(
        BackendSelection::Unavailable {
            reason: "no driver".to_string(),
        },
        SessionOptions::default(),
    );

    assert!(!manager.is_connected());
    assert!(manager.connected_devices().is_empty());
    for controller in 0..=127u8 {
        assert_eq!(manager.get(controller, controller), controller);
    }
    assert!(manager.last_event().is_none());
    manager.close();
}

#[test]
fn test_brightness_follows_reserved_controller() {
    let backend = LoopbackBackend::new(["Fader"]);
    let manager = start(&backend);
    let brightness = Brightness::default();
    brightness.attach(&manager, 7);

    backend.send_cc(0, 0, 7, 0);
    assert!(wait_for(|| brightness.get() == 0.0));

    backend.send_cc(0, 0, 7, 127);
    assert!(wait_for(|| brightness.get() == 1.0));
}

#[test]
fn test_callback_sees_state_already_updated() {
    let backend = LoopbackBackend::new(["Pad"]);
    let manager = start(&backend);
    let state = manager.state().clone();
    let observed = Arc::new(Mutex::new(None));

    let sink = observed.clone();
    manager.subscribe(
        40,
        callback(move |event| {
            *sink.lock() = Some(state.get(event.controller, 0));
            Ok(())
        }),
    );

    backend.send_cc(0, 0, 40, 77);
    assert!(wait_for(|| observed.lock().is_some()));
    assert_eq!(*observed.lock(), Some(77));
}
