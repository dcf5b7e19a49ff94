//! Integration tests: a `Link<MavlinkCodec>` driving a scripted `MockTransport`

use gcs_link::codec::{Message, MessageKind, MavlinkCodec, ParamType};
use gcs_link::error::LinkError;
use gcs_link::link::{FetchOptions, FetchStatus, Link, LinkConfig, LinkState, PendingParameters};
use gcs_link::transport::{MockTransport, Transport};
use mavlink::common::{self as mav, MavCmd, MavMessage, MavParamType};
use mavlink::MavHeader;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// Helpers
// =============================================================================

fn fast_config() -> LinkConfig {
    LinkConfig {
        read_timeout: Duration::from_millis(10),
        dispatch_poll: Duration::from_millis(10),
        param_receive_timeout: Duration::from_millis(100),
        param_set_settle: Duration::from_millis(20),
        ..LinkConfig::default()
    }
}

fn new_link(config: LinkConfig) -> Link<MavlinkCodec> {
    Link::new(MavlinkCodec::new(), config)
}

fn device_header() -> MavHeader {
    MavHeader {
        system_id: 1,
        component_id: 1,
        sequence: 0,
    }
}

fn frame(msg: &MavMessage) -> Vec<u8> {
    let mut out = Vec::new();
    mavlink::write_v1_msg(&mut out, device_header(), msg).unwrap();
    out
}

fn param_value_frame(name: &str, value: f32, index: u16, count: u16) -> Vec<u8> {
    let mut param_id = [0u8; 16];
    param_id[..name.len()].copy_from_slice(name.as_bytes());
    frame(&MavMessage::PARAM_VALUE(mav::PARAM_VALUE_DATA {
        param_value: value,
        param_count: count,
        param_index: index,
        param_id,
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    }))
}

fn attitude_frame(roll: f32) -> Vec<u8> {
    frame(&MavMessage::ATTITUDE(mav::ATTITUDE_DATA {
        time_boot_ms: 0,
        roll,
        pitch: 0.0,
        yaw: 0.0,
        rollspeed: 0.0,
        pitchspeed: 0.0,
        yawspeed: 0.0,
    }))
}

/// Parse one outgoing frame as written by the link
fn parse(written: &[u8]) -> Option<MavMessage> {
    let mut reader = written;
    mavlink::read_v1_msg::<MavMessage, _>(&mut reader)
        .ok()
        .map(|(_, msg)| msg)
}

fn sent(mock: &MockTransport) -> Vec<MavMessage> {
    mock.writes().iter().filter_map(|w| parse(w)).collect()
}

fn is_request_list(msg: &MavMessage) -> bool {
    matches!(msg, MavMessage::PARAM_REQUEST_LIST(_))
}

fn is_command(msg: &MavMessage, command: MavCmd) -> bool {
    matches!(msg, MavMessage::COMMAND_LONG(data) if data.command == command)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

// =============================================================================
// At most one transport
// =============================================================================

#[test]
fn test_second_connect_is_rejected() {
    let link = new_link(fast_config());
    let first = Arc::new(MockTransport::new());
    let second = Arc::new(MockTransport::new());

    assert!(link.connect(first.clone()));
    assert!(!link.connect(second.clone()));
    assert_eq!(second.connect_count(), 0);
    assert!(!second.is_connected());

    assert!(link.disconnect());
    assert!(!first.is_connected());
    assert!(link.connect(second.clone()));
    assert!(second.is_connected());
    assert!(!first.is_connected());
    link.disconnect();
}

#[test]
fn test_transport_owned_by_another_link_is_rejected() {
    let owner = new_link(fast_config());
    let intruder = new_link(fast_config());
    let (lost, on_disconnect) = counter();
    owner.on_disconnect(on_disconnect);

    let mock = Arc::new(MockTransport::new());
    assert!(owner.connect(mock.clone()));
    assert!(!intruder.connect(mock.clone()));
    assert_eq!(intruder.state(), LinkState::Disconnected);
    assert_eq!(mock.connect_count(), 1);

    // Nothing the second link does may close the owner's handle
    assert!(!intruder.disconnect());
    assert!(!intruder.reconnect());
    assert!(mock.is_connected());
    assert!(owner.is_connected());
    assert_eq!(lost.load(Ordering::SeqCst), 0);

    assert!(owner.disconnect());
    assert_eq!(lost.load(Ordering::SeqCst), 1);
    assert!(intruder.connect(mock.clone()));
    intruder.disconnect();
}

#[test]
fn test_concurrent_connects_open_one_transport() {
    let link = new_link(fast_config());
    let mocks: Vec<Arc<MockTransport>> = (0..8).map(|_| Arc::new(MockTransport::new())).collect();

    let handles: Vec<_> = mocks
        .iter()
        .map(|mock| {
            let link = link.clone();
            let mock = Arc::clone(mock);
            thread::spawn(move || link.connect(mock))
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(mocks.iter().filter(|m| m.is_connected()).count(), 1);
    assert_eq!(mocks.iter().map(|m| m.connect_count()).sum::<usize>(), 1);
    link.disconnect();
    assert_eq!(mocks.iter().filter(|m| m.is_connected()).count(), 0);
}

#[test]
fn test_connect_disconnect_cycles_never_overlap() {
    let link = new_link(fast_config());
    let mocks: Vec<Arc<MockTransport>> = (0..3).map(|_| Arc::new(MockTransport::new())).collect();

    for round in 0..12 {
        let mock = &mocks[round % mocks.len()];
        link.connect(mock.clone());
        assert!(mocks.iter().filter(|m| m.is_connected()).count() <= 1);
        if round % 3 != 2 {
            link.disconnect();
        }
        assert!(mocks.iter().filter(|m| m.is_connected()).count() <= 1);
    }
    link.disconnect();
}

// =============================================================================
// Listener isolation and ordering
// =============================================================================

#[test]
fn test_failing_listener_does_not_block_others() {
    let link = new_link(fast_config());
    let first = Arc::new(Mutex::new(Vec::new()));
    let third = Arc::new(Mutex::new(Vec::new()));

    let f = Arc::clone(&first);
    link.add_listener(MessageKind::Attitude, move |msg| {
        if let Message::Attitude(att) = msg {
            f.lock().push(att.roll);
        }
    });
    link.add_listener(MessageKind::Attitude, |_| panic!("listener bug"));
    let t = Arc::clone(&third);
    link.add_listener(MessageKind::Attitude, move |msg| {
        if let Message::Attitude(att) = msg {
            t.lock().push(att.roll);
        }
    });

    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));
    for i in 0..5 {
        mock.push_inbound(&attitude_frame(i as f32));
    }

    assert!(wait_until(Duration::from_secs(5), || {
        link.stats().snapshot().listener_failures == 5
    }));
    let expected = vec![0.0, 1.0, 2.0, 3.0, 4.0];
    assert_eq!(*first.lock(), expected);
    assert_eq!(*third.lock(), expected);
    assert!(link.is_connected());
    link.disconnect();
}

#[test]
fn test_messages_dispatched_in_stream_order() {
    let link = new_link(fast_config());
    let a = Arc::new(Mutex::new(Vec::new()));
    let b = Arc::new(Mutex::new(Vec::new()));
    for log in [&a, &b] {
        let log = Arc::clone(log);
        link.add_listener(MessageKind::Attitude, move |msg| {
            if let Message::Attitude(att) = msg {
                log.lock().push(att.roll);
            }
        });
    }

    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));
    let mut burst = Vec::new();
    for i in 0..20 {
        burst.extend(attitude_frame(i as f32));
    }
    mock.push_inbound(&burst);

    assert!(wait_until(Duration::from_secs(5), || b.lock().len() == 20));
    let expected: Vec<f32> = (0..20).map(|i| i as f32).collect();
    assert_eq!(*a.lock(), expected);
    assert_eq!(*b.lock(), expected);
    link.disconnect();
}

#[test]
fn test_disconnect_from_listener_stops_dispatch() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    let seen_open = Arc::new(Mutex::new(Vec::new()));

    let closer = link.clone();
    let first = link.add_listener(MessageKind::Attitude, move |_| {
        closer.disconnect();
    });
    let (log, device) = (Arc::clone(&seen_open), Arc::clone(&mock));
    let second = link.add_listener(MessageKind::Attitude, move |_| {
        log.lock().push(device.is_connected());
    });

    assert!(link.connect(mock.clone()));
    let mut burst = attitude_frame(0.1);
    burst.extend(attitude_frame(0.2));
    mock.push_inbound(&burst);

    assert!(wait_until(Duration::from_secs(5), || link.state() == LinkState::Disconnected));
    thread::sleep(Duration::from_millis(50));
    assert!(seen_open.lock().is_empty());
    assert!(!mock.is_connected());

    // The first listener holds a clone of the link
    link.remove_listener(MessageKind::Attitude, first);
    link.remove_listener(MessageKind::Attitude, second);
}

#[test]
fn test_corrupt_bytes_do_not_stop_the_link() {
    let link = new_link(fast_config());
    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    link.add_listener(MessageKind::Attitude, move |_| {
        s.fetch_add(1, Ordering::SeqCst);
    });

    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));
    mock.push_inbound(&[0x00, 0x13, 0x37]);
    mock.push_inbound(&attitude_frame(0.5));

    assert!(wait_until(Duration::from_secs(5), || seen.load(Ordering::SeqCst) == 1));
    assert!(link.is_connected());
    link.disconnect();
}

// =============================================================================
// Parameter fetch
// =============================================================================

#[test]
fn test_fetch_never_answered_retries_exactly_max_attempts() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    let options = FetchOptions {
        max_attempts: 5,
        receive_timeout: Duration::from_millis(100),
        retry_delay: Duration::from_millis(50),
    };
    let start = Instant::now();
    let fetch = link.get_parameters(options);
    let elapsed = start.elapsed();

    assert!(fetch.parameters.is_empty());
    assert_eq!(fetch.status, FetchStatus::TimedOut);
    assert_eq!(fetch.attempts, 5);
    assert_eq!(sent(&mock).iter().filter(|m| is_request_list(m)).count(), 5);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(5 * 150 + 1000));
    link.disconnect();
}

#[test]
fn test_fetch_keeps_last_value_per_name() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    mock.set_responder(|device, written| {
        if parse(written).is_some_and(|m| is_request_list(&m)) {
            device.push_inbound(&param_value_frame("RATE_P", 1.0, 0, 2));
            device.push_inbound(&param_value_frame("RATE_I", 0.5, 1, 2));
            device.push_inbound(&param_value_frame("RATE_P", 2.0, 0, 2));
        }
    });
    assert!(link.connect(mock.clone()));

    let fetch = link.get_parameters(FetchOptions::from(link.config()));
    assert_eq!(fetch.status, FetchStatus::Satisfied);
    assert_eq!(fetch.attempts, 1);
    assert_eq!(fetch.parameters.len(), 2);
    assert_eq!(fetch.parameters["RATE_P"].value, 2.0);
    assert_eq!(fetch.parameters["RATE_I"].value, 0.5);
    assert_eq!(fetch.parameters["RATE_I"].param_type, ParamType::Real32);
    link.disconnect();
}

#[test]
fn test_fetch_retries_until_device_answers() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    let requests = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&requests);
    mock.set_responder(move |device, written| {
        if parse(written).is_some_and(|m| is_request_list(&m))
            && r.fetch_add(1, Ordering::SeqCst) == 2
        {
            device.push_inbound(&param_value_frame("MODE", 3.0, 0, 1));
        }
    });
    assert!(link.connect(mock.clone()));

    let fetch = link.get_parameters(FetchOptions::from(link.config()));
    assert_eq!(fetch.status, FetchStatus::Satisfied);
    assert_eq!(fetch.attempts, 3);
    assert_eq!(fetch.parameters["MODE"].value, 3.0);
    link.disconnect();
}

#[test]
fn test_fetch_removes_its_listener_on_every_path() {
    let link = new_link(fast_config());
    link.add_listener(MessageKind::Heartbeat, |_| {});
    let before = link.listener_count();

    // Not connected
    let fetch = link.get_parameters(FetchOptions::from(link.config()));
    assert_eq!(fetch.status, FetchStatus::Disconnected);
    assert_eq!(link.listener_count(), before);

    // Timed out
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));
    let options = FetchOptions {
        max_attempts: 2,
        ..FetchOptions::from(link.config())
    };
    assert_eq!(link.get_parameters(options).status, FetchStatus::TimedOut);
    assert_eq!(link.listener_count(), before);

    // Satisfied, twice back to back
    mock.set_responder(|device, written| {
        if parse(written).is_some_and(|m| is_request_list(&m)) {
            device.push_inbound(&param_value_frame("GAIN", 1.0, 0, 1));
        }
    });
    for _ in 0..2 {
        let fetch = link.get_parameters(FetchOptions::from(link.config()));
        assert_eq!(fetch.parameters.len(), 1);
        assert_eq!(link.listener_count(), before);
    }
    link.disconnect();
}

#[test]
fn test_fetch_ends_early_on_disconnect() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    let options = FetchOptions {
        max_attempts: 5,
        receive_timeout: Duration::from_secs(10),
        retry_delay: Duration::ZERO,
    };
    let (tx, rx) = std::sync::mpsc::channel();
    link.spawn_get_parameters(options, move |fetch| {
        let _ = tx.send(fetch);
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || !mock.writes().is_empty()));
    let start = Instant::now();
    link.disconnect();
    let fetch = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(fetch.status, FetchStatus::Disconnected);
    assert_eq!(fetch.attempts, 1);
    assert_eq!(link.listener_count(), 0);
}

// =============================================================================
// Parameter set and storage
// =============================================================================

#[test]
fn test_set_parameters_sends_batch_and_flushes() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    let mut pending = PendingParameters::new();
    pending.insert("ROLL_P", 0.15, ParamType::Real32);
    pending.insert("PITCH_P", 0.12, ParamType::Real32);
    pending.insert("MODE", 2.0, ParamType::Uint8);

    let flushes_before = mock.flush_count();
    assert_eq!(link.set_parameters(&pending).unwrap(), 3);
    assert!(mock.flush_count() > flushes_before);

    let sets: Vec<_> = sent(&mock)
        .into_iter()
        .filter_map(|m| match m {
            MavMessage::PARAM_SET(data) => Some((data.param_value, data.param_type)),
            _ => None,
        })
        .collect();
    assert_eq!(sets.len(), 3);
    assert!(sets.contains(&(2.0, MavParamType::MAV_PARAM_TYPE_UINT8)));
    link.disconnect();
}

#[test]
fn test_set_parameters_rejects_long_name_and_empty_batch() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    assert_eq!(link.set_parameters(&PendingParameters::new()).unwrap(), 0);

    let mut pending = PendingParameters::new();
    pending.insert("THIS_NAME_IS_TOO_LONG", 1.0, ParamType::Real32);
    assert!(matches!(
        link.set_parameters(&pending),
        Err(LinkError::ParameterName { .. })
    ));
    assert!(link.is_connected());
    link.disconnect();
}

#[test]
fn test_set_parameters_settle_ends_on_disconnect() {
    let config = LinkConfig {
        param_set_settle: Duration::from_secs(10),
        ..fast_config()
    };
    let link = new_link(config);
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    let (closer, device) = (link.clone(), Arc::clone(&mock));
    let watcher = thread::spawn(move || {
        // First-write flush plus the batch flush
        assert!(wait_until(Duration::from_secs(5), || device.flush_count() >= 2));
        closer.disconnect();
    });

    let mut pending = PendingParameters::new();
    pending.insert("ROLL_P", 0.15, ParamType::Real32);
    let start = Instant::now();
    assert!(matches!(
        link.set_parameters(&pending),
        Err(LinkError::NotConnected)
    ));
    assert!(start.elapsed() < Duration::from_secs(5));
    watcher.join().unwrap();
}

#[test]
fn test_spawn_set_parameters_reports_completion() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    let mut pending = PendingParameters::new();
    pending.insert("YAW_P", 0.3, ParamType::Real32);
    let (tx, rx) = std::sync::mpsc::channel();
    link.spawn_set_parameters(pending, move |result| {
        let _ = tx.send(result.map_err(|e| e.to_string()));
    })
    .unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(1));
    link.disconnect();
}

#[test]
fn test_set_parameter_confirmed_waits_for_echo() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    mock.set_responder(|device, written| {
        if let Some(MavMessage::PARAM_SET(data)) = parse(written) {
            let end = data.param_id.iter().position(|&b| b == 0).unwrap_or(16);
            let name = std::str::from_utf8(&data.param_id[..end]).unwrap().to_string();
            device.push_inbound(&param_value_frame(&name, data.param_value, 0, 1));
        }
    });
    assert!(link.connect(mock.clone()));

    let echoed = link
        .set_parameter_confirmed("ROLL_P", 0.2, ParamType::Real32, Duration::from_secs(2))
        .unwrap()
        .unwrap();
    assert_eq!(echoed.name, "ROLL_P");
    assert_eq!(echoed.value, 0.2);
    assert_eq!(link.listener_count(), 0);
    link.disconnect();
}

#[test]
fn test_set_parameter_confirmed_times_out_without_echo() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    let echoed = link
        .set_parameter_confirmed("ROLL_P", 0.2, ParamType::Real32, Duration::from_millis(100))
        .unwrap();
    assert!(echoed.is_none());
    assert_eq!(link.listener_count(), 0);
    link.disconnect();
}

#[test]
fn test_storage_and_device_commands() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));

    let (count, bump) = counter();
    link.write_to_storage(bump).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    link.reset_parameters().unwrap();
    link.motor_test(2, 250.0).unwrap();
    link.arm(false).unwrap();

    let commands: Vec<_> = sent(&mock)
        .into_iter()
        .filter_map(|m| match m {
            MavMessage::COMMAND_LONG(data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(commands.len(), 4);
    assert_eq!(commands[0].command, MavCmd::MAV_CMD_PREFLIGHT_STORAGE);
    assert_eq!(commands[0].param1, 1.0);
    assert_eq!(commands[1].command, MavCmd::MAV_CMD_PREFLIGHT_STORAGE);
    assert_eq!(commands[1].param1, 2.0);
    assert_eq!(commands[2].command, MavCmd::MAV_CMD_DO_MOTOR_TEST);
    assert_eq!(commands[2].param1, 2.0);
    assert_eq!(commands[2].param3, 100.0);
    assert_eq!(commands[3].command, MavCmd::MAV_CMD_COMPONENT_ARM_DISARM);
    assert_eq!(commands[3].param1, 0.0);
    link.disconnect();
}

// =============================================================================
// Reboot
// =============================================================================

#[test]
fn test_reboot_reconnects_when_device_returns() {
    let config = LinkConfig {
        reboot_reconnect_timeout: Duration::from_secs(3),
        ..fast_config()
    };
    let link = new_link(config);
    let (connects, on_connect) = counter();
    let (disconnects, on_disconnect) = counter();
    link.on_connect(on_connect);
    link.on_disconnect(on_disconnect);

    let mock = Arc::new(MockTransport::new());
    mock.set_responder(|device, written| {
        if parse(written).is_some_and(|m| is_command(&m, MavCmd::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN)) {
            device.set_unavailable_for(Duration::from_secs(1));
        }
    });
    assert!(link.connect(mock.clone()));
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    let start = Instant::now();
    let handle = link.reboot().unwrap();
    assert!(handle.wait());
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(3500));
    assert_eq!(link.state(), LinkState::Connected);
    assert!(handle.deadline().is_some());
    assert_eq!(link.wait_for_reboot(Duration::ZERO), Some(true));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(mock.connect_count(), 2);
    link.disconnect();
}

#[test]
fn test_reboot_gives_up_when_device_never_returns() {
    let config = LinkConfig {
        reboot_reconnect_timeout: Duration::from_millis(500),
        ..fast_config()
    };
    let link = new_link(config);
    let mock = Arc::new(MockTransport::new());
    mock.set_responder(|device, written| {
        if parse(written).is_some_and(|m| is_command(&m, MavCmd::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN)) {
            device.set_available(false);
        }
    });
    assert!(link.connect(mock.clone()));

    let (tx, rx) = std::sync::mpsc::channel();
    let start = Instant::now();
    link.reboot_with(move |reconnected| {
        let _ = tx.send(reconnected);
    })
    .unwrap();

    // Caller is not blocked by the sequence
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert!(start.elapsed() < Duration::from_millis(500 + 200 + 500));
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(mock.connect_count(), 1);
}

#[test]
fn test_second_reboot_while_running_is_rejected() {
    let link = new_link(fast_config());
    let mock = Arc::new(MockTransport::new());
    mock.set_responder(|device, written| {
        if parse(written).is_some_and(|m| is_command(&m, MavCmd::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN)) {
            device.set_unavailable_for(Duration::from_millis(400));
        }
    });
    assert!(link.connect(mock.clone()));

    let handle = link.reboot().unwrap();
    assert!(matches!(link.reboot(), Err(LinkError::RebootInProgress)));
    assert!(handle.wait());
    assert!(link.reboot().is_ok());
    link.disconnect();
}

#[test]
fn test_disconnect_cancels_reboot() {
    let config = LinkConfig {
        reboot_reconnect_timeout: Duration::from_secs(10),
        ..fast_config()
    };
    let link = new_link(config);
    let mock = Arc::new(MockTransport::new());
    mock.set_responder(|device, written| {
        if parse(written).is_some_and(|m| is_command(&m, MavCmd::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN)) {
            device.set_available(false);
        }
    });
    assert!(link.connect(mock.clone()));

    let handle = link.reboot().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !link.is_connected()));
    let start = Instant::now();
    assert!(link.disconnect());
    assert_eq!(handle.wait_timeout(Duration::from_secs(5)), Some(false));
    assert!(start.elapsed() < Duration::from_secs(5));

    mock.set_available(true);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[test]
fn test_reboot_requires_connection() {
    let link = new_link(fast_config());
    assert!(matches!(link.reboot(), Err(LinkError::NotConnected)));
    assert_eq!(link.wait_for_reboot(Duration::ZERO), Some(false));
}

// =============================================================================
// Transport loss
// =============================================================================

#[test]
fn test_transport_loss_notifies_once() {
    let link = new_link(fast_config());
    let (disconnects, on_disconnect) = counter();
    link.on_disconnect(on_disconnect);

    let mock = Arc::new(MockTransport::new());
    assert!(link.connect(mock.clone()));
    mock.fail_next_read();

    assert!(wait_until(Duration::from_secs(5), || link.state() == LinkState::Disconnected));
    assert!(!link.disconnect());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(!mock.is_connected());

    // The same transport can be used again
    assert!(link.reconnect());
    assert!(link.is_connected());
    link.disconnect();
    assert_eq!(disconnects.load(Ordering::SeqCst), 2);
}
