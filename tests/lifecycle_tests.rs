use robofleet::config::FleetConfig;
use robofleet::events::{DisconnectReason, EventBus, FleetEvent};
use robofleet::lifecycle::{LifecycleBucket, LifecycleManager};
use robofleet::protocol::{ButtonBits, FleetMode, MovementCommand};
use robofleet::transport::MockTransport;
use robofleet::FleetError;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::broadcast;

const R1_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
const R2_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6));

fn manager_with(config: FleetConfig) -> (LifecycleManager, MockTransport, broadcast::Receiver<FleetEvent>) {
    let transport = MockTransport::new();
    let events = EventBus::new();
    let rx = events.subscribe();
    let manager = LifecycleManager::new(Arc::new(transport.clone()), events, &config);
    (manager, transport, rx)
}

fn manager() -> (LifecycleManager, MockTransport, broadcast::Receiver<FleetEvent>) {
    manager_with(FleetConfig::default())
}

fn drain(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_unseen_identity_lands_in_discovered() {
    let (mut manager, _, mut rx) = manager();

    manager.on_discovery_response("R1x", R1_ADDR, 100);

    let discovered = manager.discovered_robots();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].id, "R1x");
    assert_eq!(discovered[0].address, R1_ADDR);
    assert_eq!(discovered[0].bucket, LifecycleBucket::Discovered);
    assert!(manager.connected_robots().is_empty());

    let events = drain(&mut rx);
    assert!(matches!(&events[..], [FleetEvent::RobotDiscovered { robot }] if robot.id == "R1x"));
}

#[test]
fn test_repeated_response_refreshes_single_entry() {
    let (mut manager, _, mut rx) = manager();

    manager.on_discovery_response("R1x", R1_ADDR, 100);
    manager.on_discovery_response("R1x", R2_ADDR, 200);

    let discovered = manager.discovered_robots();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].address, R2_ADDR);
    assert_eq!(discovered[0].last_seen_ms, 200);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[1], FleetEvent::RobotUpdated { robot } if robot.address == R2_ADDR));
}

#[test]
fn test_connect_moves_bucket_and_sends_status() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 100);

    let robot = manager.connect("R1x", 150).unwrap();

    assert_eq!(robot.bucket, LifecycleBucket::Connected);
    assert!(manager.discovered_robots().is_empty());
    assert_eq!(manager.connected_robots().len(), 1);
    assert_eq!(transport.sent_to(R1_ADDR), vec![b"R1x:standby".to_vec()]);
}

#[test]
fn test_connect_is_idempotent() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 100);

    let first = manager.connect("R1x", 150).unwrap();
    let second = manager.connect("R1x", 160).unwrap();

    assert_eq!(first, second);
    assert_eq!(manager.connected_robots().len(), 1);
    assert!(manager.discovered_robots().is_empty());
    assert_eq!(transport.sent_to(R1_ADDR).len(), 1);
}

#[test]
fn test_connect_unknown_is_not_found() {
    let (mut manager, transport, _) = manager();
    let result = manager.connect("ghost", 0);
    assert!(matches!(result, Err(FleetError::RobotNotFound(id)) if id == "ghost"));
    assert!(transport.sent().is_empty());
}

#[test]
fn test_response_for_connected_robot_only_refreshes() {
    let (mut manager, _, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 100);
    manager.connect("R1x", 100).unwrap();

    manager.on_discovery_response("R1x", R2_ADDR, 500);

    assert!(manager.discovered_robots().is_empty());
    let connected = manager.connected_robots();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].address, R2_ADDR);
    assert_eq!(connected[0].last_seen_ms, 500);
}

#[test]
fn test_movement_wire_bytes() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.connect("R1x", 0).unwrap();
    transport.clear();

    let command = MovementCommand::from_axes([1.0, -1.0, 0.0, 0.0], ButtonBits::NONE);
    manager.send_movement("R1x", command, 10).unwrap();

    assert_eq!(transport.sent_to(R1_ADDR), vec![vec![255, 0, 127, 127, 127, 127, 0, 0]]);
    let robot = manager.robot("R1x").unwrap();
    assert_eq!(robot.last_command_ms, Some(10));
    assert!(robot.receiving);
    assert_eq!(robot.last_frame, vec![255, 0, 127, 127, 127, 127, 0, 0]);
}

#[test]
fn test_movement_to_discovered_robot_resolves() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);

    manager.send_stop("R1x", 5).unwrap();
    assert_eq!(transport.sent_to(R1_ADDR), vec![MovementCommand::STOP.encode().to_vec()]);
}

#[test]
fn test_receiving_flag_follows_frames() {
    let (mut manager, _, mut rx) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.connect("R1x", 0).unwrap();
    drain(&mut rx);

    let forward = MovementCommand::from_axes([0.0, 1.0, 0.0, 0.0], ButtonBits::NONE);
    manager.send_movement("R1x", forward, 1).unwrap();
    manager.send_movement("R1x", forward, 2).unwrap();
    manager.send_stop("R1x", 3).unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            FleetEvent::RobotReceivingChanged { id: "R1x".into(), receiving: true },
            FleetEvent::RobotReceivingChanged { id: "R1x".into(), receiving: false },
        ]
    );
}

#[test]
fn test_disconnect_sends_stop_then_removes() {
    let (mut manager, transport, mut rx) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.connect("R1x", 0).unwrap();
    transport.clear();
    drain(&mut rx);

    manager.disconnect("R1x", 10).unwrap();

    assert_eq!(transport.sent_to(R1_ADDR), vec![MovementCommand::STOP.encode().to_vec()]);
    assert!(manager.robot("R1x").is_none());
    assert!(manager.connected_robots().is_empty());
    assert!(manager.discovered_robots().is_empty());
    assert!(drain(&mut rx).contains(&FleetEvent::RobotDisconnected {
        id: "R1x".into(),
        reason: DisconnectReason::Operator,
    }));
}

#[test]
fn test_disconnect_discovered_robot_sends_nothing() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);

    manager.disconnect("R1x", 10).unwrap();

    assert!(transport.sent().is_empty());
    assert!(manager.robot("R1x").is_none());
}

#[test]
fn test_sweep_evicts_stale_discovered_robot_once() {
    let (mut manager, _, mut rx) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.on_discovery_response("R2x", R2_ADDR, 9_000);
    drain(&mut rx);

    let evicted = manager.sweep(10_001);

    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].id, "R1x");
    assert!(manager.robot("R1x").is_none());
    assert!(manager.robot("R2x").is_some());

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![FleetEvent::RobotDisconnected { id: "R1x".into(), reason: DisconnectReason::Timeout }]
    );

    assert!(manager.sweep(10_002).is_empty());
    assert!(drain(&mut rx).is_empty());

    let result = manager.send_movement("R1x", MovementCommand::STOP, 10_003);
    assert!(matches!(result, Err(FleetError::RobotNotFound(_))));
}

#[test]
fn test_sweep_at_exact_threshold_keeps_robot() {
    let (mut manager, _, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    assert!(manager.sweep(10_000).is_empty());
    assert!(manager.robot("R1x").is_some());
}

#[test]
fn test_connected_robots_kept_without_connected_timeout() {
    let (mut manager, _, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.connect("R1x", 0).unwrap();

    assert!(manager.sweep(3_600_000).is_empty());
    assert_eq!(manager.connected_robots().len(), 1);
}

#[test]
fn test_connected_timeout_policy_evicts() {
    let config = FleetConfig {
        connected_timeout_ms: Some(60_000),
        ..FleetConfig::default()
    };
    let (mut manager, _, mut rx) = manager_with(config);
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.connect("R1x", 0).unwrap();
    drain(&mut rx);

    assert!(manager.sweep(59_000).is_empty());
    let evicted = manager.sweep(60_001);
    assert_eq!(evicted.len(), 1);
    assert!(manager.connected_robots().is_empty());
    assert_eq!(
        drain(&mut rx),
        vec![FleetEvent::RobotDisconnected { id: "R1x".into(), reason: DisconnectReason::Timeout }]
    );
}

#[test]
fn test_connect_refreshes_last_seen() {
    let config = FleetConfig {
        connected_timeout_ms: Some(10_000),
        ..FleetConfig::default()
    };
    let (mut manager, _, _) = manager_with(config);
    manager.on_discovery_response("R1x", R1_ADDR, 100);

    let robot = manager.connect("R1x", 9_000).unwrap();
    assert_eq!(robot.last_seen_ms, 9_000);

    // Measured from the connect, not from the original discovery.
    assert!(manager.sweep(15_000).is_empty());
    assert_eq!(manager.sweep(19_001).len(), 1);
}

#[test]
fn test_fleet_mode_change_broadcasts_status_immediately() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.on_discovery_response("R2x", R2_ADDR, 0);
    manager.connect("R1x", 0).unwrap();
    transport.clear();

    manager.set_fleet_mode(FleetMode::Active, 10);

    assert_eq!(manager.fleet_mode(), FleetMode::Active);
    assert_eq!(transport.sent_to(R1_ADDR), vec![b"R1x:teleop".to_vec()]);
    // Discovered robots are not told the mode.
    assert!(transport.sent_to(R2_ADDR).is_empty());
}

#[test]
fn test_standby_also_stops_connected_robots() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.connect("R1x", 0).unwrap();
    manager.set_fleet_mode(FleetMode::Active, 1);
    transport.clear();

    manager.set_fleet_mode(FleetMode::Standby, 2);

    assert_eq!(
        transport.sent_to(R1_ADDR),
        vec![b"R1x:standby".to_vec(), MovementCommand::STOP.encode().to_vec()]
    );
}

#[test]
fn test_status_loop_targets_connected_only() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.on_discovery_response("R2x", R2_ADDR, 0);
    manager.connect("R2x", 0).unwrap();
    transport.clear();

    manager.broadcast_status(1_000);

    assert!(transport.sent_to(R1_ADDR).is_empty());
    assert_eq!(transport.sent_to(R2_ADDR), vec![b"R2x:standby".to_vec()]);
}

#[test]
fn test_probe_is_broadcast_ping() {
    let (mut manager, transport, _) = manager();
    manager.probe();
    assert_eq!(transport.broadcasts(), vec![b"ping".to_vec()]);
    assert_eq!(manager.stats().probes_sent, 1);
}

#[test]
fn test_send_failure_is_reported_not_fatal() {
    let (mut manager, transport, _) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    transport.fail_next(1);

    let result = manager.send_stop("R1x", 1);
    assert!(matches!(result, Err(FleetError::Transport(_))));
    assert_eq!(manager.stats().send_failures, 1);

    manager.send_stop("R1x", 2).unwrap();
    assert_eq!(manager.stats().frames_sent, 1);
}

#[test]
fn test_disabled_robot_refuses_movement_but_accepts_stop() {
    let (mut manager, transport, mut rx) = manager();
    manager.on_discovery_response("R1x", R1_ADDR, 0);
    manager.connect("R1x", 0).unwrap();
    transport.clear();
    drain(&mut rx);

    let robot = manager.set_enabled("R1x", false, 5).unwrap();
    assert!(!robot.enabled);
    assert_eq!(transport.sent_to(R1_ADDR), vec![MovementCommand::STOP.encode().to_vec()]);

    let forward = MovementCommand::from_axes([0.0, 1.0, 0.0, 0.0], ButtonBits::NONE);
    assert!(matches!(
        manager.send_movement("R1x", forward, 6),
        Err(FleetError::RobotDisabled(_))
    ));
    manager.send_stop("R1x", 7).unwrap();

    manager.set_enabled("R1x", true, 8).unwrap();
    manager.send_movement("R1x", forward, 9).unwrap();

    let events = drain(&mut rx);
    assert!(events.contains(&FleetEvent::RobotEnabledChanged { id: "R1x".into(), enabled: false }));
    assert!(events.contains(&FleetEvent::RobotEnabledChanged { id: "R1x".into(), enabled: true }));
}

#[test]
fn test_invalid_identity_ignored() {
    let (mut manager, _, _) = manager();
    manager.on_discovery_response("x", R1_ADDR, 0);
    manager.on_discovery_response("has space", R1_ADDR, 0);
    assert!(manager.discovered_robots().is_empty());
}

#[test]
fn test_identity_never_in_both_buckets() {
    let (mut manager, _, _) = manager();
    for id in ["alpha", "bravo", "charlie"] {
        manager.on_discovery_response(id, R1_ADDR, 0);
    }
    manager.connect("bravo", 1).unwrap();
    manager.on_discovery_response("bravo", R2_ADDR, 2);
    manager.connect("bravo", 3).unwrap();

    let connected: Vec<String> = manager.connected_robots().into_iter().map(|r| r.id).collect();
    let discovered: Vec<String> = manager.discovered_robots().into_iter().map(|r| r.id).collect();
    assert_eq!(connected, vec!["bravo"]);
    assert_eq!(discovered, vec!["alpha", "charlie"]);
}
