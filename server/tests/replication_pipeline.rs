//! End-to-end server-side pipeline: game updates flow through the zone
//! manager and collector into per-client datagrams, and inbound acks
//! advance the baseline so deltas suppress unchanged fields.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use zonecast_server::{NetworkStateListener, StateCollector, StateListener, ZoneManager};
use zonecast_shared::{
    Aabb, ChannelReceiver, ClientStateMessage, Datagram, DatagramChannel, ObjectStateMessage,
    ObjectStateProtocol, QuatBits, Quatd, TimeSource, Vec3Bits, Vec3d, ZoneGrid,
};

struct ManualClock(AtomicI64);

impl TimeSource for ManualClock {
    fn time(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

fn protocol() -> ObjectStateProtocol {
    ObjectStateProtocol::new(8, 64, Vec3Bits::new(-10.0, 42.0, 8), QuatBits::new(3))
}

struct Pipeline {
    zones: Arc<ZoneManager>,
    collector: StateCollector,
    listener: Arc<NetworkStateListener>,
    outbound: ChannelReceiver,
}

fn pipeline() -> Pipeline {
    let grid = ZoneGrid::cube(32);
    let zones = Arc::new(ZoneManager::new(grid));
    let collector = StateCollector::new(Arc::clone(&zones));

    let (tx, rx) = DatagramChannel::unbounded();
    let listener = Arc::new(NetworkStateListener::new(
        protocol(),
        grid,
        1,
        Box::new(tx),
        Arc::new(ManualClock(AtomicI64::new(0))),
    ));
    collector.add_listener(Arc::clone(&listener) as Arc<dyn StateListener>);

    Pipeline {
        zones,
        collector,
        listener,
        outbound: rx,
    }
}

fn game_frame(zones: &ZoneManager, time: i64, poses: &[(u64, Vec3d)]) {
    zones.begin_update(time);
    for &(id, pos) in poses {
        zones.update_entity(id, pos, Quatd::IDENTITY, &Aabb::around(pos, 1.0));
    }
    zones.end_update();
}

fn drain_states(rx: &ChannelReceiver) -> Vec<ObjectStateMessage> {
    rx.drain()
        .into_iter()
        .filter_map(|d| match d {
            Datagram::ObjectState(msg) => Some(msg),
            Datagram::ClientState(_) => None,
        })
        .collect()
}

#[test]
fn single_object_reaches_a_watching_client() {
    let p = pipeline();
    // The avatar is object 7; its observed position centers the window.
    p.listener.set_self(Some(7), Vec3d::new(5.0, 0.0, 5.0));

    // First cycle centers the window, second delivers state through it.
    game_frame(&p.zones, 1000, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();
    game_frame(&p.zones, 1050, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    let messages = drain_states(&p.outbound);
    let with_frames: Vec<_> = messages
        .iter()
        .map(|m| m.state(&protocol()).unwrap())
        .filter(|s| !s.frames.is_empty())
        .collect();
    assert_eq!(with_frames.len(), 1);

    let frame = &with_frames[0].frames[0];
    assert_eq!(frame.time, 1050);
    assert_eq!(frame.states.len(), 1);

    let state = &frame.states[0];
    assert_ne!(state.network_id, 0);
    assert_eq!(state.real_id, Some(7));
    let zone_id = state.zone_id.expect("zone id present");
    assert!((1..=27).contains(&zone_id));
    assert!(state.position_bits.is_some());
    assert!(state.rotation_bits.is_some());

    // The active-id snapshot now includes the replicated entity.
    assert!(p.listener.active_ids().contains(&7));
}

#[test]
fn acked_baseline_suppresses_unchanged_fields() {
    let p = pipeline();
    p.listener.set_self(Some(7), Vec3d::new(5.0, 0.0, 5.0));

    game_frame(&p.zones, 1000, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();
    game_frame(&p.zones, 1050, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    // Ack everything sent so far; the server promotes the acked frames
    // to this client's baseline.
    for msg in drain_states(&p.outbound) {
        p.listener.post_response(ClientStateMessage::new(&msg, 0));
    }

    // Two more unchanged frames: the first folds in the acks, the next
    // emits against the confirmed baseline.
    game_frame(&p.zones, 1100, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();
    game_frame(&p.zones, 1150, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    let suppressed = drain_states(&p.outbound)
        .iter()
        .map(|m| m.state(&protocol()).unwrap())
        .filter(|s| !s.frames.is_empty())
        .flat_map(|s| s.frames.into_iter())
        .filter(|f| f.time == 1150)
        .flat_map(|f| f.states.into_iter())
        .next()
        .expect("a state for frame 1150");

    assert_ne!(suppressed.network_id, 0);
    assert_eq!(suppressed.real_id, None);
    assert_eq!(suppressed.zone_id, None);
    assert_eq!(suppressed.position_bits, None);
    assert_eq!(suppressed.rotation_bits, None);
    // Five marker bits beyond the 16-bit network id.
    assert_eq!(protocol().state_bit_size(&suppressed), 21);
}

#[test]
fn redundant_acks_are_idempotent_misses() {
    let p = pipeline();
    p.listener.set_self(Some(7), Vec3d::new(5.0, 0.0, 5.0));

    game_frame(&p.zones, 1000, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();
    game_frame(&p.zones, 1050, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    let messages = drain_states(&p.outbound);
    let last = messages.last().expect("messages were sent");

    // Ack the same message twice; the second resolves to nothing.
    p.listener.post_response(ClientStateMessage::new(last, 0));
    p.listener.post_response(ClientStateMessage::new(last, 0));

    game_frame(&p.zones, 1100, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    let stats = p.listener.connection_stats();
    assert!(stats.acks() >= 2);
    assert!(stats.ack_miss_percent() > 0.0);
}

#[test]
fn moving_avatar_recenters_the_window() {
    let p = pipeline();
    p.listener.set_self(Some(7), Vec3d::new(5.0, 0.0, 5.0));

    game_frame(&p.zones, 1000, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    // The warmup centered at cell (0,0,0); now the avatar steps into
    // cell (1,0,0).
    game_frame(&p.zones, 1050, &[(7, Vec3d::new(37.0, 0.0, 5.0))]);
    p.collector.collect_once();

    assert!(p.listener.has_changed_zones());
    let entered = p.listener.entered_zones();
    let exited = p.listener.exited_zones();
    assert_eq!(entered.len(), 9);
    assert_eq!(exited.len(), 9);
    assert!(entered.iter().all(|k| k.x == 2));
    assert!(exited.iter().all(|k| k.x == -1));
}

#[test]
fn removal_retains_object_until_double_acked() {
    let p = pipeline();
    p.listener.set_self(Some(7), Vec3d::new(5.0, 0.0, 5.0));

    // Two objects so frames keep flowing after one is removed.
    let poses = [
        (7u64, Vec3d::new(5.0, 0.0, 5.0)),
        (8u64, Vec3d::new(6.0, 0.0, 6.0)),
    ];
    game_frame(&p.zones, 1000, &poses);
    p.collector.collect_once();
    game_frame(&p.zones, 1050, &poses);
    p.collector.collect_once();

    // Confirm the baseline for both objects.
    for msg in drain_states(&p.outbound) {
        p.listener.post_response(ClientStateMessage::new(&msg, 0));
    }
    game_frame(&p.zones, 1100, &poses);
    p.collector.collect_once();

    // Object 8 leaves the world.
    p.zones.remove(8);
    game_frame(&p.zones, 1150, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    // The removal delta went out (zone id 0) but the object is retained
    // until the client double-acks it.
    let messages = drain_states(&p.outbound);
    for msg in &messages {
        p.listener.post_response(ClientStateMessage::new(msg, 0));
    }
    let removal_seen = messages
        .iter()
        .map(|m| m.state(&protocol()).unwrap())
        .flat_map(|s| s.frames.into_iter())
        .flat_map(|f| f.states.into_iter())
        .any(|s| s.is_marked_removed());
    assert!(removal_seen, "expected a removal sentinel on the wire");
    assert!(p.listener.active_ids().contains(&8));

    // Folding in the acks completes the mutual removal; the object is
    // evicted and disappears from the active set.
    game_frame(&p.zones, 1200, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();
    game_frame(&p.zones, 1250, &[(7, Vec3d::new(5.0, 0.0, 5.0))]);
    p.collector.collect_once();

    assert!(!p.listener.active_ids().contains(&8));
    assert!(p.listener.active_ids().contains(&7));
}
