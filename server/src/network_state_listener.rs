//! The per-client replication pipeline: filters the frame stream by the
//! client's zone window, maintains its shared-object table and network
//! id allocations, and drives the state writer.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use zonecast_shared::{
    ClientStateMessage, ConnectionStats, DatagramSender, IdIndex, LocalZoneIndex,
    ObjectStateProtocol, SharedObjectSpace, TimeSource, Vec3d, ZoneGrid, ZoneKey,
};

use crate::buffered_set::{BufferedHashSet, SnapshotReader};
use crate::state_writer::StateWriter;
use crate::zone::{StateBlock, StateListener};

/// First network id handed out to entities; low ids are left free for
/// application use.
const FIRST_NETWORK_ID: u16 = 10;

const PING_WINDOW_MAX: i64 = 100;

#[derive(Default)]
struct PingAverage {
    time: i64,
    window_size: i64,
}

struct ListenerState {
    zone_index: LocalZoneIndex,
    id_index: IdIndex,
    space: SharedObjectSpace,
    writer: StateWriter,
    active: BufferedHashSet<u64>,

    self_id: Option<u64>,
    self_position: Vec3d,

    zones_changed: bool,
    entered: Vec<ZoneKey>,
    exited: Vec<ZoneKey>,
}

/// One client's view of the replicated world.
///
/// Driven from the collector thread through [`StateListener`]; inbound
/// acknowledgements arrive on transport threads via [`post_response`]
/// (a lock-free queue) and are folded in at the next frame end.
///
/// [`post_response`]: NetworkStateListener::post_response
pub struct NetworkStateListener {
    state: Mutex<ListenerState>,
    acked: SegQueue<ClientStateMessage>,
    stats: Arc<ConnectionStats>,
    active_ids: SnapshotReader<u64>,
    time_source: Arc<dyn TimeSource>,
    ping: Mutex<PingAverage>,
}

impl NetworkStateListener {
    pub fn new(
        protocol: ObjectStateProtocol,
        grid: ZoneGrid,
        zone_radius: i32,
        sender: Box<dyn DatagramSender>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self::with_index(
            protocol,
            LocalZoneIndex::new(grid, zone_radius),
            IdIndex::new(FIRST_NETWORK_ID),
            sender,
            time_source,
        )
    }

    pub fn with_index(
        protocol: ObjectStateProtocol,
        zone_index: LocalZoneIndex,
        id_index: IdIndex,
        sender: Box<dyn DatagramSender>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let stats = Arc::new(ConnectionStats::new());
        let active = BufferedHashSet::new();
        let active_ids = active.reader();
        let writer = StateWriter::new(sender, protocol, Arc::clone(&time_source));

        Self {
            state: Mutex::new(ListenerState {
                zone_index,
                id_index,
                space: SharedObjectSpace::with_stats(protocol, Arc::clone(&stats)),
                writer,
                active,
                self_id: None,
                self_position: Vec3d::ZERO,
                zones_changed: false,
                entered: Vec::new(),
                exited: Vec::new(),
            }),
            acked: SegQueue::new(),
            stats,
            active_ids,
            time_source,
            ping: Mutex::new(PingAverage::default()),
        }
    }

    /// Designates the client's avatar; its observed position recenters
    /// the zone window.
    pub fn set_self(&self, id: Option<u64>, position: Vec3d) {
        let mut state = self.state.lock();
        state.self_id = id;
        state.self_position = position;
    }

    pub fn self_id(&self) -> Option<u64> {
        self.state.lock().self_id
    }

    /// The entity ids visible to this client as of the last committed
    /// frame. Readable from any thread.
    pub fn active_ids(&self) -> Arc<HashSet<u64>> {
        self.active_ids.snapshot()
    }

    pub fn connection_stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn set_max_message_size(&self, mtu: usize) {
        self.state.lock().writer.set_max_message_size(mtu);
    }

    pub fn max_message_size(&self) -> usize {
        self.state.lock().writer.max_message_size()
    }

    /// Entry point for the transport: the client acknowledged one of
    /// our messages. Never blocks the collector.
    pub fn post_response(&self, message: ClientStateMessage) {
        // The echoed timestamp is in time-source time, so the receive
        // time must be too.
        let received = self.time_source.time();
        let ping = received - message.time;
        self.stats.add_ping_time(ping);

        {
            let mut avg = self.ping.lock();
            let new_ping = (ping + avg.time * avg.window_size) / (avg.window_size + 1);
            if avg.window_size < PING_WINDOW_MAX {
                avg.window_size += 1;
            }
            let delta = (new_ping - avg.time).abs();
            avg.time = new_ping;
            if delta > 10_000_000 {
                debug!("average ping moved to {} ms", new_ping as f64 / 1e6);
            }
        }

        trace!("received ack: {}", message.ack_id);
        self.acked.push(message);
    }
}

impl StateListener for NetworkStateListener {
    fn has_changed_zones(&self) -> bool {
        self.state.lock().zones_changed
    }

    fn entered_zones(&self) -> Vec<ZoneKey> {
        self.state.lock().entered.clone()
    }

    fn exited_zones(&self) -> Vec<ZoneKey> {
        self.state.lock().exited.clone()
    }

    fn begin_frame_block(&self) {}

    fn end_frame_block(&self) {
        // Flush lingering data so frame blocks stay as contiguous as
        // possible on the wire.
        if let Err(err) = self.state.lock().writer.flush() {
            error!("error flushing state writer: {err}");
        }
    }

    fn begin_frame(&self, time: i64) {
        trace!("begin_frame({time})");
        let mut state = self.state.lock();
        // The collector consumed the zone transitions before this call.
        if state.zones_changed {
            state.entered.clear();
            state.exited.clear();
            state.zones_changed = false;
        }
    }

    fn state_changed(&self, block: &StateBlock) {
        let state = &mut *self.state.lock();

        let time = block.time();
        let zone = *block.zone();
        let Some(zone_id) = state.zone_index.zone_id(&zone) else {
            warn!("no zone id for changed zone: {zone}");
            return;
        };
        let protocol = *state.space.protocol();

        if let Some(updates) = block.updates() {
            for entry in updates {
                let network_id = state.id_index.get_or_allocate(entry.entity);
                let object = state.space.get_or_create(network_id, Some(entry.entity));
                if object.update_state(
                    time,
                    zone,
                    zone_id,
                    entry.parent,
                    entry.position,
                    entry.rotation,
                    &protocol,
                ) && state.self_id == Some(entry.entity)
                {
                    state.self_position = entry.position;
                }
            }
        }

        if let Some(removals) = block.removals() {
            for &entity in removals {
                // No allocation here: an object we never sent needs no
                // removal.
                let Some(network_id) = state.id_index.get(entity) else {
                    continue;
                };
                let Some(object) = state.space.get_mut(network_id) else {
                    continue;
                };
                debug!("marking removed: {entity}");
                object.mark_removed(time);
            }
        }
    }

    fn end_frame(&self, time: i64) {
        let state = &mut *self.state.lock();
        trace!("end_frame({time})");

        // Fold in the acks received since the last frame. A confirmed
        // message means the client really has it, so its frames become
        // the mutual baseline; the confirmation itself rides out in the
        // next header as a double-ack.
        while let Some(message) = self.acked.pop() {
            self.stats.increment_acks();
            match state.writer.ack_sent_state(message.ack_id) {
                None => self.stats.increment_ack_misses(),
                Some(sent) => state.space.update_baseline(&sent.frames),
            }
        }

        let center = state.zone_index.center().copied();
        if let Err(err) = state.writer.start_frame(time, center.as_ref()) {
            error!("error starting frame: {err}");
            return;
        }

        for network_id in state.space.network_ids() {
            let (delta, entity_id, fully_removed) = {
                let Some(object) = state.space.get_mut(network_id) else {
                    continue;
                };
                // No update this frame means the object fell out of
                // every watched zone. (An unmoving world produces no
                // frames at all, in which case nothing is tracked; see
                // the zone manager's no-change replay.)
                if !object.is_marked_removed() && object.version() < time {
                    debug!(
                        "object no longer in active zones, marking removed: {:?}",
                        object.entity_id()
                    );
                    object.mark_removed(time);
                }
                (
                    object.delta(),
                    object.entity_id(),
                    object.is_fully_marked_removed(),
                )
            };

            if let Err(err) = state.writer.add_state(delta) {
                error!("error adding state: {err}");
                return;
            }

            if fully_removed {
                // Removal is mutually acknowledged; forget the object
                // and recycle its id.
                state.space.remove(network_id);
                state.id_index.retire(network_id);
                if let Some(entity_id) = entity_id {
                    state.active.remove(&entity_id);
                }
            } else if let Some(entity_id) = entity_id {
                state.active.insert(entity_id);
            }
        }

        // Only after the frame's state is interpreted may the window
        // move: zone ids must stay consistent during processing.
        if state.self_id.is_some() {
            let position = state.self_position;
            let mut entered = std::mem::take(&mut state.entered);
            let mut exited = std::mem::take(&mut state.exited);
            if state
                .zone_index
                .set_center_world(position, &mut entered, &mut exited)
            {
                state.zones_changed = true;
            }
            state.entered = entered;
            state.exited = exited;
        }

        state.active.commit();
    }
}
