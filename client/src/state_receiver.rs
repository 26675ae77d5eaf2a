//! The inbound half on the client: acknowledges every server message
//! immediately, applies frame deltas to the local object table, and
//! promotes double-acknowledged states to the baseline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use zonecast_shared::{
    ClientStateMessage, ConnectionStats, Datagram, DatagramSender, DecodeError, LocalZoneIndex,
    ObjectStateMessage, ObjectStateProtocol, Quatd, SentState, SharedObjectListener,
    SharedObjectSpace, Vec3d, ZoneGrid, ZoneKey,
};

use crate::remote_time::RemoteTimeSource;

/// A game-facing snapshot of one replicated object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectView {
    pub network_id: u16,
    pub entity_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub world_position: Option<Vec3d>,
    pub world_rotation: Option<Quatd>,
    pub removed: bool,
}

struct ReceiverState {
    space: SharedObjectSpace,
    zone_index: LocalZoneIndex,
    // Inbound states we have acked but the server has not yet confirmed
    // it saw the ack for, in ascending message-id order.
    received_states: Vec<SentState>,
    last_frame_time: i64,
    entered: Vec<ZoneKey>,
    exited: Vec<ZoneKey>,
}

impl ReceiverState {
    fn insert_received(&mut self, state: SentState) {
        let id = state.message_id;
        if let Some(existing) = self
            .received_states
            .iter_mut()
            .find(|s| s.message_id == id)
        {
            *existing = state;
            return;
        }
        let index = self
            .received_states
            .iter()
            .position(|s| id < s.message_id)
            .unwrap_or(self.received_states.len());
        self.received_states.insert(index, state);
    }

    /// Resolves one double-acked id against the retained states.
    /// Anything older than the target was superseded by loss and is
    /// dropped; an id we already processed resolves to None, which is
    /// routine under retransmitted double-acks.
    fn ack_received_state(&mut self, message_id: u16) -> Option<SentState> {
        while let Some(first) = self.received_states.first() {
            if first.message_id == message_id {
                return Some(self.received_states.remove(0));
            }
            if first.message_id < message_id {
                let stale = self.received_states.remove(0);
                debug!(
                    "skipping state {} for double-acked id {message_id}",
                    stale.message_id
                );
                continue;
            }
            return None;
        }
        None
    }
}

/// Mirrors the server's per-client pipeline on the client side. Driven
/// by the transport's ingress threads through [`handle_message`].
///
/// [`handle_message`]: StateReceiver::handle_message
pub struct StateReceiver {
    sender: Box<dyn DatagramSender>,
    protocol: ObjectStateProtocol,
    grid: ZoneGrid,
    time_source: Arc<RemoteTimeSource>,
    stats: Arc<ConnectionStats>,
    control_bits: AtomicU64,
    state: Mutex<ReceiverState>,
}

impl StateReceiver {
    pub fn new(
        protocol: ObjectStateProtocol,
        grid: ZoneGrid,
        zone_radius: i32,
        sender: Box<dyn DatagramSender>,
    ) -> Self {
        Self::with_index(protocol, LocalZoneIndex::new(grid, zone_radius), sender)
    }

    pub fn with_index(
        protocol: ObjectStateProtocol,
        zone_index: LocalZoneIndex,
        sender: Box<dyn DatagramSender>,
    ) -> Self {
        let grid = *zone_index.grid();
        let stats = Arc::new(ConnectionStats::new());
        Self {
            sender,
            protocol,
            grid,
            time_source: Arc::new(RemoteTimeSource::new()),
            stats: Arc::clone(&stats),
            control_bits: AtomicU64::new(0),
            state: Mutex::new(ReceiverState {
                space: SharedObjectSpace::with_stats(protocol, stats),
                zone_index,
                received_states: Vec::new(),
                last_frame_time: 0,
                entered: Vec::new(),
                exited: Vec::new(),
            }),
        }
    }

    /// The synchronized server clock, for interpolation.
    pub fn time_source(&self) -> &Arc<RemoteTimeSource> {
        &self.time_source
    }

    pub fn connection_stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Application word echoed in every outgoing acknowledgement.
    pub fn set_control_bits(&self, bits: u64) {
        self.control_bits.store(bits, Ordering::Relaxed);
    }

    /// Registers a game-side observer of object updates and removals.
    pub fn add_object_listener(&self, listener: Arc<dyn SharedObjectListener>) {
        self.state.lock().space.add_listener(listener);
    }

    pub fn remove_object_listener(&self, listener: &Arc<dyn SharedObjectListener>) {
        self.state.lock().space.remove_listener(listener);
    }

    pub fn object_ids(&self) -> Vec<u16> {
        self.state.lock().space.network_ids()
    }

    /// Snapshot of one object's reconstructed state.
    pub fn object_view(&self, network_id: u16) -> Option<ObjectView> {
        let state = self.state.lock();
        let object = state.space.get(network_id)?;
        Some(ObjectView {
            network_id,
            entity_id: object.entity_id(),
            parent_id: object.parent_id(),
            world_position: object.world_position(&self.protocol),
            world_rotation: object.world_rotation(&self.protocol),
            removed: object.is_marked_removed(),
        })
    }

    /// Ingests one server datagram: updates the clock, acks it
    /// immediately, folds its double-acks into the baseline, and
    /// applies its frames in time order.
    pub fn handle_message(&self, message: &ObjectStateMessage) -> Result<(), DecodeError> {
        self.time_source.update(message);
        debug!("update state: message {}", message.id);

        // Acknowledge before anything else. Acks are regenerated per
        // inbound message, so a single ack datagram suffices; no
        // running ack set is needed on this side.
        let ack = ClientStateMessage::new(message, self.control_bits.load(Ordering::Relaxed));
        self.sender.send(Datagram::ClientState(ack));

        let sent = message.state(&self.protocol)?;

        let state = &mut *self.state.lock();

        // Keep the state for later: it becomes baseline material once
        // the server confirms it saw our ack.
        let acked = sent.acked.clone();
        let frames = sent.frames.clone();
        state.insert_received(sent);

        // The server is telling us which of our acks it has seen; those
        // messages are now the mutual baseline that future deltas are
        // interpreted against.
        for (min, max) in acked {
            for acked_id in min..=max {
                let Some(confirmed) = state.ack_received_state(acked_id) else {
                    // Routine: the server repeats ids until we ack the
                    // message that carried them.
                    continue;
                };
                trace!("updating baseline for message: {acked_id}");
                state.space.update_baseline(&confirmed.frames);
            }
        }

        for frame in &frames {
            if frame.time < state.last_frame_time {
                continue;
            }
            state.last_frame_time = frame.time;
            trace!("frame begin: {}", frame.time);

            state.space.begin_frame(frame.time);

            // Reinterpret zone ids against the window center this frame
            // was built for.
            if frame.column_id != -1 {
                let center = self.grid.from_long_id(frame.column_id);
                let mut entered = std::mem::take(&mut state.entered);
                let mut exited = std::mem::take(&mut state.exited);
                state.zone_index.set_center(center, &mut entered, &mut exited);
                state.entered = entered;
                state.exited = exited;
            }

            for object_state in &frame.states {
                if let Some(real_id) = object_state.real_id {
                    // First observation of a real id creates the
                    // binding.
                    state
                        .space
                        .get_or_create(object_state.network_id, Some(real_id));
                } else if state.space.get(object_state.network_id).is_none() {
                    // Updates for an object we have never bound or have
                    // already evicted; brief around evictions.
                    warn!(
                        "network id lookup returned none, state: {object_state:?}, message: {}",
                        message.id
                    );
                    continue;
                }

                let Some(_change) = state.space.apply_network_state(
                    object_state.network_id,
                    frame.time,
                    object_state,
                    &state.zone_index,
                ) else {
                    continue;
                };

                let fully_removed = state
                    .space
                    .get(object_state.network_id)
                    .is_some_and(|o| o.is_fully_marked_removed());
                if fully_removed {
                    // Removed in both current and baseline; no reason to
                    // track it anymore.
                    state.space.remove(object_state.network_id);
                }
            }

            state.space.end_frame();
        }

        Ok(())
    }
}
