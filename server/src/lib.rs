//! # Zonecast Server
//! The server half of the replication engine: spatial zoning with a
//! short history, the collector that fans frames out per client, and
//! the per-client listener/writer pair that speaks the delta + ACK
//! protocol over an unreliable transport.
//!
//! Data flow: the game thread drives
//! [`ZoneManager::begin_update`]/[`update_entity`]/[`end_update`] per
//! tick; the [`StateCollector`] periodically purges the accumulated
//! frames and delivers them to each registered
//! [`NetworkStateListener`], which converts them into per-client
//! deltas and hands them to its [`StateWriter`] for packetization.
//!
//! [`update_entity`]: ZoneManager::update_entity
//! [`end_update`]: ZoneManager::end_update

mod buffered_set;
mod network_state_listener;
mod state_writer;
pub mod zone;

pub use buffered_set::{BufferedHashSet, SnapshotReader};
pub use network_state_listener::NetworkStateListener;
pub use state_writer::StateWriter;
pub use zone::{
    CollectorConfig, StateBlock, StateCollector, StateEntry, StateFrame, StateListener, Zone,
    ZoneManager, ZoneManagerConfig, DEFAULT_HISTORY_BACKLOG,
};
