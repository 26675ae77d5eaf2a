//! Spatial zoning and the history pipeline: per-cell frame buffers, the
//! cross-cell manager, and the collector that fans frames out to
//! per-client listeners.

mod state_block;
mod state_collector;
mod state_frame;
mod zone;
mod zone_manager;

pub use state_block::{StateBlock, StateEntry};
pub use state_collector::{CollectorConfig, StateCollector, StateListener};
pub use state_frame::StateFrame;
pub use zone::Zone;
pub use zone_manager::{ZoneManager, ZoneManagerConfig, DEFAULT_HISTORY_BACKLOG};
