//! The wire-level state model: per-object snapshots/deltas, per-zone
//! frame records, and the per-datagram payload.

mod frame_state;
mod object_state;
mod sent_state;

pub use frame_state::FrameState;
pub use object_state::ObjectState;
pub use sent_state::SentState;
