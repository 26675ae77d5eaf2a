//! # Zonecast Client
//! The client half of the replication engine: receives the server's
//! delta-compressed state stream, acknowledges every message, converges
//! its object table onto the authoritative set, and keeps a
//! synchronized view of server time for interpolation.

mod remote_time;
mod state_receiver;

pub use remote_time::{RemoteTimeSource, DEFAULT_OFFSET};
pub use state_receiver::{ObjectView, StateReceiver};
