//! # Zonecast Shared
//! Common functionality shared between the zonecast-server &
//! zonecast-client crates: the wire model and codec, the zone grid, the
//! per-client window, and the shared-object/baseline machinery the ACK
//! protocol converges on.

pub use zonecast_serde::{BitReader, BitWriter, SerdeError};

mod bits;
mod id_index;
mod int_range;
mod local_zone_index;
mod math;
mod messages;
mod protocol;
mod sequence;
mod shared_object;
mod shared_object_space;
mod state;
mod stats;
mod time;
mod transport;
mod zone;

pub use bits::{QuatBits, Vec3Bits};
pub use id_index::IdIndex;
pub use int_range::IntRangeSet;
pub use local_zone_index::LocalZoneIndex;
pub use math::{Aabb, Quatd, Vec3d, Vec3i};
pub use messages::{ClientStateMessage, Datagram, ObjectStateMessage};
pub use protocol::{DecodeError, ObjectStateProtocol, ProtocolError};
pub use sequence::{sequence_greater_than, sequence_less_than, WRAP_THRESHOLD};
pub use shared_object::{BaselineUpdate, ObjectChange, SharedObject};
pub use shared_object_space::{SharedObjectListener, SharedObjectSpace};
pub use state::{FrameState, ObjectState, SentState};
pub use stats::ConnectionStats;
pub use time::{SynchedTimeSource, SystemTimeSource, TimeSource};
pub use transport::{ChannelReceiver, ChannelSender, DatagramChannel, DatagramSender, NullSender};
pub use zone::{ZoneGrid, ZoneKey};
