//! The protocol configuration: field widths and quantizers for the
//! conditional-field object codec, plus the error types raised when a
//! message cannot be formed or parsed.

use thiserror::Error;
use zonecast_serde::{BitReader, BitWriter, SerdeError};

use crate::bits::{QuatBits, Vec3Bits};
use crate::math::{Quatd, Vec3d};
use crate::state::ObjectState;

/// Errors that make it impossible to produce a well-formed message.
/// These are fatal for the connection; they indicate misconfiguration
/// (MTU vs. header sizes) rather than a transient network condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The ack header cannot encode more than 255 ranges.
    #[error("ack header overflow: {count} ranges cannot be encoded in 8 bits")]
    TooManyAckRanges { count: usize },

    /// The ack header alone no longer fits the configured buffer.
    #[error("message header of {header_bits} bits exceeds the {buffer_bits}-bit buffer")]
    HeaderOverflow { header_bits: u64, buffer_bits: u64 },

    /// A frame could not be split to fit the buffer; the split point
    /// would keep zero states or all of them.
    #[error("cannot split frame of {states} states at limit {limit}")]
    SplitImpossible { states: usize, limit: u64 },

    /// A frame was ended with no open message, which means an earlier
    /// invariant was already violated.
    #[error("frame ended with no open message")]
    FrameWithoutMessage,

    /// State was added before any frame was started.
    #[error("state added with no frame time set")]
    FrameTimeUnset,
}

/// Errors parsing inbound datagrams. Network input is untrusted, so
/// these are ordinary runtime conditions, not bugs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Serde(#[from] SerdeError),

    /// The "no state" marker appeared inside a frame's state list.
    #[error("object state with network id 0 inside a frame")]
    EmptyObjectState,

    /// The datagram's class tag matched no known message kind.
    #[error("unknown datagram tag: {0}")]
    UnknownTag(u8),
}

/// Field widths and quantizers shared by every message on a connection.
/// Both endpoints must be constructed with identical values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectStateProtocol {
    pub zone_id_bits: u32,
    pub id_bits: u32,
    pub position_bits: Vec3Bits,
    pub rotation_bits: QuatBits,
}

impl ObjectStateProtocol {
    pub fn new(
        zone_id_bits: u32,
        id_bits: u32,
        position_bits: Vec3Bits,
        rotation_bits: QuatBits,
    ) -> Self {
        assert!(
            zone_id_bits > 0 && zone_id_bits <= 32,
            "zone id width out of range: {zone_id_bits}"
        );
        assert!(
            id_bits > 0 && id_bits <= 64,
            "id width out of range: {id_bits}"
        );
        Self {
            zone_id_bits,
            id_bits,
            position_bits,
            rotation_bits,
        }
    }

    /// Quantizes a zone-local (or parent-relative) position into the
    /// state's opaque position field.
    pub fn set_position(&self, state: &mut ObjectState, pos: Vec3d) {
        state.position_bits = Some(self.position_bits.to_bits(pos));
    }

    pub fn position(&self, state: &ObjectState) -> Option<Vec3d> {
        state
            .position_bits
            .map(|bits| self.position_bits.from_bits(bits))
    }

    pub fn set_rotation(&self, state: &mut ObjectState, rot: Quatd) {
        state.rotation_bits = Some(self.rotation_bits.to_bits(rot));
    }

    pub fn rotation(&self, state: &ObjectState) -> Option<Quatd> {
        state
            .rotation_bits
            .map(|bits| self.rotation_bits.from_bits(bits))
    }

    /// The exact number of bits [`write_state`](Self::write_state) will
    /// emit for this state. The packet splitter trusts this.
    pub fn state_bit_size(&self, state: &ObjectState) -> u64 {
        let mut size: u64 = 16;

        size += 1;
        if state.zone_id.is_some() {
            size += u64::from(self.zone_id_bits);
        }
        size += 1;
        if state.real_id.is_some() {
            size += u64::from(self.id_bits);
        }
        size += 1;
        if state.parent_id.is_some() {
            size += u64::from(self.id_bits);
        }
        size += 1;
        if state.position_bits.is_some() {
            size += u64::from(self.position_bits.bit_size());
        }
        size += 1;
        if state.rotation_bits.is_some() {
            size += u64::from(self.rotation_bits.bit_size());
        }
        size
    }

    /// Writes a state, or the 16-bit "no state" marker for `None`.
    ///
    /// # Panics
    ///
    /// Panics on a state with `network_id` 0: such a state cannot be
    /// serialized and its existence is a caller bug.
    pub fn write_state(&self, state: Option<&ObjectState>, out: &mut BitWriter) {
        let Some(state) = state else {
            out.write_bits(0, 16);
            return;
        };
        assert!(state.network_id != 0, "object state network id is 0");

        out.write_bits(u32::from(state.network_id), 16);

        match state.zone_id {
            None => out.write_bits(0, 1),
            Some(zone_id) => {
                out.write_bits(1, 1);
                out.write_bits(zone_id, self.zone_id_bits);
            }
        }

        match state.real_id {
            None => out.write_bits(0, 1),
            Some(real_id) => {
                out.write_bits(1, 1);
                out.write_long_bits(real_id, self.id_bits);
            }
        }

        match state.parent_id {
            None => out.write_bits(0, 1),
            Some(parent_id) => {
                out.write_bits(1, 1);
                out.write_long_bits(parent_id, self.id_bits);
            }
        }

        match state.position_bits {
            None => out.write_bits(0, 1),
            Some(bits) => {
                out.write_bits(1, 1);
                out.write_long_bits(bits, self.position_bits.bit_size());
            }
        }

        match state.rotation_bits {
            None => out.write_bits(0, 1),
            Some(bits) => {
                out.write_bits(1, 1);
                out.write_long_bits(bits, self.rotation_bits.bit_size());
            }
        }
    }

    /// Reads a state; a 0 network id decodes as `None`.
    pub fn read_state(&self, input: &mut BitReader<'_>) -> Result<Option<ObjectState>, SerdeError> {
        let network_id = input.read_bits(16)? as u16;
        if network_id == 0 {
            return Ok(None);
        }

        let mut state = ObjectState::new(network_id);

        if input.read_bits(1)? != 0 {
            state.zone_id = Some(input.read_bits(self.zone_id_bits)?);
        }
        if input.read_bits(1)? != 0 {
            state.real_id = Some(input.read_long_bits(self.id_bits)?);
        }
        if input.read_bits(1)? != 0 {
            state.parent_id = Some(input.read_long_bits(self.id_bits)?);
        }
        if input.read_bits(1)? != 0 {
            state.position_bits = Some(input.read_long_bits(self.position_bits.bit_size())?);
        }
        if input.read_bits(1)? != 0 {
            state.rotation_bits = Some(input.read_long_bits(self.rotation_bits.bit_size())?);
        }

        Ok(Some(state))
    }
}
