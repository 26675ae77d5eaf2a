use zonecast_serde::{BitReader, BitWriter};

use crate::protocol::{DecodeError, ObjectStateProtocol, ProtocolError};
use crate::state::ObjectState;

// time + legacy sequence + column id + 16-bit list size.
const HEADER_BITS: u64 = 64 + 64 + 64 + 16;

/// One zone-window frame as sent to a particular client: every object
/// state for a single server time, tagged with the long id of the
/// client's window center so zone ids can be reinterpreted on receipt.
///
/// The running `estimated_bit_size` matches the emitted size exactly;
/// the packet splitter depends on that.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub time: i64,
    pub legacy_sequence: i64,
    pub column_id: i64,
    pub states: Vec<ObjectState>,
    estimated_bit_size: u64,
}

impl FrameState {
    pub fn new(time: i64, legacy_sequence: i64, column_id: i64) -> Self {
        Self {
            time,
            legacy_sequence,
            column_id,
            states: Vec::new(),
            estimated_bit_size: HEADER_BITS,
        }
    }

    pub fn header_bit_size() -> u64 {
        HEADER_BITS
    }

    pub fn estimated_bit_size(&self) -> u64 {
        self.estimated_bit_size
    }

    /// # Panics
    ///
    /// Panics on a state with `network_id` 0; an incomplete state in a
    /// frame is a caller bug.
    pub fn add_state(&mut self, state: ObjectState, protocol: &ObjectStateProtocol) {
        assert!(
            state.network_id != 0,
            "incomplete state added to frame: {state:?}"
        );
        self.estimated_bit_size += protocol.state_bit_size(&state);
        self.states.push(state);
    }

    /// Splits this frame so that it fits in `limit` bits, returning a new
    /// frame holding the tail. Returns `Ok(None)` when the frame already
    /// fits.
    ///
    /// A split point of zero or of the whole list cannot make progress;
    /// in practice it means the ack header overhead was mis-sized
    /// relative to the buffer, and it surfaces as an error.
    pub fn split(
        &mut self,
        limit: u64,
        protocol: &ObjectStateProtocol,
    ) -> Result<Option<FrameState>, ProtocolError> {
        if self.estimated_bit_size <= limit {
            return Ok(None);
        }

        let mut size = HEADER_BITS;
        let mut split = 0;
        while split < self.states.len() {
            let bits = protocol.state_bit_size(&self.states[split]);
            if size + bits > limit {
                break;
            }
            size += bits;
            split += 1;
        }
        if split == 0 || split == self.states.len() {
            return Err(ProtocolError::SplitImpossible {
                states: self.states.len(),
                limit,
            });
        }

        let left_over_bits = self.estimated_bit_size - size;

        let mut tail = FrameState::new(self.time, self.legacy_sequence + 1, self.column_id);
        tail.states = self.states.split_off(split);
        tail.estimated_bit_size += left_over_bits;

        self.estimated_bit_size = size;

        Ok(Some(tail))
    }

    pub fn write_bits(&self, out: &mut BitWriter, protocol: &ObjectStateProtocol) {
        out.write_long_bits(self.time as u64, 64);
        out.write_long_bits(self.legacy_sequence as u64, 64);
        out.write_long_bits(self.column_id as u64, 64);

        out.write_bits(self.states.len() as u32, 16);
        for state in &self.states {
            protocol.write_state(Some(state), out);
        }
    }

    pub fn read_bits(
        input: &mut BitReader<'_>,
        protocol: &ObjectStateProtocol,
    ) -> Result<Self, DecodeError> {
        let time = input.read_long_bits(64)? as i64;
        let legacy_sequence = input.read_long_bits(64)? as i64;
        let column_id = input.read_long_bits(64)? as i64;

        let mut frame = FrameState::new(time, legacy_sequence, column_id);
        let count = input.read_bits(16)?;
        for _ in 0..count {
            let state = protocol
                .read_state(input)?
                .ok_or(DecodeError::EmptyObjectState)?;
            frame.estimated_bit_size += protocol.state_bit_size(&state);
            frame.states.push(state);
        }
        Ok(frame)
    }
}
