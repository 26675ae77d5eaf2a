use zonecast_serde::{BitReader, BitWriter};

use crate::protocol::{DecodeError, ObjectStateProtocol, ProtocolError};
use crate::sequence::sequence_less_than;
use crate::state::FrameState;

/// One outbound datagram's logical payload: the double-ack header (the
/// inbound message-id ranges this sender knows the peer has received)
/// followed by the frames it carries.
///
/// Retained by the sender until acknowledged so the acknowledged frames
/// can be promoted to the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct SentState {
    pub message_id: u16,
    /// Inclusive (min, max) ranges of acknowledged inbound message ids.
    pub acked: Vec<(u16, u16)>,
    pub frames: Vec<FrameState>,
}

impl SentState {
    pub fn new(message_id: u16, acked: Vec<(u16, u16)>, frames: Vec<FrameState>) -> Self {
        Self {
            message_id,
            acked,
            frames,
        }
    }

    /// Whether this state was sent before the given message id, under
    /// wraparound ordering.
    pub fn is_before(&self, message_id: u16) -> bool {
        sequence_less_than(self.message_id, message_id)
    }

    /// Size of the ack header in bits: an 8-bit count plus two 16-bit
    /// endpoints per range.
    pub fn estimated_header_size(&self) -> u64 {
        8 + self.acked.len() as u64 * 32
    }

    pub fn to_bytes(&self, protocol: &ObjectStateProtocol) -> Result<Vec<u8>, ProtocolError> {
        if self.acked.len() > u8::MAX as usize {
            return Err(ProtocolError::TooManyAckRanges {
                count: self.acked.len(),
            });
        }

        let mut out = BitWriter::new();
        out.write_bits(self.acked.len() as u32, 8);
        for &(min, max) in &self.acked {
            out.write_bits(u32::from(min), 16);
            out.write_bits(u32::from(max), 16);
        }

        // A marker bit per frame is cheaper than a fixed count, on
        // average.
        for frame in &self.frames {
            out.write_bits(1, 1);
            frame.write_bits(&mut out, protocol);
        }
        out.write_bits(0, 1);

        Ok(out.finish())
    }

    pub fn from_bytes(
        message_id: u16,
        buffer: &[u8],
        protocol: &ObjectStateProtocol,
    ) -> Result<Self, DecodeError> {
        let mut input = BitReader::new(buffer);

        let count = input.read_bits(8)?;
        let mut acked = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let min = input.read_bits(16)? as u16;
            let max = input.read_bits(16)? as u16;
            acked.push((min, max));
        }

        let mut frames = Vec::new();
        while input.read_bits(1)? == 1 {
            frames.push(FrameState::read_bits(&mut input, protocol)?);
        }

        Ok(Self::new(message_id, acked, frames))
    }
}
