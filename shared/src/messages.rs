//! The two datagram kinds the engine exchanges, and the tagged envelope
//! the transport carries them in. The transport treats payloads as
//! opaque; demultiplexing happens on the one-byte class tag.

use zonecast_serde::{BitReader, BitWriter};

use crate::protocol::{DecodeError, ObjectStateProtocol, ProtocolError};
use crate::state::SentState;

const OBJECT_STATE_TAG: u8 = 1;
const CLIENT_STATE_TAG: u8 = 2;

/// Server → client: a message id, a send timestamp for ping/clock sync,
/// and a serialized [`SentState`] payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStateMessage {
    pub id: u16,
    pub time: i64,
    pub buffer: Vec<u8>,
}

impl ObjectStateMessage {
    /// Fixed per-datagram overhead in bytes: id, time, tag, length.
    pub const HEADER_SIZE: usize = 2 + 8 + 1 + 4;

    pub fn new(id: u16, time: i64, buffer: Vec<u8>) -> Self {
        Self { id, time, buffer }
    }

    pub fn from_sent_state(
        id: u16,
        time: i64,
        state: &SentState,
        protocol: &ObjectStateProtocol,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(id, time, state.to_bytes(protocol)?))
    }

    /// Deserializes the carried [`SentState`], stamping it with this
    /// message's id.
    pub fn state(&self, protocol: &ObjectStateProtocol) -> Result<SentState, DecodeError> {
        SentState::from_bytes(self.id, &self.buffer, protocol)
    }
}

/// Client → server: acknowledges one server message, echoing its
/// timestamp for ping measurement. `control_bits` is an opaque word for
/// application use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStateMessage {
    pub ack_id: u16,
    pub time: i64,
    pub control_bits: u64,
}

impl ClientStateMessage {
    pub fn new(ack: &ObjectStateMessage, control_bits: u64) -> Self {
        Self {
            ack_id: ack.id,
            time: ack.time,
            control_bits,
        }
    }
}

/// A datagram as handed to the transport: one of the two message kinds
/// behind a class tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    ObjectState(ObjectStateMessage),
    ClientState(ClientStateMessage),
}

impl Datagram {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BitWriter::new();
        match self {
            Datagram::ObjectState(msg) => {
                out.write_bits(u32::from(OBJECT_STATE_TAG), 8);
                out.write_bits(u32::from(msg.id), 16);
                out.write_long_bits(msg.time as u64, 64);
                out.write_bits(msg.buffer.len() as u32, 32);
                for &byte in &msg.buffer {
                    out.write_bits(u32::from(byte), 8);
                }
            }
            Datagram::ClientState(msg) => {
                out.write_bits(u32::from(CLIENT_STATE_TAG), 8);
                out.write_bits(u32::from(msg.ack_id), 16);
                out.write_long_bits(msg.time as u64, 64);
                out.write_long_bits(msg.control_bits, 64);
            }
        }
        out.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut input = BitReader::new(bytes);
        let tag = input.read_bits(8)? as u8;
        match tag {
            OBJECT_STATE_TAG => {
                let id = input.read_bits(16)? as u16;
                let time = input.read_long_bits(64)? as i64;
                let length = input.read_bits(32)? as usize;
                let mut buffer = Vec::with_capacity(length);
                for _ in 0..length {
                    buffer.push(input.read_bits(8)? as u8);
                }
                Ok(Datagram::ObjectState(ObjectStateMessage::new(
                    id, time, buffer,
                )))
            }
            CLIENT_STATE_TAG => {
                let ack_id = input.read_bits(16)? as u16;
                let time = input.read_long_bits(64)? as i64;
                let control_bits = input.read_long_bits(64)?;
                Ok(Datagram::ClientState(ClientStateMessage {
                    ack_id,
                    time,
                    control_bits,
                }))
            }
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_state_envelope_round_trips() {
        let msg = ObjectStateMessage::new(42, 123_456_789, vec![0xde, 0xad, 0xbe, 0xef]);
        let datagram = Datagram::ObjectState(msg.clone());
        let out = Datagram::from_bytes(&datagram.to_bytes()).unwrap();
        assert_eq!(out, Datagram::ObjectState(msg));
    }

    #[test]
    fn client_state_envelope_round_trips() {
        let ack = ClientStateMessage {
            ack_id: 7,
            time: -1,
            control_bits: u64::MAX,
        };
        let out = Datagram::from_bytes(&Datagram::ClientState(ack).to_bytes()).unwrap();
        assert_eq!(out, Datagram::ClientState(ack));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            Datagram::from_bytes(&[9, 0, 0]),
            Err(DecodeError::UnknownTag(9))
        ));
    }

    #[test]
    fn ack_echoes_id_and_time() {
        let msg = ObjectStateMessage::new(3, 999, Vec::new());
        let ack = ClientStateMessage::new(&msg, 0);
        assert_eq!(ack.ack_id, 3);
        assert_eq!(ack.time, 999);
    }
}
