//! Builds outbound state messages for one client: accumulates frames,
//! splits them across MTU-sized datagrams, and runs the sender half of
//! the double-acknowledgement protocol.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{trace, warn};
use zonecast_shared::{
    Datagram, DatagramSender, FrameState, IntRangeSet, ObjectState, ObjectStateMessage,
    ObjectStateProtocol, ProtocolError, SentState, TimeSource, ZoneKey,
};

// Fixed overheads subtracted from the MTU: worst-case IP+UDP headers and
// the transport's own framing.
const UDP_HEADER: usize = 50;
const TRANSPORT_HEADER: usize = 5;

const DEFAULT_MTU: usize = 1500;

// Past this many unconfirmed double-acks something is badly wrong with
// the return path; one inbound ack normally clears almost all of them.
const RECEIVED_ACKS_WATCHDOG: usize = 128;

/// The packetizer and ack bookkeeper for one connection.
///
/// `sent_states` retains every un-acknowledged outbound message in send
/// order; `received_acks` is the set of inbound message ids whose
/// acknowledgement we must keep echoing until the peer confirms it saw
/// the echo.
pub struct StateWriter {
    sender: Box<dyn DatagramSender>,
    protocol: ObjectStateProtocol,
    time_source: Arc<dyn TimeSource>,

    sent_states: VecDeque<SentState>,
    received_acks: IntRangeSet,
    next_message_id: u16,

    // Frame header state.
    frame_time: Option<i64>,
    legacy_sequence: i64,
    center_zone_id: i64,
    current_frame: Option<FrameState>,

    outbound: Option<SentState>,
    header_bits: u64,
    estimated_size: u64,

    mtu: usize,
    buffer_size: usize,
}

impl StateWriter {
    pub fn new(
        sender: Box<dyn DatagramSender>,
        protocol: ObjectStateProtocol,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            sender,
            protocol,
            time_source,
            sent_states: VecDeque::new(),
            received_acks: IntRangeSet::new(),
            next_message_id: 0,
            frame_time: None,
            legacy_sequence: 0,
            center_zone_id: -1,
            current_frame: None,
            outbound: None,
            header_bits: 0,
            estimated_size: 0,
            mtu: DEFAULT_MTU,
            buffer_size: DEFAULT_MTU - UDP_HEADER - TRANSPORT_HEADER,
        }
    }

    /// Sets the MTU; the usable buffer is the MTU minus fixed UDP and
    /// transport overheads.
    pub fn set_max_message_size(&mut self, mtu: usize) {
        assert!(
            mtu > UDP_HEADER + TRANSPORT_HEADER,
            "mtu too small: {mtu}"
        );
        self.mtu = mtu;
        self.buffer_size = mtu - UDP_HEADER - TRANSPORT_HEADER;
    }

    pub fn max_message_size(&self) -> usize {
        self.mtu
    }

    /// Outbound messages retained while waiting for acknowledgement.
    pub fn pending_message_count(&self) -> usize {
        self.sent_states.len()
    }

    /// Matches an inbound ack against the retained messages.
    ///
    /// On a match: every double-ack range the matched message carried is
    /// confirmed seen by the peer and dropped from `received_acks`, the
    /// acked id itself joins `received_acks`, and the message is
    /// returned so the caller can promote its frames to the baseline.
    /// Older retained entries are superseded and discarded; a stale or
    /// unknown id returns None.
    pub fn ack_sent_state(&mut self, message_id: u16) -> Option<SentState> {
        while let Some(entry) = self.sent_states.front() {
            if entry.message_id == message_id {
                let entry = self.sent_states.pop_front().expect("front exists");

                // The peer has this message, so it also has every
                // double-ack it carried; stop echoing those.
                for &(min, max) in &entry.acked {
                    for id in min..=max {
                        self.received_acks.remove(id);
                    }
                }
                self.received_acks.insert(message_id);
                return Some(entry);
            }

            if message_id < entry.message_id {
                // The retained list is in send order: everything from
                // here on is newer than the ack, so it arrived out of
                // order after its message was superseded.
                return None;
            }

            // Older than what we are looking for; superseded. The state
            // it carried will be resent because it was never confirmed.
            self.sent_states.pop_front();
        }
        None
    }

    /// Closes any open frame and starts a new one at `time`, centered on
    /// the client's window center.
    pub fn start_frame(&mut self, time: i64, center: Option<&ZoneKey>) -> Result<(), ProtocolError> {
        self.end_frame()?;
        self.start_message()?;

        self.frame_time = Some(time);
        self.center_zone_id = center.map_or(-1, ZoneKey::to_long_id);
        self.legacy_sequence = time & !0xff;
        Ok(())
    }

    /// Appends one object state to the current frame, creating the
    /// frame lazily.
    pub fn add_state(&mut self, state: ObjectState) -> Result<(), ProtocolError> {
        if self.current_frame.is_none() {
            let Some(frame_time) = self.frame_time else {
                return Err(ProtocolError::FrameTimeUnset);
            };
            self.current_frame = Some(FrameState::new(
                frame_time,
                self.legacy_sequence,
                self.center_zone_id,
            ));
            self.legacy_sequence += 1;
        }

        self.current_frame
            .as_mut()
            .expect("frame created above")
            .add_state(state, &self.protocol);
        Ok(())
    }

    fn start_message(&mut self) -> Result<(), ProtocolError> {
        if self.outbound.is_some() {
            return Ok(());
        }

        // The received-acks set only grows when the peer sends us a
        // message, and that same message lets us clear everything it
        // confirms; a large set means the return path is broken.
        if self.received_acks.id_count() >= RECEIVED_ACKS_WATCHDOG {
            warn!(
                "received acks set is not draining: {} ids pending",
                self.received_acks.id_count()
            );
        }
        if self.received_acks.range_count() > u8::MAX as usize {
            return Err(ProtocolError::TooManyAckRanges {
                count: self.received_acks.range_count(),
            });
        }

        let outbound = SentState::new(0, self.received_acks.ranges().to_vec(), Vec::new());
        self.header_bits = outbound.estimated_header_size();

        let buffer_bits = (self.buffer_size * 8) as u64;
        if self.header_bits >= buffer_bits {
            return Err(ProtocolError::HeaderOverflow {
                header_bits: self.header_bits,
                buffer_bits,
            });
        }

        self.estimated_size = self.header_bits;
        self.outbound = Some(outbound);
        Ok(())
    }

    /// Closes the current frame, splitting it across messages as needed.
    pub fn end_frame(&mut self) -> Result<(), ProtocolError> {
        let Some(frame) = self.current_frame.take() else {
            return Ok(());
        };
        if self.outbound.is_none() {
            return Err(ProtocolError::FrameWithoutMessage);
        }

        let buffer_bits = (self.buffer_size * 8) as u64;

        // The extra bit is the frame's continuation marker.
        let frame_size = frame.estimated_bit_size() + 1;
        let bits_remaining = buffer_bits - self.estimated_size;
        if frame_size < bits_remaining {
            self.outbound
                .as_mut()
                .expect("checked above")
                .frames
                .push(frame);
            self.estimated_size += frame_size;
            return Ok(());
        }

        // Too big for what is left: flush and split until it fits.
        let mut pending = Some(frame);
        while let Some(mut frame) = pending.take() {
            let has_frames = self
                .outbound
                .as_ref()
                .is_some_and(|o| !o.frames.is_empty());
            if has_frames {
                self.end_message()?;
            }
            self.start_message()?;

            // Reserve the continuation marker and the message
            // terminator so the head cannot land exactly on the buffer
            // edge.
            let bits_remaining = buffer_bits - self.estimated_size;
            let tail = frame.split(bits_remaining.saturating_sub(2), &self.protocol)?;

            let head_size = frame.estimated_bit_size() + 1;
            self.outbound
                .as_mut()
                .expect("message opened above")
                .frames
                .push(frame);
            self.estimated_size += head_size;

            if let Some(tail) = &tail {
                trace!("splitting frame, remaining states: {}", tail.states.len());
            }
            pending = tail;
        }

        Ok(())
    }

    fn end_message(&mut self) -> Result<(), ProtocolError> {
        let mut outbound = self.outbound.take().expect("no open message to end");

        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        outbound.message_id = id;

        let message = ObjectStateMessage::from_sent_state(
            id,
            self.time_source.time(),
            &outbound,
            &self.protocol,
        )?;
        self.sent_states.push_back(outbound);

        self.sender.send(Datagram::ObjectState(message));
        Ok(())
    }

    /// Closes the frame and sends whatever message is open. An open
    /// message with no frames still goes out: it keeps the ack exchange
    /// moving.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.end_frame()?;

        if self.outbound.is_none() {
            return Ok(());
        }
        self.end_message()
    }
}
