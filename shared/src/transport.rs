//! The only transport surface the engine needs: a best-effort,
//! non-blocking datagram send. Receiving is push-based — the transport's
//! ingress threads call into the engine with decoded datagrams.
//!
//! A channel-backed in-process transport is included for tests and
//! loopback setups; real deployments wrap their own socket layer.

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};

use crate::messages::Datagram;

/// Outbound half of an unreliable datagram transport.
///
/// `send` must not block. A transport with a full buffer may drop the
/// datagram: an un-acked state message is superseded by a later send,
/// and ack messages are re-generated per inbound message.
pub trait DatagramSender: Send + Sync {
    fn send(&self, datagram: Datagram);
}

/// A sender that discards everything, for tests and benchmarks.
pub struct NullSender;

impl DatagramSender for NullSender {
    fn send(&self, _datagram: Datagram) {}
}

/// An in-process datagram pipe with send-and-forget semantics.
pub struct DatagramChannel;

impl DatagramChannel {
    pub fn unbounded() -> (ChannelSender, ChannelReceiver) {
        let (sender, receiver) = unbounded();
        (ChannelSender { sender }, ChannelReceiver { receiver })
    }
}

/// The sending half of a [`DatagramChannel`].
pub struct ChannelSender {
    sender: Sender<Datagram>,
}

impl DatagramSender for ChannelSender {
    fn send(&self, datagram: Datagram) {
        // A disconnected or full pipe drops the datagram, like a socket
        // with a full buffer would.
        if let Err(TrySendError::Disconnected(_)) = self.sender.try_send(datagram) {
            log::debug!("datagram channel disconnected, dropping");
        }
    }
}

/// The receiving half of a [`DatagramChannel`].
pub struct ChannelReceiver {
    receiver: Receiver<Datagram>,
}

impl ChannelReceiver {
    pub fn try_receive(&self) -> Option<Datagram> {
        self.receiver.try_recv().ok()
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<Datagram> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientStateMessage, ObjectStateMessage};

    #[test]
    fn channel_delivers_in_order() {
        let (sender, receiver) = DatagramChannel::unbounded();
        for id in 0..3u16 {
            sender.send(Datagram::ObjectState(ObjectStateMessage::new(
                id,
                0,
                Vec::new(),
            )));
        }
        let ids: Vec<u16> = receiver
            .drain()
            .into_iter()
            .map(|d| match d {
                Datagram::ObjectState(m) => m.id,
                Datagram::ClientState(m) => m.ack_id,
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn dropped_receiver_discards_sends() {
        let (sender, receiver) = DatagramChannel::unbounded();
        drop(receiver);
        // Must not block or panic.
        sender.send(Datagram::ClientState(ClientStateMessage {
            ack_id: 1,
            time: 0,
            control_bits: 0,
        }));
    }
}
