//! Incremental frame decoder for one receiving pipe.
//!
//! Feed it chunks via a [`ChunkBuffer`] and it yields complete messages with
//! the routing bookkeeping of a hop already applied: the local pipe ID is
//! appended to the source path, the hop count bumped, the TTL decremented,
//! and the destination ID that addressed this node removed.
//!
//! A frame whose TTL reaches zero here is consumed and silently dropped; a
//! frame whose declared content length exceeds the configured limit is a
//! protocol error that closes the pipe.

use crate::buffer::ChunkBuffer;
use crate::error::{ManifoldError, Result};
use crate::message::{Message, MsgHeader, MsgPath, MSG_HEADER_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug)]
pub struct MsgDecoder {
    pipe_id: u32,
    max_content_length: u32,
    // Header of the frame currently awaiting its body.
    pending: Option<MsgHeader>,
}

impl MsgDecoder {
    /// `max_content_length` of zero means unlimited.
    #[must_use]
    pub const fn new(pipe_id: u32, max_content_length: u32) -> Self {
        Self {
            pipe_id,
            max_content_length,
            pending: None,
        }
    }

    /// Decode the next complete frame out of `src`.
    ///
    /// Returns `Ok(None)` when more input is needed. TTL-expired frames are
    /// consumed without being returned.
    pub fn decode(&mut self, src: &mut ChunkBuffer) -> Result<Option<Message>> {
        loop {
            let header = match self.pending {
                Some(header) => header,
                None => {
                    let mut raw = [0u8; MSG_HEADER_SIZE];
                    if !src.peek(&mut raw) {
                        return Ok(None);
                    }
                    let header = MsgHeader::decode(&raw);
                    if self.max_content_length != 0 && header.length > self.max_content_length {
                        return Err(ManifoldError::ContentTooLong {
                            length: header.length,
                            max: self.max_content_length,
                        });
                    }
                    src.discard(MSG_HEADER_SIZE);
                    self.pending = Some(header);
                    header
                }
            };

            let wire_source = 4 * header.hops as usize;
            let wire_dest = 4 * header.distance as usize;
            let body = wire_source + wire_dest + header.length as usize;
            if src.len() < body {
                return Ok(None);
            }
            self.pending = None;

            // Source grows at the tail: traversed IDs, then this pipe.
            let mut source = BytesMut::with_capacity(wire_source + 4);
            if let Some(traversed) = src.take(wire_source) {
                source.extend_from_slice(&traversed);
            }
            source.put_u32(self.pipe_id);

            let mut header = header;
            header.hops = header.hops.saturating_add(1);
            header.ttl = header.ttl.saturating_sub(1);

            // Destination is consumed from the tail: the trailing ID is the
            // one that addressed this node.
            let destination = if header.distance > 0 {
                let keep = 4 * (usize::from(header.distance) - 1);
                let dest = src.take(keep).unwrap_or_else(Bytes::new);
                src.discard(4);
                header.distance -= 1;
                MsgPath::from_bytes(dest)
            } else {
                MsgPath::empty()
            };

            let content = src
                .take(header.length as usize)
                .unwrap_or_else(Bytes::new);

            if header.ttl == 0 {
                tracing::trace!(pipe = self.pipe_id, "ttl expired; dropping frame");
                continue;
            }

            return Ok(Some(Message::from_parts(
                header,
                MsgPath::from_bytes(source.freeze()),
                destination,
                content,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SendType;

    fn feed(decoder: &mut MsgDecoder, frame: &Bytes) -> Result<Option<Message>> {
        let mut buf = ChunkBuffer::new();
        buf.push(frame.clone());
        decoder.decode(&mut buf)
    }

    #[test]
    fn decode_originated_frame() {
        let msg = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"hello"[..]);
        let frame = msg.encode();

        let mut decoder = MsgDecoder::new(9, 0);
        let got = feed(&mut decoder, &frame).expect("decode").expect("complete");
        assert_eq!(got.content(), b"hello");
        assert_eq!(got.header.hops, 1);
        assert_eq!(got.header.ttl, 15);
        assert_eq!(got.header.distance, 0);
        assert_eq!(got.source(), &MsgPath::from_ids(&[9]));
        assert!(got.destination().is_empty());
    }

    #[test]
    fn decode_is_incremental() {
        let msg = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"abcdef"[..]);
        let frame = msg.encode();

        let mut decoder = MsgDecoder::new(3, 0);
        let mut buf = ChunkBuffer::new();
        for byte in frame.iter().take(frame.len() - 1) {
            buf.push(Bytes::copy_from_slice(&[*byte]));
            assert!(decoder.decode(&mut buf).expect("decode").is_none());
        }
        buf.push(frame.slice(frame.len() - 1..));
        let got = decoder.decode(&mut buf).expect("decode").expect("complete");
        assert_eq!(got.content(), b"abcdef");
        assert!(buf.is_empty());
    }

    #[test]
    fn destination_tail_is_consumed() {
        // A frame addressed through [7, 8]: this hop was reached via 8, the
        // remaining path is [7].
        let msg = Message::new_send(
            SendType::ToDest,
            MsgPath::from_ids(&[7, 8]),
            0,
            16,
            &b"fwd"[..],
        );
        let frame = msg.encode();

        let mut decoder = MsgDecoder::new(21, 0);
        let got = feed(&mut decoder, &frame).expect("decode").expect("complete");
        assert_eq!(got.header.distance, 1);
        assert_eq!(got.destination(), &MsgPath::from_ids(&[7]));
        assert_eq!(got.source(), &MsgPath::from_ids(&[21]));
        assert_eq!(got.content(), b"fwd");
    }

    #[test]
    fn forwarded_frame_accumulates_source() {
        let msg = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"ping"[..]);

        let mut first_hop = MsgDecoder::new(101, 0);
        let at_b = feed(&mut first_hop, &msg.encode())
            .expect("decode")
            .expect("complete");

        // B forwards the message as-is; C sees both breadcrumbs.
        let mut second_hop = MsgDecoder::new(202, 0);
        let at_c = feed(&mut second_hop, &at_b.encode())
            .expect("decode")
            .expect("complete");
        assert_eq!(at_c.source(), &MsgPath::from_ids(&[101, 202]));
        assert_eq!(at_c.header.hops, 2);
        assert_eq!(at_c.header.ttl, 14);
        assert_eq!(at_c.content(), b"ping");
    }

    #[test]
    fn ttl_expiry_drops_frame() {
        let msg = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 1, &b"doomed"[..]);
        let frame = msg.encode();

        let mut decoder = MsgDecoder::new(5, 0);
        let mut buf = ChunkBuffer::new();
        buf.push(frame);
        // The frame is consumed but never delivered.
        assert!(decoder.decode(&mut buf).expect("decode").is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn ttl_drop_does_not_stall_later_frames() {
        let doomed = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 1, &b"x"[..]);
        let live = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"y"[..]);

        let mut buf = ChunkBuffer::new();
        buf.push(doomed.encode());
        buf.push(live.encode());

        let mut decoder = MsgDecoder::new(5, 0);
        let got = decoder.decode(&mut buf).expect("decode").expect("complete");
        assert_eq!(got.content(), b"y");
    }

    #[test]
    fn content_limit_is_enforced() {
        let msg = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"abcdef"[..]);
        let mut decoder = MsgDecoder::new(5, 4);
        let err = feed(&mut decoder, &msg.encode()).expect_err("limit");
        assert!(matches!(
            err,
            ManifoldError::ContentTooLong { length: 6, max: 4 }
        ));
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let a = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"one"[..]);
        let b = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"two"[..]);
        let mut joined = BytesMut::new();
        joined.extend_from_slice(&a.encode());
        joined.extend_from_slice(&b.encode());

        let mut buf = ChunkBuffer::new();
        buf.push(joined.freeze());
        let mut decoder = MsgDecoder::new(1, 0);
        let first = decoder.decode(&mut buf).expect("decode").expect("complete");
        let second = decoder.decode(&mut buf).expect("decode").expect("complete");
        assert_eq!(first.content(), b"one");
        assert_eq!(second.content(), b"two");
        assert!(decoder.decode(&mut buf).expect("decode").is_none());
    }
}
