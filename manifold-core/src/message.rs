//! The framed wire message and its routing paths.
//!
//! A message carries an 8-byte big-endian header, a source path (the pipe IDs
//! it traversed, most recent last), an optional destination path (the pipe IDs
//! still to traverse, consumed from the tail) and an opaque content.
//!
//! On the wire a frame is `header · source · destination · content`. An
//! originated message has zero hops and therefore carries no source bytes; the
//! source is accumulated hop by hop on the receiving side, which is what makes
//! a reply built from a received source retrace the forward chain in reverse.

use bytes::{BufMut, Bytes, BytesMut};

/// Byte size of the encoded message header.
pub const MSG_HEADER_SIZE: usize = 8;

/// Default hop budget for newly-built messages.
pub const DEFAULT_MSG_TTL: u8 = 16;

const SEND_TYPE_MASK: u8 = 0x03;
const FLAGS_MASK: u8 = !SEND_TYPE_MASK;

/// Socket-internal message, never delivered to the application.
pub const MSG_FLAG_INTERNAL: u8 = 0x04;
/// The message was produced by a raw (unframed) pipe.
pub const MSG_FLAG_RAW: u8 = 0x08;
/// Protocol control message, reserved for protocol layers above the core.
pub const MSG_FLAG_CONTROL: u8 = 0x10;

/// Internal message types, carried in the first content byte of an
/// internal-flagged message.
pub const INTERNAL_MSG_CLOSE_PEER: u8 = 0;

/// Routing mode of a message, stored in the low two bits of the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendType {
    /// Deliver via any one open pipe.
    ToOne = 0,
    /// Deliver via every open pipe.
    ToAll = 1,
    /// Follow the destination path.
    ToDest = 2,
}

impl SendType {
    /// Extract the send type from header flag bits, if valid.
    #[must_use]
    pub const fn from_flags(flags: u8) -> Option<Self> {
        match flags & SEND_TYPE_MASK {
            0 => Some(Self::ToOne),
            1 => Some(Self::ToAll),
            2 => Some(Self::ToDest),
            _ => None,
        }
    }
}

/// Message meta data, 8 bytes big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    /// Low 2 bits: send type; upper bits: flag set.
    pub flags: u8,
    /// Remaining hop budget, decremented at every receiving hop.
    pub ttl: u8,
    /// Number of pipe IDs in the source path.
    pub hops: u8,
    /// Number of pipe IDs remaining in the destination path.
    pub distance: u8,
    /// Content byte length.
    pub length: u32,
}

impl MsgHeader {
    /// The raw send-type bits.
    #[must_use]
    pub const fn send_type(&self) -> u8 {
        self.flags & SEND_TYPE_MASK
    }

    /// Check that every bit of `flags` is set.
    #[must_use]
    pub const fn has_flags(&self, flags: u8) -> bool {
        self.flags & flags == flags
    }

    /// Whether any flag bit beyond the send type is set.
    #[must_use]
    pub const fn has_any_flags(&self) -> bool {
        self.flags & FLAGS_MASK != 0
    }

    /// Clear the given flag bits, leaving the send type untouched.
    pub fn clear_flags(&mut self, flags: u8) {
        self.flags &= !(flags & FLAGS_MASK);
    }

    /// Append the 8-byte wire encoding to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.ttl);
        buf.put_u8(self.hops);
        buf.put_u8(self.distance);
        buf.put_u32(self.length);
    }

    /// Parse the 8-byte wire encoding.
    #[must_use]
    pub fn decode(raw: &[u8; MSG_HEADER_SIZE]) -> Self {
        Self {
            flags: raw[0],
            ttl: raw[1],
            hops: raw[2],
            distance: raw[3],
            length: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }
}

/// An ordered sequence of 4-byte big-endian pipe IDs.
///
/// Used both for the traversed chain (source, appended at the tail) and the
/// remaining chain (destination, consumed from the tail).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgPath(Bytes);

impl MsgPath {
    /// The empty path.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Wrap raw path bytes. The length must be a multiple of 4.
    #[must_use]
    pub const fn from_bytes(raw: Bytes) -> Self {
        Self(raw)
    }

    /// Build a path from pipe IDs, first hop first.
    #[must_use]
    pub fn from_ids(ids: &[u32]) -> Self {
        let mut buf = BytesMut::with_capacity(ids.len() * 4);
        for id in ids {
            buf.put_u32(*id);
        }
        Self(buf.freeze())
    }

    /// Path size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Number of pipe IDs in the path.
    #[must_use]
    pub fn len_ids(&self) -> u8 {
        (self.0.len() / 4) as u8
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The tail pipe ID, i.e. the most recently appended one.
    #[must_use]
    pub fn cur_id(&self) -> Option<u32> {
        let len = self.0.len();
        if len < 4 {
            return None;
        }
        let tail = &self.0[len - 4..];
        Some(u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]))
    }

    /// Pop the tail pipe ID, returning it together with the remaining path.
    #[must_use]
    pub fn next_id(&self) -> Option<(u32, MsgPath)> {
        let id = self.cur_id()?;
        Some((id, Self(self.0.slice(..self.0.len() - 4))))
    }

    /// Append a pipe ID at the tail.
    #[must_use]
    pub fn add_source(&self, id: u32) -> MsgPath {
        let mut buf = BytesMut::with_capacity(self.0.len() + 4);
        buf.extend_from_slice(&self.0);
        buf.put_u32(id);
        Self(buf.freeze())
    }

    /// Raw path bytes, as they appear on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Iterate the pipe IDs, first hop first.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.0
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
    }
}

/// A routed message.
///
/// The header's `hops`/`distance` always match the source/destination path
/// lengths. Content is `None` only for the raw end-of-stream sentinel.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MsgHeader,
    source: MsgPath,
    destination: MsgPath,
    content: Option<Bytes>,
}

impl Message {
    /// Build a message for an initiative or reply send.
    ///
    /// A zero `ttl` falls back to [`DEFAULT_MSG_TTL`].
    #[must_use]
    pub fn new_send(
        send_type: SendType,
        dest: MsgPath,
        flags: u8,
        ttl: u8,
        content: impl Into<Bytes>,
    ) -> Self {
        let content = content.into();
        let ttl = if ttl == 0 { DEFAULT_MSG_TTL } else { ttl };
        Self {
            header: MsgHeader {
                flags: (flags & FLAGS_MASK) | send_type as u8,
                ttl,
                hops: 0,
                distance: dest.len_ids(),
                length: content.len() as u32,
            },
            source: MsgPath::empty(),
            destination: dest,
            content: Some(content),
        }
    }

    /// Wrap a chunk read from a raw pipe. Raw messages are always to-one with
    /// a single-ID source; `None` content marks end-of-stream.
    #[must_use]
    pub fn new_raw_recv(pipe_id: u32, content: Option<Bytes>) -> Self {
        let length = content.as_ref().map_or(0, |c| c.len() as u32);
        Self {
            header: MsgHeader {
                flags: MSG_FLAG_RAW | SendType::ToOne as u8,
                ttl: DEFAULT_MSG_TTL - 1,
                hops: 1,
                distance: 0,
                length,
            },
            source: MsgPath::empty().add_source(pipe_id),
            destination: MsgPath::empty(),
            content,
        }
    }

    /// Assemble a message from decoded parts. The header is trusted to match
    /// the path lengths; the codec upholds that.
    #[must_use]
    pub const fn from_parts(
        header: MsgHeader,
        source: MsgPath,
        destination: MsgPath,
        content: Bytes,
    ) -> Self {
        Self {
            header,
            source,
            destination,
            content: Some(content),
        }
    }

    #[must_use]
    pub const fn source(&self) -> &MsgPath {
        &self.source
    }

    #[must_use]
    pub const fn destination(&self) -> &MsgPath {
        &self.destination
    }

    /// The message content; empty for the raw end-of-stream sentinel.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        match &self.content {
            Some(c) => c,
            None => &[],
        }
    }

    /// Consume the message, keeping only its content.
    #[must_use]
    pub fn into_content(self) -> Option<Bytes> {
        self.content
    }

    /// Whether this is the raw end-of-stream sentinel.
    #[must_use]
    pub const fn is_stream_end(&self) -> bool {
        self.content.is_none()
    }

    /// The pipe this message most recently arrived on.
    #[must_use]
    pub fn pipe_id(&self) -> Option<u32> {
        self.source.cur_id()
    }

    /// Append a pipe ID to the source path, keeping the header in step.
    pub fn add_source(&mut self, id: u32) {
        self.source = self.source.add_source(id);
        self.header.hops = self.header.hops.saturating_add(1);
    }

    /// Duplicate the message. Paths and content are refcounted, so this is
    /// cheap; the duplicate is independently owned.
    #[must_use]
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Encode the full wire frame: header, source, destination, content.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let content = self.content();
        let mut buf = BytesMut::with_capacity(
            MSG_HEADER_SIZE + self.source.size() + self.destination.size() + content.len(),
        );
        self.header.encode_into(&mut buf);
        buf.extend_from_slice(self.source.as_bytes());
        buf.extend_from_slice(self.destination.as_bytes());
        buf.extend_from_slice(content);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = MsgHeader {
            flags: MSG_FLAG_RAW | SendType::ToDest as u8,
            ttl: 7,
            hops: 2,
            distance: 3,
            length: 0xdead_beef,
        };
        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);
        assert_eq!(buf.len(), MSG_HEADER_SIZE);

        let mut raw = [0u8; MSG_HEADER_SIZE];
        raw.copy_from_slice(&buf);
        assert_eq!(MsgHeader::decode(&raw), header);
    }

    #[test]
    fn header_flags() {
        let mut header = MsgHeader {
            flags: MSG_FLAG_INTERNAL | MSG_FLAG_RAW | SendType::ToAll as u8,
            ..MsgHeader::default()
        };
        assert_eq!(header.send_type(), SendType::ToAll as u8);
        assert!(header.has_flags(MSG_FLAG_INTERNAL));
        assert!(header.has_flags(MSG_FLAG_INTERNAL | MSG_FLAG_RAW));
        assert!(!header.has_flags(MSG_FLAG_CONTROL));
        assert!(header.has_any_flags());

        header.clear_flags(MSG_FLAG_INTERNAL);
        assert!(!header.has_flags(MSG_FLAG_INTERNAL));
        assert!(header.has_flags(MSG_FLAG_RAW));
        // send type survives a sweeping clear
        header.clear_flags(0xff);
        assert_eq!(header.send_type(), SendType::ToAll as u8);
    }

    #[test]
    fn send_type_bits() {
        assert_eq!(SendType::from_flags(0x00), Some(SendType::ToOne));
        assert_eq!(SendType::from_flags(MSG_FLAG_RAW | 0x01), Some(SendType::ToAll));
        assert_eq!(SendType::from_flags(0x02), Some(SendType::ToDest));
        assert_eq!(SendType::from_flags(0x03), None);
    }

    #[test]
    fn path_arithmetic() {
        let path = MsgPath::empty();
        assert!(path.is_empty());
        assert_eq!(path.cur_id(), None);

        let path = path.add_source(7).add_source(11);
        assert_eq!(path.len_ids(), 2);
        assert_eq!(path.size(), 8);
        assert_eq!(path.cur_id(), Some(11));
        assert_eq!(path.ids().collect::<Vec<_>>(), vec![7, 11]);

        let (id, rest) = path.next_id().expect("non-empty path");
        assert_eq!(id, 11);
        assert_eq!(rest, MsgPath::from_ids(&[7]));
        let (id, rest) = rest.next_id().expect("one id left");
        assert_eq!(id, 7);
        assert!(rest.is_empty());
    }

    #[test]
    fn reply_retraces_in_reverse() {
        // forward traversal appends 1 then 2 then 3; a reply built from that
        // source pops 3, 2, 1 in order
        let forward = MsgPath::from_ids(&[1, 2, 3]);
        let mut popped = Vec::new();
        let mut rest = forward;
        while let Some((id, tail)) = rest.next_id() {
            popped.push(id);
            rest = tail;
        }
        assert_eq!(popped, vec![3, 2, 1]);
    }

    #[test]
    fn new_send_shape() {
        let msg = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 0, &b"hi"[..]);
        assert_eq!(msg.header.ttl, DEFAULT_MSG_TTL);
        assert_eq!(msg.header.hops, 0);
        assert_eq!(msg.header.distance, 0);
        assert_eq!(msg.header.length, 2);
        assert_eq!(msg.content(), b"hi");
        assert!(!msg.is_stream_end());

        let dest = MsgPath::from_ids(&[5, 6]);
        let reply = Message::new_send(SendType::ToDest, dest, 0, 9, &b"pong"[..]);
        assert_eq!(reply.header.send_type(), SendType::ToDest as u8);
        assert_eq!(reply.header.ttl, 9);
        assert_eq!(reply.header.distance, 2);
        assert_eq!(reply.destination().cur_id(), Some(6));
    }

    #[test]
    fn raw_recv_shape() {
        let msg = Message::new_raw_recv(42, Some(Bytes::from_static(b"chunk")));
        assert!(msg.header.has_flags(MSG_FLAG_RAW));
        assert_eq!(msg.header.send_type(), SendType::ToOne as u8);
        assert_eq!(msg.header.hops, 1);
        assert_eq!(msg.pipe_id(), Some(42));
        assert_eq!(msg.content(), b"chunk");

        let eof = Message::new_raw_recv(42, None);
        assert!(eof.is_stream_end());
        assert_eq!(eof.content(), b"");
        assert_eq!(eof.header.length, 0);
    }

    #[test]
    fn encode_layout() {
        let mut msg = Message::new_send(
            SendType::ToDest,
            MsgPath::from_ids(&[0x01020304]),
            0,
            16,
            &b"xy"[..],
        );
        msg.add_source(0x0a0b0c0d);
        let frame = msg.encode();
        assert_eq!(frame.len(), MSG_HEADER_SIZE + 4 + 4 + 2);
        // header
        assert_eq!(frame[0], SendType::ToDest as u8);
        assert_eq!(frame[2], 1); // hops
        assert_eq!(frame[3], 1); // distance
        assert_eq!(&frame[4..8], &2u32.to_be_bytes());
        // source, then destination, then content
        assert_eq!(&frame[8..12], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&frame[12..16], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&frame[16..], b"xy");
    }

    #[test]
    fn dup_is_independent() {
        let msg = Message::new_send(SendType::ToAll, MsgPath::empty(), 0, 16, &b"fan"[..]);
        let dup = msg.dup();
        assert_eq!(dup.header, msg.header);
        assert_eq!(dup.content(), msg.content());
        drop(msg);
        assert_eq!(dup.content(), b"fan");
    }
}
