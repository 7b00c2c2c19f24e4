//! Framed codec for the worker input pipe.
//!
//! Wire format, per frame, little-endian:
//!
//! ```text
//! ┌──────────────┬───────────┬────────────────────┐
//! │ Length (8B)  │ Type (1B) │ Payload            │
//! │ LE u64       │ tag byte  │ Length - 1 bytes   │
//! └──────────────┴───────────┴────────────────────┘
//! ```
//!
//! The length field counts the type tag plus the payload — `payload + 1`,
//! not the full wire size. The worker's reader depends on this definition;
//! do not "fix" it to include the header.
//!
//! The driver only encodes. The decoder is the mirror image for the
//! worker-side reader, and lets tests verify what actually hit the pipe.

use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length field preceding every frame.
pub const LENGTH_FIELD_SIZE: usize = 8;

/// Request-kind discriminator carried in every frame.
///
/// Open enumeration: new worker request kinds get new tags, the frame layout
/// never changes.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestTag {
    /// Forwarded HTTP-client request.
    HttpClient = 0,
}

impl RequestTag {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::HttpClient),
            _ => None,
        }
    }
}

/// One outbound request to the worker: a type tag plus an opaque payload
/// produced by the kernel's serialization codec.
///
/// A frame is a single-owner value. It is allocated where the command is
/// accepted, moved into the write pipeline, and consumed by the encoder when
/// the write completes — there is no path on which the buffer is referenced
/// after submission.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub tag: RequestTag,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: RequestTag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    pub fn http_client(payload: impl Into<Bytes>) -> Self {
        Self::new(RequestTag::HttpClient, payload)
    }

    /// Value of the wire length field: payload length plus the tag byte.
    pub fn length_field(&self) -> u64 {
        self.payload.len() as u64 + 1
    }

    /// Total bytes this frame occupies on the wire (header included).
    pub fn wire_size(&self) -> usize {
        LENGTH_FIELD_SIZE + 1 + self.payload.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Length field of zero: a frame always contains at least the tag byte.
    #[error("frame length field is zero")]
    EmptyFrame,

    #[error("unknown request tag: {0:#04x}")]
    UnknownTag(u8),
}

/// Encoder/decoder for the worker pipe protocol.
///
/// Encoding writes header, tag, and payload into the destination buffer as
/// one contiguous unit, so a frame is never interleaved with another frame's
/// bytes on the stream.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(frame.wire_size());
        dst.put_u64_le(frame.length_field());
        dst.put_u8(frame.tag.as_byte());
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let mut field = [0u8; LENGTH_FIELD_SIZE];
        field.copy_from_slice(&src[..LENGTH_FIELD_SIZE]);
        let length = u64::from_le_bytes(field) as usize;

        if length == 0 {
            return Err(FrameError::EmptyFrame);
        }

        if src.len() < LENGTH_FIELD_SIZE + length {
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let tag_byte = src.get_u8();
        let payload = src.split_to(length - 1).freeze();

        let tag = RequestTag::from_byte(tag_byte).ok_or(FrameError::UnknownTag(tag_byte))?;
        Ok(Some(Frame { tag, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn ten_byte_payload_frames_as_nineteen_wire_bytes() {
        let payload = [0xabu8; 10];
        let buf = encode(Frame::http_client(payload.to_vec()));

        assert_eq!(buf.len(), 19);
        assert_eq!(&buf[..8], 11u64.to_le_bytes().as_slice());
        assert_eq!(buf[8], 0x00);
        assert_eq!(&buf[9..], payload.as_slice());
    }

    #[test]
    fn empty_payload_still_counts_the_tag() {
        let frame = Frame::http_client(Vec::new());
        assert_eq!(frame.length_field(), 1);
        assert_eq!(frame.wire_size(), 9);

        let buf = encode(frame);
        assert_eq!(buf.len(), 9);
        assert_eq!(&buf[..8], 1u64.to_le_bytes().as_slice());
    }

    #[test]
    fn decoder_agrees_with_encoder() {
        let payload = b"jammed request";
        let mut buf = encode(Frame::http_client(payload.to_vec()));

        let decoded = FrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Frame::http_client(payload.to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let mut buf = BytesMut::new();
        let mut codec = FrameCodec::new();
        codec.encode(Frame::http_client(b"first".to_vec()), &mut buf).unwrap();
        codec.encode(Frame::http_client(b"second".to_vec()), &mut buf).unwrap();

        let a = codec.decode(&mut buf).unwrap().unwrap();
        let b = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(a.payload.as_ref(), b"first");
        assert_eq!(b.payload.as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_needs_more_data() {
        let mut buf = BytesMut::from(&[11u8, 0, 0][..]);
        assert!(FrameCodec::new().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn incomplete_payload_needs_more_data() {
        let mut buf = encode(Frame::http_client(b"truncated".to_vec()));
        buf.truncate(LENGTH_FIELD_SIZE + 4);
        assert!(FrameCodec::new().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn zero_length_field_is_rejected() {
        let mut buf = BytesMut::from(0u64.to_le_bytes().as_slice());
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::EmptyFrame));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(3);
        buf.put_u8(0x7f);
        buf.put_slice(b"xy");

        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::UnknownTag(0x7f)));
    }

    #[test]
    fn tag_bytes_round_trip() {
        assert_eq!(RequestTag::from_byte(0), Some(RequestTag::HttpClient));
        assert_eq!(RequestTag::HttpClient.as_byte(), 0);
        assert_eq!(RequestTag::from_byte(1), None);
    }
}
