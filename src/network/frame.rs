//! Broker wire frame
//!
//! Layout, semua little-endian:
//! ┌─────────────────────────────────────────────────────┐
//! │ FrameHeader (16 bytes, fixed)                       │
//! │   magic u32 | version u8 | kind u8 | topic_len u16  │
//! │   payload_len u32 | checksum u32                    │
//! ├─────────────────────────────────────────────────────┤
//! │ Topic (topic_len bytes, UTF-8)                      │
//! ├─────────────────────────────────────────────────────┤
//! │ Payload (payload_len bytes, max 16MB)               │
//! └─────────────────────────────────────────────────────┘

use crate::error::TransportError;
use crate::protocol::checksum;

pub const FRAME_HEADER_SIZE: usize = 16;
pub const FRAME_MAGIC: u32 = 0x48524D53; // "HRMS"
pub const FRAME_VERSION: u8 = 2;
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
pub const MAX_TOPIC_LEN: usize = 1024;

/// Tipe frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Data untuk semua subscriber topic
    Publish = 1,
    /// Daftarkan connection ke topic
    Subscribe = 2,
    /// Lepas connection dari topic
    Unsubscribe = 3,
    /// Keep-alive
    Heartbeat = 4,
}

impl FrameKind {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Publish),
            2 => Some(Self::Subscribe),
            3 => Some(Self::Unsubscribe),
            4 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Header frame yang sudah di-parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub topic_len: u16,
    pub payload_len: u32,
    pub checksum: u32,
}

impl FrameHeader {
    /// # Errors
    /// Topic atau payload melebihi batas wire format.
    pub fn new(kind: FrameKind, topic: &str, payload: &[u8]) -> Result<Self, TransportError> {
        if topic.len() > MAX_TOPIC_LEN {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            kind,
            topic_len: topic.len() as u16,
            payload_len: payload.len() as u32,
            checksum: checksum(payload),
        })
    }

    #[inline(always)]
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf[4] = FRAME_VERSION;
        buf[5] = self.kind as u8;
        buf[6..8].copy_from_slice(&self.topic_len.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse header dari awal `buf`. `Ok(None)` jika byte belum cukup.
    ///
    /// # Errors
    /// Magic, versi, kind, atau panjang yang tidak valid.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, TransportError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != FRAME_MAGIC {
            return Err(TransportError::invalid_frame(format!(
                "bad magic 0x{magic:08x}"
            )));
        }
        if buf[4] != FRAME_VERSION {
            return Err(TransportError::invalid_frame(format!(
                "unsupported version {}",
                buf[4]
            )));
        }
        let kind = FrameKind::from_u8(buf[5])
            .ok_or_else(|| TransportError::invalid_frame(format!("unknown kind {}", buf[5])))?;

        let topic_len = u16::from_le_bytes([buf[6], buf[7]]);
        let payload_len = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if topic_len as usize > MAX_TOPIC_LEN {
            return Err(TransportError::invalid_frame("topic too long"));
        }
        if payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Some(Self {
            kind,
            topic_len,
            payload_len,
            checksum: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }))
    }

    /// Total frame size (header + topic + payload)
    #[inline(always)]
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.topic_len as usize + self.payload_len as usize
    }
}

/// Append satu frame lengkap ke `out`.
///
/// # Errors
/// Lihat [`FrameHeader::new`].
#[inline]
pub fn encode_frame(
    kind: FrameKind,
    topic: &str,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), TransportError> {
    let header = FrameHeader::new(kind, topic, payload)?;
    out.reserve(header.frame_len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(topic.as_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Frame hasil decode, borrow ke buffer baca.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub kind: FrameKind,
    pub topic: &'a str,
    pub payload: &'a [u8],
    /// Frame utuh termasuk header, untuk diteruskan apa adanya.
    pub raw: &'a [u8],
}

/// Zero-copy decoder untuk stream frame.
pub struct FrameDecoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
}

impl<'a> FrameDecoder<'a> {
    #[inline(always)]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            read_pos: 0,
        }
    }

    /// Decode frame berikutnya. `Ok(None)` jika frame belum lengkap.
    ///
    /// # Errors
    /// Frame rusak; stream tidak bisa dilanjutkan setelah ini.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Frame<'a>>, TransportError> {
        let rest = &self.buffer[self.read_pos..];
        let header = match FrameHeader::parse(rest)? {
            Some(h) => h,
            None => return Ok(None),
        };

        let frame_len = header.frame_len();
        if rest.len() < frame_len {
            return Ok(None);
        }

        let topic_end = FRAME_HEADER_SIZE + header.topic_len as usize;
        let topic = std::str::from_utf8(&rest[FRAME_HEADER_SIZE..topic_end])
            .map_err(|_| TransportError::invalid_frame("topic is not UTF-8"))?;
        let payload = &rest[topic_end..frame_len];

        if checksum(payload) != header.checksum {
            return Err(TransportError::invalid_frame("checksum mismatch"));
        }

        self.read_pos += frame_len;

        Ok(Some(Frame {
            kind: header.kind,
            topic,
            payload,
            raw: &rest[..frame_len],
        }))
    }

    /// Bytes yang sudah di-decode.
    #[inline(always)]
    pub fn consumed(&self) -> usize {
        self.read_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_frames() {
        let mut buf = Vec::new();
        encode_frame(FrameKind::Subscribe, "a.b", &[], &mut buf).unwrap();
        encode_frame(FrameKind::Publish, "a.b", b"payload", &mut buf).unwrap();

        let mut decoder = FrameDecoder::new(&buf);

        let sub = decoder.next().unwrap().unwrap();
        assert_eq!(sub.kind, FrameKind::Subscribe);
        assert_eq!(sub.topic, "a.b");
        assert!(sub.payload.is_empty());

        let publish = decoder.next().unwrap().unwrap();
        assert_eq!(publish.kind, FrameKind::Publish);
        assert_eq!(publish.payload, b"payload");
        assert_eq!(publish.raw.len(), FRAME_HEADER_SIZE + 3 + 7);

        assert!(decoder.next().unwrap().is_none());
        assert_eq!(decoder.consumed(), buf.len());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut buf = Vec::new();
        encode_frame(FrameKind::Publish, "t", b"0123456789", &mut buf).unwrap();

        for cut in [0, 5, FRAME_HEADER_SIZE, buf.len() - 1] {
            let mut decoder = FrameDecoder::new(&buf[..cut]);
            assert!(decoder.next().unwrap().is_none());
            assert_eq!(decoder.consumed(), 0);
        }
    }

    #[test]
    fn test_corrupted_frame_rejected() {
        let mut buf = Vec::new();
        encode_frame(FrameKind::Publish, "t", b"data", &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        assert!(matches!(
            FrameDecoder::new(&buf).next(),
            Err(TransportError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let buf = [0u8; FRAME_HEADER_SIZE];
        assert!(FrameHeader::parse(&buf).is_err());
    }

    #[test]
    fn test_topic_too_long() {
        let topic = "x".repeat(MAX_TOPIC_LEN + 1);
        assert!(matches!(
            FrameHeader::new(FrameKind::Publish, &topic, &[]),
            Err(TransportError::InvalidTopic(_))
        ));
    }
}
