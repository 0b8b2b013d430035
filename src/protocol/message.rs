//! Message envelope (SBE-inspired)
//!
//! Layout, semua little-endian:
//! ┌─────────────────────────────────────────────────────┐
//! │ EnvelopeHeader (16 bytes, fixed)                    │
//! │   magic u16 | schema_id u16 | version u16 | flags   │
//! │   body_len u32 | checksum u32                       │
//! ├─────────────────────────────────────────────────────┤
//! │ Body (variable, ditulis oleh Schema)                │
//! └─────────────────────────────────────────────────────┘

use super::encoder::{BodyReader, BodyWriter};
use crate::error::DecodeError;

pub const HEADER_SIZE: usize = 16;
pub const MAGIC: u16 = 0x4D48; // "HM"

/// Metadata schema: identitas dan versi layout field sebuah tipe pesan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Nama pesan, untuk logging.
    pub name: &'static str,
    /// Schema ID yang ditulis ke envelope.
    pub schema_id: u16,
    /// Versi layout.
    pub version: u16,
}

/// Tipe pesan yang bisa di-publish dan di-subscribe.
///
/// Implementasi menulis field-nya lewat [`BodyWriter`] dan membacanya
/// kembali lewat [`BodyReader`]. `body_len` harus sama persis dengan
/// jumlah byte yang ditulis `encode_body`.
///
/// # Example
/// ```
/// use hermes::protocol::{BodyReader, BodyWriter, Descriptor, Schema};
/// use hermes::DecodeError;
///
/// struct Ping { seq: u64 }
///
/// impl Schema for Ping {
///     const DESCRIPTOR: Descriptor = Descriptor { name: "Ping", schema_id: 7, version: 1 };
///
///     fn body_len(&self) -> usize { 8 }
///
///     fn encode_body(&self, w: &mut BodyWriter<'_>) { w.put_u64(self.seq); }
///
///     fn decode_body(r: &mut BodyReader<'_>) -> Result<Self, DecodeError> {
///         Ok(Ping { seq: r.get_u64()? })
///     }
/// }
/// ```
pub trait Schema: Sized {
    /// Descriptor untuk tipe ini.
    const DESCRIPTOR: Descriptor;

    /// Panjang body dalam bytes (tanpa envelope header).
    fn body_len(&self) -> usize;

    /// Tulis semua field ke body.
    fn encode_body(&self, writer: &mut BodyWriter<'_>);

    /// Baca semua field dari body.
    fn decode_body(reader: &mut BodyReader<'_>) -> Result<Self, DecodeError>;
}

/// Envelope header yang sudah di-parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub schema_id: u16,
    pub version: u16,
    pub flags: u16,
    pub body_len: u32,
    pub checksum: u32,
}

impl EnvelopeHeader {
    /// Header untuk body milik `descriptor`.
    #[inline(always)]
    pub fn new(descriptor: &Descriptor, body: &[u8]) -> Self {
        Self {
            schema_id: descriptor.schema_id,
            version: descriptor.version,
            flags: 0,
            body_len: body.len() as u32,
            checksum: checksum(body),
        }
    }

    /// Tulis header ke 16 byte pertama `buf`.
    #[inline(always)]
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        buf[2..4].copy_from_slice(&self.schema_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.body_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
    }

    /// Parse header dari awal `buf`.
    #[inline(always)]
    pub fn read_from(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let magic = u16::from_le_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }

        Ok(Self {
            schema_id: u16::from_le_bytes([buf[2], buf[3]]),
            version: u16::from_le_bytes([buf[4], buf[5]]),
            flags: u16::from_le_bytes([buf[6], buf[7]]),
            body_len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            checksum: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Cek header terhadap descriptor yang diharapkan.
    pub fn validate(&self, descriptor: &Descriptor) -> Result<(), DecodeError> {
        if self.schema_id != descriptor.schema_id {
            return Err(DecodeError::SchemaMismatch {
                expected: descriptor.schema_id,
                actual: self.schema_id,
            });
        }
        if self.version != descriptor.version {
            return Err(DecodeError::VersionMismatch {
                expected: descriptor.version,
                actual: self.version,
            });
        }
        Ok(())
    }
}

/// Checksum body (Adler-32 variant, cepat dan cukup untuk deteksi korupsi)
#[inline(always)]
pub fn checksum(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    for &byte in data {
        a = a.wrapping_add(byte as u32);
        b = b.wrapping_add(a);
    }

    (b << 16) | (a & 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESC: Descriptor = Descriptor {
        name: "Test",
        schema_id: 42,
        version: 3,
    };

    #[test]
    fn test_header_roundtrip() {
        let body = b"hello";
        let header = EnvelopeHeader::new(&DESC, body);

        let mut buf = [0u8; HEADER_SIZE];
        header.write_to(&mut buf);

        let parsed = EnvelopeHeader::read_from(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.body_len, 5);
        assert!(parsed.validate(&DESC).is_ok());
    }

    #[test]
    fn test_bad_magic() {
        let buf = [0xFFu8; HEADER_SIZE];
        assert_eq!(
            EnvelopeHeader::read_from(&buf),
            Err(DecodeError::BadMagic(0xFFFF))
        );
    }

    #[test]
    fn test_short_header() {
        assert_eq!(
            EnvelopeHeader::read_from(&[0u8; 4]),
            Err(DecodeError::Truncated {
                needed: HEADER_SIZE,
                available: 4
            })
        );
    }

    #[test]
    fn test_schema_mismatch() {
        let other = Descriptor {
            name: "Other",
            schema_id: 43,
            version: 3,
        };
        let header = EnvelopeHeader::new(&other, &[]);
        assert_eq!(
            header.validate(&DESC),
            Err(DecodeError::SchemaMismatch {
                expected: 42,
                actual: 43
            })
        );
    }

    #[test]
    fn test_checksum_detects_change() {
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
        assert_eq!(checksum(&[]), 1);
    }
}
