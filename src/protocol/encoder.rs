//! Zero-Allocation Encoder / Decoder
//!
//! Encode langsung ke region milik caller (biasanya dari `BufferPool`).
//! Decode mengalokasikan pesan baru yang dibungkus [`Decoded`]; drop guard
//! itu adalah satu-satunya cara pesan di-release.

use std::ops::Deref;

use super::message::{checksum, EnvelopeHeader, Schema, HEADER_SIZE};
use crate::error::DecodeError;

/// Ukuran byte `msg` setelah di-encode, termasuk envelope header.
#[inline(always)]
pub fn packed_size<M: Schema>(msg: &M) -> usize {
    HEADER_SIZE + msg.body_len()
}

/// Encode `msg` ke `region`.
///
/// `region` harus tepat sepanjang [`packed_size`]; panjang tidak divalidasi
/// ulang setelah body ditulis.
///
/// # Panics
/// Panic jika region lebih pendek dari yang ditulis schema.
#[inline]
pub fn encode<M: Schema>(msg: &M, region: &mut [u8]) {
    debug_assert_eq!(region.len(), packed_size(msg));

    let (header_buf, body) = region.split_at_mut(HEADER_SIZE);
    let mut writer = BodyWriter::new(body);
    msg.encode_body(&mut writer);

    EnvelopeHeader::new(&M::DESCRIPTOR, body).write_to(header_buf);
}

/// Decode `bytes` sebagai `M`.
///
/// # Errors
/// Semua jenis [`DecodeError`]: envelope rusak, schema lain, checksum salah,
/// field terpotong, atau sisa byte setelah body.
pub fn decode<M: Schema>(bytes: &[u8]) -> Result<Decoded<M>, DecodeError> {
    let header = EnvelopeHeader::read_from(bytes)?;
    header.validate(&M::DESCRIPTOR)?;

    let body = &bytes[HEADER_SIZE..];
    if header.body_len as usize != body.len() {
        return Err(DecodeError::LengthMismatch {
            declared: header.body_len as usize,
            actual: body.len(),
        });
    }

    let actual = checksum(body);
    if actual != header.checksum {
        return Err(DecodeError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    let mut reader = BodyReader::new(body);
    let message = M::decode_body(&mut reader)?;
    if reader.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }

    Ok(Decoded {
        message: Box::new(message),
        packed_len: bytes.len(),
    })
}

/// Pesan hasil decode. Di-release tepat sekali saat guard ini di-drop.
#[derive(Debug)]
pub struct Decoded<M> {
    message: Box<M>,
    packed_len: usize,
}

impl<M> Decoded<M> {
    /// Panjang wire pesan ini.
    pub fn packed_len(&self) -> usize {
        self.packed_len
    }

    /// Ambil alih pesan dari guard.
    pub fn into_inner(self) -> M {
        *self.message
    }
}

impl<M> Deref for Decoded<M> {
    type Target = M;

    #[inline(always)]
    fn deref(&self) -> &M {
        &self.message
    }
}

/// Cursor tulis untuk body pesan.
pub struct BodyWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

macro_rules! put_le {
    ($name:ident, $ty:ty) => {
        #[inline(always)]
        pub fn $name(&mut self, value: $ty) {
            self.put_raw(&value.to_le_bytes());
        }
    };
}

impl<'a> BodyWriter<'a> {
    #[inline(always)]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Jumlah byte yang sudah ditulis.
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    fn put_raw(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    #[inline(always)]
    pub fn put_u8(&mut self, value: u8) {
        self.put_raw(&[value]);
    }

    #[inline(always)]
    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    put_le!(put_u16, u16);
    put_le!(put_u32, u32);
    put_le!(put_u64, u64);
    put_le!(put_i32, i32);
    put_le!(put_i64, i64);
    put_le!(put_f32, f32);
    put_le!(put_f64, f64);

    /// Bytes dengan prefix panjang u32.
    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_raw(bytes);
    }

    #[inline]
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }
}

/// Ukuran field `bytes` / `str` di wire (prefix + isi).
#[inline(always)]
pub const fn prefixed_len(len: usize) -> usize {
    4 + len
}

/// Cursor baca untuk body pesan. Tidak pernah panic pada input pendek.
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! get_le {
    ($name:ident, $ty:ty) => {
        #[inline(always)]
        pub fn $name(&mut self) -> Result<$ty, DecodeError> {
            let raw = self.take(std::mem::size_of::<$ty>())?;
            let mut arr = [0u8; std::mem::size_of::<$ty>()];
            arr.copy_from_slice(raw);
            Ok(<$ty>::from_le_bytes(arr))
        }
    };
}

impl<'a> BodyReader<'a> {
    #[inline(always)]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Sisa byte yang belum dibaca.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline(always)]
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    #[inline(always)]
    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    #[inline(always)]
    pub fn get_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.get_u8()? != 0)
    }

    get_le!(get_u16, u16);
    get_le!(get_u32, u32);
    get_le!(get_u64, u64);
    get_le!(get_i32, i32);
    get_le!(get_i64, i64);
    get_le!(get_f32, f32);
    get_le!(get_f64, f64);

    /// Bytes dengan prefix panjang u32 (zero-copy).
    #[inline]
    pub fn get_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    #[inline]
    pub fn get_str(&mut self) -> Result<&'a str, DecodeError> {
        let offset = self.pos + 4;
        let bytes = self.get_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Descriptor;

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        id: u64,
        symbol: String,
        qty: i32,
        price: f64,
        active: bool,
    }

    impl Schema for Order {
        const DESCRIPTOR: Descriptor = Descriptor {
            name: "Order",
            schema_id: 100,
            version: 1,
        };

        fn body_len(&self) -> usize {
            8 + prefixed_len(self.symbol.len()) + 4 + 8 + 1
        }

        fn encode_body(&self, w: &mut BodyWriter<'_>) {
            w.put_u64(self.id);
            w.put_str(&self.symbol);
            w.put_i32(self.qty);
            w.put_f64(self.price);
            w.put_bool(self.active);
        }

        fn decode_body(r: &mut BodyReader<'_>) -> Result<Self, DecodeError> {
            Ok(Self {
                id: r.get_u64()?,
                symbol: r.get_str()?.to_owned(),
                qty: r.get_i32()?,
                price: r.get_f64()?,
                active: r.get_bool()?,
            })
        }
    }

    fn sample() -> Order {
        Order {
            id: 7,
            symbol: "BTCUSDT".into(),
            qty: -3,
            price: 42_000.5,
            active: true,
        }
    }

    fn encoded(msg: &Order) -> Vec<u8> {
        let mut buf = vec![0u8; packed_size(msg)];
        encode(msg, &mut buf);
        buf
    }

    #[test]
    fn test_encode_decode_single() {
        let msg = sample();
        let buf = encoded(&msg);

        assert_eq!(buf.len(), HEADER_SIZE + 32);

        let decoded = decode::<Order>(&buf).unwrap();
        assert_eq!(*decoded, msg);
        assert_eq!(decoded.packed_len(), buf.len());
    }

    #[test]
    fn test_decode_rejects_truncated_body() {
        let buf = encoded(&sample());
        let err = decode::<Order>(&buf[..buf.len() - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_corrupted_body() {
        let mut buf = encoded(&sample());
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(
            decode::<Order>(&buf),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let msg = sample();
        let mut buf = encoded(&msg);

        // Body diperpanjang satu byte, header + checksum dibuat ulang
        buf.push(0);
        let body = buf[HEADER_SIZE..].to_vec();
        EnvelopeHeader::new(&Order::DESCRIPTOR, &body).write_to(&mut buf[..HEADER_SIZE]);

        assert_eq!(decode::<Order>(&buf).unwrap_err(), DecodeError::TrailingBytes(1));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode::<Order>(b"definitely not an order").is_err());
        assert!(decode::<Order>(&[]).is_err());
    }

    #[test]
    fn test_reader_truncated() {
        let mut reader = BodyReader::new(&[1, 2]);
        assert_eq!(
            reader.get_u32(),
            Err(DecodeError::Truncated {
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_reader_invalid_utf8() {
        let mut buf = vec![0u8; prefixed_len(2)];
        BodyWriter::new(&mut buf).put_bytes(&[0xC3, 0x28]);

        let mut reader = BodyReader::new(&buf);
        assert_eq!(reader.get_str(), Err(DecodeError::InvalidUtf8 { offset: 4 }));
    }

    #[test]
    fn test_into_inner() {
        let msg = sample();
        let buf = encoded(&msg);
        assert_eq!(decode::<Order>(&buf).unwrap().into_inner(), msg);
    }
}
