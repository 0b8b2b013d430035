//! Error types untuk Hermes.
//!
//! Tiga lapis error:
//! - [`HermesError`]: dikembalikan ke caller oleh [`Session`](crate::Session)
//! - [`TransportError`]: dari transport (TCP / in-memory)
//! - [`DecodeError`]: inbound bytes yang tidak valid, tidak pernah sampai ke caller

use thiserror::Error;

/// Error yang dikembalikan oleh operasi session.
#[derive(Debug, Error)]
pub enum HermesError {
    /// Buffer pool dengan kapasitas nol tidak bisa menampung apapun.
    #[error("pool size must be greater than zero")]
    InvalidPoolSize,

    /// Arena untuk buffer pool gagal dialokasikan.
    #[error("failed to allocate buffer pool of {capacity} bytes: {source}")]
    PoolAllocation {
        /// Requested capacity in bytes.
        capacity: usize,
        /// Underlying mapping error.
        #[source]
        source: std::io::Error,
    },

    /// Transport tidak bisa dibuat; tidak ada session yang dikembalikan.
    #[error("connection to {address} failed: {source}")]
    ConnectionFailure {
        /// Address yang dicoba.
        address: String,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// Packed size satu pesan lebih besar dari seluruh kapasitas pool.
    #[error("message of {len} bytes exceeds pool capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Packed size of the rejected message.
        len: usize,
        /// Total pool capacity.
        capacity: usize,
    },

    /// Transport menolak publish.
    #[error("publish failed: {0}")]
    TransportSend(#[source] TransportError),

    /// Transport menolak registrasi subscription.
    #[error("subscribe failed: {0}")]
    TransportSubscribe(#[source] TransportError),
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, HermesError>;

/// Error dari lapisan transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection sudah ditutup.
    #[error("connection closed")]
    ConnectionClosed,

    /// Address tidak bisa di-parse atau scheme tidak dikenal.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Topic kosong, terlalu panjang, atau mengandung whitespace.
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Frame terlalu besar untuk wire protocol.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Actual size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame rusak (magic, versi, atau checksum salah).
    #[error("invalid frame: {message}")]
    InvalidFrame {
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Creates an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }
}

/// Alasan sebuah pesan inbound di-drop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input lebih pendek dari yang dibutuhkan.
    #[error("truncated input: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Magic number envelope salah.
    #[error("bad envelope magic 0x{0:04x}")]
    BadMagic(u16),

    /// Pesan dibuat dengan schema lain.
    #[error("schema mismatch: expected {expected}, actual {actual}")]
    SchemaMismatch {
        /// Expected schema ID.
        expected: u16,
        /// Schema ID found in the envelope.
        actual: u16,
    },

    /// Versi schema berbeda.
    #[error("version mismatch: expected {expected}, actual {actual}")]
    VersionMismatch {
        /// Expected version.
        expected: u16,
        /// Version found in the envelope.
        actual: u16,
    },

    /// Panjang body di header tidak cocok dengan panjang input.
    #[error("body length mismatch: header says {declared}, input has {actual}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: usize,
        /// Length actually present.
        actual: usize,
    },

    /// Checksum body tidak cocok.
    #[error("checksum mismatch: expected 0x{expected:08x}, actual 0x{actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the envelope.
        expected: u32,
        /// Checksum computed over the body.
        actual: u32,
    },

    /// Body masih tersisa setelah semua field dibaca.
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    /// Field string bukan UTF-8.
    #[error("invalid UTF-8 at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset of the string field within the body.
        offset: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message() {
        let err = HermesError::CapacityExceeded {
            len: 100,
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "message of 100 bytes exceeds pool capacity of 64 bytes"
        );
    }

    #[test]
    fn test_transport_error_source() {
        use std::error::Error as _;

        let err = HermesError::TransportSend(TransportError::ConnectionClosed);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "publish failed: connection closed");
    }
}
