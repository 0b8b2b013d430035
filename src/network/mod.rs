//! Network Layer: Transport capability
//!
//! Session hanya bicara ke transport lewat trait [`Transport`]:
//! - publish bytes ke topic (fire-and-forget)
//! - register raw callback per topic
//! - close (release semua subscription + connection)
//!
//! Implementasi:
//! - [`TcpTransport`]: client ke [`Broker`], dispatch dari reader thread
//! - [`MemoryTransport`]: in-process bus, dispatch di thread publisher saat flush

mod connection;
mod frame;
mod memory;
mod server;
mod tcp;

use std::sync::Arc;

use crate::config::Endpoint;
use crate::error::TransportError;

pub use frame::{
    encode_frame, Frame, FrameDecoder, FrameHeader, FrameKind, FRAME_HEADER_SIZE,
    MAX_PAYLOAD_SIZE, MAX_TOPIC_LEN,
};
pub use memory::{MemoryBus, MemoryTransport};
pub use server::{Broker, BrokerStats};
pub use tcp::TcpTransport;

/// Pesan mentah dari transport.
///
/// Borrow ke buffer milik transport; buffer di-reclaim setelah callback return.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
}

/// Callback yang dipanggil transport untuk setiap pesan inbound.
pub type RawCallback = Arc<dyn Fn(&RawMessage<'_>) + Send + Sync>;

/// Pub/sub transport yang dipakai [`Session`](crate::Session).
pub trait Transport: Send + Sync {
    /// Kirim `payload` ke `topic`. Best-effort, tanpa retry.
    ///
    /// # Errors
    /// Connection tertutup, topic tidak valid, atau IO error.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Jalankan delivery yang ditunda oleh `publish`.
    ///
    /// [`Session`](crate::Session) memanggil ini setelah lock pool dilepas,
    /// jadi callback yang jalan di sini boleh publish lagi. Default no-op
    /// untuk transport yang langsung mengirim.
    fn flush(&self) {}

    /// Register `callback` untuk setiap pesan di `topic`.
    ///
    /// # Errors
    /// Connection tertutup, topic tidak valid, atau IO error.
    fn subscribe(&self, topic: &str, callback: RawCallback) -> Result<(), TransportError>;

    /// Tutup connection dan lepas semua subscription. Idempotent.
    fn close(&self);
}

/// Buka transport sesuai scheme address.
///
/// # Errors
/// Address tidak valid atau connect gagal.
pub fn connect(address: &str) -> Result<Box<dyn Transport>, TransportError> {
    open(&Endpoint::parse(address)?)
}

/// Buka transport untuk endpoint yang sudah di-parse.
///
/// # Errors
/// Connect gagal.
pub fn open(endpoint: &Endpoint) -> Result<Box<dyn Transport>, TransportError> {
    match endpoint {
        Endpoint::Tcp(addr) => Ok(Box::new(TcpTransport::connect(addr)?)),
        Endpoint::Memory(name) => Ok(Box::new(MemoryBus::named(name).connect())),
    }
}

/// Topic harus non-empty, max [`MAX_TOPIC_LEN`] bytes, tanpa whitespace.
///
/// # Errors
/// [`TransportError::InvalidTopic`].
pub fn validate_topic(topic: &str) -> Result<(), TransportError> {
    if topic.is_empty()
        || topic.len() > MAX_TOPIC_LEN
        || topic.bytes().any(|b| b.is_ascii_whitespace())
    {
        return Err(TransportError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("hermes.drone.1.hb").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("has space").is_err());
        assert!(validate_topic("tab\there").is_err());
        assert!(validate_topic(&"t".repeat(MAX_TOPIC_LEN + 1)).is_err());
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        assert!(matches!(
            connect("nats://127.0.0.1:4222"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_connect_memory() {
        let transport = connect("mem://network-mod-test").unwrap();
        transport.publish("t", b"x").unwrap();
        transport.flush();
        transport.close();
        assert!(matches!(
            transport.publish("t", b"x"),
            Err(TransportError::ConnectionClosed)
        ));
    }
}
