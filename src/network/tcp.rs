//! TCP client transport ke Hermes [`Broker`](super::Broker)
//!
//! - Publish: frame dibangun di scratch buffer yang di-reuse, satu `write_all`
//! - Subscribe: frame `Subscribe` hanya dikirim untuk topic baru
//! - Inbound: reader thread milik transport decode frame dan memanggil
//!   callback langsung dari read buffer (zero-copy). Callback yang panic
//!   di-log dan pesannya di-drop; subscription lain tetap jalan.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::frame::{
    encode_frame, FrameDecoder, FrameKind, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_TOPIC_LEN,
};
use super::{validate_topic, RawCallback, RawMessage, Transport};
use crate::error::TransportError;

const READ_BUFFER_SIZE: usize = 64 * 1024; // 64KB
const MAX_READ_BUFFER: usize = FRAME_HEADER_SIZE + MAX_TOPIC_LEN + MAX_PAYLOAD_SIZE;

#[derive(Default)]
struct Shared {
    routes: RwLock<HashMap<String, Arc<Vec<RawCallback>>>>,
    closed: AtomicBool,
}

impl Shared {
    #[inline]
    fn dispatch(&self, topic: &str, payload: &[u8]) {
        let callbacks = match self.routes.read().get(topic) {
            Some(cbs) => Arc::clone(cbs),
            None => return,
        };

        let raw = RawMessage { topic, payload };
        for callback in callbacks.iter() {
            // Satu handler panic tidak boleh mematikan reader thread
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&raw))).is_err() {
                warn!(topic, "subscriber callback panicked, message dropped");
            }
        }
    }
}

struct Writer {
    stream: TcpStream,
    scratch: Vec<u8>,
}

/// Connection TCP ke broker.
pub struct TcpTransport {
    shared: Arc<Shared>,
    writer: Mutex<Writer>,
    reader: Mutex<Option<JoinHandle<()>>>,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Connect ke broker di `addr` (`host:port`).
    ///
    /// # Errors
    /// IO error saat connect atau saat menyiapkan reader thread.
    pub fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        // CRITICAL: TCP_NODELAY untuk low latency
        stream.set_nodelay(true)?;

        let peer = stream.peer_addr()?;
        let read_stream = stream.try_clone()?;
        let shared = Arc::new(Shared::default());

        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("hermes-reader".into())
            .spawn(move || read_loop(read_stream, reader_shared))?;

        info!(%peer, "connected to broker");

        Ok(Self {
            shared,
            writer: Mutex::new(Writer {
                stream,
                scratch: Vec::with_capacity(READ_BUFFER_SIZE),
            }),
            reader: Mutex::new(Some(reader)),
            peer,
        })
    }

    /// Alamat broker.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    #[inline(always)]
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }

    fn send_frame(
        &self,
        kind: FrameKind,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut guard = self.writer.lock();
        let writer = &mut *guard;

        writer.scratch.clear();
        encode_frame(kind, topic, payload, &mut writer.scratch)?;
        writer.stream.write_all(&writer.scratch)?;
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_topic(topic)?;
        self.send_frame(FrameKind::Publish, topic, payload)
    }

    fn subscribe(&self, topic: &str, callback: RawCallback) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_topic(topic)?;

        let known = self.shared.routes.read().contains_key(topic);
        if !known {
            self.send_frame(FrameKind::Subscribe, topic, &[])?;
        }

        let mut routes = self.shared.routes.write();
        Arc::make_mut(routes.entry(topic.to_string()).or_default()).push(callback);
        debug!(peer = %self.peer, topic, "subscription registered");
        Ok(())
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.writer.lock().stream.shutdown(Shutdown::Both) {
            debug!(error = %e, "shutdown failed");
        }
        self.shared.routes.write().clear();

        // Close bisa dipanggil dari dalam callback (reader thread sendiri)
        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(peer = %self.peer, "reader thread panicked");
            }
        }

        info!(peer = %self.peer, "connection closed");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(mut stream: TcpStream, shared: Arc<Shared>) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut len = 0usize;

    loop {
        if len == buffer.len() {
            if buffer.len() >= MAX_READ_BUFFER {
                warn!("frame exceeds read buffer, dropping connection");
                break;
            }
            let grown = (buffer.len() * 2).min(MAX_READ_BUFFER);
            buffer.resize(grown, 0);
        }

        match stream.read(&mut buffer[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !shared.closed.load(Ordering::Acquire) {
                    warn!(error = %e, "read error");
                }
                break;
            }
        }

        let mut decoder = FrameDecoder::new(&buffer[..len]);
        loop {
            match decoder.next() {
                Ok(Some(frame)) if frame.kind == FrameKind::Publish => {
                    shared.dispatch(frame.topic, frame.payload);
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "invalid frame from broker, dropping connection");
                    return;
                }
            }
        }

        // Raw message di-release: buang frame yang sudah di-dispatch
        let consumed = decoder.consumed();
        buffer.copy_within(consumed..len, 0);
        len -= consumed;
    }

    debug!("reader thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_survives_panicking_callback() {
        let shared = Shared::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let panicky: RawCallback = Arc::new(|_raw: &RawMessage<'_>| panic!("handler failure"));
        let counting: RawCallback = Arc::new(move |_raw: &RawMessage<'_>| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        shared
            .routes
            .write()
            .insert("t".to_string(), Arc::new(vec![panicky, counting]));

        // Callback kedua tetap dipanggil, panic tidak keluar dari dispatch
        shared.dispatch("t", b"x");
        shared.dispatch("t", b"y");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
