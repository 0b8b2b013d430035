//! Session: satu transport connection + satu buffer pool
//!
//! Publish path:
//!   packed_size -> reserve region -> encode ke region -> transport.publish
//!
//! Subscribe path (per pesan inbound, di thread dispatch transport):
//!   decode -> handler(&msg) -> release decoded -> release raw
//!
//! Pool dijaga `Mutex` selama reserve sampai send selesai, jadi publish
//! dari banyak thread aman dan region tidak bisa tertimpa sebelum terkirim.
//! Handler tidak pernah jalan selama lock itu dipegang: transport yang
//! deliver di thread publisher menunda delivery sampai `Transport::flush`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::core::BufferPool;
use crate::error::{HermesError, Result};
use crate::network::{self, RawCallback, RawMessage, Transport};
use crate::protocol::{self, Schema};
use crate::stats::{SessionStats, StatsSnapshot};

/// User-facing pub/sub context.
///
/// Session selalu fully initialized: connection hidup dan pool teralokasi.
/// Drop menutup connection dan melepas semua subscription.
pub struct Session {
    transport: Box<dyn Transport>,
    pool: Mutex<BufferPool>,
    stats: Arc<SessionStats>,
}

impl Session {
    /// Connect ke `address` dengan buffer pool `pool_size` bytes.
    ///
    /// # Errors
    /// [`HermesError::InvalidPoolSize`], [`HermesError::PoolAllocation`],
    /// atau [`HermesError::ConnectionFailure`].
    pub fn connect(address: &str, pool_size: usize) -> Result<Self> {
        Self::from_config(&SessionConfig::new(address, pool_size))
    }

    /// # Errors
    /// Lihat [`Session::connect`].
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let endpoint = config.validate()?;
        let pool = BufferPool::new(config.pool_size)?;

        let transport =
            network::open(&endpoint).map_err(|source| HermesError::ConnectionFailure {
                address: config.address.clone(),
                source,
            })?;

        info!(
            address = %config.address,
            pool_size = config.pool_size,
            "session connected"
        );
        Ok(Self::assemble(transport, pool))
    }

    /// Session di atas transport yang sudah terbuka.
    ///
    /// # Errors
    /// Pool tidak bisa dibuat; transport ditutup sebelum error dikembalikan.
    pub fn with_transport<T: Transport + 'static>(transport: T, pool_size: usize) -> Result<Self> {
        match BufferPool::new(pool_size) {
            Ok(pool) => Ok(Self::assemble(Box::new(transport), pool)),
            Err(e) => {
                transport.close();
                Err(e)
            }
        }
    }

    fn assemble(transport: Box<dyn Transport>, pool: BufferPool) -> Self {
        Self {
            transport,
            pool: Mutex::new(pool),
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Serialize `message` ke pool dan kirim ke `topic`.
    ///
    /// Fire-and-forget: tidak ada retry dan tidak ada buffering untuk send
    /// yang gagal.
    ///
    /// # Errors
    /// [`HermesError::CapacityExceeded`] tanpa menyentuh transport, atau
    /// [`HermesError::TransportSend`] dari transport.
    pub fn publish<M: Schema>(&self, topic: &str, message: &M) -> Result<()> {
        let len = protocol::packed_size(message);

        {
            let mut pool = self.pool.lock();
            let mut region = match pool.reserve(len) {
                Ok(region) => region,
                Err(e) => {
                    self.stats
                        .capacity_rejections
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            };

            protocol::encode(message, &mut region);

            if let Err(e) = self.transport.publish(topic, region.as_bytes()) {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                return Err(HermesError::TransportSend(e));
            }
        }
        self.stats.record_publish(len);

        // Di luar lock pool: handler boleh publish lagi ke session ini
        self.transport.flush();
        Ok(())
    }

    /// Panggil `handler` untuk setiap pesan `M` yang masuk di `topic`.
    ///
    /// Handler jalan sinkron di thread dispatch transport. Pesan hasil decode
    /// hanya dipinjamkan selama handler berjalan dan di-release setelahnya.
    /// Pesan yang tidak bisa di-decode sebagai `M` di-drop diam-diam
    /// (hanya tercatat di [`StatsSnapshot::decode_drops`] dan log debug).
    ///
    /// # Errors
    /// [`HermesError::TransportSubscribe`] dari transport.
    pub fn subscribe<M, F>(&self, topic: &str, handler: F) -> Result<()>
    where
        M: Schema + 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let stats = Arc::clone(&self.stats);
        let descriptor = M::DESCRIPTOR;

        let callback: RawCallback = Arc::new(move |raw: &RawMessage<'_>| {
            match protocol::decode::<M>(raw.payload) {
                Ok(decoded) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    handler(&*decoded);
                }
                Err(err) => {
                    stats.decode_drops.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        topic = raw.topic,
                        schema = descriptor.name,
                        error = %err,
                        "dropping undecodable message"
                    );
                }
            }
        });

        self.transport
            .subscribe(topic, callback)
            .map_err(HermesError::TransportSubscribe)?;

        debug!(topic, schema = descriptor.name, "subscribed");
        Ok(())
    }

    /// Snapshot counter session.
    pub fn stats(&self) -> StatsSnapshot {
        let wraps = self.pool.lock().wraps();
        self.stats.snapshot(wraps)
    }

    /// Kapasitas buffer pool dalam bytes.
    pub fn pool_capacity(&self) -> usize {
        self.pool.lock().capacity()
    }

    /// Posisi write cursor pool saat ini.
    pub fn pool_cursor(&self) -> usize {
        self.pool.lock().cursor()
    }

    /// Tutup connection dan lepas semua subscription. Sama dengan drop.
    pub fn close(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        self.transport.close();
        debug!("session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.pool.lock();
        f.debug_struct("Session")
            .field("pool", &*pool)
            .field("stats", &self.stats.snapshot(pool.wraps()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::Heartbeat;

    /// Transport yang hanya mencatat publish.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl Transport for Arc<Recorder> {
        fn publish(&self, topic: &str, payload: &[u8]) -> std::result::Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::ConnectionClosed);
            }
            self.sent.lock().push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn subscribe(
            &self,
            _topic: &str,
            _callback: RawCallback,
        ) -> std::result::Result<(), TransportError> {
            Err(TransportError::ConnectionClosed)
        }

        fn close(&self) {}
    }

    #[test]
    fn test_publish_sends_encoded_bytes() {
        let recorder = Arc::new(Recorder::default());
        let session = Session::with_transport(Arc::clone(&recorder), 1024).unwrap();

        let hb = Heartbeat {
            node_id: 9,
            timestamp_us: 123,
            cpu_usage: 1.5,
        };
        session.publish("hb", &hb).unwrap();

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "hb");
        assert_eq!(*protocol::decode::<Heartbeat>(&sent[0].1).unwrap(), hb);
        assert_eq!(session.pool_cursor(), protocol::packed_size(&hb));
    }

    #[test]
    fn test_transport_failure_propagated() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let session = Session::with_transport(recorder, 1024).unwrap();

        let err = session.publish("hb", &Heartbeat::default()).unwrap_err();
        assert!(matches!(
            err,
            HermesError::TransportSend(TransportError::ConnectionClosed)
        ));
        assert_eq!(session.stats().publish_failures, 1);
    }

    #[test]
    fn test_subscribe_failure_propagated() {
        let session = Session::with_transport(Arc::new(Recorder::default()), 1024).unwrap();
        let err = session.subscribe("hb", |_: &Heartbeat| {}).unwrap_err();
        assert!(matches!(err, HermesError::TransportSubscribe(_)));
    }

    #[test]
    fn test_zero_pool_size() {
        let result = Session::with_transport(Arc::new(Recorder::default()), 0);
        assert!(matches!(result, Err(HermesError::InvalidPoolSize)));
    }

    #[test]
    fn test_connect_failure() {
        // Port 1 di localhost hampir pasti tidak listen
        let err = Session::connect("hermes://127.0.0.1:1", 64).unwrap_err();
        assert!(matches!(err, HermesError::ConnectionFailure { .. }));
    }

    #[test]
    fn test_debug_reports_pool_wraps() {
        let session = Session::with_transport(Arc::new(Recorder::default()), 32).unwrap();
        let hb = Heartbeat::default();
        assert_eq!(protocol::packed_size(&hb), 32);

        session.publish("hb", &hb).unwrap();
        session.publish("hb", &hb).unwrap();

        let debug = format!("{:?}", session);
        assert!(debug.contains("wraps: 1"), "{debug}");
        assert!(debug.contains("pool_wraps: 1"), "{debug}");
    }
}
