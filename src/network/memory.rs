//! In-process transport
//!
//! Semua connection ke satu [`MemoryBus`] berbagi tabel subscription.
//! Delivery di thread publisher, berguna untuk test dan untuk komponen
//! yang hidup dalam satu proses.
//!
//! `publish` hanya menaruh salinan pesan di outbox milik thread pemanggil;
//! callback baru jalan saat [`Transport::flush`]. Session memanggil flush
//! setelah lock pool dilepas, jadi handler bebas publish lagi (ke session
//! yang sama atau session lain) tanpa deadlock. Publish dari dalam handler
//! masuk ke outbox yang sama dan dikirim oleh flush terluar, urutan FIFO
//! per thread.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{validate_topic, RawCallback, RawMessage, Transport};
use crate::error::TransportError;

#[derive(Clone)]
struct Subscriber {
    conn_id: u64,
    callback: RawCallback,
}

#[derive(Default)]
struct BusInner {
    // Copy-on-write: dispatch cukup clone Arc, lock tidak ditahan saat callback jalan
    topics: RwLock<HashMap<String, Arc<Vec<Subscriber>>>>,
    next_conn_id: AtomicU64,
    open_conns: AtomicUsize,
    /// Nama di registry global, untuk bus dari [`MemoryBus::named`].
    name: Option<String>,
}

/// Bus in-process. Clone berbagi state yang sama.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

struct Pending {
    bus: MemoryBus,
    topic: String,
    payload: Vec<u8>,
}

thread_local! {
    static OUTBOX: RefCell<VecDeque<Pending>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Reset flag draining, juga saat handler panic.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(false));
        if std::thread::panicking() {
            // Sisa rantai publish yang terputus tidak dikirim belakangan
            OUTBOX.with(|o| o.borrow_mut().clear());
        }
    }
}

/// Kirim semua pesan di outbox thread ini. No-op jika dipanggil dari dalam
/// handler yang sedang di-drain.
fn drain_outbox() {
    if DRAINING.with(|d| d.replace(true)) {
        return;
    }
    let _guard = DrainGuard;

    while let Some(pending) = OUTBOX.with(|o| o.borrow_mut().pop_front()) {
        pending.bus.deliver(&pending.topic, &pending.payload);
    }
}

fn registry() -> &'static Mutex<HashMap<String, MemoryBus>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, MemoryBus>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus global dengan nama `name`, dibuat saat pertama kali diminta.
    /// Dipakai oleh address `mem://name`.
    ///
    /// Entry registry dihapus saat connection terakhir ke bus ini ditutup;
    /// `named` berikutnya dengan nama yang sama membuat bus baru.
    pub fn named(name: &str) -> Self {
        registry()
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Self {
                inner: Arc::new(BusInner {
                    name: Some(name.to_string()),
                    ..Default::default()
                }),
            })
            .clone()
    }

    /// Buka connection baru ke bus ini.
    ///
    /// Untuk bus bernama yang entry-nya sudah dilepas dari registry,
    /// connection dipasang ke bus yang saat ini terdaftar dengan nama itu.
    pub fn connect(&self) -> MemoryTransport {
        let bus = match &self.inner.name {
            Some(name) => {
                let mut registry = registry().lock();
                let bus = registry
                    .entry(name.clone())
                    .or_insert_with(|| self.clone())
                    .clone();
                bus.inner.open_conns.fetch_add(1, Ordering::Relaxed);
                bus
            }
            None => {
                self.inner.open_conns.fetch_add(1, Ordering::Relaxed);
                self.clone()
            }
        };

        let conn_id = bus.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        MemoryTransport {
            bus,
            conn_id,
            closed: AtomicBool::new(false),
        }
    }

    /// Jumlah subscription aktif di `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map_or(0, |subs| subs.len())
    }

    fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let subscribers = match self.inner.topics.read().get(topic) {
            Some(subs) => Arc::clone(subs),
            None => return 0,
        };

        let raw = RawMessage { topic, payload };
        for sub in subscribers.iter() {
            (sub.callback)(&raw);
        }
        subscribers.len()
    }

    fn add(&self, topic: &str, subscriber: Subscriber) {
        let mut topics = self.inner.topics.write();
        let entry = topics.entry(topic.to_string()).or_default();
        Arc::make_mut(entry).push(subscriber);
    }

    fn remove_connection(&self, conn_id: u64) {
        let mut topics = self.inner.topics.write();
        for subs in topics.values_mut() {
            if subs.iter().any(|s| s.conn_id == conn_id) {
                Arc::make_mut(subs).retain(|s| s.conn_id != conn_id);
            }
        }
        topics.retain(|_, subs| !subs.is_empty());
    }

    fn release_connection(&self) {
        match &self.inner.name {
            Some(name) => {
                let mut registry = registry().lock();
                let last = self.inner.open_conns.fetch_sub(1, Ordering::Relaxed) == 1;
                if last
                    && registry
                        .get(name)
                        .is_some_and(|bus| Arc::ptr_eq(&bus.inner, &self.inner))
                {
                    registry.remove(name);
                    debug!(name, "memory bus unregistered");
                }
            }
            None => {
                self.inner.open_conns.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

/// Satu connection ke [`MemoryBus`].
pub struct MemoryTransport {
    bus: MemoryBus,
    conn_id: u64,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Bus tempat connection ini terpasang.
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    #[inline(always)]
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_topic(topic)?;
        OUTBOX.with(|o| {
            o.borrow_mut().push_back(Pending {
                bus: self.bus.clone(),
                topic: topic.to_string(),
                payload: payload.to_vec(),
            })
        });
        Ok(())
    }

    /// Handler panic diteruskan ke pemanggil flush.
    fn flush(&self) {
        drain_outbox();
    }

    fn subscribe(&self, topic: &str, callback: RawCallback) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_topic(topic)?;
        self.bus.add(
            topic,
            Subscriber {
                conn_id: self.conn_id,
                callback,
            },
        );
        debug!(conn_id = self.conn_id, topic, "memory subscription registered");
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bus.remove_connection(self.conn_id);
            self.bus.release_connection();
            debug!(conn_id = self.conn_id, "memory transport closed");
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
