//! Session statistics
//!
//! Counter atomic, di-update dari thread publisher dan dari thread
//! dispatch transport tanpa lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter milik satu [`Session`](crate::Session).
#[derive(Debug, Default)]
pub struct SessionStats {
    pub(crate) published: AtomicU64,
    pub(crate) published_bytes: AtomicU64,
    pub(crate) publish_failures: AtomicU64,
    pub(crate) capacity_rejections: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) decode_drops: AtomicU64,
}

impl SessionStats {
    #[inline(always)]
    pub(crate) fn record_publish(&self, len: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.published_bytes
            .fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pool_wraps: u64) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            published_bytes: self.published_bytes.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            decode_drops: self.decode_drops.load(Ordering::Relaxed),
            pool_wraps,
        }
    }
}

/// Point-in-time copy dari [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Pesan yang diterima transport.
    pub published: u64,
    pub published_bytes: u64,
    /// Publish yang ditolak transport.
    pub publish_failures: u64,
    /// Publish yang ditolak karena lebih besar dari pool.
    pub capacity_rejections: u64,
    /// Handler invocations.
    pub delivered: u64,
    /// Pesan inbound yang gagal di-decode dan di-drop.
    pub decode_drops: u64,
    /// Berapa kali cursor pool wrap ke 0.
    pub pool_wraps: u64,
}
