//! Core module: memory untuk outbound path
//!
//! Prinsip desain:
//! - No-Allocation: arena di-mmap sekali saat session dibuat
//! - Wraparound: cursor kembali ke 0, tidak ada free list
//! - Single owner: pool dimiliki satu session, akses lewat lock session

mod buffer_pool;

pub use buffer_pool::{BufferPool, Region};
