//! Single-arena Buffer Pool untuk outbound serialization
//!
//! Satu arena pre-allocated dengan write cursor yang hanya maju.
//! Kalau reservation berikutnya melewati kapasitas, cursor di-reset ke 0
//! dan region lama ditimpa. Tidak ada free list, tidak ada dealokasi
//! per pesan: region hanya valid sampai reservation berikutnya.

use std::ops::{Deref, DerefMut};

use memmap2::MmapMut;

use crate::error::{HermesError, Result};

/// Pre-allocated byte arena dengan wraparound cursor.
///
/// Arena di-mmap secara anonymous satu kali saat konstruksi,
/// setelah itu tidak ada alokasi di hot path.
pub struct BufferPool {
    arena: MmapMut,
    cursor: usize,
    wraps: u64,
}

/// Region writable hasil [`BufferPool::reserve`].
///
/// Borrow ke pool, jadi reservation berikutnya baru bisa dilakukan
/// setelah region ini selesai dipakai.
#[derive(Debug)]
pub struct Region<'a> {
    offset: usize,
    bytes: &'a mut [u8],
}

impl<'a> Region<'a> {
    /// Offset region di dalam arena.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Read-only view, untuk diserahkan ke transport.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }
}

impl Deref for Region<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

impl DerefMut for Region<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

impl BufferPool {
    /// Alokasi arena dengan kapasitas `capacity` bytes.
    ///
    /// # Errors
    /// [`HermesError::InvalidPoolSize`] untuk kapasitas nol,
    /// [`HermesError::PoolAllocation`] jika mapping gagal.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(HermesError::InvalidPoolSize);
        }

        let arena = MmapMut::map_anon(capacity)
            .map_err(|source| HermesError::PoolAllocation { capacity, source })?;

        Ok(Self {
            arena,
            cursor: 0,
            wraps: 0,
        })
    }

    /// Carve region sepanjang `len` bytes.
    ///
    /// Jika `cursor + len` melewati kapasitas, cursor kembali ke 0 dulu
    /// (konten lama tidak di-zero). Panjang nol mengembalikan region kosong
    /// tanpa menggeser cursor.
    ///
    /// # Errors
    /// [`HermesError::CapacityExceeded`] jika `len > capacity`; cursor tidak berubah.
    #[inline]
    pub fn reserve(&mut self, len: usize) -> Result<Region<'_>> {
        let capacity = self.arena.len();
        if len > capacity {
            return Err(HermesError::CapacityExceeded { len, capacity });
        }

        if self.cursor + len > capacity {
            self.cursor = 0;
            self.wraps += 1;
        }

        let offset = self.cursor;
        self.cursor += len;

        Ok(Region {
            offset,
            bytes: &mut self.arena[offset..offset + len],
        })
    }

    /// Total kapasitas arena.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Posisi write cursor saat ini.
    #[inline(always)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Berapa kali cursor sudah wrap ke awal arena.
    #[inline(always)]
    pub fn wraps(&self) -> u64 {
        self.wraps
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor)
            .field("wraps", &self.wraps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reservations() {
        let mut pool = BufferPool::new(64).unwrap();

        assert_eq!(pool.reserve(20).unwrap().offset(), 0);
        assert_eq!(pool.reserve(20).unwrap().offset(), 20);
        assert_eq!(pool.cursor(), 40);
        assert_eq!(pool.wraps(), 0);
    }

    #[test]
    fn test_wraparound_on_overflow() {
        let mut pool = BufferPool::new(64).unwrap();

        pool.reserve(20).unwrap();
        pool.reserve(20).unwrap();

        // 40 + 30 > 64, harus mulai lagi dari 0
        let region = pool.reserve(30).unwrap();
        assert_eq!(region.offset(), 0);
        assert_eq!(region.len(), 30);
        assert_eq!(pool.cursor(), 30);
        assert_eq!(pool.wraps(), 1);
    }

    #[test]
    fn test_exact_fit_does_not_wrap() {
        let mut pool = BufferPool::new(64).unwrap();

        pool.reserve(40).unwrap();
        let region = pool.reserve(24).unwrap();
        assert_eq!(region.offset(), 40);
        assert_eq!(pool.cursor(), 64);

        // Pool penuh, reservation berikutnya wrap
        assert_eq!(pool.reserve(1).unwrap().offset(), 0);
    }

    #[test]
    fn test_oversize_rejected_without_moving_cursor() {
        let mut pool = BufferPool::new(64).unwrap();
        pool.reserve(10).unwrap();

        match pool.reserve(100) {
            Err(HermesError::CapacityExceeded { len, capacity }) => {
                assert_eq!(len, 100);
                assert_eq!(capacity, 64);
            }
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }
        assert_eq!(pool.cursor(), 10);
        assert_eq!(pool.wraps(), 0);
    }

    #[test]
    fn test_whole_capacity_reservation() {
        let mut pool = BufferPool::new(64).unwrap();
        pool.reserve(1).unwrap();

        let region = pool.reserve(64).unwrap();
        assert_eq!(region.offset(), 0);
        assert_eq!(region.len(), 64);
    }

    #[test]
    fn test_zero_length_reservation() {
        let mut pool = BufferPool::new(64).unwrap();
        pool.reserve(8).unwrap();

        let region = pool.reserve(0).unwrap();
        assert!(region.is_empty());
        assert_eq!(pool.cursor(), 8);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            BufferPool::new(0),
            Err(HermesError::InvalidPoolSize)
        ));
    }

    #[test]
    fn test_wrap_does_not_zero_old_content() {
        let mut pool = BufferPool::new(16).unwrap();

        pool.reserve(12).unwrap().copy_from_slice(&[0xAB; 12]);

        let mut region = pool.reserve(8).unwrap();
        assert_eq!(region.offset(), 0);
        assert_eq!(region.as_bytes(), &[0xAB; 8]);
        region[0] = 1;
    }
}
