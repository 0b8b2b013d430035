//! Connection handling dengan buffered non-blocking I/O
//!
//! Read buffer tumbuh sampai satu frame maksimum muat; write buffer
//! menampung output yang belum bisa dikirim (WouldBlock) sampai batas
//! [`MAX_PENDING_WRITE`], setelah itu frame baru di-drop.

use std::io::{self, Read, Write};

use mio::net::TcpStream;

use super::frame::{FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_TOPIC_LEN};

/// Buffer sizes - tuned untuk typical message sizes
const INITIAL_READ_BUFFER: usize = 64 * 1024; // 64KB
const MAX_READ_BUFFER: usize = FRAME_HEADER_SIZE + MAX_TOPIC_LEN + MAX_PAYLOAD_SIZE;
pub const MAX_PENDING_WRITE: usize = 4 * 1024 * 1024; // 4MB

/// Hasil satu putaran baca.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Socket sudah kosong (WouldBlock), connection masih hidup.
    Drained,
    /// Peer menutup connection.
    Closed,
}

/// Broker-side connection wrapper
pub struct Connection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    read_len: usize,
    write_buffer: Vec<u8>,
}

impl Connection {
    /// Wrap stream yang sudah non-blocking (dari mio accept).
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        // Disable Nagle's algorithm untuk lower latency
        stream.set_nodelay(true)?;
        tune_socket_buffers(&stream);

        Ok(Self {
            stream,
            read_buffer: vec![0u8; INITIAL_READ_BUFFER],
            read_len: 0,
            write_buffer: Vec::new(),
        })
    }

    /// Baca sampai WouldBlock (mio edge-triggered).
    pub fn read_available(&mut self) -> io::Result<ReadOutcome> {
        loop {
            if self.read_len == self.read_buffer.len() {
                if self.read_buffer.len() >= MAX_READ_BUFFER {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "read buffer exhausted without a complete frame",
                    ));
                }
                let grown = (self.read_buffer.len() * 2).min(MAX_READ_BUFFER);
                self.read_buffer.resize(grown, 0);
            }

            match self.stream.read(&mut self.read_buffer[self.read_len..]) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => self.read_len += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Drained)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Get readable data slice (zero-copy)
    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        &self.read_buffer[..self.read_len]
    }

    /// Buang `n` byte pertama dari read buffer (compact)
    #[inline]
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.read_len);
        if n == 0 {
            return;
        }
        self.read_buffer.copy_within(n..self.read_len, 0);
        self.read_len -= n;
    }

    /// Queue data untuk write, lalu coba flush.
    ///
    /// Returns `false` jika pending output sudah penuh dan `data` di-drop.
    pub fn queue_write(&mut self, data: &[u8]) -> io::Result<bool> {
        if self.write_buffer.len() + data.len() > MAX_PENDING_WRITE {
            return Ok(false);
        }
        self.write_buffer.extend_from_slice(data);
        self.flush_write_buffer()?;
        Ok(true)
    }

    /// Flush write buffer ke socket sebanyak mungkin
    pub fn flush_write_buffer(&mut self) -> io::Result<()> {
        let mut written = 0;
        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "Failed to write to socket",
                    ));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if written > 0 {
            self.write_buffer.drain(..written);
        }
        Ok(())
    }

    /// Underlying stream untuk registrasi mio
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Bytes pending in write buffer
    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.write_buffer.len()
    }
}

/// Set socket buffer sizes untuk throughput.
/// Ignore errors - not all platforms support this
#[cfg(unix)]
fn tune_socket_buffers(stream: &TcpStream) {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let optval: libc::c_int = 256 * 1024; // 256KB
    // SAFETY: fd valid selama stream hidup, optval berukuran c_int
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(not(unix))]
fn tune_socket_buffers(_stream: &TcpStream) {}
