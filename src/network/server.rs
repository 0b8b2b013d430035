//! Hermes Broker dengan event-driven I/O
//!
//! Menggunakan mio untuk non-blocking I/O multiplexing.
//! Routing exact-match per topic: frame `Publish` diteruskan apa adanya
//! ke semua connection yang subscribe ke topic tersebut.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::connection::{Connection, ReadOutcome};
use super::frame::{FrameDecoder, FrameKind};

const LISTENER_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 1024;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Broker statistics, aman dibaca dari thread lain selama broker jalan.
#[derive(Debug, Default)]
pub struct BrokerStats {
    pub frames_received: AtomicU64,
    pub frames_forwarded: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub bytes_received: AtomicU64,
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
}

impl BrokerStats {
    fn log_summary(&self, uptime: Duration) {
        let frames_in = self.frames_received.load(Ordering::Relaxed);
        let frames_out = self.frames_forwarded.load(Ordering::Relaxed);
        let secs = uptime.as_secs_f64().max(f64::EPSILON);

        info!(
            uptime_secs = uptime.as_secs(),
            frames_in,
            frames_out,
            rate_in = frames_in as f64 / secs,
            rate_out = frames_out as f64 / secs,
            dropped = self.frames_dropped.load(Ordering::Relaxed),
            kib_in = self.bytes_received.load(Ordering::Relaxed) / 1024,
            connections = self.connections_active.load(Ordering::Relaxed),
            "broker stats"
        );
    }
}

struct Peer {
    conn: Connection,
    addr: SocketAddr,
    topics: HashSet<String>,
}

enum Action {
    Publish { topic: String, frame: Vec<u8> },
    Subscribe(String),
    Unsubscribe(String),
}

/// Hermes Broker
///
/// Event-driven broker dengan:
/// - Non-blocking I/O (epoll/kqueue/IOCP)
/// - Buffered output per connection
/// - Tabel routing topic -> connections
pub struct Broker {
    poll: Poll,
    listener: TcpListener,
    peers: HashMap<Token, Peer>,
    routes: HashMap<String, HashSet<Token>>,
    next_token: usize,
    stats: Arc<BrokerStats>,
    stats_interval: Option<Duration>,
}

impl Broker {
    /// Bind listener. Port 0 memilih port bebas, lihat [`Broker::local_addr`].
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            peers: HashMap::new(),
            routes: HashMap::new(),
            next_token: 1,
            stats: Arc::new(BrokerStats::default()),
            stats_interval: None,
        })
    }

    /// Log stats setiap `interval` selama [`Broker::run`].
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<BrokerStats> {
        Arc::clone(&self.stats)
    }

    /// Jalankan event loop sampai `shutdown` bernilai true.
    pub fn run(&mut self, shutdown: &AtomicBool) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let start = Instant::now();
        let mut last_stats = Instant::now();

        let addr = self.listener.local_addr()?;
        info!(%addr, "hermes broker listening");

        while !shutdown.load(Ordering::Acquire) {
            self.poll_once(&mut events)?;

            if let Some(interval) = self.stats_interval {
                if last_stats.elapsed() >= interval {
                    self.stats.log_summary(start.elapsed());
                    last_stats = Instant::now();
                }
            }
        }

        info!(
            connections = self.peers.len(),
            "hermes broker shutting down"
        );
        Ok(())
    }

    fn poll_once(&mut self, events: &mut Events) -> io::Result<()> {
        match self.poll.poll(events, Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.accept_connections()?,
                token => {
                    let mut alive = true;
                    if event.is_readable() || event.is_read_closed() {
                        alive = self.handle_read(token);
                    }
                    if alive && event.is_writable() {
                        alive = self.handle_write(token);
                    }
                    if !alive {
                        self.remove_peer(token);
                    }
                }
            }
        }
        Ok(())
    }

    /// Accept new connections
    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let mut conn = match Connection::new(stream) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(%addr, error = %e, "failed to set up connection");
                            continue;
                        }
                    };

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    self.poll.registry().register(
                        conn.stream_mut(),
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;

                    self.peers.insert(
                        token,
                        Peer {
                            conn,
                            addr,
                            topics: HashSet::new(),
                        },
                    );
                    self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                    info!(%addr, token = token.0, "connected");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Handle readable event. Returns false jika connection harus ditutup.
    fn handle_read(&mut self, token: Token) -> bool {
        let peer = match self.peers.get_mut(&token) {
            Some(p) => p,
            None => return true,
        };

        let outcome = match peer.conn.read_available() {
            Ok(o) => o,
            Err(e) => {
                warn!(addr = %peer.addr, error = %e, "read error");
                return false;
            }
        };

        let mut actions = Vec::new();
        let mut decoder = FrameDecoder::new(peer.conn.readable());
        loop {
            match decoder.next() {
                Ok(Some(frame)) => {
                    self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_received
                        .fetch_add(frame.raw.len() as u64, Ordering::Relaxed);

                    match frame.kind {
                        FrameKind::Publish => actions.push(Action::Publish {
                            topic: frame.topic.to_string(),
                            frame: frame.raw.to_vec(),
                        }),
                        FrameKind::Subscribe => {
                            actions.push(Action::Subscribe(frame.topic.to_string()))
                        }
                        FrameKind::Unsubscribe => {
                            actions.push(Action::Unsubscribe(frame.topic.to_string()))
                        }
                        // Client masih hidup, tidak ada yang perlu dilakukan
                        FrameKind::Heartbeat => {}
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(addr = %peer.addr, error = %e, "invalid frame, closing connection");
                    return false;
                }
            }
        }
        let consumed = decoder.consumed();
        peer.conn.consume(consumed);

        for action in actions {
            match action {
                Action::Subscribe(topic) => self.add_route(token, topic),
                Action::Unsubscribe(topic) => self.remove_route(token, &topic),
                Action::Publish { topic, frame } => self.fan_out(&topic, &frame),
            }
        }

        outcome == ReadOutcome::Drained
    }

    /// Handle writable event
    fn handle_write(&mut self, token: Token) -> bool {
        match self.peers.get_mut(&token) {
            Some(peer) => match peer.conn.flush_write_buffer() {
                Ok(()) => true,
                Err(e) => {
                    warn!(addr = %peer.addr, error = %e, "write error");
                    false
                }
            },
            None => true,
        }
    }

    fn add_route(&mut self, token: Token, topic: String) {
        if let Some(peer) = self.peers.get_mut(&token) {
            debug!(addr = %peer.addr, topic = %topic, "subscribe");
            peer.topics.insert(topic.clone());
            self.routes.entry(topic).or_default().insert(token);
        }
    }

    fn remove_route(&mut self, token: Token, topic: &str) {
        if let Some(peer) = self.peers.get_mut(&token) {
            peer.topics.remove(topic);
        }
        if let Some(tokens) = self.routes.get_mut(topic) {
            tokens.remove(&token);
            if tokens.is_empty() {
                self.routes.remove(topic);
            }
        }
    }

    /// Teruskan frame ke semua subscriber topic
    fn fan_out(&mut self, topic: &str, frame: &[u8]) {
        let Some(tokens) = self.routes.get(topic) else {
            return;
        };

        let mut failed = Vec::new();
        for token in tokens {
            let Some(peer) = self.peers.get_mut(token) else {
                continue;
            };
            match peer.conn.queue_write(frame) {
                Ok(true) => {
                    self.stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        addr = %peer.addr,
                        pending = peer.conn.write_pending(),
                        "slow subscriber, frame dropped"
                    );
                }
                Err(e) => {
                    warn!(addr = %peer.addr, error = %e, "write error");
                    failed.push(*token);
                }
            }
        }

        for token in failed {
            self.remove_peer(token);
        }
    }

    fn remove_peer(&mut self, token: Token) {
        let Some(mut peer) = self.peers.remove(&token) else {
            return;
        };

        if let Err(e) = self.poll.registry().deregister(peer.conn.stream_mut()) {
            debug!(addr = %peer.addr, error = %e, "deregister failed");
        }
        for topic in &peer.topics {
            if let Some(tokens) = self.routes.get_mut(topic) {
                tokens.remove(&token);
                if tokens.is_empty() {
                    self.routes.remove(topic);
                }
            }
        }

        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        info!(addr = %peer.addr, topics = peer.topics.len(), "disconnected");
    }
}
