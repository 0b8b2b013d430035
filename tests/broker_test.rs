//! Live Broker Test - Session over TCP
//!
//! Broker jalan di thread sendiri pada port bebas, lalu beberapa session
//! publish/subscribe lewat `hermes://`.
//!
//! Usage:
//!   cargo test --test broker_test -- --nocapture

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hermes::network::{Broker, BrokerStats};
use hermes::protocol::Heartbeat;
use hermes::{HermesError, Session, TransportError};
use parking_lot::Mutex;

const POOL_SIZE: usize = 64 * 1024;
const RETRY_ATTEMPTS: usize = 100;
const RETRY_WAIT: Duration = Duration::from_millis(50);

struct LiveBroker {
    addr: SocketAddr,
    stats: Arc<BrokerStats>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LiveBroker {
    fn start() -> Self {
        let mut broker = Broker::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = broker.local_addr().unwrap();
        let stats = broker.stats();

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || broker.run(&flag).unwrap());

        Self {
            addr,
            stats,
            shutdown,
            handle: Some(handle),
        }
    }

    fn session(&self) -> Session {
        Session::connect(&format!("hermes://{}", self.addr), POOL_SIZE).unwrap()
    }
}

impl Drop for LiveBroker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn heartbeat_channel(session: &Session, topic: &str) -> Receiver<Heartbeat> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    session
        .subscribe(topic, move |hb: &Heartbeat| {
            let _ = tx.lock().send(*hb);
        })
        .unwrap();
    rx
}

/// Subscription didaftarkan broker secara async, jadi publish diulang
/// sampai pesan pertama sampai.
fn publish_until_received(
    publisher: &Session,
    topic: &str,
    hb: &Heartbeat,
    rx: &Receiver<Heartbeat>,
) -> Heartbeat {
    for _ in 0..RETRY_ATTEMPTS {
        publisher.publish(topic, hb).unwrap();
        if let Ok(received) = rx.recv_timeout(RETRY_WAIT) {
            return received;
        }
    }
    panic!("no message received on {topic}");
}

#[test]
fn test_publish_reaches_remote_subscriber() {
    let broker = LiveBroker::start();
    let publisher = broker.session();
    let subscriber = broker.session();

    let rx = heartbeat_channel(&subscriber, "hermes.drone.1.hb");
    let hb = Heartbeat {
        node_id: 1,
        timestamp_us: 1_700_000_000_000_000,
        cpu_usage: 42.0,
    };

    let received = publish_until_received(&publisher, "hermes.drone.1.hb", &hb, &rx);
    assert_eq!(received, hb);

    // Setelah subscription aktif, pesan berikutnya sampai berurutan
    for i in 0..50u64 {
        let next = Heartbeat {
            timestamp_us: i,
            ..hb
        };
        publisher.publish("hermes.drone.1.hb", &next).unwrap();
    }
    let mut seqs = Vec::new();
    while seqs.len() < 50 {
        let hb = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Sisa retry dari fase awal
        if hb.timestamp_us < 50 {
            seqs.push(hb.timestamp_us);
        }
    }
    assert_eq!(seqs, (0..50).collect::<Vec<_>>());
    assert!(subscriber.stats().delivered >= 51);
}

#[test]
fn test_topics_are_isolated() {
    let broker = LiveBroker::start();
    let publisher = broker.session();
    let subscriber = broker.session();

    let rx_one = heartbeat_channel(&subscriber, "hermes.drone.1.hb");
    let rx_two = heartbeat_channel(&subscriber, "hermes.drone.2.hb");

    let hb = Heartbeat {
        node_id: 2,
        ..Default::default()
    };
    publish_until_received(&publisher, "hermes.drone.2.hb", &hb, &rx_two);

    assert!(rx_one.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_sender_receives_own_publish() {
    let broker = LiveBroker::start();
    let session = broker.session();

    let rx = heartbeat_channel(&session, "loopback");
    let hb = Heartbeat {
        node_id: 7,
        ..Default::default()
    };
    assert_eq!(publish_until_received(&session, "loopback", &hb, &rx), hb);
}

#[test]
fn test_invalid_topic_not_sent() {
    let broker = LiveBroker::start();
    let session = broker.session();

    let err = session
        .publish("has space", &Heartbeat::default())
        .unwrap_err();
    assert!(matches!(
        err,
        HermesError::TransportSend(TransportError::InvalidTopic(_))
    ));
}

#[test]
fn test_connect_to_missing_broker_fails() {
    let addr = {
        // Ambil port bebas lalu lepas lagi
        let broker = Broker::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        broker.local_addr().unwrap()
    };

    let err = Session::connect(&format!("hermes://{addr}"), POOL_SIZE).unwrap_err();
    assert!(matches!(err, HermesError::ConnectionFailure { .. }));
}

#[test]
fn test_closed_session_leaves_broker_running() {
    let broker = LiveBroker::start();
    let publisher = broker.session();

    {
        let gone = broker.session();
        let _rx = heartbeat_channel(&gone, "t");
        gone.close();
    }

    let subscriber = broker.session();
    let rx = heartbeat_channel(&subscriber, "t");
    publish_until_received(&publisher, "t", &Heartbeat::default(), &rx);

    assert!(broker.stats.connections_total.load(Ordering::Relaxed) >= 3);
}
