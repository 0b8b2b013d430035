//! Hermes - Low-Latency Pub/Sub Helper
//!
//! Mengikat serialization schema ke message-bus transport:
//! - [`Session::publish`]: encode pesan ke buffer pool, kirim ke topic
//! - [`Session::subscribe`]: decode pesan inbound, panggil handler
//!
//! Arsitektur:
//! - No-Allocation publish: satu arena pre-allocated dengan wraparound cursor
//! - Schema-typed: tipe pesan membawa [`Descriptor`]-nya sendiri
//! - Pluggable transport: TCP ke Hermes broker, atau in-process bus
//!
//! # Example
//! ```
//! use hermes::protocol::Heartbeat;
//! use hermes::Session;
//!
//! let session = Session::connect("mem://doc-example", 64 * 1024)?;
//! session.subscribe("hermes.drone.1.hb", |hb: &Heartbeat| {
//!     println!("node {} at {} us", hb.node_id, hb.timestamp_us);
//! })?;
//! session.publish("hermes.drone.1.hb", &Heartbeat { node_id: 1, ..Default::default() })?;
//! # Ok::<(), hermes::HermesError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;

mod session;
mod stats;

pub use config::SessionConfig;
pub use error::{DecodeError, HermesError, Result, TransportError};
pub use protocol::{Descriptor, Schema};
pub use session::Session;
pub use stats::{SessionStats, StatsSnapshot};
