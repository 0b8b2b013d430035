//! Heartbeat message, dipakai oleh `hermes_publisher` / `hermes_subscriber`.

use super::encoder::{BodyReader, BodyWriter};
use super::message::{Descriptor, Schema};
use crate::error::DecodeError;

/// Liveness + load report dari satu node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Heartbeat {
    pub node_id: u32,
    /// Wall-clock timestamp pengirim (UNIX epoch), dalam mikrodetik.
    pub timestamp_us: u64,
    pub cpu_usage: f32,
}

impl Schema for Heartbeat {
    const DESCRIPTOR: Descriptor = Descriptor {
        name: "Heartbeat",
        schema_id: 1,
        version: 1,
    };

    #[inline(always)]
    fn body_len(&self) -> usize {
        4 + 8 + 4
    }

    #[inline(always)]
    fn encode_body(&self, w: &mut BodyWriter<'_>) {
        w.put_u32(self.node_id);
        w.put_u64(self.timestamp_us);
        w.put_f32(self.cpu_usage);
    }

    fn decode_body(r: &mut BodyReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            node_id: r.get_u32()?,
            timestamp_us: r.get_u64()?,
            cpu_usage: r.get_f32()?,
        })
    }
}
