//! Protocol Layer: Serialization Adapter
//!
//! Prinsip desain:
//! - Schema-driven: tipe pesan membawa [`Descriptor`]-nya sendiri
//! - Exact sizing: `packed_size` dihitung sebelum region di-reserve
//! - Scoped release: hasil decode di-drop setelah handler selesai

mod encoder;
mod heartbeat;
mod message;

pub use encoder::{decode, encode, packed_size, prefixed_len, BodyReader, BodyWriter, Decoded};
pub use heartbeat::Heartbeat;
pub use message::{checksum, Descriptor, EnvelopeHeader, Schema, HEADER_SIZE};
