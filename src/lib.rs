//! PACKR is a structure-aware streaming codec for JSON-shaped telemetry,
//! sized for MCU-class devices. Field names, strings, and MAC addresses go
//! through 64-entry LRU dictionaries, numeric fields carry per-field delta
//! state with tiered delta tokens, arrays of similar objects collapse into
//! columnar ULTRA_BATCH payloads, and finished frames optionally pass
//! through an LZ77 transform before a CRC-32 trailer seals them.
//!
//! The usual entry points are [`encode`] / [`decode`] over a [`Value`]
//! tree, with [`Encoder`] / [`StreamEncoder`] / [`Decoder`] underneath for
//! event-level control.

pub mod bits;
mod column;
pub mod crc32;
mod decode;
mod dict;
mod encode;
mod error;
pub mod frame;
pub mod lz77;
mod token;
pub mod value;
pub mod varint;

pub use decode::Decoder;
pub use encode::{Config, Encoder, StreamEncoder};
pub use error::{Error, Result};
pub use token::Token;
pub use value::Value;

/// Frame magic, "PKR1".
pub const MAGIC: [u8; 4] = [0x50, 0x4B, 0x52, 0x31];
/// Wire format version.
pub const VERSION: u8 = 0x01;
/// Entries per dictionary. Reference tokens index 0..=63.
pub const DICT_SIZE: usize = 64;
/// The exclusive working-memory ceiling for one decoded frame, 1 MiB. A
/// wrapped frame advertising more than this is rejected before allocation.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Encode one value into a self-contained frame with default settings.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    encode_with_config(value, Config::default())
}

pub fn encode_with_config(value: &Value, config: Config) -> Result<Vec<u8>> {
    let mut encoder = Encoder::with_config(config);
    encoder.value(value)?;
    encoder.finish()
}

/// Encode a sequence of values into one frame. Dictionaries and delta
/// state persist across the sequence, so repeated shapes compress well.
pub fn encode_stream(values: &[Value]) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new();
    for value in values {
        encoder.value(value)?;
    }
    encoder.finish()
}

/// Decode the first value of a frame.
pub fn decode(data: &[u8]) -> Result<Value> {
    let mut decoder = Decoder::new(data)?;
    decoder.decode_next()?.ok_or(Error::Truncated {
        step: "decode value",
        needed: 1,
        remaining: 0,
    })
}

/// Decode every value in a frame.
pub fn decode_stream(data: &[u8]) -> Result<Vec<Value>> {
    let mut decoder = Decoder::new(data)?;
    let mut values = Vec::new();
    while let Some(value) = decoder.decode_next()? {
        values.push(value);
    }
    Ok(values)
}
