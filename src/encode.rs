use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::column;
use crate::crc32::Crc32;
use crate::dict::DictSet;
use crate::error::{Error, Result};
use crate::frame::{self, flags, TRANSFORM_PREFIX};
use crate::lz77::{Lz77Stream, FORMAT_LZ77, LEN_UNKNOWN};
use crate::token::Token;
use crate::value::Value;
use crate::varint::{decode_fixed32, encode_fixed32, write_signed_varint, write_varint};
use crate::DICT_SIZE;

/// Encoder settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Run the LZ77 post-transform over finished frames.
    pub compress: bool,
    /// Skip LZ77 when a 1 KiB sample of the frame looks high-entropy.
    pub entropy_check: bool,
    /// Minimum rows before an array of objects becomes an ULTRA_BATCH.
    pub batch_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compress: true,
            entropy_check: true,
            batch_threshold: 4,
        }
    }
}

/// Kind of the last numeric value seen under a field slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NumKind {
    Int,
    Fixed,
}

#[derive(Clone, Copy, Debug)]
enum Scope {
    /// Saves the field slot active when the object opened.
    Object(Option<u8>),
    Array,
}

pub(crate) fn is_mac_address(s: &str) -> bool {
    parse_mac(s).is_some()
}

/// Accepts `XX:XX:XX:XX:XX:XX` and `XX-XX-XX-XX-XX-XX`, any hex case.
pub(crate) fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let bytes = s.as_bytes();
    if bytes.len() != 17 {
        return None;
    }
    let sep = bytes[2];
    if sep != b':' && sep != b'-' {
        return None;
    }
    let mut mac = [0u8; 6];
    for (i, out) in mac.iter_mut().enumerate() {
        let base = i * 3;
        if i > 0 && bytes[base - 1] != sep {
            return None;
        }
        let hi = (bytes[base] as char).to_digit(16)?;
        let lo = (bytes[base + 1] as char).to_digit(16)?;
        *out = ((hi << 4) | lo) as u8;
    }
    Some(mac)
}

/// Canonical rendering: colon-separated uppercase hex.
pub(crate) fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Shared token-emission state: the body buffer, the three dictionaries,
/// and the per-field delta contexts.
pub(crate) struct EncoderCore {
    pub(crate) body: Vec<u8>,
    pub(crate) dicts: DictSet,
    field_state: [Option<(f64, NumKind)>; DICT_SIZE],
    current_field: Option<u8>,
    scopes: Vec<Scope>,
    pub(crate) symbol_count: u32,
    pub(crate) flags: u8,
    pub(crate) batch_threshold: usize,
    peak: usize,
}

impl EncoderCore {
    pub(crate) fn new(batch_threshold: usize) -> Self {
        Self {
            body: Vec::new(),
            dicts: DictSet::new(),
            field_state: [None; DICT_SIZE],
            current_field: None,
            scopes: Vec::new(),
            symbol_count: 0,
            flags: 0,
            batch_threshold,
            peak: 0,
        }
    }

    pub(crate) fn token(&mut self, token: Token) {
        self.symbol_count += 1;
        self.body.push(token.into_u8());
    }

    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub(crate) fn varint(&mut self, value: u32) {
        write_varint(&mut self.body, value);
    }

    fn note_alloc(&mut self) {
        let held = self.body.capacity() + self.dicts.bytes_held();
        if held > self.peak {
            self.peak = held;
        }
    }

    pub(crate) fn null(&mut self) {
        self.token(Token::Null);
    }

    pub(crate) fn bool_value(&mut self, value: bool) {
        self.token(if value {
            Token::BoolTrue
        } else {
            Token::BoolFalse
        });
    }

    /// Absolute integer, bypassing the delta context. Used inside columns.
    pub(crate) fn literal_int(&mut self, value: i32) {
        self.token(Token::Int);
        write_signed_varint(&mut self.body, value);
    }

    /// Absolute 16.16 fixed-point value, bypassing the delta context.
    /// Returns the value the decoder will reconstruct.
    pub(crate) fn literal_float(&mut self, value: f64) -> f64 {
        self.token(Token::Float32);
        let raw = encode_fixed32(value);
        self.raw(&raw);
        decode_fixed32(raw)
    }

    pub(crate) fn int(&mut self, value: i32) {
        if let Some(slot) = self.current_field {
            if let Some((last, NumKind::Int)) = self.field_state[slot as usize] {
                let delta = value as i64 - last as i64;
                if let Ok(delta) = i32::try_from(delta) {
                    self.delta(delta);
                    self.field_state[slot as usize] = Some((value as f64, NumKind::Int));
                    return;
                }
            }
            self.field_state[slot as usize] = Some((value as f64, NumKind::Int));
        }
        self.literal_int(value);
    }

    /// 16.16 fixed-point value with delta compression. Deltas are computed
    /// against the reconstructed previous value, never the raw input, so
    /// encoder and decoder state cannot drift apart.
    pub(crate) fn float(&mut self, value: f64) {
        if let Some(slot) = self.current_field {
            if let Some((last, NumKind::Fixed)) = self.field_state[slot as usize] {
                let delta = ((value - last) * 65536.0).round();
                if delta >= i32::MIN as f64 && delta <= i32::MAX as f64 {
                    let delta = delta as i32;
                    self.delta(delta);
                    let reconstructed = last + delta as f64 / 65536.0;
                    self.field_state[slot as usize] = Some((reconstructed, NumKind::Fixed));
                    return;
                }
            }
            let reconstructed = self.literal_float(value);
            self.field_state[slot as usize] = Some((reconstructed, NumKind::Fixed));
            return;
        }
        self.literal_float(value);
    }

    /// Full-precision IEEE double. Never delta-compressed, but it primes the
    /// field's delta context so later fixed-point values can delta from it.
    pub(crate) fn double(&mut self, value: f64) {
        self.token(Token::Double);
        self.raw(&value.to_le_bytes());
        if let Some(slot) = self.current_field {
            self.field_state[slot as usize] = Some((value, NumKind::Fixed));
        }
    }

    pub(crate) fn binary(&mut self, data: &[u8]) {
        self.token(Token::Binary);
        self.varint(data.len() as u32);
        self.raw(data);
        self.note_alloc();
    }

    pub(crate) fn string(&mut self, value: &str) {
        let up = self.dicts.strings.get_or_add(value.as_bytes());
        if up.is_new {
            self.flags |= flags::HAS_DICT_UPDATE;
            self.token(Token::NewString);
            self.varint(value.len() as u32);
            self.raw(value.as_bytes());
            self.note_alloc();
        } else {
            self.token(Token::StringRef(up.slot));
        }
    }

    /// Field name token. Sets the active delta slot for the value that
    /// follows. Evicting a slot clears its numeric state.
    pub(crate) fn field(&mut self, name: &str) {
        let up = self.dicts.fields.get_or_add(name.as_bytes());
        if up.is_new {
            if up.evicted {
                self.field_state[up.slot as usize] = None;
            }
            self.flags |= flags::HAS_DICT_UPDATE;
            self.token(Token::NewField);
            self.varint(name.len() as u32);
            self.raw(name.as_bytes());
            self.note_alloc();
        } else {
            self.token(Token::FieldRef(up.slot));
        }
        self.current_field = Some(up.slot);
    }

    /// MAC address string. Text that does not parse as a MAC falls back to
    /// plain string encoding, matching the adapter's recognition rule.
    pub(crate) fn mac(&mut self, text: &str) {
        let mac = match parse_mac(text) {
            Some(mac) => mac,
            None => return self.string(text),
        };
        let canonical = format_mac(&mac);
        let up = self.dicts.macs.get_or_add(canonical.as_bytes());
        if up.is_new {
            self.flags |= flags::HAS_DICT_UPDATE;
            self.token(Token::NewMac);
            self.raw(&mac);
            self.note_alloc();
        } else {
            self.token(Token::MacRef(up.slot));
        }
    }

    pub(crate) fn object_start(&mut self) {
        self.token(Token::ObjectStart);
        self.scopes.push(Scope::Object(self.current_field));
    }

    pub(crate) fn object_end(&mut self) -> Result<()> {
        match self.scopes.pop() {
            Some(Scope::Object(saved)) => {
                self.current_field = saved;
                self.token(Token::ObjectEnd);
                Ok(())
            }
            _ => Err(Error::UnbalancedContainer("object end without start")),
        }
    }

    pub(crate) fn array_start(&mut self, count: u32) {
        self.token(Token::ArrayStart);
        self.varint(count);
        self.scopes.push(Scope::Array);
    }

    pub(crate) fn array_stream(&mut self) {
        self.token(Token::ArrayStream);
        self.scopes.push(Scope::Array);
    }

    pub(crate) fn array_end(&mut self) -> Result<()> {
        match self.scopes.pop() {
            Some(Scope::Array) => {
                self.token(Token::ArrayEnd);
                Ok(())
            }
            _ => Err(Error::UnbalancedContainer("array end without start")),
        }
    }

    /// Saved active-field slot, for emission paths that must not disturb
    /// the scalar delta scoping (the columnar batch path).
    pub(crate) fn save_current_field(&self) -> Option<u8> {
        self.current_field
    }

    pub(crate) fn restore_current_field(&mut self, saved: Option<u8>) {
        self.current_field = saved;
    }

    /// Emit one delta with the tightest token for its magnitude.
    pub(crate) fn delta(&mut self, delta: i32) {
        match delta {
            0 => self.token(Token::DeltaZero),
            1 => self.token(Token::DeltaOne),
            -1 => self.token(Token::DeltaNegOne),
            -8..=7 => self.token(Token::DeltaSmall(delta as i8)),
            -64..=63 => {
                self.token(Token::DeltaMedium);
                self.body.push((delta + 64) as u8);
            }
            _ => {
                self.token(Token::DeltaLarge);
                write_signed_varint(&mut self.body, delta);
            }
        }
    }

    /// Walk a value tree, recognizing MAC strings and batchable arrays.
    pub(crate) fn value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.null(),
            Value::Bool(v) => self.bool_value(*v),
            Value::Int(v) => self.int(*v),
            Value::Float(v) => self.double(*v),
            Value::String(v) => {
                if is_mac_address(v) {
                    self.mac(v);
                } else {
                    self.string(v);
                }
            }
            Value::Binary(v) => self.binary(v),
            Value::Array(items) => {
                if !column::try_encode_batch(self, items)? {
                    self.array_start(items.len() as u32);
                    for item in items {
                        self.value(item)?;
                    }
                    self.array_end()?;
                }
            }
            Value::Object(entries) => {
                self.object_start();
                for (key, item) in entries {
                    self.field(key);
                    self.value(item)?;
                }
                self.object_end()?;
            }
        }
        Ok(())
    }

    fn allocated_bytes(&self) -> usize {
        self.body.capacity() + self.dicts.bytes_held()
    }
}

/// Buffered encoder: events accumulate in memory and [`Encoder::finish`]
/// seals them into one frame.
pub struct Encoder {
    core: EncoderCore,
    config: Config,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            core: EncoderCore::new(config.batch_threshold),
            config,
        }
    }

    pub fn null(&mut self) {
        self.core.null()
    }

    pub fn bool_value(&mut self, value: bool) {
        self.core.bool_value(value)
    }

    pub fn int(&mut self, value: i32) {
        self.core.int(value)
    }

    pub fn float(&mut self, value: f64) {
        self.core.float(value)
    }

    pub fn double(&mut self, value: f64) {
        self.core.double(value)
    }

    pub fn binary(&mut self, data: &[u8]) {
        self.core.binary(data)
    }

    pub fn string(&mut self, value: &str) {
        self.core.string(value)
    }

    pub fn field(&mut self, name: &str) {
        self.core.field(name)
    }

    pub fn mac(&mut self, text: &str) {
        self.core.mac(text)
    }

    pub fn object_start(&mut self) {
        self.core.object_start()
    }

    pub fn object_end(&mut self) -> Result<()> {
        self.core.object_end()
    }

    pub fn array_start(&mut self, count: u32) {
        self.core.array_start(count)
    }

    pub fn array_stream(&mut self) {
        self.core.array_stream()
    }

    pub fn array_end(&mut self) -> Result<()> {
        self.core.array_end()
    }

    pub fn value(&mut self, value: &Value) -> Result<()> {
        self.core.value(value)
    }

    /// Seal the body into a frame: header, body, CRC trailer, and the LZ77
    /// wrap when it is enabled and worthwhile.
    pub fn finish(self) -> Result<Vec<u8>> {
        let frame = frame::seal(self.core.flags, self.core.symbol_count, &self.core.body);
        if self.config.compress {
            Ok(frame::maybe_wrap(frame, self.config.entropy_check))
        } else {
            Ok(frame)
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.core.allocated_bytes()
    }

    pub fn peak_allocated_bytes(&self) -> usize {
        self.core.peak.max(self.core.allocated_bytes())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// How many body bytes accumulate before they are pushed through the CRC
/// and LZ77 stages toward the sink.
const FLUSH_THRESHOLD: usize = 4096;

/// Sink-driven encoder. The header goes out immediately (flags and symbol
/// count are therefore zero), the body streams through the CRC and the
/// sliding-window LZ77, and [`StreamEncoder::finish`] appends the CRC and
/// finalizes the compressed stream.
pub struct StreamEncoder<W: Write> {
    core: EncoderCore,
    sink: W,
    crc: Crc32,
    lz: Option<Lz77Stream>,
}

impl<W: Write> StreamEncoder<W> {
    pub fn new(mut sink: W, config: Config) -> Result<Self> {
        let lz = if config.compress {
            // Length is not known up front: write the wrap prefix with the
            // unknown-length sentinel.
            let mut head = Vec::with_capacity(7);
            head.extend_from_slice(&TRANSFORM_PREFIX);
            head.push(FORMAT_LZ77);
            head.extend_from_slice(&LEN_UNKNOWN.to_le_bytes());
            sink.write_all(&head)?;
            Some(Lz77Stream::new())
        } else {
            None
        };

        let mut core = EncoderCore::new(config.batch_threshold);
        frame::write_header(&mut core.body, 0, 0);
        Ok(Self {
            core,
            sink,
            crc: Crc32::new(),
            lz,
        })
    }

    fn drain(&mut self) -> Result<()> {
        if self.core.body.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.core.body);
        self.crc.update(&chunk);
        self.push_raw(&chunk, false)?;
        Ok(())
    }

    /// Bytes that bypass the CRC (the CRC trailer itself).
    fn push_raw(&mut self, bytes: &[u8], flush: bool) -> Result<()> {
        match self.lz.as_mut() {
            Some(lz) => lz.compress(bytes, &mut self.sink, flush)?,
            None => {
                self.sink.write_all(bytes)?;
                if flush {
                    self.sink.flush()?;
                }
            }
        }
        Ok(())
    }

    fn maybe_drain(&mut self) -> Result<()> {
        if self.core.body.len() >= FLUSH_THRESHOLD {
            self.drain()?;
        }
        Ok(())
    }

    pub fn null(&mut self) -> Result<()> {
        self.core.null();
        self.maybe_drain()
    }

    pub fn bool_value(&mut self, value: bool) -> Result<()> {
        self.core.bool_value(value);
        self.maybe_drain()
    }

    pub fn int(&mut self, value: i32) -> Result<()> {
        self.core.int(value);
        self.maybe_drain()
    }

    pub fn float(&mut self, value: f64) -> Result<()> {
        self.core.float(value);
        self.maybe_drain()
    }

    pub fn double(&mut self, value: f64) -> Result<()> {
        self.core.double(value);
        self.maybe_drain()
    }

    pub fn binary(&mut self, data: &[u8]) -> Result<()> {
        self.core.binary(data);
        self.maybe_drain()
    }

    pub fn string(&mut self, value: &str) -> Result<()> {
        self.core.string(value);
        self.maybe_drain()
    }

    pub fn field(&mut self, name: &str) -> Result<()> {
        self.core.field(name);
        self.maybe_drain()
    }

    pub fn mac(&mut self, text: &str) -> Result<()> {
        self.core.mac(text);
        self.maybe_drain()
    }

    pub fn object_start(&mut self) -> Result<()> {
        self.core.object_start();
        self.maybe_drain()
    }

    pub fn object_end(&mut self) -> Result<()> {
        self.core.object_end()?;
        self.maybe_drain()
    }

    pub fn array_start(&mut self, count: u32) -> Result<()> {
        self.core.array_start(count);
        self.maybe_drain()
    }

    pub fn array_stream(&mut self) -> Result<()> {
        self.core.array_stream();
        self.maybe_drain()
    }

    pub fn array_end(&mut self) -> Result<()> {
        self.core.array_end()?;
        self.maybe_drain()
    }

    pub fn value(&mut self, value: &Value) -> Result<()> {
        self.core.value(value)?;
        self.maybe_drain()
    }

    /// Flush pending body bytes, append the CRC over everything before it,
    /// and finalize the compressed stream.
    pub fn finish(mut self) -> Result<W> {
        self.drain()?;
        let crc = self.crc.finish();
        self.push_raw(&crc.to_le_bytes(), true)?;
        Ok(self.sink)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.core.allocated_bytes()
            + self
                .lz
                .as_ref()
                .map(Lz77Stream::allocated_bytes)
                .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;

    fn no_compress() -> Config {
        Config {
            compress: false,
            ..Config::default()
        }
    }

    fn body_of(frame_bytes: &[u8]) -> Vec<u8> {
        let unwrapped = frame::unwrap(frame_bytes).unwrap();
        let (_, body) = frame::parse(&unwrapped).unwrap();
        body.to_vec()
    }

    #[test]
    fn single_object_body() {
        // {"rssi":-45,"mac":"AA:BB:CC:DD:EE:FF"}
        let mut enc = Encoder::with_config(no_compress());
        enc.object_start();
        enc.field("rssi");
        enc.int(-45);
        enc.field("mac");
        enc.mac("AA:BB:CC:DD:EE:FF");
        enc.object_end().unwrap();
        let frame_bytes = enc.finish().unwrap();

        let mut expected = vec![0xDC, 0xD5, 0x04];
        expected.extend_from_slice(b"rssi");
        expected.extend_from_slice(&[0xC0, 0x59, 0xD5, 0x03]);
        expected.extend_from_slice(b"mac");
        expected.extend_from_slice(&[0xD6, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0xDD]);
        assert_eq!(body_of(&frame_bytes), expected);
    }

    #[test]
    fn second_object_uses_references_and_deltas() {
        // Same keys again under a live encoder: dictionary hits plus a
        // small delta for rssi (-45 -> -42 is +3).
        let mut enc = Encoder::with_config(no_compress());
        for rssi in [-45, -42] {
            enc.object_start();
            enc.field("rssi");
            enc.int(rssi);
            enc.field("mac");
            enc.mac("AA:BB:CC:DD:EE:FF");
            enc.object_end().unwrap();
        }
        let body = body_of(&enc.finish().unwrap());

        // Second object is exactly: DC 00 CE 01 80 DD
        let second = &body[body.len() - 6..];
        assert_eq!(second, &[0xDC, 0x00, 0xCE, 0x01, 0x80, 0xDD]);
    }

    #[test]
    fn delta_tiers() {
        let mut enc = Encoder::with_config(no_compress());
        enc.object_start();
        enc.field("v");
        enc.int(100);
        for (value, expected) in [
            (100, vec![0xE6u8]),             // delta 0
            (101, vec![0xE7]),               // +1
            (100, vec![0xE8]),               // -1
            (105, vec![0xCE]),               // +5 -> 0xC3 + 13
            (105 + 40, vec![0xEC, 40 + 64]), // +40 medium
            (145 + 1000, vec![0xD3, 0xD0, 0x0F]), // +1000 large, zigzag 2000
        ] {
            let before = enc.core.body.len();
            enc.int(value);
            assert_eq!(&enc.core.body[before..], &expected[..], "value {}", value);
        }
        enc.object_end().unwrap();
    }

    #[test]
    fn no_delta_without_field_context() {
        let mut enc = Encoder::with_config(no_compress());
        enc.int(10);
        enc.int(11);
        // Both are absolute INT tokens: no enclosing field, no delta state.
        assert_eq!(enc.core.body, vec![0xC0, 0x14, 0xC0, 0x16]);
    }

    #[test]
    fn kind_switch_resets_delta() {
        let mut enc = Encoder::with_config(no_compress());
        enc.object_start();
        enc.field("v");
        enc.int(5);
        let before = enc.core.body.len();
        enc.float(5.5);
        // Kind mismatch forces a full FLOAT32 token.
        assert_eq!(enc.core.body[before], 0xC2);
        enc.object_end().unwrap();
    }

    #[test]
    fn float_deltas_use_fixed_point_steps() {
        let mut enc = Encoder::with_config(no_compress());
        enc.object_start();
        enc.field("t");
        enc.float(20.0);
        let before = enc.core.body.len();
        // +1/65536 is a delta of exactly 1.
        enc.float(20.0 + 1.0 / 65536.0);
        assert_eq!(&enc.core.body[before..], &[0xE7]);
        enc.object_end().unwrap();
    }

    #[test]
    fn mac_dictionary_normalizes_forms() {
        let mut enc = Encoder::with_config(no_compress());
        enc.mac("aa-bb-cc-dd-ee-ff");
        let before = enc.core.body.len();
        enc.mac("AA:BB:CC:DD:EE:FF");
        // Same address in a different spelling is a dictionary hit.
        assert_eq!(&enc.core.body[before..], &[0x80]);
    }

    #[test]
    fn non_mac_text_encodes_as_string() {
        let mut enc = Encoder::with_config(no_compress());
        enc.mac("not a mac address!!");
        assert_eq!(enc.core.body[0], 0xD4);
    }

    #[test]
    fn unbalanced_containers_error() {
        let mut enc = Encoder::with_config(no_compress());
        assert!(enc.object_end().is_err());
        let mut enc = Encoder::with_config(no_compress());
        enc.object_start();
        assert!(enc.array_end().is_err());
    }

    #[test]
    fn dict_update_flag_tracks_new_tokens() {
        let mut enc = Encoder::with_config(no_compress());
        enc.int(1);
        let frame_bytes = enc.finish().unwrap();
        let (header, _) = frame::parse(&frame_bytes).unwrap();
        assert_eq!(header.flags & flags::HAS_DICT_UPDATE, 0);

        let mut enc = Encoder::with_config(no_compress());
        enc.string("hello");
        let frame_bytes = enc.finish().unwrap();
        let (header, _) = frame::parse(&frame_bytes).unwrap();
        assert_ne!(header.flags & flags::HAS_DICT_UPDATE, 0);
    }

    #[test]
    fn allocation_counters_move() {
        let mut enc = Encoder::with_config(no_compress());
        let start = enc.allocated_bytes();
        enc.string("a reasonably long string to count");
        assert!(enc.allocated_bytes() > start);
        assert!(enc.peak_allocated_bytes() >= enc.allocated_bytes());
    }

    mod streaming {
        use super::*;

        #[test]
        fn uncompressed_stream_matches_buffered_body() {
            let mut stream = StreamEncoder::new(Vec::new(), no_compress()).unwrap();
            stream.object_start().unwrap();
            stream.field("rssi").unwrap();
            stream.int(-45).unwrap();
            stream.object_end().unwrap();
            let out = stream.finish().unwrap();

            // Header first, CRC last, body in between; CRC covers all
            // bytes before it.
            let (header, body) = frame::parse(&out).unwrap();
            assert_eq!(header.symbol_count, 0);
            assert_eq!(body, &[0xDC, 0xD5, 0x04, b'r', b's', b's', b'i', 0xC0, 0x59, 0xDD]);
        }

        #[test]
        fn compressed_stream_decodes() {
            let mut stream = StreamEncoder::new(Vec::new(), Config::default()).unwrap();
            for i in 0..500 {
                stream.object_start().unwrap();
                stream.field("seq").unwrap();
                stream.int(i).unwrap();
                stream.field("mac").unwrap();
                stream.mac("AA:BB:CC:DD:EE:FF").unwrap();
                stream.object_end().unwrap();
            }
            let out = stream.finish().unwrap();
            assert_eq!(out[..2], TRANSFORM_PREFIX);

            let mut dec = Decoder::new(&out).unwrap();
            let mut count = 0;
            while let Some(v) = dec.decode_next().unwrap() {
                assert_eq!(v.get("seq").unwrap().as_int(), Some(count));
                assert_eq!(
                    v.get("mac").unwrap().as_str(),
                    Some("AA:BB:CC:DD:EE:FF")
                );
                count += 1;
            }
            assert_eq!(count, 500);
        }

        #[test]
        fn sink_error_aborts() {
            struct FailingSink;
            impl Write for FailingSink {
                fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                    Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "down"))
                }
                fn flush(&mut self) -> std::io::Result<()> {
                    Ok(())
                }
            }
            assert!(matches!(
                StreamEncoder::new(FailingSink, Config::default()),
                Err(Error::Sink(_))
            ));
        }
    }
}
