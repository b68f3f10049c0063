use std::borrow::Cow;

use byteorder::{ByteOrder, LittleEndian};

use crate::bits::BitReader;
use crate::column::col_flags;
use crate::dict::DictSet;
use crate::encode::{format_mac, NumKind};
use crate::error::{Error, Result};
use crate::frame::{self, FrameHeader};
use crate::token::Token;
use crate::value::Value;
use crate::varint::{decode_fixed16, decode_fixed32, read_varint, zigzag_decode};
use crate::DICT_SIZE;

/// Upper bound on rows a single batch header may declare.
const MAX_BATCH_DECODE_ROWS: usize = 1 << 20;
/// Upper bound on columns a single batch header may declare.
const MAX_BATCH_DECODE_COLS: usize = 1 << 12;

/// Decodes one frame back into [`Value`]s.
///
/// Construction undoes the LZ77 wrap if present, validates the header, and
/// verifies the CRC trailer. Dictionaries and per-field delta state are
/// rebuilt incrementally from the token stream, mirroring the encoder.
pub struct Decoder<'a> {
    data: Cow<'a, [u8]>,
    pos: usize,
    end: usize,
    header: FrameHeader,
    dicts: DictSet,
    field_state: [Option<(f64, NumKind)>; DICT_SIZE],
    current_field: Option<u8>,
    peak: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let unwrapped = frame::unwrap(data)?;
        let (header, body) = frame::parse(&unwrapped)?;
        let end = unwrapped.len() - 4;
        let pos = end - body.len();
        let mut decoder = Self {
            data: unwrapped,
            pos,
            end,
            header,
            dicts: DictSet::new(),
            field_state: [None; DICT_SIZE],
            current_field: None,
            peak: 0,
        };
        decoder.peak = decoder.allocated_bytes();
        Ok(decoder)
    }

    pub fn header(&self) -> FrameHeader {
        self.header
    }

    /// Decode the next top-level value, or `None` at the end of the body.
    pub fn decode_next(&mut self) -> Result<Option<Value>> {
        if self.pos >= self.end {
            return Ok(None);
        }
        self.decode_value().map(Some)
    }

    /// Bytes held by the decoder: the frame (when owned after an LZ77
    /// unwrap) plus dictionary text.
    pub fn allocated_bytes(&self) -> usize {
        let data = match self.data {
            Cow::Owned(ref v) => v.capacity(),
            Cow::Borrowed(_) => 0,
        };
        data + self.dicts.bytes_held()
    }

    pub fn peak_allocated_bytes(&self) -> usize {
        self.peak.max(self.allocated_bytes())
    }

    fn note_alloc(&mut self) {
        let held = self.allocated_bytes();
        if held > self.peak {
            self.peak = held;
        }
    }

    fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn read_u8(&mut self, step: &'static str) -> Result<u8> {
        if self.pos >= self.end {
            return Err(Error::Truncated {
                step,
                needed: 1,
                remaining: 0,
            });
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, n: usize, step: &'static str) -> Result<Vec<u8>> {
        if self.remaining() < n {
            return Err(Error::Truncated {
                step,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(bytes)
    }

    fn read_varint(&mut self) -> Result<u32> {
        let mut slice = &self.data[self.pos..self.end];
        let before = slice.len();
        let value = read_varint(&mut slice)?;
        self.pos += before - slice.len();
        Ok(value)
    }

    fn read_signed_varint(&mut self) -> Result<i32> {
        Ok(zigzag_decode(self.read_varint()?))
    }

    fn peek(&self) -> Option<u8> {
        if self.pos < self.end {
            Some(self.data[self.pos])
        } else {
            None
        }
    }

    fn set_state(&mut self, value: f64, kind: NumKind) {
        if let Some(slot) = self.current_field {
            self.field_state[slot as usize] = Some((value, kind));
        }
    }

    /// Apply a delta to the active field's numeric context. Invalid before
    /// any absolute value has been seen for that field.
    fn apply_delta(&mut self, delta: i32) -> Result<Value> {
        let slot = self.current_field.ok_or(Error::DeltaWithoutBase)?;
        let (last, kind) = self.field_state[slot as usize].ok_or(Error::DeltaWithoutBase)?;
        match kind {
            NumKind::Int => {
                let value = last + delta as f64;
                self.field_state[slot as usize] = Some((value, NumKind::Int));
                Ok(Value::Int(value as i32))
            }
            NumKind::Fixed => {
                let value = last + delta as f64 / 65536.0;
                self.field_state[slot as usize] = Some((value, NumKind::Fixed));
                Ok(Value::Float(value))
            }
        }
    }

    fn decode_value(&mut self) -> Result<Value> {
        let byte = self.read_u8("read token")?;
        match Token::from_u8(byte) {
            Token::Null => Ok(Value::Null),
            Token::BoolTrue => Ok(Value::Bool(true)),
            Token::BoolFalse => Ok(Value::Bool(false)),
            Token::Int => {
                let value = self.read_signed_varint()?;
                self.set_state(value as f64, NumKind::Int);
                Ok(Value::Int(value))
            }
            Token::Float16 => {
                let raw = self.read_bytes(2, "read FLOAT16")?;
                let value = decode_fixed16([raw[0], raw[1]]);
                self.set_state(value, NumKind::Fixed);
                Ok(Value::Float(value))
            }
            Token::Float32 => {
                let raw = self.read_bytes(4, "read FLOAT32")?;
                let value = decode_fixed32([raw[0], raw[1], raw[2], raw[3]]);
                self.set_state(value, NumKind::Fixed);
                Ok(Value::Float(value))
            }
            Token::Double => {
                let raw = self.read_bytes(8, "read DOUBLE")?;
                let value = LittleEndian::read_f64(&raw);
                self.set_state(value, NumKind::Fixed);
                Ok(Value::Float(value))
            }
            Token::DeltaZero => self.apply_delta(0),
            Token::DeltaOne => self.apply_delta(1),
            Token::DeltaNegOne => self.apply_delta(-1),
            Token::DeltaSmall(delta) => self.apply_delta(delta as i32),
            Token::DeltaMedium => {
                let payload = self.read_u8("read DELTA_MEDIUM")?;
                self.apply_delta(payload as i32 - 64)
            }
            Token::DeltaLarge => {
                let delta = self.read_signed_varint()?;
                self.apply_delta(delta)
            }
            Token::NewString => self.read_new_string(),
            Token::StringRef(slot) => self.read_string_ref(slot),
            Token::NewMac => self.read_new_mac(),
            Token::MacRef(slot) => self.read_mac_ref(slot),
            Token::Binary => {
                let len = self.read_varint()? as usize;
                Ok(Value::Binary(self.read_bytes(len, "read BINARY")?))
            }
            Token::ArrayStart => {
                let count = self.read_varint()? as usize;
                let mut items = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    items.push(self.decode_value()?);
                }
                match self.read_u8("read ARRAY_END").map(Token::from_u8) {
                    Ok(Token::ArrayEnd) => Ok(Value::Array(items)),
                    _ => Err(Error::UnbalancedContainer("array missing end token")),
                }
            }
            Token::ArrayStream => {
                let mut items = Vec::new();
                loop {
                    match self.peek().map(Token::from_u8) {
                        None => {
                            return Err(Error::UnbalancedContainer(
                                "array stream not terminated",
                            ))
                        }
                        Some(Token::ArrayEnd) => {
                            self.pos += 1;
                            break;
                        }
                        Some(Token::BatchPartial) => {
                            self.pos += 1;
                            items.extend(self.decode_batch()?);
                        }
                        Some(_) => items.push(self.decode_value()?),
                    }
                }
                Ok(Value::Array(items))
            }
            Token::ObjectStart => {
                let saved = self.current_field;
                let mut entries = Vec::new();
                loop {
                    match self.peek().map(Token::from_u8) {
                        None => return Err(Error::UnbalancedContainer("object not terminated")),
                        Some(Token::ObjectEnd) => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => {
                            let (name, slot) = self.read_field_name()?;
                            self.current_field = Some(slot);
                            let value = self.decode_value()?;
                            entries.push((name, value));
                        }
                    }
                }
                self.current_field = saved;
                Ok(Value::Object(entries))
            }
            Token::UltraBatch => Ok(Value::Array(self.decode_batch()?)),
            Token::ArrayEnd | Token::ObjectEnd => {
                Err(Error::UnbalancedContainer("end token without container"))
            }
            Token::FieldRef(_)
            | Token::NewField
            | Token::RleRepeat
            | Token::BitpackCol
            | Token::RiceColumn
            | Token::MfvColumn
            | Token::BatchPartial
            | Token::Reserved(_) => Err(Error::BadToken(byte)),
        }
    }

    fn read_new_string(&mut self) -> Result<Value> {
        let len = self.read_varint()? as usize;
        let bytes = self.read_bytes(len, "read NEW_STRING")?;
        let text = String::from_utf8(bytes).map_err(|_| Error::BadToken(0xD4))?;
        self.dicts.strings.get_or_add(text.as_bytes());
        self.note_alloc();
        Ok(Value::String(text))
    }

    fn read_string_ref(&mut self, slot: u8) -> Result<Value> {
        let bytes = self
            .dicts
            .strings
            .get(slot)
            .ok_or(Error::DictOverflow {
                dict: "string",
                slot,
            })?
            .to_vec();
        let text = String::from_utf8(bytes).map_err(|_| Error::BadToken(0x40 | slot))?;
        Ok(Value::String(text))
    }

    fn read_new_mac(&mut self) -> Result<Value> {
        let raw = self.read_bytes(6, "read NEW_MAC")?;
        let mac = format_mac(&[raw[0], raw[1], raw[2], raw[3], raw[4], raw[5]]);
        self.dicts.macs.get_or_add(mac.as_bytes());
        self.note_alloc();
        Ok(Value::String(mac))
    }

    fn read_mac_ref(&mut self, slot: u8) -> Result<Value> {
        let bytes = self
            .dicts
            .macs
            .get(slot)
            .ok_or(Error::DictOverflow { dict: "mac", slot })?
            .to_vec();
        let text = String::from_utf8(bytes).map_err(|_| Error::BadToken(0x80 | slot))?;
        Ok(Value::String(text))
    }

    /// Field-name token inside an object or batch header. Inserting may
    /// evict; the freed slot's numeric state is cleared, matching the
    /// encoder's single eviction point. The caller decides whether the
    /// slot becomes the active delta context.
    fn read_field_name(&mut self) -> Result<(String, u8)> {
        let byte = self.read_u8("read field token")?;
        match Token::from_u8(byte) {
            Token::FieldRef(slot) => {
                let bytes = self
                    .dicts
                    .fields
                    .get(slot)
                    .ok_or(Error::DictOverflow {
                        dict: "field",
                        slot,
                    })?
                    .to_vec();
                let name = String::from_utf8(bytes).map_err(|_| Error::BadToken(slot))?;
                Ok((name, slot))
            }
            Token::NewField => {
                let len = self.read_varint()? as usize;
                let bytes = self.read_bytes(len, "read NEW_FIELD")?;
                let name = String::from_utf8(bytes).map_err(|_| Error::BadToken(0xD5))?;
                let up = self.dicts.fields.get_or_add(name.as_bytes());
                if up.is_new && up.evicted {
                    self.field_state[up.slot as usize] = None;
                }
                self.note_alloc();
                Ok((name, up.slot))
            }
            _ => Err(Error::BadToken(byte)),
        }
    }

    /// One scalar literal inside a column payload. Columns never touch the
    /// per-field delta contexts, so this reads absolutes only.
    fn read_column_scalar(&mut self) -> Result<Value> {
        let byte = self.read_u8("read column scalar")?;
        match Token::from_u8(byte) {
            Token::Null => Ok(Value::Null),
            Token::BoolTrue => Ok(Value::Bool(true)),
            Token::BoolFalse => Ok(Value::Bool(false)),
            Token::Int => Ok(Value::Int(self.read_signed_varint()?)),
            Token::Float16 => {
                let raw = self.read_bytes(2, "read column FLOAT16")?;
                Ok(Value::Float(decode_fixed16([raw[0], raw[1]])))
            }
            Token::Float32 => {
                let raw = self.read_bytes(4, "read column FLOAT32")?;
                Ok(Value::Float(decode_fixed32([raw[0], raw[1], raw[2], raw[3]])))
            }
            Token::Double => {
                let raw = self.read_bytes(8, "read column DOUBLE")?;
                Ok(Value::Float(LittleEndian::read_f64(&raw)))
            }
            Token::NewString => self.read_new_string(),
            Token::StringRef(slot) => self.read_string_ref(slot),
            Token::NewMac => self.read_new_mac(),
            Token::MacRef(slot) => self.read_mac_ref(slot),
            _ => Err(Error::BadToken(byte)),
        }
    }

    /// Decode an ULTRA_BATCH / BATCH_PARTIAL payload into row objects.
    /// Strategy dispatch is purely token-driven; the decoder never needs to
    /// know which heuristic the encoder used.
    fn decode_batch(&mut self) -> Result<Vec<Value>> {
        let rows = self.read_varint()? as usize;
        let cols = self.read_varint()? as usize;
        if rows > MAX_BATCH_DECODE_ROWS {
            return Err(Error::AllocationFailed {
                requested: rows,
                limit: MAX_BATCH_DECODE_ROWS,
            });
        }
        if cols > MAX_BATCH_DECODE_COLS {
            return Err(Error::AllocationFailed {
                requested: cols,
                limit: MAX_BATCH_DECODE_COLS,
            });
        }

        let mut headers = Vec::with_capacity(cols);
        for _ in 0..cols {
            let (name, _slot) = self.read_field_name()?;
            let flags = self.read_u8("read column flags")?;
            headers.push((name, flags));
        }

        let mut columns: Vec<(Vec<bool>, Vec<Value>)> = Vec::with_capacity(cols);
        for &(_, flags) in headers.iter() {
            let mut validity = vec![true; rows];
            if flags & col_flags::HAS_NULLS != 0 {
                let bitmap = self.read_bytes((rows + 7) / 8, "read validity bitmap")?;
                for (r, valid) in validity.iter_mut().enumerate() {
                    *valid = bitmap[r / 8] >> (r % 8) & 1 == 1;
                }
            }

            let cells = if flags & col_flags::CONSTANT != 0 {
                let value = self.read_column_scalar()?;
                vec![value; rows]
            } else if flags & col_flags::NUMERIC != 0 {
                self.read_numeric_column(rows)?
            } else if flags & col_flags::RLE != 0 {
                self.read_rle_column(rows)?
            } else {
                return Err(Error::BadToken(flags));
            };
            columns.push((validity, cells));
        }

        let mut out = Vec::with_capacity(rows);
        for r in 0..rows {
            let mut entries = Vec::new();
            for (c, (name, _)) in headers.iter().enumerate() {
                let (validity, cells) = &columns[c];
                if validity[r] {
                    entries.push((name.clone(), cells[r].clone()));
                }
            }
            out.push(Value::Object(entries));
        }
        Ok(out)
    }

    /// Mode-plus-exceptions column. The bitmap is LSB-first per byte with
    /// 1 marking an exception.
    fn read_mfv_column(&mut self, rows: usize) -> Result<Vec<Value>> {
        let count = self.read_varint()? as usize;
        let mode = self.read_column_scalar()?;
        let bitmap = self.read_bytes((count + 7) / 8, "read MFV bitmap")?;

        let mut cells = Vec::with_capacity(rows);
        for k in 0..count.min(rows) {
            if bitmap[k / 8] >> (k % 8) & 1 == 1 {
                cells.push(self.read_column_scalar()?);
            } else {
                cells.push(mode.clone());
            }
        }
        while cells.len() < rows {
            cells.push(mode.clone());
        }
        Ok(cells)
    }

    fn read_numeric_column(&mut self, rows: usize) -> Result<Vec<Value>> {
        if self.peek().map(Token::from_u8) == Some(Token::MfvColumn) {
            self.pos += 1;
            return self.read_mfv_column(rows);
        }

        // Absolute base value; its token fixes the delta scale for the
        // rest of the column.
        let byte = self.read_u8("read column base")?;
        let (mut prev, kind) = match Token::from_u8(byte) {
            Token::Int => (self.read_signed_varint()? as f64, NumKind::Int),
            Token::Float32 => {
                let raw = self.read_bytes(4, "read column base FLOAT32")?;
                (decode_fixed32([raw[0], raw[1], raw[2], raw[3]]), NumKind::Fixed)
            }
            Token::Double => {
                let raw = self.read_bytes(8, "read column base DOUBLE")?;
                (LittleEndian::read_f64(&raw), NumKind::Fixed)
            }
            _ => return Err(Error::BadToken(byte)),
        };

        let cell = |prev: f64| match kind {
            NumKind::Int => Value::Int(prev as i32),
            NumKind::Fixed => Value::Float(prev),
        };
        let step = |prev: f64, delta: i32| match kind {
            NumKind::Int => prev + delta as f64,
            NumKind::Fixed => prev + delta as f64 / 65536.0,
        };

        let mut cells = Vec::with_capacity(rows);
        cells.push(cell(prev));

        while cells.len() < rows {
            let byte = self.read_u8("read column delta")?;
            match Token::from_u8(byte) {
                Token::BitpackCol => {
                    let dcount = self.read_varint()? as usize;
                    let packed = self.read_bytes((dcount + 1) / 2, "read BITPACK_COL")?;
                    for k in 0..dcount {
                        if cells.len() >= rows {
                            break;
                        }
                        let nibble = if k % 2 == 0 {
                            packed[k / 2] >> 4
                        } else {
                            packed[k / 2] & 0x0F
                        };
                        prev = step(prev, nibble as i32 - 8);
                        cells.push(cell(prev));
                    }
                }
                Token::RiceColumn => {
                    let dcount = self.read_varint()? as usize;
                    let k = self.read_u8("read rice K")?;
                    let take = dcount.min(rows - cells.len());
                    let (deltas, consumed) = {
                        let mut reader = BitReader::new(&self.data[self.pos..self.end]);
                        let mut deltas = Vec::with_capacity(take);
                        for _ in 0..take {
                            let q = reader.read_unary()?;
                            let r = reader.read_bits(k)?;
                            deltas.push(zigzag_decode((q << k) | r));
                        }
                        // Skip unread tail values so the byte position
                        // still lands on the padded boundary.
                        for _ in take..dcount {
                            reader.read_unary()?;
                            reader.read_bits(k)?;
                        }
                        (deltas, reader.bytes_consumed())
                    };
                    self.pos += consumed;
                    for delta in deltas {
                        prev = step(prev, delta);
                        cells.push(cell(prev));
                    }
                }
                Token::RleRepeat => {
                    let run = self.read_varint()? as usize;
                    for _ in 0..run {
                        if cells.len() >= rows {
                            break;
                        }
                        cells.push(cell(prev));
                    }
                }
                Token::DeltaZero => {
                    prev = step(prev, 0);
                    cells.push(cell(prev));
                }
                Token::DeltaOne => {
                    prev = step(prev, 1);
                    cells.push(cell(prev));
                }
                Token::DeltaNegOne => {
                    prev = step(prev, -1);
                    cells.push(cell(prev));
                }
                Token::DeltaSmall(delta) => {
                    prev = step(prev, delta as i32);
                    cells.push(cell(prev));
                }
                Token::DeltaMedium => {
                    let payload = self.read_u8("read column DELTA_MEDIUM")?;
                    prev = step(prev, payload as i32 - 64);
                    cells.push(cell(prev));
                }
                Token::DeltaLarge => {
                    let delta = self.read_signed_varint()?;
                    prev = step(prev, delta);
                    cells.push(cell(prev));
                }
                _ => return Err(Error::BadToken(byte)),
            }
        }
        Ok(cells)
    }

    fn read_rle_column(&mut self, rows: usize) -> Result<Vec<Value>> {
        if self.peek().map(Token::from_u8) == Some(Token::MfvColumn) {
            self.pos += 1;
            return self.read_mfv_column(rows);
        }

        let mut cells: Vec<Value> = Vec::with_capacity(rows);
        while cells.len() < rows {
            let value = self.read_column_scalar()?;
            cells.push(value.clone());
            if self.peek().map(Token::from_u8) == Some(Token::RleRepeat) && cells.len() < rows {
                self.pos += 1;
                let run = self.read_varint()? as usize;
                for _ in 0..run {
                    if cells.len() >= rows {
                        break;
                    }
                    cells.push(value.clone());
                }
            }
        }
        Ok(cells)
    }
}
