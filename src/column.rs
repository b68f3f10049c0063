//! Columnar capture and encoding for arrays of homogeneous-shape objects.
//!
//! The analyzer turns such an array into per-key columns, picks a strategy
//! per column (constant, most-frequent-value, bit-packed deltas, Rice-coded
//! deltas, or an RLE/delta token stream), and emits an ULTRA_BATCH. The
//! choice is heuristic only: the decoder dispatches purely on the tokens it
//! finds, so the strategies here can be retuned without a format change.

use crate::bits::BitWriter;
use crate::encode::{is_mac_address, EncoderCore};
use crate::error::Result;
use crate::frame::flags as frame_flags;
use crate::token::Token;
use crate::value::Value;
use crate::varint::zigzag_encode;

/// Column flags byte.
pub mod col_flags {
    /// All present values equal; payload is one scalar literal.
    pub const CONSTANT: u8 = 0x01;
    /// Numeric column: absolute base value plus a delta stream.
    pub const NUMERIC: u8 = 0x02;
    /// String or bool column encoded by consecutive-equality RLE.
    pub const RLE: u8 = 0x04;
    /// A validity bitmap precedes the payload.
    pub const HAS_NULLS: u8 = 0x08;
}

/// Rows per BATCH_PARTIAL when a large array streams.
pub(crate) const MAX_BATCH_ROWS: usize = 128;

/// Columns below this many values skip the MFV attempt.
const MFV_MIN_VALUES: usize = 8;
/// Delta streams below this many values skip the Rice attempt.
const RICE_MIN_VALUES: usize = 10;

#[derive(Clone, Debug)]
enum Cells {
    Int(Vec<i32>),
    Float(Vec<f64>),
    Str(Vec<String>),
    Bool(Vec<bool>),
    AllNull,
}

#[derive(Clone, Debug)]
struct Column {
    name: String,
    validity: Vec<bool>,
    has_nulls: bool,
    cells: Cells,
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    None,
    Int,
    Float,
    Str,
    Bool,
}

/// Capture an array of objects into columns. `None` means the array is not
/// batchable: too few rows, non-object elements, nested containers, or
/// column types that do not unify under `int` ⊑ `float`.
fn build_columns(items: &[Value]) -> Option<Vec<Column>> {
    let rows = items.len();
    let mut names: Vec<&str> = Vec::new();
    for item in items {
        let entries = item.as_object()?;
        for (key, _) in entries {
            if !names.iter().any(|n| n == key) {
                names.push(key);
            }
        }
    }
    if names.is_empty() {
        return None;
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let mut kind = CellKind::None;
        let mut validity = vec![false; rows];
        let mut raw: Vec<Option<&Value>> = vec![None; rows];

        for (r, item) in items.iter().enumerate() {
            let cell = item.get(name);
            let cell = match cell {
                None | Some(Value::Null) => continue,
                Some(v) => v,
            };
            let cell_kind = match cell {
                Value::Int(_) => CellKind::Int,
                Value::Float(_) => CellKind::Float,
                Value::String(_) => CellKind::Str,
                Value::Bool(_) => CellKind::Bool,
                _ => return None,
            };
            kind = match (kind, cell_kind) {
                (CellKind::None, k) => k,
                (k, ck) if k == ck => k,
                (CellKind::Int, CellKind::Float) | (CellKind::Float, CellKind::Int) => {
                    CellKind::Float
                }
                _ => return None,
            };
            validity[r] = true;
            raw[r] = Some(cell);
        }

        let has_nulls = validity.iter().any(|&v| !v);
        let cells = match kind {
            CellKind::None => Cells::AllNull,
            CellKind::Int => {
                let first = raw.iter().flatten().next()?.as_int()?;
                let mut prev = first;
                let mut out = Vec::with_capacity(rows);
                for cell in &raw {
                    if let Some(v) = cell.and_then(Value::as_int) {
                        prev = v;
                    }
                    out.push(prev);
                }
                // The delta stream carries i32 steps; a column whose
                // neighbors span more than that cannot batch.
                for pair in out.windows(2) {
                    let delta = pair[1] as i64 - pair[0] as i64;
                    if i32::try_from(delta).is_err() {
                        return None;
                    }
                }
                Cells::Int(out)
            }
            CellKind::Float => {
                let first = raw.iter().flatten().next()?.as_f64()?;
                let mut prev = first;
                let mut out = Vec::with_capacity(rows);
                for cell in &raw {
                    if let Some(v) = cell.and_then(Value::as_f64) {
                        prev = v;
                    }
                    out.push(prev);
                }
                Cells::Float(out)
            }
            CellKind::Str => {
                let first = raw.iter().flatten().next()?.as_str()?;
                let mut out = Vec::with_capacity(rows);
                for cell in &raw {
                    match cell.and_then(Value::as_str) {
                        Some(v) => out.push(v.to_string()),
                        None => out.push(first.to_string()),
                    }
                }
                Cells::Str(out)
            }
            CellKind::Bool => {
                let first = raw.iter().flatten().next()?.as_bool()?;
                let mut out = Vec::with_capacity(rows);
                for cell in &raw {
                    out.push(cell.and_then(Value::as_bool).unwrap_or(first));
                }
                Cells::Bool(out)
            }
        };

        columns.push(Column {
            name: name.to_string(),
            validity,
            has_nulls,
            cells,
        });
    }
    Some(columns)
}

/// Encode an array of objects columnar if it qualifies. Returns `false`
/// when the caller should fall back to the plain recursive array path.
pub(crate) fn try_encode_batch(core: &mut EncoderCore, items: &[Value]) -> Result<bool> {
    if items.len() < core.batch_threshold.max(1) {
        return Ok(false);
    }
    let columns = match build_columns(items) {
        Some(columns) => columns,
        None => return Ok(false),
    };

    // Batch internals never touch the scalar delta contexts; restore the
    // active field around the whole emission.
    let saved_field = core.save_current_field();
    if items.len() <= MAX_BATCH_ROWS {
        core.token(Token::UltraBatch);
        emit_batch(core, items.len(), &columns);
    } else {
        core.array_stream();
        for chunk in items.chunks(MAX_BATCH_ROWS) {
            // A chunk can fail capture on its own (e.g. only empty
            // objects); its rows then go out as plain values, which the
            // stream decoder accepts alongside partial batches.
            match build_columns(chunk) {
                Some(columns) => {
                    core.token(Token::BatchPartial);
                    emit_batch(core, chunk.len(), &columns);
                }
                None => {
                    for item in chunk {
                        core.value(item)?;
                    }
                }
            }
        }
        core.array_end()?;
    }
    core.restore_current_field(saved_field);
    Ok(true)
}

fn emit_batch(core: &mut EncoderCore, rows: usize, columns: &[Column]) {
    core.varint(rows as u32);
    core.varint(columns.len() as u32);

    for col in columns {
        core.field(&col.name);
        core.raw(&[column_flags(col)]);
    }

    for col in columns {
        if col.has_nulls {
            let mut bitmap = vec![0u8; (rows + 7) / 8];
            for (r, &present) in col.validity.iter().enumerate() {
                if present {
                    bitmap[r / 8] |= 1 << (r % 8);
                }
            }
            core.raw(&bitmap);
        }
        emit_column_payload(core, col);
    }
}

fn column_flags(col: &Column) -> u8 {
    let mut flags = if is_constant(col) {
        col_flags::CONSTANT
    } else {
        match col.cells {
            Cells::Int(_) | Cells::Float(_) => col_flags::NUMERIC,
            Cells::Str(_) | Cells::Bool(_) => col_flags::RLE,
            Cells::AllNull => col_flags::CONSTANT,
        }
    };
    if col.has_nulls {
        flags |= col_flags::HAS_NULLS;
    }
    flags
}

/// All present values equal. Filler cells repeat a present value, so the
/// check can run over the filled vectors.
fn is_constant(col: &Column) -> bool {
    fn uniform<T: PartialEq>(cells: &[T], validity: &[bool]) -> bool {
        let mut first: Option<&T> = None;
        for (cell, &present) in cells.iter().zip(validity) {
            if !present {
                continue;
            }
            match first {
                None => first = Some(cell),
                Some(f) if f == cell => {}
                Some(_) => return false,
            }
        }
        true
    }
    match &col.cells {
        Cells::Int(v) => uniform(v, &col.validity),
        Cells::Float(v) => uniform(v, &col.validity),
        Cells::Str(v) => uniform(v, &col.validity),
        Cells::Bool(v) => uniform(v, &col.validity),
        Cells::AllNull => true,
    }
}

fn cell_string(core: &mut EncoderCore, s: &str) {
    if is_mac_address(s) {
        core.mac(s);
    } else {
        core.string(s);
    }
}

fn emit_column_payload(core: &mut EncoderCore, col: &Column) {
    if is_constant(col) {
        match &col.cells {
            Cells::AllNull => core.null(),
            Cells::Int(v) => core.literal_int(v[0]),
            Cells::Float(v) => {
                // Integral floats ship as the shorter INT literal.
                let first = v[0];
                if first.fract() == 0.0 && first >= i32::MIN as f64 && first <= i32::MAX as f64 {
                    core.literal_int(first as i32);
                } else {
                    core.literal_float(first);
                }
            }
            Cells::Str(v) => cell_string(core, &v[0]),
            Cells::Bool(v) => core.bool_value(v[0]),
        }
        return;
    }

    match &col.cells {
        Cells::Int(values) => {
            if !try_mfv_int(core, values) {
                emit_int_column(core, values);
            }
        }
        Cells::Float(values) => {
            if !try_mfv_float(core, values) {
                emit_float_column(core, values);
            }
        }
        Cells::Str(values) => {
            if !try_mfv_str(core, values) {
                emit_rle_column(core, values, |core, s: &String| cell_string(core, s));
            }
        }
        Cells::Bool(values) => {
            if !try_mfv_bool(core, values) {
                emit_rle_column(core, values, |core, b: &bool| core.bool_value(*b));
            }
        }
        Cells::AllNull => unreachable!("all-null columns are constant"),
    }
}

/// Consecutive-equality RLE: each value goes out once, a run of repeats
/// collapses to RLE_REPEAT with the extra-copy count.
fn emit_rle_column<T, F>(core: &mut EncoderCore, values: &[T], mut emit: F)
where
    T: PartialEq,
    F: FnMut(&mut EncoderCore, &T),
{
    let mut i = 0;
    while i < values.len() {
        let run = 1 + values[i + 1..]
            .iter()
            .take_while(|v| **v == values[i])
            .count();
        emit(core, &values[i]);
        if run > 1 {
            core.token(Token::RleRepeat);
            core.varint((run - 1) as u32);
        }
        i += run;
    }
}

/// Boyer-Moore majority candidate, verified to hold at least 60% of the
/// column. Returns the mode and its exception bitmap positions.
fn mfv_candidate<T: PartialEq + Clone>(values: &[T]) -> Option<T> {
    if values.len() < MFV_MIN_VALUES {
        return None;
    }
    let mut candidate = values[0].clone();
    let mut count = 1usize;
    for v in &values[1..] {
        if count == 0 {
            candidate = v.clone();
            count = 1;
        } else if *v == candidate {
            count += 1;
        } else {
            count -= 1;
        }
    }
    let occurrences = values.iter().filter(|v| **v == candidate).count();
    if occurrences * 10 >= values.len() * 6 {
        Some(candidate)
    } else {
        None
    }
}

fn emit_mfv<T, F>(core: &mut EncoderCore, values: &[T], mode: &T, mut emit: F)
where
    T: PartialEq,
    F: FnMut(&mut EncoderCore, &T),
{
    core.token(Token::MfvColumn);
    core.varint(values.len() as u32);
    emit(core, mode);

    // Exception bitmap: LSB-first within each byte, 1 marks an exception.
    let mut bitmap = vec![0u8; (values.len() + 7) / 8];
    for (i, v) in values.iter().enumerate() {
        if v != mode {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    core.raw(&bitmap);

    for v in values {
        if v != mode {
            emit(core, v);
        }
    }
}

fn try_mfv_int(core: &mut EncoderCore, values: &[i32]) -> bool {
    match mfv_candidate(values) {
        Some(mode) => {
            emit_mfv(core, values, &mode, |core, &v| core.literal_int(v));
            true
        }
        None => false,
    }
}

fn try_mfv_float(core: &mut EncoderCore, values: &[f64]) -> bool {
    match mfv_candidate(values) {
        Some(mode) => {
            emit_mfv(core, values, &mode, |core, &v| {
                core.literal_float(v);
            });
            true
        }
        None => false,
    }
}

fn try_mfv_str(core: &mut EncoderCore, values: &[String]) -> bool {
    match mfv_candidate(values) {
        Some(mode) => {
            emit_mfv(core, values, &mode, |core, v: &String| cell_string(core, v));
            true
        }
        None => false,
    }
}

fn try_mfv_bool(core: &mut EncoderCore, values: &[bool]) -> bool {
    match mfv_candidate(values) {
        Some(mode) => {
            emit_mfv(core, values, &mode, |core, &v| core.bool_value(v));
            true
        }
        None => false,
    }
}

fn emit_int_column(core: &mut EncoderCore, values: &[i32]) {
    core.literal_int(values[0]);
    if values.len() == 1 {
        return;
    }
    let deltas: Vec<i32> = values
        .windows(2)
        .map(|pair| (pair[1] as i64 - pair[0] as i64) as i32)
        .collect();
    emit_delta_stream(core, &deltas, values.len());
}

fn emit_float_column(core: &mut EncoderCore, values: &[f64]) {
    // Deltas are 1/65536 steps computed against the reconstructed series;
    // anything else would let rounding drift desynchronize the decoder.
    let mut prev = core.literal_float(values[0]);
    if values.len() == 1 {
        return;
    }
    let mut deltas = Vec::with_capacity(values.len() - 1);
    for &v in &values[1..] {
        let delta = ((v - prev) * 65536.0)
            .round()
            .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        deltas.push(delta);
        prev += delta as f64 / 65536.0;
    }
    emit_delta_stream(core, &deltas, values.len());
}

/// Shared strategy ladder for a numeric delta stream: bit-pack, then Rice,
/// then per-delta tokens with zero runs collapsed.
fn emit_delta_stream(core: &mut EncoderCore, deltas: &[i32], rows: usize) {
    let all_small = deltas.iter().all(|&d| (-8..=7).contains(&d));

    if all_small && !rle_beats_bitpack(deltas, rows) {
        core.token(Token::BitpackCol);
        core.varint(deltas.len() as u32);
        let mut packed = Vec::with_capacity((deltas.len() + 1) / 2);
        for pair in deltas.chunks(2) {
            let d1 = (pair[0] + 8) as u8;
            // Odd counts pad the low nibble with a zero delta.
            let d2 = if pair.len() > 1 { (pair[1] + 8) as u8 } else { 8 };
            packed.push((d1 << 4) | (d2 & 0x0F));
        }
        core.raw(&packed);
        return;
    }

    if try_rice(core, deltas) {
        return;
    }

    let mut i = 0;
    while i < deltas.len() {
        if deltas[i] == 0 {
            let mut run = 0;
            while i + run < deltas.len() && deltas[i + run] == 0 {
                run += 1;
            }
            if run > 3 {
                core.token(Token::RleRepeat);
                core.varint(run as u32);
                i += run;
                continue;
            }
        }
        core.delta(deltas[i]);
        i += 1;
    }
}

/// Cost estimate: a long zero run collapses to RLE_REPEAT + varint, other
/// deltas cost one byte each. Bit-packing costs about half a byte a value
/// plus header. Only columns that actually contain a long zero run may
/// override the bit-pack choice.
fn rle_beats_bitpack(deltas: &[i32], rows: usize) -> bool {
    let bitpack_cost = rows / 2 + 5;
    let mut rle_cost = 0usize;
    let mut has_long_run = false;
    let mut i = 0;
    while i < deltas.len() {
        if deltas[i] == 0 {
            let mut run = 0;
            while i + run < deltas.len() && deltas[i + run] == 0 {
                run += 1;
            }
            if run > 3 {
                has_long_run = true;
                rle_cost += 2 + if run > 127 { 1 } else { 0 };
                i += run;
                continue;
            }
        }
        rle_cost += 1;
        i += 1;
    }
    has_long_run && (rle_cost as f64) < bitpack_cost as f64 * 0.8
}

/// Rice coding: ZigZag each delta, emit the quotient in unary and K
/// remainder bits. Chosen only when the deltas are small-to-medium and the
/// bitstream lands under 1.5 bytes per value.
fn try_rice(core: &mut EncoderCore, deltas: &[i32]) -> bool {
    if deltas.len() < RICE_MIN_VALUES {
        return false;
    }
    let max_abs = deltas.iter().map(|&d| (d as i64).unsigned_abs()).max().unwrap_or(0);
    if max_abs >= 1024 {
        return false;
    }
    let bitlen = 64 - max_abs.leading_zeros() as i32;
    let k = (bitlen - 2).clamp(0, 7) as u8;

    let mut writer = BitWriter::new();
    for &d in deltas {
        let u = zigzag_encode(d);
        writer.write_unary(u >> k);
        writer.write_bits(u & ((1u32 << k) - 1), k);
    }
    let data = writer.finish();

    if (data.len() as f64) < deltas.len() as f64 * 1.5 {
        core.flags |= frame_flags::USES_RICE;
        core.token(Token::RiceColumn);
        core.varint(deltas.len() as u32);
        core.raw(&[k]);
        core.raw(&data);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    fn batch_body(items: &[Value]) -> Vec<u8> {
        let mut core = EncoderCore::new(4);
        assert!(try_encode_batch(&mut core, items).unwrap());
        core.body
    }

    #[test]
    fn small_arrays_fall_back() {
        let mut core = EncoderCore::new(4);
        let items = vec![obj(vec![("k", Value::Int(7))]); 3];
        assert!(!try_encode_batch(&mut core, &items).unwrap());
    }

    #[test]
    fn nested_containers_fall_back() {
        let mut core = EncoderCore::new(4);
        let items = vec![obj(vec![("k", Value::Array(vec![Value::Int(1)]))]); 5];
        assert!(!try_encode_batch(&mut core, &items).unwrap());
    }

    #[test]
    fn mixed_type_columns_fall_back() {
        let mut core = EncoderCore::new(4);
        let items = vec![
            obj(vec![("k", Value::Int(1))]),
            obj(vec![("k", Value::String("x".into()))]),
            obj(vec![("k", Value::Int(2))]),
            obj(vec![("k", Value::Int(3))]),
        ];
        assert!(!try_encode_batch(&mut core, &items).unwrap());
    }

    #[test]
    fn constant_column_layout() {
        // [{"k":7},{"k":7},{"k":7},{"k":7}]
        let items = vec![obj(vec![("k", Value::Int(7))]); 4];
        let body = batch_body(&items);

        // ULTRA_BATCH | rows=4 | cols=1 | NEW_FIELD "k" | flags 0x01 | INT 7
        let mut expected = vec![0xE9, 0x04, 0x01, 0xD5, 0x01, b'k', 0x01];
        expected.extend_from_slice(&[0xC0, 0x0E]);
        assert_eq!(body, expected);
    }

    #[test]
    fn bitpack_column_layout() {
        // [{"x":100},{"x":101},{"x":100},{"x":99}] -> deltas +1,-1,-1
        let items = vec![
            obj(vec![("x", Value::Int(100))]),
            obj(vec![("x", Value::Int(101))]),
            obj(vec![("x", Value::Int(100))]),
            obj(vec![("x", Value::Int(99))]),
        ];
        let body = batch_body(&items);

        let mut expected = vec![0xE9, 0x04, 0x01, 0xD5, 0x01, b'x', 0x02];
        // Base INT 100 (zigzag 200 = 0xC8 0x01), then BITPACK_COL count=3,
        // bytes (1+8)<<4|(-1+8) = 0x97 and (-1+8)<<4|(0+8) = 0x78.
        expected.extend_from_slice(&[0xC0, 0xC8, 0x01]);
        expected.extend_from_slice(&[0xEB, 0x03, 0x97, 0x78]);
        assert_eq!(body, expected);
    }

    #[test]
    fn rice_column_is_compact() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut items = Vec::new();
        let mut v = 0i32;
        items.push(obj(vec![("d", Value::Int(v))]));
        for _ in 0..100 {
            v += rng.gen_range(-200..=200);
            items.push(obj(vec![("d", Value::Int(v))]));
        }
        let body = batch_body(&items);
        // Rice column chosen for 100 medium deltas.
        let rice_pos = body.iter().position(|&b| b == 0xED).expect("RICE_COLUMN");
        // count varint (100 -> 1 byte), K byte, then the bitstream.
        let bitstream = &body[rice_pos + 3..];
        assert!(
            bitstream.len() < 150,
            "rice stream was {} bytes",
            bitstream.len()
        );
    }

    #[test]
    fn mfv_string_column_layout() {
        // 7x "ok", 3x "err" interleaved.
        let statuses = ["ok", "ok", "err", "ok", "ok", "err", "ok", "ok", "err", "ok"];
        let items: Vec<Value> = statuses
            .iter()
            .map(|s| obj(vec![("status", Value::String(s.to_string()))]))
            .collect();
        let body = batch_body(&items);

        let mfv_pos = body.iter().position(|&b| b == 0xEE).expect("MFV_COLUMN");
        let payload = &body[mfv_pos..];
        assert_eq!(payload[1], 10); // count
        // Mode "ok" as NEW_STRING.
        assert_eq!(&payload[2..6], &[0xD4, 0x02, b'o', b'k']);
        // Exception bitmap: bits 2, 5, 8 set, LSB-first -> 0x24, 0x01.
        assert_eq!(&payload[6..8], &[0x24, 0x01]);
        // First exception: NEW_STRING "err"; the remaining two are refs to
        // string slot 1.
        assert_eq!(&payload[8..13], &[0xD4, 0x03, b'e', b'r', b'r']);
        assert_eq!(&payload[13..15], &[0x41, 0x41]);
    }

    #[test]
    fn zero_runs_prefer_rle_over_bitpack() {
        // Eight flat values then a step: the zero-run estimate overrides
        // bit-packing, and with fewer than ten deltas Rice stays out, so
        // the fallback stream with RLE_REPEAT is emitted.
        let mut items = Vec::new();
        for i in 0..9 {
            let v = if i < 8 { 5 } else { 6 };
            items.push(obj(vec![("v", Value::Int(v))]));
        }
        let body = batch_body(&items);
        let rle = body.iter().position(|&b| b == 0xE5).expect("RLE_REPEAT");
        assert_eq!(body[rle + 1], 7); // seven zero deltas collapsed
        assert_eq!(body[rle + 2], 0xE7); // then the +1 step
        assert!(!body.contains(&0xEB), "bitpack should not be chosen");
        assert!(!body.contains(&0xED), "rice needs ten deltas");
    }

    #[test]
    fn string_rle_collapses_runs() {
        let mut items = Vec::new();
        for _ in 0..3 {
            items.push(obj(vec![("s", Value::String("aaa".into()))]));
        }
        for _ in 0..4 {
            items.push(obj(vec![("s", Value::String("bbb".into()))]));
        }
        let body = batch_body(&items);
        // "aaa" once + RLE_REPEAT 2, then "bbb" once + RLE_REPEAT 3.
        let first_rle = body.iter().position(|&b| b == 0xE5).unwrap();
        assert_eq!(body[first_rle + 1], 2);
        let second_rle = body[first_rle + 2..]
            .iter()
            .position(|&b| b == 0xE5)
            .unwrap()
            + first_rle
            + 2;
        assert_eq!(body[second_rle + 1], 3);
    }

    #[test]
    fn null_columns_carry_validity_bitmaps() {
        let items = vec![
            obj(vec![("a", Value::Int(1)), ("b", Value::Int(10))]),
            obj(vec![("a", Value::Int(2))]),
            obj(vec![("a", Value::Int(3)), ("b", Value::Int(10))]),
            obj(vec![("a", Value::Int(4)), ("b", Value::Null)]),
        ];
        let mut core = EncoderCore::new(4);
        assert!(try_encode_batch(&mut core, &items).unwrap());
        // Column b: flags CONSTANT | HAS_NULLS (present values both 10),
        // validity bitmap 0b0101 = 0x05.
        let body = core.body;
        let b_field = body.windows(2).position(|w| w == [0x01, b'b']).unwrap();
        assert_eq!(body[b_field + 2], col_flags::CONSTANT | col_flags::HAS_NULLS);
        assert!(body.contains(&0x05));
    }

    #[test]
    fn large_arrays_stream_in_chunks() {
        let items: Vec<Value> = (0..300)
            .map(|i| obj(vec![("n", Value::Int(i))]))
            .collect();
        let mut core = EncoderCore::new(4);
        assert!(try_encode_batch(&mut core, &items).unwrap());
        let body = core.body;
        assert_eq!(body[0], 0xEF); // ARRAY_STREAM
        let partials = body.iter().filter(|&&b| b == 0xF0).count();
        assert!(partials >= 3, "300 rows should chunk into 3 partials");
        assert_eq!(*body.last().unwrap(), 0xDB); // ARRAY_END
    }

    #[test]
    fn bitpack_payload_length_is_exact() {
        // ceil(count / 2) packed bytes after the count varint.
        for rows in [5usize, 6, 9] {
            let items: Vec<Value> = (0..rows as i32)
                .map(|i| obj(vec![("v", Value::Int(i * 2))]))
                .collect();
            let body = batch_body(&items);
            let pos = body.iter().position(|&b| b == 0xEB).expect("BITPACK_COL");
            let count = body[pos + 1] as usize;
            assert_eq!(count, rows - 1);
            assert_eq!(body.len() - (pos + 2), (count + 1) / 2);
        }
    }
}
