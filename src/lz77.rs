//! LZ77 post-transform over the token stream.
//!
//! Block format: `format(1) | orig_len(4 LE) | payload`. Format `0x00` is a
//! stored block, `0x02` is LZ77. Each sequence starts with a control byte
//! `(lit_nib << 4) | match_nib`; nibble 15 extends through a chain of bytes
//! terminated by a value below 255. Literals copy verbatim, then a match of
//! `match_nib + 3` (or more) bytes at a 2-byte little-endian back-offset.
//! An offset of zero marks a literals-only sequence emitted when the
//! streaming window slides; the match copy is skipped.

use std::io::Write;

use crate::error::{Error, Result};

pub const FORMAT_STORED: u8 = 0x00;
pub const FORMAT_LZ77: u8 = 0x02;

/// `orig_len` value meaning "unknown; decode until the input ends". Used by
/// the streaming encoder, which writes its header before the length is known.
pub const LEN_UNKNOWN: u32 = 0xFFFF_FFFF;

const WINDOW_SIZE: usize = 8192;
const HASH_SIZE: usize = 4096;
const MAX_MATCH: usize = 258;
const MIN_MATCH: usize = 3;
const CHAIN_LIMIT: usize = 32;

const STREAM_WINDOW: usize = 4096;
const STREAM_BUFFER: usize = STREAM_WINDOW * 2;
/// Lookahead held back until more input (or the final flush) arrives.
const STREAM_MARGIN: usize = MAX_MATCH + 4;

const EMPTY: u32 = u32::MAX;

fn hash4(data: &[u8], pos: usize) -> usize {
    let v = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
    ((v.wrapping_mul(0x1E35_A7BD)) >> 16) as usize & (HASH_SIZE - 1)
}

fn push_len_extension(out: &mut Vec<u8>, mut remaining: usize) {
    while remaining >= 255 {
        out.push(255);
        remaining -= 255;
    }
    out.push(remaining as u8);
}

/// One control sequence: literals plus a match. `match_len_code` is the
/// match length minus 3; `offset` of zero writes a literals-only sequence.
fn push_sequence(out: &mut Vec<u8>, literals: &[u8], match_len_code: usize, offset: usize) {
    let lit_nib = literals.len().min(15);
    let match_nib = match_len_code.min(15);
    out.push(((lit_nib << 4) | match_nib) as u8);
    if lit_nib == 15 {
        push_len_extension(out, literals.len() - 15);
    }
    out.extend_from_slice(literals);
    if match_nib == 15 {
        push_len_extension(out, match_len_code - 15);
    }
    out.push(offset as u8);
    out.push((offset >> 8) as u8);
}

/// Trailing literals with no match; the stream simply ends after them.
fn push_final_literals(out: &mut Vec<u8>, literals: &[u8]) {
    if literals.is_empty() {
        return;
    }
    let lit_nib = literals.len().min(15);
    out.push((lit_nib << 4) as u8);
    if lit_nib == 15 {
        push_len_extension(out, literals.len() - 15);
    }
    out.extend_from_slice(literals);
}

fn stored_block(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + 5);
    out.push(FORMAT_STORED);
    out.extend_from_slice(&(input.len() as u32).to_le_bytes());
    out.extend_from_slice(input);
    out
}

/// Scan-only entropy pre-check: if more than 80% of the bytes in the first
/// 1 KiB are distinct, LZ77 is very unlikely to help.
pub fn looks_incompressible(data: &[u8]) -> bool {
    let sample = &data[..data.len().min(1024)];
    if sample.is_empty() {
        return false;
    }
    let mut seen = [false; 256];
    let mut unique = 0usize;
    for &b in sample {
        if !seen[b as usize] {
            seen[b as usize] = true;
            unique += 1;
        }
    }
    unique * 5 > sample.len() * 4
}

/// Compress a complete buffer into one LZ77 block. Falls back to a stored
/// block whenever compression would not shrink the input.
pub fn compress(input: &[u8]) -> Vec<u8> {
    if input.len() < 4 {
        return stored_block(input);
    }

    let mut out = Vec::with_capacity(input.len() / 2 + 16);
    out.push(FORMAT_LZ77);
    out.extend_from_slice(&(input.len() as u32).to_le_bytes());

    let mut head = vec![EMPTY; HASH_SIZE];
    let mut prev = vec![EMPTY; WINDOW_SIZE];

    let len = input.len();
    let mut ip = 0usize;
    let mut anchor = 0usize;

    while ip < len {
        let mut best_len = 0usize;
        let mut best_off = 0usize;

        if ip + 4 <= len {
            let h = hash4(input, ip);
            let mut cand = head[h];
            prev[ip & (WINDOW_SIZE - 1)] = cand;
            head[h] = ip as u32;

            let mut chain = CHAIN_LIMIT;
            while cand != EMPTY && chain > 0 {
                chain -= 1;
                let cand_pos = cand as usize;
                if cand_pos >= ip {
                    break;
                }
                let dist = ip - cand_pos;
                if dist > WINDOW_SIZE {
                    break;
                }
                let limit = MAX_MATCH.min(len - ip);
                let mut l = 0usize;
                while l < limit && input[cand_pos + l] == input[ip + l] {
                    l += 1;
                }
                if l >= MIN_MATCH && l > best_len {
                    best_len = l;
                    best_off = dist;
                    if l >= 32 {
                        break;
                    }
                }
                let next = prev[cand_pos & (WINDOW_SIZE - 1)];
                if next >= cand {
                    break;
                }
                cand = next;
            }
        }

        let min_match = if ip > anchor { 3 } else { 4 };
        if best_len >= min_match {
            push_sequence(&mut out, &input[anchor..ip], best_len - 3, best_off);

            // Hash fill: index every position inside the match so later
            // matches can land strictly inside this one.
            for j in 1..best_len {
                let p = ip + j;
                if p + 4 <= len {
                    let h = hash4(input, p);
                    prev[p & (WINDOW_SIZE - 1)] = head[h];
                    head[h] = p as u32;
                }
            }
            ip += best_len;
            anchor = ip;
        } else {
            ip += 1;
        }
    }

    push_final_literals(&mut out, &input[anchor..]);

    if out.len() >= input.len() {
        return stored_block(input);
    }
    out
}

/// Decompress one block. `max_out` bounds the output allocation; a block
/// whose declared length exceeds it is rejected before any copying.
pub fn decompress(input: &[u8], max_out: usize) -> Result<Vec<u8>> {
    if input.len() < 5 {
        return Err(Error::Truncated {
            step: "read block header",
            needed: 5,
            remaining: input.len(),
        });
    }
    let format = input[0];
    let orig_len = u32::from_le_bytes([input[1], input[2], input[3], input[4]]);

    if format == FORMAT_STORED {
        let payload = &input[5..];
        let orig_len = orig_len as usize;
        if payload.len() < orig_len {
            return Err(Error::Truncated {
                step: "read stored block",
                needed: orig_len,
                remaining: payload.len(),
            });
        }
        if orig_len > max_out {
            return Err(Error::AllocationFailed {
                requested: orig_len,
                limit: max_out,
            });
        }
        return Ok(payload[..orig_len].to_vec());
    }
    if format != FORMAT_LZ77 {
        return Err(Error::BadToken(format));
    }

    // LEN_UNKNOWN comes from the streaming encoder: decode until the input
    // runs out, bounded only by max_out.
    let bound = if orig_len == LEN_UNKNOWN {
        None
    } else {
        let n = orig_len as usize;
        if n > max_out {
            return Err(Error::AllocationFailed {
                requested: n,
                limit: max_out,
            });
        }
        Some(n)
    };

    let data = &input[5..];
    let mut out: Vec<u8> = Vec::with_capacity(bound.unwrap_or(0).min(1 << 16).max(64));
    let mut ip = 0usize;

    while ip < data.len() && bound.map_or(true, |b| out.len() < b) {
        let ctrl = data[ip];
        ip += 1;

        let mut lit_len = (ctrl >> 4) as usize;
        let match_code = (ctrl & 0x0F) as usize;

        if lit_len == 15 {
            loop {
                let ext = *data.get(ip).ok_or(Error::Lz77Overflow)?;
                ip += 1;
                lit_len += ext as usize;
                if ext < 255 {
                    break;
                }
            }
        }

        if ip + lit_len > data.len() {
            return Err(Error::Lz77Overflow);
        }
        if out.len() + lit_len > max_out {
            return Err(Error::AllocationFailed {
                requested: out.len() + lit_len,
                limit: max_out,
            });
        }
        if let Some(b) = bound {
            if out.len() + lit_len > b {
                return Err(Error::Lz77Overflow);
            }
        }
        out.extend_from_slice(&data[ip..ip + lit_len]);
        ip += lit_len;

        // The final sequence carries no match.
        if ip >= data.len() || bound.map_or(false, |b| out.len() >= b) {
            break;
        }

        let mut match_len = match_code + 3;
        if match_code == 15 {
            loop {
                let ext = *data.get(ip).ok_or(Error::Lz77Overflow)?;
                ip += 1;
                match_len += ext as usize;
                if ext < 255 {
                    break;
                }
            }
        }

        if ip + 2 > data.len() {
            return Err(Error::Truncated {
                step: "read match offset",
                needed: 2,
                remaining: data.len() - ip,
            });
        }
        let offset = data[ip] as usize | ((data[ip + 1] as usize) << 8);
        ip += 2;

        if offset == 0 {
            // Literals-only flush from a window slide; no copy.
            continue;
        }
        if offset > out.len() {
            return Err(Error::Lz77BadOffset {
                offset,
                position: out.len(),
            });
        }
        if out.len() + match_len > max_out {
            return Err(Error::AllocationFailed {
                requested: out.len() + match_len,
                limit: max_out,
            });
        }
        if let Some(b) = bound {
            if out.len() + match_len > b {
                return Err(Error::Lz77Overflow);
            }
        }
        // Copies may overlap their own output.
        let start = out.len() - offset;
        for i in 0..match_len {
            let byte = out[start + i];
            out.push(byte);
        }
    }

    if let Some(b) = bound {
        if out.len() != b {
            return Err(Error::Lz77Overflow);
        }
    }
    Ok(out)
}

/// Streaming LZ77 compressor with a 4 KiB back-reference window.
///
/// Input accumulates in an 8 KiB buffer; when it fills, the top half is
/// copied down, positions shift, and hash entries that fell out of the
/// window are cleared. Pending literals are flushed as a literals-only
/// sequence (offset 0) before each slide so sequences never straddle it.
#[derive(Clone)]
pub struct Lz77Stream {
    buf: Vec<u8>,
    head: Vec<u32>,
    prev: Vec<u32>,
    process_pos: usize,
    anchor: usize,
}

impl Lz77Stream {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(STREAM_BUFFER),
            head: vec![EMPTY; HASH_SIZE],
            prev: vec![EMPTY; STREAM_BUFFER],
            process_pos: 0,
            anchor: 0,
        }
    }

    /// Feed a chunk, writing any completed sequences to `sink`. With
    /// `flush`, all pending input is encoded and trailing literals are
    /// written out; the stream must not be fed afterwards.
    pub fn compress<W: Write>(&mut self, mut input: &[u8], sink: &mut W, flush: bool) -> Result<()> {
        while !input.is_empty() {
            let space = STREAM_BUFFER - self.buf.len();
            let take = space.min(input.len());
            self.buf.extend_from_slice(&input[..take]);
            input = &input[take..];

            self.process(sink, false)?;
            if self.buf.len() == STREAM_BUFFER && !input.is_empty() {
                self.slide(sink)?;
            }
        }
        if flush {
            self.process(sink, true)?;
            let mut out = Vec::new();
            push_final_literals(&mut out, &self.buf[self.anchor..]);
            self.anchor = self.buf.len();
            sink.write_all(&out)?;
        }
        Ok(())
    }

    /// Approximate working-set size of the window and hash tables.
    pub fn allocated_bytes(&self) -> usize {
        self.buf.capacity() + self.head.len() * 4 + self.prev.len() * 4
    }

    fn process<W: Write>(&mut self, sink: &mut W, end: bool) -> Result<()> {
        let len = self.buf.len();
        let limit = if end {
            len
        } else {
            len.saturating_sub(STREAM_MARGIN)
        };
        let mut out = Vec::new();

        while self.process_pos < limit {
            let ip = self.process_pos;
            let mut best_len = 0usize;
            let mut best_off = 0usize;

            if ip + 4 <= len {
                let h = hash4(&self.buf, ip);
                let mut cand = self.head[h];
                self.prev[ip & (STREAM_BUFFER - 1)] = cand;
                self.head[h] = ip as u32;

                let mut chain = CHAIN_LIMIT;
                while cand != EMPTY && chain > 0 {
                    chain -= 1;
                    let cand_pos = cand as usize;
                    if cand_pos >= ip {
                        break;
                    }
                    let dist = ip - cand_pos;
                    if dist > STREAM_WINDOW {
                        break;
                    }
                    let match_limit = MAX_MATCH.min(len - ip);
                    let mut l = 0usize;
                    while l < match_limit && self.buf[cand_pos + l] == self.buf[ip + l] {
                        l += 1;
                    }
                    if l >= MIN_MATCH && l > best_len {
                        best_len = l;
                        best_off = dist;
                        if l >= 32 {
                            break;
                        }
                    }
                    let next = self.prev[cand_pos & (STREAM_BUFFER - 1)];
                    if next >= cand {
                        break;
                    }
                    cand = next;
                }
            }

            let min_match = if ip > self.anchor { 3 } else { 4 };
            if best_len >= min_match {
                push_sequence(&mut out, &self.buf[self.anchor..ip], best_len - 3, best_off);
                for j in 1..best_len {
                    let p = ip + j;
                    if p + 4 <= len {
                        let h = hash4(&self.buf, p);
                        self.prev[p & (STREAM_BUFFER - 1)] = self.head[h];
                        self.head[h] = p as u32;
                    }
                }
                self.process_pos += best_len;
                self.anchor = self.process_pos;
            } else {
                self.process_pos += 1;
            }
        }

        if !out.is_empty() {
            sink.write_all(&out)?;
        }
        Ok(())
    }

    /// Drop the bottom half of the buffer. Pending literals go out first so
    /// their bytes are not lost with the slid-away window.
    fn slide<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        if self.anchor < self.process_pos {
            let mut out = Vec::new();
            push_sequence(&mut out, &self.buf[self.anchor..self.process_pos], 0, 0);
            sink.write_all(&out)?;
            self.anchor = self.process_pos;
        }

        self.buf.drain(..STREAM_WINDOW);
        self.process_pos -= STREAM_WINDOW;
        self.anchor -= STREAM_WINDOW;

        for h in self.head.iter_mut() {
            *h = match *h {
                EMPTY => EMPTY,
                p if (p as usize) < STREAM_WINDOW => EMPTY,
                p => p - STREAM_WINDOW as u32,
            };
        }
        let mut new_prev = vec![EMPTY; STREAM_BUFFER];
        for p in STREAM_WINDOW..STREAM_BUFFER {
            let v = self.prev[p];
            new_prev[p - STREAM_WINDOW] = match v {
                EMPTY => EMPTY,
                v if (v as usize) < STREAM_WINDOW => EMPTY,
                v => v - STREAM_WINDOW as u32,
            };
        }
        self.prev = new_prev;
        Ok(())
    }
}

impl Default for Lz77Stream {
    fn default() -> Self {
        Self::new()
    }
}
