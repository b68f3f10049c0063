//! Frame layout: `magic(4) | version(1) | flags(1) | symbol_count(varint) |
//! body | crc32(4)`, optionally wrapped as `0xFE 0x03 | lz77(frame)`.

use std::borrow::Cow;

use crate::crc32::crc32;
use crate::error::{Error, Result};
use crate::varint::{read_varint, write_varint};
use crate::{lz77, MAGIC, MAX_FRAME_SIZE, VERSION};

/// Prefix marking an LZ77-wrapped frame. Not a token.
pub const TRANSFORM_PREFIX: [u8; 2] = [0xFE, 0x03];

/// Frame flag bits. Bits 3-7 are reserved and must be zero.
pub mod flags {
    /// At least one NEW_* token appears in the body.
    pub const HAS_DICT_UPDATE: u8 = 0x01;
    /// At least one RICE_COLUMN appears in the body.
    pub const USES_RICE: u8 = 0x02;
    /// Dictionaries were reset mid-stream.
    pub const DICT_RESET: u8 = 0x04;

    pub const RESERVED_MASK: u8 = 0xF8;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub symbol_count: u32,
}

/// Append `magic | version | flags | symbol_count` to `buf`.
pub fn write_header(buf: &mut Vec<u8>, flags: u8, symbol_count: u32) {
    buf.extend_from_slice(&MAGIC);
    buf.push(VERSION);
    buf.push(flags);
    write_varint(buf, symbol_count);
}

/// Build a complete frame around `body` and append the CRC trailer.
pub fn seal(flags: u8, symbol_count: u32, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 16);
    write_header(&mut frame, flags, symbol_count);
    frame.extend_from_slice(body);
    let crc = crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Apply the LZ77 wrap when it pays for itself. Tiny frames and frames that
/// fail the entropy pre-check ship unwrapped.
pub fn maybe_wrap(frame: Vec<u8>, entropy_check: bool) -> Vec<u8> {
    if frame.len() <= 20 {
        return frame;
    }
    if entropy_check && lz77::looks_incompressible(&frame) {
        return frame;
    }
    let compressed = lz77::compress(&frame);
    if compressed.len() + TRANSFORM_PREFIX.len() < frame.len() {
        let mut out = Vec::with_capacity(compressed.len() + 2);
        out.extend_from_slice(&TRANSFORM_PREFIX);
        out.extend_from_slice(&compressed);
        out
    } else {
        frame
    }
}

/// Undo the transform wrap if present. Plain frames borrow.
pub fn unwrap(data: &[u8]) -> Result<Cow<[u8]>> {
    if data.len() >= 2 && data[..2] == TRANSFORM_PREFIX {
        Ok(Cow::Owned(lz77::decompress(&data[2..], MAX_FRAME_SIZE)?))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

/// Parse and validate a plain (already unwrapped) frame, verifying the CRC
/// trailer. Returns the header and the body slice between header and CRC.
pub fn parse(data: &[u8]) -> Result<(FrameHeader, &[u8])> {
    // magic + version + flags + 1-byte symbol count + crc
    if data.len() < 11 {
        return Err(Error::Truncated {
            step: "read frame header",
            needed: 11,
            remaining: data.len(),
        });
    }
    if data[..4] != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = data[4];
    if version != VERSION {
        return Err(Error::BadVersion(version));
    }
    let frame_flags = data[5];
    if frame_flags & flags::RESERVED_MASK != 0 {
        return Err(Error::BadFlags(frame_flags));
    }

    let crc_start = data.len() - 4;
    let stored = u32::from_le_bytes([
        data[crc_start],
        data[crc_start + 1],
        data[crc_start + 2],
        data[crc_start + 3],
    ]);
    let actual = crc32(&data[..crc_start]);
    if stored != actual {
        return Err(Error::CrcMismatch {
            expected: stored,
            actual,
        });
    }

    let mut rest = &data[6..crc_start];
    let symbol_count = read_varint(&mut rest)?;
    Ok((
        FrameHeader {
            version,
            flags: frame_flags,
            symbol_count,
        },
        rest,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_parse() {
        let body = [0xD9u8, 0xD7, 0xD8];
        let frame = seal(flags::HAS_DICT_UPDATE, 3, &body);
        assert_eq!(&frame[..4], b"PKR1");
        assert_eq!(frame[4], VERSION);
        assert_eq!(frame[5], flags::HAS_DICT_UPDATE);

        let (header, parsed_body) = parse(&frame).unwrap();
        assert_eq!(header.symbol_count, 3);
        assert_eq!(header.flags, flags::HAS_DICT_UPDATE);
        assert_eq!(parsed_body, &body);
    }

    #[test]
    fn bad_magic() {
        let mut frame = seal(0, 0, &[0xD9]);
        frame[0] = b'X';
        assert!(matches!(parse(&frame), Err(Error::BadMagic)));
    }

    #[test]
    fn bad_version() {
        let body = [0xD9u8];
        let mut frame = Vec::new();
        frame.extend_from_slice(&MAGIC);
        frame.push(0x7F);
        frame.push(0);
        write_varint(&mut frame, 1);
        frame.extend_from_slice(&body);
        let crc = crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(parse(&frame), Err(Error::BadVersion(0x7F))));
    }

    #[test]
    fn reserved_flags_rejected() {
        let body = [0xD9u8];
        let mut frame = Vec::new();
        frame.extend_from_slice(&MAGIC);
        frame.push(VERSION);
        frame.push(0x10);
        write_varint(&mut frame, 1);
        frame.extend_from_slice(&body);
        let crc = crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(parse(&frame), Err(Error::BadFlags(0x10))));
    }

    #[test]
    fn bit_flips_fail_crc() {
        let body: Vec<u8> = (0..64).map(|i| (i * 7) as u8).collect();
        let frame = seal(0, 64, &body);
        for byte in 0..frame.len() - 4 {
            let mut corrupted = frame.clone();
            corrupted[byte] ^= 0x01;
            assert!(
                matches!(parse(&corrupted), Err(_)),
                "flip at byte {} went undetected",
                byte
            );
        }
    }

    #[test]
    fn wrap_roundtrip() {
        let body: Vec<u8> = b"\xDC\x00\xC0\x59\xDD".repeat(50);
        let frame = seal(flags::HAS_DICT_UPDATE, 250, &body);
        let wrapped = maybe_wrap(frame.clone(), false);
        assert_eq!(wrapped[..2], TRANSFORM_PREFIX);
        assert!(wrapped.len() < frame.len());

        let unwrapped = unwrap(&wrapped).unwrap();
        assert_eq!(unwrapped.as_ref(), &frame[..]);
        let (header, _) = parse(&unwrapped).unwrap();
        assert_eq!(header.symbol_count, 250);
    }

    #[test]
    fn tiny_frames_stay_unwrapped() {
        let frame = seal(0, 1, &[0xD9]);
        let out = maybe_wrap(frame.clone(), true);
        assert_eq!(out, frame);
    }

    #[test]
    fn plain_frames_pass_through_unwrap() {
        let frame = seal(0, 1, &[0xD9]);
        let out = unwrap(&frame).unwrap();
        assert_eq!(out.as_ref(), &frame[..]);
    }
}
