//! Library error types.

use std::fmt;
use std::io;

/// A PACKR Result, normally returning a PACKR [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A PACKR error. Covers anything that can go wrong while encoding or
/// decoding a frame; there is no in-band recovery.
#[derive(Debug)]
pub enum Error {
    /// Frame did not start with the "PKR1" magic bytes.
    BadMagic,
    /// Frame used an unsupported format version.
    BadVersion(u8),
    /// Frame flags had reserved bits set.
    BadFlags(u8),
    /// The stream ended before a complete item could be read.
    Truncated {
        /// What was being decoded when the stream ran out.
        step: &'static str,
        /// How many bytes the step needed.
        needed: usize,
        /// How many bytes were actually left.
        remaining: usize,
    },
    /// A byte with no assigned token meaning, or a token that is invalid in
    /// its position.
    BadToken(u8),
    /// A reference token named a dictionary slot with no prior NEW_* event.
    DictOverflow {
        /// Which dictionary: "field", "string" or "mac".
        dict: &'static str,
        slot: u8,
    },
    /// A delta token arrived with no numeric base value for the active field.
    DeltaWithoutBase,
    /// The CRC-32 trailer did not match the framed bytes.
    CrcMismatch { expected: u32, actual: u32 },
    /// An LZ77 match referenced bytes before the start of the output.
    Lz77BadOffset { offset: usize, position: usize },
    /// An LZ77 payload was malformed or produced more output than its header
    /// declared.
    Lz77Overflow,
    /// A fixed-capacity output buffer was too small for the frame.
    OutputTooSmall { needed: usize, capacity: usize },
    /// OBJECT/ARRAY start and end tokens did not balance.
    UnbalancedContainer(&'static str),
    /// A declared length would exceed the working-memory ceiling.
    AllocationFailed { requested: usize, limit: usize },
    /// The streaming sink reported a write failure; the stream is aborted.
    Sink(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::BadMagic => write!(f, "Data does not start with PKR1 magic"),
            Error::BadVersion(v) => write!(f, "Unsupported format version {}", v),
            Error::BadFlags(v) => write!(f, "Frame flags 0x{:02X} have reserved bits set", v),
            Error::Truncated {
                step,
                needed,
                remaining,
            } => write!(
                f,
                "Needed {} bytes but only {} remain on step [{}]",
                needed, remaining, step
            ),
            Error::BadToken(t) => write!(f, "Invalid token byte 0x{:02X}", t),
            Error::DictOverflow { dict, slot } => {
                write!(f, "Reference to empty {} dictionary slot {}", dict, slot)
            }
            Error::DeltaWithoutBase => {
                write!(f, "Delta token without a numeric base for the active field")
            }
            Error::CrcMismatch { expected, actual } => write!(
                f,
                "CRC mismatch: frame carries {:08X}, computed {:08X}",
                expected, actual
            ),
            Error::Lz77BadOffset { offset, position } => write!(
                f,
                "LZ77 offset {} reaches before output start at position {}",
                offset, position
            ),
            Error::Lz77Overflow => write!(f, "LZ77 payload is malformed"),
            Error::OutputTooSmall { needed, capacity } => write!(
                f,
                "Output buffer too small: need {} bytes, have {}",
                needed, capacity
            ),
            Error::UnbalancedContainer(what) => {
                write!(f, "Unbalanced container: {}", what)
            }
            Error::AllocationFailed { requested, limit } => write!(
                f,
                "Refusing to allocate {} bytes (limit {})",
                requested, limit
            ),
            Error::Sink(ref err) => write!(f, "Sink write failed: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Sink(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Sink(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_context() {
        let err = Error::Truncated {
            step: "decode varint",
            needed: 1,
            remaining: 0,
        };
        assert!(err.to_string().contains("decode varint"));

        let err = Error::DictOverflow {
            dict: "string",
            slot: 12,
        };
        assert!(err.to_string().contains("string"));
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn sink_errors_chain() {
        use std::error::Error as _;
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(err.source().is_some());
    }
}
