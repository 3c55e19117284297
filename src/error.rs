use std::fmt;

/// Errors surfaced by the NSF playback engine.
///
/// Every variant maps onto one of the failure modes named in the engine's
/// design: header parsing, bank-cache I/O, or playback-controller
/// preconditions. None of these are recovered internally — the caller must
/// discard the [`crate::Engine`] (or never construct one) on error.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument was out of range (e.g. a bank register
    /// index outside `0..8`).
    InvalidArg(&'static str),
    /// The first five bytes of the file were not `4E 45 53 4D 1A`.
    BadMagic,
    /// Fewer than 128 bytes were available for the header.
    ShortHeader { actual: usize },
    /// `load_address` was below `0x8000`.
    BadLoadAddress { load_address: u16 },
    /// Wrapper for I/O errors raised while opening/seeking/reading the file.
    Io(std::io::Error),
    /// A second engine was opened while one was already active.
    AlreadyOpen,
    /// `playback_frame` was called with the CPU outside the shim idle loop.
    InvalidState { expected_pc: u16, actual_pc: u16 },
    /// A §3 data-model invariant was violated; this indicates a bug in the
    /// engine itself and is fatal to the instance that hit it.
    InternalError(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArg(what) => write!(f, "invalid argument: {what}"),
            Self::BadMagic => write!(f, "missing NSF magic bytes (expected 4E 45 53 4D 1A)"),
            Self::ShortHeader { actual } => {
                write!(f, "header expected 128 bytes, got {actual}")
            }
            Self::BadLoadAddress { load_address } => {
                write!(f, "load address {load_address:#06x} is below $8000")
            }
            Self::Io(err) => write!(f, "i/o error: {err}"),
            Self::AlreadyOpen => write!(f, "an engine is already open"),
            Self::InvalidState {
                expected_pc,
                actual_pc,
            } => write!(
                f,
                "expected PC at {expected_pc:#06x}, found {actual_pc:#06x}"
            ),
            Self::InternalError(what) => write!(f, "internal invariant violated: {what}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
