//! Error types for the control surface and the two data paths.
//!
//! Reservation failure is not an error: overflow is a normal condition
//! reported in-band through drop records. The enums here cover control
//! operations, caller bugs on the push path, and consumer-fatal ring
//! corruption.

use std::io;

/// Errors surfaced by the control surface.
///
/// A missing notification channel is not a control error: none of the
/// control operations require one, so "not bound" surfaces only on the
/// consumer drain path as [`ConsumerError::NotBound`].
#[derive(Debug)]
pub enum ControlError {
    /// Bad watermarks, tail advance out of range, or invalid config.
    InvalidArgument(&'static str),
    /// A required resource could not be created or acquired.
    ResourceUnavailable(&'static str),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::ResourceUnavailable(msg) => write!(f, "resource unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<ControlError> for io::Error {
    fn from(e: ControlError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, e)
    }
}

/// Errors from the producer push path.
///
/// Overflow is signalled through [`PushOutcome::Dropped`], not here; the
/// only push error is a record that could never fit.
///
/// [`PushOutcome::Dropped`]: crate::PushOutcome::Dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The record exceeds the largest size the ring can ever hold
    /// (data size minus the drop-record headroom).
    PayloadTooLarge { len: usize, max: usize },
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload too large for ring: {} bytes, max {}", len, max)
            }
        }
    }
}

impl std::error::Error for PushError {}

/// Errors from the consumer drain path.
#[derive(Debug)]
pub enum ConsumerError {
    /// A decoded header describes a record that cannot exist. The ring is
    /// corrupt; the consumer must stop rather than guess.
    Corrupt { tail: u64, rec_type: u16, len: u32 },
    /// `next()` was called without a doorbell attached.
    NotBound,
    /// Waiting on the doorbell failed (e.g. the channel was closed).
    Notify(io::Error),
}

impl std::fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Corrupt { tail, rec_type, len } => write!(
                f,
                "corrupt record at tail {}: type=0x{:x} len={}",
                tail, rec_type, len
            ),
            Self::NotBound => write!(f, "no doorbell attached"),
            Self::Notify(e) => write!(f, "doorbell wait failed: {}", e),
        }
    }
}

impl std::error::Error for ConsumerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Notify(e) => Some(e),
            _ => None,
        }
    }
}
