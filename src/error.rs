use std::fmt;

use thiserror::Error;

/// Which instrument limit a value fell past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSide {
    Low,
    High,
}

impl fmt::Display for RangeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeSide::Low => write!(f, "low"),
            RangeSide::High => write!(f, "high"),
        }
    }
}

/// A bad or inconsistent channel was addressed on an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("channel error: {0}")]
pub struct ChannelError(pub String);

impl ChannelError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        ChannelError(msg.into())
    }
}

/// A driven or measured value fell outside the limits of an instrument.
///
/// The side tells the caller whether to back off or push harder, so it
/// is part of the error rather than just the message.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("value {value} is out of range on the {side} side")]
pub struct RangeError {
    pub value: f64,
    pub side: RangeSide,
}

impl RangeError {
    pub fn too_low(value: f64) -> Self {
        RangeError {
            value,
            side: RangeSide::Low,
        }
    }

    pub fn too_high(value: f64) -> Self {
        RangeError {
            value,
            side: RangeSide::High,
        }
    }
}

/// Raised when code touches an instrument handle that only stands in for
/// the real thing, usually because the state was restored from a file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("this is a placeholder for a real {type_name}; live connections are not restored from saved state, reconnect the instrument first")]
pub struct HardwareUnavailable {
    pub type_name: String,
}
