//! Terminal call status.

use std::fmt;

/// Canonical status code values, as carried on the wire.
pub mod code {
    pub const OK: i32 = 0;
    pub const CANCELLED: i32 = 1;
    pub const UNKNOWN: i32 = 2;
    pub const INVALID_ARGUMENT: i32 = 3;
    pub const DEADLINE_EXCEEDED: i32 = 4;
    pub const NOT_FOUND: i32 = 5;
    pub const ALREADY_EXISTS: i32 = 6;
    pub const PERMISSION_DENIED: i32 = 7;
    pub const RESOURCE_EXHAUSTED: i32 = 8;
    pub const FAILED_PRECONDITION: i32 = 9;
    pub const ABORTED: i32 = 10;
    pub const OUT_OF_RANGE: i32 = 11;
    pub const UNIMPLEMENTED: i32 = 12;
    pub const INTERNAL: i32 = 13;
    pub const UNAVAILABLE: i32 = 14;
    pub const DATA_LOSS: i32 = 15;
    pub const UNAUTHENTICATED: i32 = 16;
}

/// Name of a status code, `"?"` for values outside the canonical range.
pub fn code_label(code: i32) -> &'static str {
    match code {
        code::OK => "OK",
        code::CANCELLED => "CANCELLED",
        code::UNKNOWN => "UNKNOWN",
        code::INVALID_ARGUMENT => "INVALID_ARGUMENT",
        code::DEADLINE_EXCEEDED => "DEADLINE_EXCEEDED",
        code::NOT_FOUND => "NOT_FOUND",
        code::ALREADY_EXISTS => "ALREADY_EXISTS",
        code::PERMISSION_DENIED => "PERMISSION_DENIED",
        code::RESOURCE_EXHAUSTED => "RESOURCE_EXHAUSTED",
        code::FAILED_PRECONDITION => "FAILED_PRECONDITION",
        code::ABORTED => "ABORTED",
        code::OUT_OF_RANGE => "OUT_OF_RANGE",
        code::UNIMPLEMENTED => "UNIMPLEMENTED",
        code::INTERNAL => "INTERNAL",
        code::UNAVAILABLE => "UNAVAILABLE",
        code::DATA_LOSS => "DATA_LOSS",
        code::UNAUTHENTICATED => "UNAUTHENTICATED",
        _ => "?",
    }
}

/// The definitive outcome of one call.
///
/// A non-zero code is the normal representation of RPC-level failure
/// (NOT_FOUND, UNAVAILABLE, ...), not an exceptional path. The details
/// blob is opaque here; interpreting it (e.g. as structured error info)
/// is the consumer's business.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallStatus {
    /// Numeric status code; 0 is OK.
    pub code: i32,
    /// Human-readable message from the server.
    pub message: String,
    /// Opaque serialized error details.
    pub details: Vec<u8>,
}

impl CallStatus {
    /// Build a status.
    pub fn new(code: i32, message: impl Into<String>, details: Vec<u8>) -> Self {
        Self {
            code,
            message: message.into(),
            details,
        }
    }

    /// An OK status with no message.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::OK
    }

    /// `"NOT_FOUND (5)"` style rendering of the code alone.
    pub fn code_description(&self) -> String {
        format!("{} ({})", code_label(self.code), self.code)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code_description())
        } else {
            write!(f, "{}: {}", self.code_description(), self.message)
        }
    }
}
