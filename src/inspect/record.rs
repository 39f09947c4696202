//! Per-chunk record handed to modules, and the status they return.

use crate::inspect::error::{InspectError, InvariantViolation};
use crate::inspect::tuple::{EndpointTuple, Protocol};

/// Connection metadata plus a borrowed view of one chunk's payload.
///
/// The record cannot outlive the buffer it borrows from, so no module can
/// keep the payload past the dispatch walk that produced it.
#[derive(Debug, Clone, Copy)]
pub struct TransferRecord<'a> {
    tuple: EndpointTuple,
    protocol: Protocol,
    payload: &'a [u8],
    payload_len: u16,
}

impl<'a> TransferRecord<'a> {
    /// Build a record over `payload`. Fails if the length does not fit 16 bits.
    pub fn new(
        tuple: EndpointTuple,
        protocol: Protocol,
        payload: &'a [u8],
    ) -> Result<Self, InspectError> {
        let payload_len = u16::try_from(payload.len())
            .map_err(|_| InspectError::PayloadTooLarge { len: payload.len() })?;

        Ok(Self {
            tuple,
            protocol,
            payload,
            payload_len,
        })
    }

    pub fn tuple(&self) -> &EndpointTuple {
        &self.tuple
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn payload_len(&self) -> u16 {
        self.payload_len
    }
}

/// Result of one module invocation. Closed set; matches are exhaustive.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 0,
    ModuleError = 1,
    FileError = 2,
    ExceptionEnd = 3,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::ModuleError => "module_error",
            StatusCode::FileError => "file_error",
            StatusCode::ExceptionEnd => "exception_end",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl TryFrom<i32> for StatusCode {
    type Error = InvariantViolation;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(StatusCode::Ok),
            1 => Ok(StatusCode::ModuleError),
            2 => Ok(StatusCode::FileError),
            3 => Ok(StatusCode::ExceptionEnd),
            other => Err(InvariantViolation(other)),
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
