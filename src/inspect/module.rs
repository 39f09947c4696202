//! The contract between the dispatch engine and inspection modules.
//!
//! # Contract
//! - A module sees one `TransferRecord` and its own argument list per call
//! - It must not keep the payload past the call (the borrow enforces this)
//! - It returns one of the four `StatusCode` values
//! - It must tolerate an empty argument list
//! - It may block (file I/O); the engine imposes no time budget
//!
//! This is the only surface modules compile against, so it stays stable
//! across registry rebuilds.

use std::sync::Arc;

use crate::inspect::error::ArgumentTooLong;
use crate::inspect::record::{StatusCode, TransferRecord};

/// One configuration-time argument, owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArgument {
    bytes: Box<[u8]>,
}

impl ModuleArgument {
    /// Maximum argument length (8-bit length prefix).
    pub const MAX_LEN: usize = u8::MAX as usize;

    /// Copy `bytes` into a new argument.
    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self, ArgumentTooLong> {
        let bytes = bytes.as_ref();
        if bytes.len() > Self::MAX_LEN {
            return Err(ArgumentTooLong { len: bytes.len() });
        }
        Ok(Self { bytes: bytes.into() })
    }

    pub fn len(&self) -> u8 {
        // Bounded by MAX_LEN at construction.
        self.bytes.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The argument as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// An inspection module entry point.
pub trait Module: Send + Sync {
    /// Inspect one chunk.
    fn process(&self, record: &TransferRecord<'_>, args: &[ModuleArgument]) -> StatusCode;

    /// Release process-wide state. Called once at shutdown.
    fn close(&self) {}
}

impl<F> Module for F
where
    F: Fn(&TransferRecord<'_>, &[ModuleArgument]) -> StatusCode + Send + Sync,
{
    fn process(&self, record: &TransferRecord<'_>, args: &[ModuleArgument]) -> StatusCode {
        self(record, args)
    }
}

/// Shared handle to a resolved entry point.
pub type EntryPoint = Arc<dyn Module>;

/// Wrap a closure as an entry point.
pub fn module_fn<F>(f: F) -> EntryPoint
where
    F: Fn(&TransferRecord<'_>, &[ModuleArgument]) -> StatusCode + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Adapter for entry points that speak raw status integers.
///
/// Unknown integers are logged as an invariant violation and reported as
/// `ModuleError`.
pub struct RawModule<F> {
    entry: F,
}

impl<F> RawModule<F>
where
    F: Fn(&TransferRecord<'_>, &[ModuleArgument]) -> i32 + Send + Sync + 'static,
{
    pub fn new(entry: F) -> Self {
        Self { entry }
    }

    pub fn into_entry_point(self) -> EntryPoint {
        Arc::new(self)
    }
}

impl<F> Module for RawModule<F>
where
    F: Fn(&TransferRecord<'_>, &[ModuleArgument]) -> i32 + Send + Sync,
{
    fn process(&self, record: &TransferRecord<'_>, args: &[ModuleArgument]) -> StatusCode {
        let raw = (self.entry)(record, args);
        StatusCode::try_from(raw).unwrap_or_else(|violation| {
            tracing::error!(status = raw, error = %violation, "Module returned out-of-range status");
            StatusCode::ModuleError
        })
    }
}
