//! Per-chunk dispatch walk.
//!
//! # Responsibilities
//! - Build one `TransferRecord` per chunk
//! - Invoke every enabled binding once, in registry order
//! - Log and count each returned status
//!
//! # Status Policy
//! ```text
//! Ok           → debug log, continue
//! ModuleError  → error log, continue
//! FileError    → error log, continue
//! ExceptionEnd → error log, continue (also used for a panicking module)
//! ```
//! No module outcome aborts the walk or reaches the proxy data path.
//!
//! # Design Decisions
//! - Stateless apart from the scope label; safe to call concurrently
//! - Payloads over 65535 bytes are walked as consecutive segments
//! - The record lives on the stack of `dispatch` and is gone when it returns

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::inspect::error::InspectError;
use crate::inspect::record::{StatusCode, TransferRecord};
use crate::inspect::registry::{ModuleBinding, ModuleRegistry};
use crate::inspect::tuple::{extract, ConnectionInfo, Direction};
use crate::observability::metrics;

/// Status returned by one binding during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOutcome {
    pub module: Arc<str>,
    pub status: StatusCode,
}

/// Everything a walk produced, in invocation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    outcomes: Vec<ModuleOutcome>,
}

impl DispatchReport {
    pub fn outcomes(&self) -> &[ModuleOutcome] {
        &self.outcomes
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcomes whose status is not `Ok`.
    pub fn failures(&self) -> impl Iterator<Item = &ModuleOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_ok())
    }

    /// `(module, status)` pairs, for assertions and diagnostics.
    pub fn pairs(&self) -> Vec<(&str, StatusCode)> {
        self.outcomes.iter().map(|o| (&*o.module, o.status)).collect()
    }
}

/// Runs registries against chunks.
#[derive(Debug, Clone)]
pub struct DispatchEngine {
    scope: Arc<str>,
}

impl DispatchEngine {
    /// An engine that labels its logs with `scope`.
    pub fn new(scope: impl Into<Arc<str>>) -> Self {
        Self { scope: scope.into() }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Inspect one chunk.
    ///
    /// Fails only when the tuple cannot be extracted; module statuses are
    /// reported in the returned `DispatchReport`.
    pub fn dispatch<C>(
        &self,
        conn: &C,
        payload: &[u8],
        direction: Direction,
        registry: &ModuleRegistry,
    ) -> Result<DispatchReport, InspectError>
    where
        C: ConnectionInfo + ?Sized,
    {
        if registry.is_empty() {
            tracing::trace!(scope = %self.scope, "No modules configured");
            return Ok(DispatchReport::default());
        }

        let (tuple, protocol) = extract(conn, direction).inspect_err(|e| {
            tracing::debug!(scope = %self.scope, error = %e, "Chunk skipped by inspection");
            metrics::record_extraction_failure();
        })?;

        metrics::record_chunk(protocol, direction);

        let mut report = DispatchReport::default();

        for segment in segments(payload) {
            let record = TransferRecord::new(tuple, protocol, segment)?;
            for binding in registry.enabled() {
                let status = invoke(binding, &record);
                self.observe(binding, status);
                report.outcomes.push(ModuleOutcome {
                    module: binding.shared_name(),
                    status,
                });
            }
        }

        Ok(report)
    }

    fn observe(&self, binding: &ModuleBinding, status: StatusCode) {
        let module = binding.name();
        match status {
            StatusCode::Ok => {
                tracing::debug!(scope = %self.scope, module, "Module complete");
            }
            StatusCode::ModuleError => {
                tracing::error!(scope = %self.scope, module, "Module run error");
            }
            StatusCode::FileError => {
                tracing::error!(scope = %self.scope, module, "Module file manipulation error");
            }
            StatusCode::ExceptionEnd => {
                tracing::error!(scope = %self.scope, module, "Module ended by exception");
            }
        }
        metrics::record_module_status(module, status);
    }
}

fn invoke(binding: &ModuleBinding, record: &TransferRecord<'_>) -> StatusCode {
    let entry = binding.entry_point();
    let args = binding.arguments();
    catch_unwind(AssertUnwindSafe(|| entry.process(record, args))).unwrap_or_else(|_| {
        tracing::error!(module = binding.name(), "Module panicked");
        StatusCode::ExceptionEnd
    })
}

/// Split a payload into record-sized pieces. An empty payload is one
/// empty segment.
fn segments(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    let empty = payload.is_empty().then_some(payload);
    payload.chunks(u16::MAX as usize).chain(empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::loader::BuiltinLoader;
    use crate::inspect::registry::RuleDescriptor;
    use crate::inspect::tuple::{Transport, WireEndpoint};
    use std::sync::Mutex;

    const LIB: &str = "/opt/mods/libtest.so";

    struct Session;

    impl ConnectionInfo for Session {
        fn local_endpoint(&self) -> Option<WireEndpoint> {
            WireEndpoint::from_socket_addr("10.0.0.1:443".parse().unwrap())
        }
        fn remote_endpoint(&self) -> Option<WireEndpoint> {
            WireEndpoint::from_socket_addr("203.0.113.5:51000".parse().unwrap())
        }
        fn transport(&self) -> Transport {
            Transport::Stream
        }
    }

    fn rule(name: &str, state: &str) -> RuleDescriptor {
        RuleDescriptor {
            name: name.into(),
            library: LIB.into(),
            state: state.into(),
            args: Vec::new(),
        }
    }

    #[test]
    fn test_empty_registry_is_noop() {
        let engine = DispatchEngine::new("test");
        let report = engine
            .dispatch(&Session, b"data", Direction::Downstream, &ModuleRegistry::empty())
            .unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_failures_do_not_stop_walk() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut loader = BuiltinLoader::new();
        for (name, status) in [
            ("a", StatusCode::ModuleError),
            ("b", StatusCode::FileError),
            ("c", StatusCode::ExceptionEnd),
            ("d", StatusCode::Ok),
        ] {
            let calls = Arc::clone(&calls);
            loader.register_fn(LIB, name, move |_, _| {
                calls.lock().unwrap().push(name);
                status
            });
        }
        let rules: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| rule(n, "on")).collect();
        let registry = ModuleRegistry::build(&rules, &loader).unwrap();

        let report = DispatchEngine::new("test")
            .dispatch(&Session, b"data", Direction::Downstream, &registry)
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(
            report.pairs(),
            vec![
                ("a", StatusCode::ModuleError),
                ("b", StatusCode::FileError),
                ("c", StatusCode::ExceptionEnd),
                ("d", StatusCode::Ok),
            ]
        );
        assert_eq!(report.failures().count(), 3);
    }

    #[test]
    fn test_panicking_module_is_contained() {
        let mut loader = BuiltinLoader::new();
        loader.register_fn(LIB, "boom", |_, _| panic!("module bug"));
        loader.register_fn(LIB, "after", |_, _| StatusCode::Ok);
        let rules = vec![rule("boom", "on"), rule("after", "on")];
        let registry = ModuleRegistry::build(&rules, &loader).unwrap();

        let report = DispatchEngine::new("test")
            .dispatch(&Session, b"x", Direction::FromUpstream, &registry)
            .unwrap();
        assert_eq!(
            report.pairs(),
            vec![("boom", StatusCode::ExceptionEnd), ("after", StatusCode::Ok)]
        );
    }

    #[test]
    fn test_large_payload_is_segmented() {
        let lens = Arc::new(Mutex::new(Vec::new()));
        let mut loader = BuiltinLoader::new();
        let seen = Arc::clone(&lens);
        loader.register_fn(LIB, "len", move |record, _| {
            seen.lock().unwrap().push(record.payload_len());
            StatusCode::Ok
        });
        let registry = ModuleRegistry::build(&[rule("len", "on")], &loader).unwrap();

        let payload = vec![7u8; 70_000];
        let report = DispatchEngine::new("test")
            .dispatch(&Session, &payload, Direction::Downstream, &registry)
            .unwrap();
        assert_eq!(report.outcomes().len(), 2);
        assert_eq!(*lens.lock().unwrap(), vec![u16::MAX, (70_000 - 65_535) as u16]);
    }

    #[test]
    fn test_empty_payload_still_walks() {
        let mut loader = BuiltinLoader::new();
        loader.register_fn(LIB, "len", |record, _| {
            if record.payload_len() == 0 {
                StatusCode::Ok
            } else {
                StatusCode::ModuleError
            }
        });
        let registry = ModuleRegistry::build(&[rule("len", "on")], &loader).unwrap();
        let report = DispatchEngine::new("test")
            .dispatch(&Session, b"", Direction::Downstream, &registry)
            .unwrap();
        assert_eq!(report.pairs(), vec![("len", StatusCode::Ok)]);
    }
}
