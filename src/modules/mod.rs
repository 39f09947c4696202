//! Bundled inspection modules.
//!
//! Registered with the `BuiltinLoader` under the `builtin` library path.
//! They go through the same `Module` contract as any external module.

pub mod dump;
