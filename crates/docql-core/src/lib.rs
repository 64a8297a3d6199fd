#![forbid(unsafe_code)]
//! docql-core: the shared vocabulary of the docql query engine.
//!
//! - `datum`: immutable document values and their ordering/accessors.
//! - `error`: the engine-wide error taxonomy (user, resource, interrupt, internal).
//! - `config`: serializable engine configuration with env overrides.
//! - `id`: strongly-typed identifiers (arenas, cursors, variables, databases).
//! - `signal`: the cancellation signal threaded through evaluation.
//!
//! No evaluation, arena, or storage logic lives here.

pub mod backtrace;
pub mod config;
pub mod datum;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod signal;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
