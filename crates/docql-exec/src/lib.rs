#![forbid(unsafe_code)]
//! docql-exec: serving query results to clients.
//!
//! `Engine` evaluates a query once and hands sequence results to the
//! `StreamCache`, which keeps the stream and its environment alive across
//! requests and serves it in bounded chunks. Every outcome leaves the crate
//! as a `Response`.

pub mod failpoints;
pub mod metrics;
pub mod response;
pub mod runtime;
pub mod stream_cache;

pub use response::{ErrorClass, ErrorInfo, Response, ResponseKind};
pub use runtime::Engine;
pub use stream_cache::StreamCache;
