#![forbid(unsafe_code)]
//! docql-env: the state one query evaluation threads through every term.
//!
//! `Env` owns the arena heap of evaluation values and the checkpoint stack
//! over it, variable scopes, optional arguments, the interrupt signal and the
//! storage/metadata collaborators. `checkpoint` holds the scope guards that
//! keep the arena stack balanced on every exit path.

pub mod checkpoint;
pub mod env;
pub mod node;

pub use checkpoint::{EnvCheckpoint, ExitPolicy, GcCheckpoint};
pub use env::Env;
pub use node::{DatumRef, Node};
