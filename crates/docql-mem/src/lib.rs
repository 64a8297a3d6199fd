#![forbid(unsafe_code)]
//! docql-mem: arena-based lifetime management for evaluation values.
//!
//! Values are owned by arenas inside a single `Heap<T>`. A handle (`Ref`) is a
//! `(slot, generation)` pair and the owning arena is recorded in the slot, so
//! membership tests and ownership transfers are O(1) and stale handles are
//! detected instead of aliasing freed values.
//!
//! The heap is confined to one logical execution context; nothing here is
//! synchronized.

pub mod arena;
pub mod error;
pub mod gc;
pub mod tracking;

pub use arena::{Heap, Ref, MEM_ESTIMATE_MULTIPLIER};
pub use error::{Error, Result};
pub use gc::{GcStats, Trace};
pub use tracking::PeakTracker;
