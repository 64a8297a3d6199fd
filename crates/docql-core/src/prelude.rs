//! Convenient re-exports for downstream crates.

pub use crate::backtrace::{Backtrace, Frame};
pub use crate::config::EngineConfig;
pub use crate::datum::{Datum, DatumType};
pub use crate::error::{Error, Result};
pub use crate::id::{ArenaId, CursorToken, DbId, TableId, VarId};
pub use crate::signal::Interruptor;
