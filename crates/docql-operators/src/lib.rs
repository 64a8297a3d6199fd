//! Evaluation building blocks that operate on an `Env`.
//!
//! `stream` holds the eager and lazy datum streams with their shared
//! pushdown transforms and terminals; `value` wraps every kind of evaluation
//! result behind one tagged type with an explicit conversion table.

pub mod func;
pub mod stream;
pub mod table;
pub mod value;

pub use func::Func;
pub use stream::DatumStream;
pub use table::Table;
pub use value::{Value, ValueType};
