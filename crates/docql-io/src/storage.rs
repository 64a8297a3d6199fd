//! Storage collaborator contract.
//!
//! Both calls block the caller until the store answers or the interruptor
//! fires. Partial effects of an interrupted write are the store's concern.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use docql_core::datum::Datum;
use docql_core::id::TableId;
use docql_core::signal::Interruptor;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Read {
    Point {
        table: TableId,
        key: Datum,
    },
    /// Rows in primary-key order strictly after `after`, at most `limit`.
    Range {
        table: TableId,
        after: Option<Datum>,
        limit: usize,
    },
    SindexList {
        table: TableId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReadResponse {
    /// The row, or `Null` when absent.
    Point(Datum),
    Range { rows: Vec<Datum>, exhausted: bool },
    SindexList(Vec<String>),
}

/// Replace the row at `key` with `new_row`; `Null` deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointReplace {
    pub table: TableId,
    pub primary_key: String,
    pub key: Datum,
    pub new_row: Datum,
    /// Whether an existing row may be overwritten.
    pub upsert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Write {
    PointReplace(PointReplace),
    BatchReplace(Vec<PointReplace>),
    SindexCreate { table: TableId, name: String },
    SindexDrop { table: TableId, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteResponse {
    /// Stats document, e.g. `{"inserted": 1}` or `{"first_error": .., "errors": 1}`.
    Stats(Datum),
    /// One stats document per item of a batch, in order.
    BatchStats(Vec<Datum>),
    /// Whether a secondary index was created or dropped.
    Ack(bool),
}

pub trait Storage: Send + Sync {
    fn read(&self, query: &Read, interruptor: &Interruptor) -> Result<ReadResponse>;
    fn write(&self, query: &Write, interruptor: &Interruptor) -> Result<WriteResponse>;
}

/// `{"first_error": msg, "errors": 1}`.
pub fn error_stats(message: impl Into<String>) -> Datum {
    Datum::object([
        ("first_error", Datum::Str(message.into())),
        ("errors", Datum::Num(1.0)),
    ])
}

/// `{name: 1}`.
pub fn single_stat(name: &str) -> Datum {
    Datum::object([(name, Datum::Num(1.0))])
}

/// Combine two stats documents: numeric fields add up, the first
/// `first_error` wins.
pub fn merge_stats(left: &Datum, right: &Datum) -> Datum {
    let mut out: BTreeMap<String, Datum> = match left {
        Datum::Object(m) => m.clone(),
        _ => BTreeMap::new(),
    };
    if let Datum::Object(r) = right {
        for (k, v) in r {
            match (out.get(k), v) {
                (Some(Datum::Num(a)), Datum::Num(b)) => {
                    let sum = a + b;
                    out.insert(k.clone(), Datum::Num(sum));
                }
                (Some(_), _) => {}
                (None, _) => {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
    }
    Datum::Object(out)
}

/// Datum ordered by `Datum::compare`, for use as a map key.
#[derive(Debug, Clone)]
pub struct OrderedKey(pub Datum);

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.compare(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}
