//! In-memory table store.
//!
//! Rows are kept per table in primary-key order so range reads page through a
//! table deterministically. Used by tests, benches and the CLI.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use docql_core::datum::Datum;
use docql_core::id::TableId;
use docql_core::signal::Interruptor;

use crate::error::{Result, StorageError};
use crate::storage::{
    error_stats, single_stat, OrderedKey, PointReplace, Read, ReadResponse, Storage, Write,
    WriteResponse,
};

#[derive(Debug, Default)]
struct TableData {
    primary_key: String,
    rows: BTreeMap<OrderedKey, Datum>,
    sindexes: BTreeSet<String>,
}

/// Thread-safe in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<TableId, TableData>>>,
    latency: Option<Duration>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps `latency` first, waking early on interruption.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TableId, TableData>>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Poisoned("memory store tables"))
    }

    pub fn create_table(&self, table: TableId, primary_key: &str) -> Result<()> {
        let mut tables = self.lock()?;
        tables.entry(table).or_insert_with(|| TableData {
            primary_key: primary_key.to_string(),
            ..TableData::default()
        });
        Ok(())
    }

    /// Insert or overwrite rows directly, bypassing write semantics.
    pub fn load(&self, table: TableId, rows: impl IntoIterator<Item = Datum>) -> Result<usize> {
        let mut tables = self.lock()?;
        let data = tables
            .get_mut(&table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        let mut n = 0;
        for row in rows {
            let key = row.get(&data.primary_key).cloned().ok_or_else(|| {
                StorageError::Unavailable(format!(
                    "row is missing primary key `{}`: {row}",
                    data.primary_key
                ))
            })?;
            data.rows.insert(OrderedKey(key), row);
            n += 1;
        }
        Ok(n)
    }

    pub fn row_count(&self, table: TableId) -> Result<usize> {
        let tables = self.lock()?;
        tables
            .get(&table)
            .map(|t| t.rows.len())
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    fn preamble(&self, interruptor: &Interruptor) -> Result<()> {
        if let Some(latency) = self.latency {
            let deadline = Instant::now() + latency;
            while Instant::now() < deadline {
                if interruptor.is_pulsed() {
                    return Err(StorageError::Interrupted);
                }
                std::thread::sleep(Duration::from_millis(1).min(latency));
            }
        }
        if interruptor.is_pulsed() {
            return Err(StorageError::Interrupted);
        }
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable("store marked unavailable".into()));
        }
        Ok(())
    }
}

fn table_mut(
    tables: &mut HashMap<TableId, TableData>,
    table: TableId,
) -> Result<&mut TableData> {
    tables
        .get_mut(&table)
        .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
}

fn apply_replace(data: &mut TableData, op: &PointReplace) -> Datum {
    let key = OrderedKey(op.key.clone());
    let old = data.rows.get(&key).cloned();
    match (&old, &op.new_row) {
        (None, Datum::Null) => single_stat("skipped"),
        (Some(_), Datum::Null) => {
            data.rows.remove(&key);
            single_stat("deleted")
        }
        (_, new_row) => {
            if !matches!(new_row, Datum::Object(_)) {
                return error_stats(format!(
                    "Inserted value must be an OBJECT (got {}):\n{}",
                    new_row.type_name(),
                    new_row
                ));
            }
            match new_row.get(&op.primary_key) {
                Some(k) if k.compare(&op.key).is_eq() => {}
                Some(_) if old.is_some() => {
                    return error_stats(format!(
                        "Primary key `{}` cannot be changed.",
                        op.primary_key
                    ))
                }
                _ => {
                    return error_stats(format!(
                        "Inserted object must have primary key `{}`:\n{}",
                        op.primary_key, new_row
                    ))
                }
            }
            match &old {
                None => {
                    data.rows.insert(key, new_row.clone());
                    single_stat("inserted")
                }
                Some(_) if !op.upsert => error_stats("Duplicate primary key."),
                Some(prev) if prev == new_row => single_stat("unchanged"),
                Some(_) => {
                    data.rows.insert(key, new_row.clone());
                    single_stat("replaced")
                }
            }
        }
    }
}

impl Storage for MemoryStore {
    fn read(&self, query: &Read, interruptor: &Interruptor) -> Result<ReadResponse> {
        self.preamble(interruptor)?;
        let mut tables = self.lock()?;
        let resp = match query {
            Read::Point { table, key } => {
                let data = table_mut(&mut tables, *table)?;
                ReadResponse::Point(
                    data.rows
                        .get(&OrderedKey(key.clone()))
                        .cloned()
                        .unwrap_or(Datum::Null),
                )
            }
            Read::Range {
                table,
                after,
                limit,
            } => {
                let data = table_mut(&mut tables, *table)?;
                let iter: Box<dyn Iterator<Item = (&OrderedKey, &Datum)>> = match after {
                    Some(k) => {
                        let bound = OrderedKey(k.clone());
                        Box::new(data.rows.range((
                            std::ops::Bound::Excluded(bound),
                            std::ops::Bound::Unbounded,
                        )))
                    }
                    None => Box::new(data.rows.iter()),
                };
                let mut iter = iter.peekable();
                let rows: Vec<Datum> = iter.by_ref().take(*limit).map(|(_, v)| v.clone()).collect();
                let exhausted = iter.peek().is_none();
                ReadResponse::Range { rows, exhausted }
            }
            Read::SindexList { table } => {
                let data = table_mut(&mut tables, *table)?;
                ReadResponse::SindexList(data.sindexes.iter().cloned().collect())
            }
        };
        #[cfg(feature = "tracing")]
        tracing::trace!(?query, "memory store read");
        Ok(resp)
    }

    fn write(&self, query: &Write, interruptor: &Interruptor) -> Result<WriteResponse> {
        self.preamble(interruptor)?;
        let mut tables = self.lock()?;
        let resp = match query {
            Write::PointReplace(op) => {
                let data = table_mut(&mut tables, op.table)?;
                WriteResponse::Stats(apply_replace(data, op))
            }
            Write::BatchReplace(ops) => {
                let mut out = Vec::with_capacity(ops.len());
                for op in ops {
                    let data = table_mut(&mut tables, op.table)?;
                    out.push(apply_replace(data, op));
                }
                WriteResponse::BatchStats(out)
            }
            Write::SindexCreate { table, name } => {
                let data = table_mut(&mut tables, *table)?;
                WriteResponse::Ack(data.sindexes.insert(name.clone()))
            }
            Write::SindexDrop { table, name } => {
                let data = table_mut(&mut tables, *table)?;
                WriteResponse::Ack(data.sindexes.remove(name))
            }
        };
        #[cfg(feature = "tracing")]
        tracing::trace!(?query, "memory store write");
        Ok(resp)
    }
}
