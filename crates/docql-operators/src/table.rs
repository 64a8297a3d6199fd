//! Handle to a stored table.
//!
//! Replacement functions are evaluated here, in the query's environment;
//! storage only ever sees point replaces of finished rows.

use docql_core::datum::Datum;
use docql_core::error::{Error, Result};
use docql_core::id::{DbId, TableId};
use docql_env::{DatumRef, Env, Node};
use docql_io::storage::{
    single_stat, PointReplace, Read, ReadResponse, Write, WriteResponse,
};

use crate::func::Func;
use crate::stream::DatumStream;

#[derive(Debug, Clone)]
pub struct Table {
    id: TableId,
    db: DbId,
    name: String,
    primary_key: String,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Outcome of preparing one replacement before it is sent to storage.
enum Prepared {
    Done(Datum),
    Send(PointReplace),
}

impl Table {
    pub fn open(env: &Env, db: DbId, name: &str) -> Result<Self> {
        if !valid_name(name) {
            return Err(Error::query(format!(
                "Table name `{name}` invalid (Use A-Za-z0-9_ only)."
            )));
        }
        let meta = env.metadata().snapshot()?;
        let (id, table) = meta
            .find_table(db, name)
            .ok_or_else(|| Error::query(format!("Table `{name}` does not exist.")))?;
        Ok(Self {
            id,
            db,
            name: table.name.clone(),
            primary_key: table.primary_key.clone(),
        })
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn db(&self) -> DbId {
        self.db
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Row with primary key `pkey`, or null.
    pub fn get_row(&self, env: &mut Env, pkey: DatumRef) -> Result<DatumRef> {
        let key = env.to_datum(pkey)?;
        key.print_primary()?;
        let row = match env.read(&Read::Point {
            table: self.id,
            key,
        })? {
            ReadResponse::Point(row) => row,
            other => return Err(unexpected_response(&other)),
        };
        env.alloc_datum(&row)
    }

    /// Full-table scan in primary-key order.
    pub fn as_datum_stream(&self, env: &mut Env) -> Result<DatumStream> {
        Ok(DatumStream::lazy(
            self.id,
            self.primary_key.clone(),
            env.config().scan_batch_size,
        ))
    }

    pub fn sindex_list(&self, env: &mut Env) -> Result<DatumRef> {
        let names = match env.read(&Read::SindexList { table: self.id })? {
            ReadResponse::SindexList(names) => names,
            other => return Err(unexpected_response(&other)),
        };
        env.alloc_datum(&Datum::Array(names.into_iter().map(Datum::Str).collect()))
    }

    pub fn sindex_create(&self, env: &mut Env, name: &str) -> Result<DatumRef> {
        let created = self.ack(
            env,
            Write::SindexCreate {
                table: self.id,
                name: name.to_string(),
            },
        )?;
        if !created {
            return Err(Error::query(format!("Index `{name}` already exists.")));
        }
        env.alloc_datum(&single_stat("created"))
    }

    pub fn sindex_drop(&self, env: &mut Env, name: &str) -> Result<DatumRef> {
        let dropped = self.ack(
            env,
            Write::SindexDrop {
                table: self.id,
                name: name.to_string(),
            },
        )?;
        if !dropped {
            return Err(Error::query(format!("Index `{name}` does not exist.")));
        }
        env.alloc_datum(&single_stat("dropped"))
    }

    fn ack(&self, env: &mut Env, write: Write) -> Result<bool> {
        match env.write(&write)? {
            WriteResponse::Ack(b) => Ok(b),
            other => Err(Error::invariant(format!(
                "unexpected write response {other:?}"
            ))),
        }
    }

    /// `{first_error: <message>, errors: 1}` for a failed item.
    pub fn make_error_datum(&self, env: &mut Env, err: &Error) -> Result<DatumRef> {
        env.alloc_datum(&docql_io::storage::error_stats(err.to_string()))
    }

    /// Replace the row `orig` with `f(orig)`.
    pub fn replace(&self, env: &mut Env, orig: DatumRef, f: &Func) -> Result<DatumRef> {
        let prepared = self.prepare(env, orig, |env, o| f.call_datum(env, &[o]), true);
        self.finish_one(env, prepared)
    }

    /// Replace the row `orig` with `replacement`. Without `upsert` an
    /// existing row is a per-item "Duplicate primary key." error.
    pub fn replace_with(
        &self,
        env: &mut Env,
        orig: DatumRef,
        replacement: DatumRef,
        upsert: bool,
    ) -> Result<DatumRef> {
        let prepared = self.prepare(env, orig, |_, _| Ok(replacement), upsert);
        self.finish_one(env, prepared)
    }

    pub fn batch_replace(
        &self,
        env: &mut Env,
        origs: &[DatumRef],
        f: &Func,
    ) -> Result<Vec<DatumRef>> {
        let mut prepared = Vec::with_capacity(origs.len());
        for &orig in origs {
            prepared.push(self.prepare(env, orig, |env, o| f.call_datum(env, &[o]), true)?);
        }
        self.finish_batch(env, prepared)
    }

    pub fn batch_replace_with(
        &self,
        env: &mut Env,
        origs: &[DatumRef],
        replacements: &[DatumRef],
        upsert: bool,
    ) -> Result<Vec<DatumRef>> {
        if origs.len() != replacements.len() {
            return Err(Error::invariant(format!(
                "batch replace of {} rows with {} replacements",
                origs.len(),
                replacements.len()
            )));
        }
        let mut prepared = Vec::with_capacity(origs.len());
        for (&orig, &rep) in origs.iter().zip(replacements) {
            prepared.push(self.prepare(env, orig, |_, _| Ok(rep), upsert)?);
        }
        self.finish_batch(env, prepared)
    }

    /// Evaluate the replacement for one item. User errors become that
    /// item's result; anything else aborts.
    fn prepare(
        &self,
        env: &mut Env,
        orig: DatumRef,
        replacement: impl FnOnce(&mut Env, DatumRef) -> Result<DatumRef>,
        upsert: bool,
    ) -> Result<Prepared> {
        match self.try_prepare(env, orig, replacement, upsert) {
            Ok(p) => Ok(p),
            Err(e) if e.is_user_error() => {
                Ok(Prepared::Done(docql_io::storage::error_stats(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    fn try_prepare(
        &self,
        env: &mut Env,
        orig: DatumRef,
        replacement: impl FnOnce(&mut Env, DatumRef) -> Result<DatumRef>,
        upsert: bool,
    ) -> Result<Prepared> {
        let orig_is_null = matches!(env.node(orig)?, Node::Null);
        let new_row = replacement(env, orig)?;
        let new_datum = env.to_datum(new_row)?;
        let keyed = if orig_is_null {
            if new_datum.is_null() {
                return Ok(Prepared::Done(single_stat("skipped")));
            }
            new_datum.clone()
        } else {
            env.to_datum(orig)?
        };
        let key = keyed.get_field(&self.primary_key)?.clone();
        key.print_primary()?;
        Ok(Prepared::Send(PointReplace {
            table: self.id,
            primary_key: self.primary_key.clone(),
            key,
            new_row: new_datum,
            upsert,
        }))
    }

    fn finish_one(&self, env: &mut Env, prepared: Result<Prepared>) -> Result<DatumRef> {
        let stats = match prepared? {
            Prepared::Done(d) => d,
            Prepared::Send(op) => match env.write(&Write::PointReplace(op))? {
                WriteResponse::Stats(d) => d,
                other => {
                    return Err(Error::invariant(format!(
                        "unexpected write response {other:?}"
                    )))
                }
            },
        };
        env.alloc_datum(&stats)
    }

    fn finish_batch(&self, env: &mut Env, prepared: Vec<Prepared>) -> Result<Vec<DatumRef>> {
        let mut results: Vec<Option<Datum>> = Vec::with_capacity(prepared.len());
        let mut ops = Vec::new();
        for p in prepared {
            match p {
                Prepared::Done(d) => results.push(Some(d)),
                Prepared::Send(op) => {
                    ops.push(op);
                    results.push(None);
                }
            }
        }
        let responses = if ops.is_empty() {
            Vec::new()
        } else {
            match env.write(&Write::BatchReplace(ops))? {
                WriteResponse::BatchStats(stats) => stats,
                other => {
                    return Err(Error::invariant(format!(
                        "unexpected write response {other:?}"
                    )))
                }
            }
        };
        let mut responses = responses.into_iter();
        let mut out = Vec::with_capacity(results.len());
        for slot in results {
            let stats = match slot {
                Some(d) => d,
                None => responses
                    .next()
                    .ok_or_else(|| Error::invariant("storage returned too few batch results"))?,
            };
            out.push(env.alloc_datum(&stats)?);
        }
        if responses.next().is_some() {
            return Err(Error::invariant("storage returned too many batch results"));
        }
        Ok(out)
    }
}

fn unexpected_response(resp: &ReadResponse) -> Error {
    Error::invariant(format!("unexpected read response {resp:?}"))
}
