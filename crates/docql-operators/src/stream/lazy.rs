//! Storage-driven scan.
//!
//! Rows are read a page at a time in primary-key order. Transforms pushed
//! onto the stream run as each row comes off the page, and terminals consume
//! whole pages at once.

use std::collections::VecDeque;

use docql_core::datum::Datum;
use docql_core::error::{Error, Result};
use docql_core::id::TableId;
use docql_env::{DatumRef, Env};
use docql_io::storage::{Read, ReadResponse};

use super::pushdown::{apply_all, Transform};

pub(super) struct LazyStream {
    table: TableId,
    primary_key: String,
    page_size: usize,
    /// Key of the last row read; the next page starts after it.
    after: Option<Datum>,
    exhausted: bool,
    page: VecDeque<Datum>,
    transforms: Vec<Transform>,
    /// Transformed outputs not yet handed out.
    pending: VecDeque<DatumRef>,
}

impl LazyStream {
    pub(super) fn new(table: TableId, primary_key: String, page_size: usize) -> Self {
        Self {
            table,
            primary_key,
            page_size: page_size.max(1),
            after: None,
            exhausted: false,
            page: VecDeque::new(),
            transforms: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub(super) fn push_transform(&mut self, t: Transform) {
        self.transforms.push(t);
    }

    pub(super) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(super) fn pending(&self) -> impl Iterator<Item = DatumRef> + '_ {
        self.pending.iter().copied()
    }

    fn fill_page(&mut self, env: &Env) -> Result<()> {
        if !self.page.is_empty() || self.exhausted {
            return Ok(());
        }
        let resp = env.read(&Read::Range {
            table: self.table,
            after: self.after.clone(),
            limit: self.page_size,
        })?;
        let (rows, exhausted) = match resp {
            ReadResponse::Range { rows, exhausted } => (rows, exhausted),
            other => {
                return Err(Error::invariant(format!(
                    "unexpected read response {other:?}"
                )))
            }
        };
        if let Some(last) = rows.last() {
            self.after = Some(last.get_field(&self.primary_key)?.clone());
        }
        self.exhausted = exhausted || rows.is_empty();
        tracing::trace!(table = %self.table, rows = rows.len(), exhausted = self.exhausted, "scan page");
        self.page.extend(rows);
        Ok(())
    }

    fn next_raw(&mut self, env: &Env) -> Result<Option<Datum>> {
        self.fill_page(env)?;
        Ok(self.page.pop_front())
    }

    pub(super) fn next(&mut self, env: &mut Env) -> Result<Option<DatumRef>> {
        let mut out = Vec::new();
        loop {
            if let Some(r) = self.pending.pop_front() {
                return Ok(Some(r));
            }
            let Some(row) = self.next_raw(env)? else {
                return Ok(None);
            };
            let r = env.alloc_datum(&row)?;
            apply_all(env, &self.transforms, r, &mut out)?;
            self.pending.extend(out.drain(..));
        }
    }

    /// Everything pending plus one page of transformed rows.
    pub(super) fn next_page(&mut self, env: &mut Env, out: &mut Vec<DatumRef>) -> Result<()> {
        out.extend(self.pending.drain(..));
        if !out.is_empty() {
            return Ok(());
        }
        while out.is_empty() {
            self.fill_page(env)?;
            if self.page.is_empty() {
                return Ok(());
            }
            while let Some(row) = self.page.pop_front() {
                let r = env.alloc_datum(&row)?;
                apply_all(env, &self.transforms, r, out)?;
            }
        }
        Ok(())
    }
}
