//! Fully materializing sort.

use std::cmp::Ordering;
use std::collections::VecDeque;

use docql_core::error::{Error, Result};
use docql_env::{DatumRef, Env};

use super::DatumStream;

/// Datum order of two heap values.
pub fn compare_refs(env: &Env, a: DatumRef, b: DatumRef) -> Result<Ordering> {
    Ok(env.to_datum(a)?.compare(&env.to_datum(b)?))
}

pub(super) struct SortStream {
    items: VecDeque<DatumRef>,
    is_arr: bool,
}

impl SortStream {
    pub(super) fn new<F>(
        env: &mut Env,
        mut source: DatumStream,
        limit: usize,
        mut cmp: F,
    ) -> Result<Self>
    where
        F: FnMut(&Env, DatumRef, DatumRef) -> Result<Ordering>,
    {
        let is_arr = source.is_array();
        let mut items = Vec::new();
        while let Some(r) = source.next(env)? {
            items.push(r);
            if items.len() > limit {
                return Err(Error::resource_limit(format!(
                    "Can only sort at most {limit} elements."
                )));
            }
        }
        let mut failure = None;
        items.sort_by(|&a, &b| match cmp(env, a, b) {
            Ok(ord) => ord,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(Self {
            items: items.into(),
            is_arr,
        })
    }

    pub(super) fn is_array(&self) -> bool {
        self.is_arr
    }

    pub(super) fn next(&mut self) -> Option<DatumRef> {
        self.items.pop_front()
    }

    pub(super) fn remaining(&self) -> impl Iterator<Item = DatumRef> + '_ {
        self.items.iter().copied()
    }
}
