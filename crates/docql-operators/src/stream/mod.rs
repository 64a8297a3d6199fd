//! Datum streams.
//!
//! A `DatumStream` is a finite, non-restartable sequence of heap datums. Eager
//! variants wrap an in-process source and pull from it one element at a time;
//! the lazy variant pages rows out of storage. Once a stream reports its end it
//! keeps reporting it.

mod eager;
mod lazy;
pub mod pushdown;
mod sort;

use std::cmp::Ordering;

use docql_core::error::Result;
use docql_core::id::TableId;
use docql_env::{DatumRef, Env, Node};

use crate::func::Func;
use eager::{ArrayStream, ConcatMapStream, SliceStream, UnionStream, ZipStream};
use lazy::LazyStream;
use pushdown::{fold, Terminal, Transform};
pub use sort::compare_refs;
use sort::SortStream;

enum Kind {
    Array(ArrayStream),
    Transformed(Box<DatumStream>, Transform),
    ConcatMap(ConcatMapStream),
    Slice(SliceStream),
    Zip(ZipStream),
    Union(UnionStream),
    Sort(SortStream),
    Lazy(LazyStream),
}

pub struct DatumStream {
    kind: Kind,
    done: bool,
}

impl DatumStream {
    fn wrap(kind: Kind) -> Self {
        Self { kind, done: false }
    }

    /// Stream the elements of the array datum `array`.
    pub fn from_array(env: &Env, array: DatumRef) -> Result<Self> {
        Ok(Self::wrap(Kind::Array(ArrayStream::new(env, array)?)))
    }

    pub fn from_refs(items: Vec<DatumRef>) -> Self {
        Self::wrap(Kind::Array(ArrayStream::from_refs(items)))
    }

    /// Primary-key-ordered scan of a stored table.
    pub fn lazy(table: TableId, primary_key: String, page_size: usize) -> Self {
        Self::wrap(Kind::Lazy(LazyStream::new(table, primary_key, page_size)))
    }

    /// Concatenate `streams` in argument order.
    pub fn union(streams: Vec<DatumStream>) -> Self {
        Self::wrap(Kind::Union(UnionStream::new(streams)))
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, Kind::Lazy(_))
    }

    /// Whether the stream is backed entirely by in-memory arrays.
    pub fn is_array(&self) -> bool {
        match &self.kind {
            Kind::Array(_) => true,
            Kind::Transformed(src, _) => src.is_array(),
            Kind::ConcatMap(s) => s.source().is_array(),
            Kind::Slice(s) => s.source().is_array(),
            Kind::Zip(s) => s.source().is_array(),
            Kind::Union(s) => s.streams().all(DatumStream::is_array),
            Kind::Sort(s) => s.is_array(),
            Kind::Lazy(_) => false,
        }
    }

    pub fn next(&mut self, env: &mut Env) -> Result<Option<DatumRef>> {
        if self.done {
            return Ok(None);
        }
        env.check_interrupted()?;
        let item = match &mut self.kind {
            Kind::Array(s) => s.next(),
            Kind::Transformed(src, t) => {
                let mut out = Vec::with_capacity(1);
                loop {
                    match src.next(env)? {
                        None => break None,
                        Some(r) => {
                            t.apply(env, r, &mut out)?;
                            if let Some(x) = out.pop() {
                                break Some(x);
                            }
                        }
                    }
                }
            }
            Kind::ConcatMap(s) => s.next(env)?,
            Kind::Slice(s) => s.next(env)?,
            Kind::Zip(s) => s.next(env)?,
            Kind::Union(s) => s.next(env)?,
            Kind::Sort(s) => s.next(),
            Kind::Lazy(s) => s.next(env)?,
        };
        if item.is_none() {
            self.done = true;
        }
        Ok(item)
    }

    /// Up to `max` elements; zero means no limit. Only an exhausted stream
    /// returns fewer than `max`.
    pub fn next_batch(&mut self, env: &mut Env, max: usize) -> Result<Vec<DatumRef>> {
        let mut out = Vec::new();
        while max == 0 || out.len() < max {
            match self.next(env)? {
                Some(r) => out.push(r),
                None => break,
            }
        }
        Ok(out)
    }

    /// Next unit of work for a terminal: a whole storage page for lazy
    /// streams, one element otherwise. Empty only at the end.
    fn pull_chunk(&mut self, env: &mut Env, out: &mut Vec<DatumRef>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        env.check_interrupted()?;
        if let Kind::Lazy(s) = &mut self.kind {
            s.next_page(env, out)?;
            if out.is_empty() {
                self.done = true;
            }
            return Ok(());
        }
        if let Some(r) = self.next(env)? {
            out.push(r);
        }
        Ok(())
    }

    /// A lazy stream takes a transform only before any output is buffered;
    /// buffered rows have already been through the earlier transforms alone.
    fn accepts_pushdown(&self) -> bool {
        match &self.kind {
            Kind::Lazy(s) => !self.done && !s.has_pending(),
            _ => false,
        }
    }

    fn with_transform(self, t: Transform) -> Self {
        let push = self.accepts_pushdown();
        match self.kind {
            Kind::Lazy(mut s) if push => {
                s.push_transform(t);
                Self::wrap(Kind::Lazy(s))
            }
            kind => Self::wrap(Kind::Transformed(
                Box::new(Self {
                    kind,
                    done: self.done,
                }),
                t,
            )),
        }
    }

    pub fn filter(self, f: Func) -> Self {
        self.with_transform(Transform::Filter(f))
    }

    pub fn map(self, f: Func) -> Self {
        self.with_transform(Transform::Map(f))
    }

    /// `f` must return a sequence; its elements are flattened in order.
    pub fn concatmap(self, f: Func) -> Self {
        if self.accepts_pushdown() {
            return self.with_transform(Transform::ConcatMap(f));
        }
        Self::wrap(Kind::ConcatMap(ConcatMapStream::new(self, f)))
    }

    pub fn count(self, env: &mut Env) -> Result<DatumRef> {
        fold(env, self, &Terminal::Count)
    }

    pub fn reduce(self, env: &mut Env, base: Option<DatumRef>, f: Func) -> Result<DatumRef> {
        fold(env, self, &Terminal::Reduce { base, f })
    }

    /// `[{group, reduction}, ...]` ordered by group.
    pub fn group_map_reduce(
        self,
        env: &mut Env,
        group: Func,
        map: Func,
        base: Option<DatumRef>,
        reduce: Func,
    ) -> Result<DatumRef> {
        fold(
            env,
            self,
            &Terminal::GroupedMapReduce {
                group,
                map,
                base,
                reduce,
            },
        )
    }

    /// Elements at positions `[left, right)`; `None` is unbounded.
    pub fn slice(self, left: usize, right: Option<usize>) -> Self {
        Self::wrap(Kind::Slice(SliceStream::new(self, left, right)))
    }

    /// Merge `right` over `left` for join result rows.
    pub fn zip(self) -> Self {
        Self::wrap(Kind::Zip(ZipStream::new(self)))
    }

    /// Materialize and sort with `cmp`. Fails once more than `limit`
    /// elements are buffered.
    pub fn sort<F>(self, env: &mut Env, limit: usize, cmp: F) -> Result<Self>
    where
        F: FnMut(&Env, DatumRef, DatumRef) -> Result<Ordering>,
    {
        Ok(Self::wrap(Kind::Sort(SortStream::new(env, self, limit, cmp)?)))
    }

    /// Drain into an array datum. `None` when the stream is not array-backed.
    pub fn as_array(&mut self, env: &mut Env) -> Result<Option<DatumRef>> {
        if !self.is_array() {
            return Ok(None);
        }
        let items = self.next_batch(env, 0)?;
        Ok(Some(env.alloc(Node::Array(items))?))
    }

    /// Heap values the stream holds between pulls; collections around a
    /// live stream must keep these.
    pub fn retained(&self) -> Vec<DatumRef> {
        let mut out = Vec::new();
        self.collect_retained(&mut out);
        out
    }

    fn collect_retained(&self, out: &mut Vec<DatumRef>) {
        match &self.kind {
            Kind::Array(s) => out.extend(s.remaining()),
            Kind::Transformed(src, _) => src.collect_retained(out),
            Kind::ConcatMap(s) => {
                s.source().collect_retained(out);
                if let Some(cur) = s.current() {
                    cur.collect_retained(out);
                }
            }
            Kind::Slice(s) => s.source().collect_retained(out),
            Kind::Zip(s) => s.source().collect_retained(out),
            Kind::Union(s) => s.streams().for_each(|st| st.collect_retained(out)),
            Kind::Sort(s) => out.extend(s.remaining()),
            Kind::Lazy(s) => out.extend(s.pending()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::datum::Datum;
    use docql_core::signal::Interruptor;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn nums(env: &mut Env, n: usize) -> DatumStream {
        let arr = env
            .alloc_datum(&Datum::Array((0..n).map(Datum::from).collect()))
            .unwrap();
        DatumStream::from_array(env, arr).unwrap()
    }

    fn drain(env: &mut Env, mut s: DatumStream) -> Datum {
        let items = s.next_batch(env, 0).unwrap();
        Datum::Array(items.into_iter().map(|r| env.to_datum(r).unwrap()).collect())
    }

    #[test]
    fn batches_are_full_until_the_end() {
        let mut env = Env::detached(Interruptor::new());
        let mut s = nums(&mut env, 12);
        let sizes: Vec<usize> = (0..4)
            .map(|_| s.next_batch(&mut env, 5).unwrap().len())
            .collect();
        assert_eq!(sizes, [5, 5, 2, 0]);
        assert!(s.next(&mut env).unwrap().is_none());
    }

    #[test]
    fn concatmap_drains_each_substream_before_the_next_call() {
        let mut env = Env::detached(Interruptor::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let f = Func::unary(&mut env, move |env, x| {
            seen.fetch_add(1, AtomicOrdering::SeqCst);
            let n = match env.node(x)? {
                Node::Num(n) => *n,
                _ => unreachable!(),
            };
            let items: Vec<Datum> = if n == 0.0 {
                vec![Datum::from(1i64), Datum::from(2i64)]
            } else {
                vec![Datum::from(3i64)]
            };
            env.alloc_datum(&Datum::Array(items))
        })
        .unwrap();
        let mut s = nums(&mut env, 2).concatmap(f);
        let first = s.next(&mut env).unwrap().unwrap();
        assert_eq!(env.to_datum(first).unwrap(), Datum::from(1i64));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        s.next(&mut env).unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        let third = s.next(&mut env).unwrap().unwrap();
        assert_eq!(env.to_datum(third).unwrap(), Datum::from(3i64));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
        assert!(s.next(&mut env).unwrap().is_none());
    }

    #[test]
    fn map_filter_slice_compose() {
        let mut env = Env::detached(Interruptor::new());
        let double = Func::unary(&mut env, |env, x| {
            let n = env.to_datum(x)?.as_num()?;
            env.alloc(Node::Num(n * 2.0))
        })
        .unwrap();
        let big = Func::unary(&mut env, |env, x| {
            let n = env.to_datum(x)?.as_num()?;
            env.alloc(Node::Bool(n >= 6.0))
        })
        .unwrap();
        let s = nums(&mut env, 10).map(double).filter(big).slice(1, Some(3));
        let out = drain(&mut env, s);
        assert_eq!(out, serde_json::from_str::<Datum>("[8,10]").unwrap());
    }

    #[test]
    fn union_preserves_argument_order() {
        let mut env = Env::detached(Interruptor::new());
        let a = nums(&mut env, 2);
        let b = nums(&mut env, 3);
        let out = drain(&mut env, DatumStream::union(vec![a, b]));
        assert_eq!(out, serde_json::from_str::<Datum>("[0,1,0,1,2]").unwrap());
    }

    #[test]
    fn zip_merges_join_rows() {
        let mut env = Env::detached(Interruptor::new());
        let rows: Datum = serde_json::from_str(
            r#"[{"left":{"a":1,"b":1},"right":{"b":2}},{"left":{"a":3}}]"#,
        )
        .unwrap();
        let arr = env.alloc_datum(&rows).unwrap();
        let s = DatumStream::from_array(&env, arr).unwrap().zip();
        let out = drain(&mut env, s);
        assert_eq!(
            out,
            serde_json::from_str::<Datum>(r#"[{"a":1,"b":2},{"a":3}]"#).unwrap()
        );

        let bad = env.alloc_datum(&serde_json::from_str("[{\"x\":1}]").unwrap()).unwrap();
        let mut s = DatumStream::from_array(&env, bad).unwrap().zip();
        let err = s.next(&mut env).unwrap_err();
        assert_eq!(err.to_string(), "ZIP can only be called on the result of a join.");
    }

    #[test]
    fn sort_enforces_limit_and_remembers_arrayness() {
        let mut env = Env::detached(Interruptor::new());
        let s = nums(&mut env, 5);
        let err = s.sort(&mut env, 4, compare_refs).err().unwrap();
        assert_eq!(err.to_string(), "Can only sort at most 4 elements.");

        let mut sorted = nums(&mut env, 5)
            .sort(&mut env, 10, |env, a, b| Ok(compare_refs(env, a, b)?.reverse()))
            .unwrap();
        assert!(sorted.is_array());
        let arr = sorted.as_array(&mut env).unwrap().unwrap();
        assert_eq!(
            env.to_datum(arr).unwrap(),
            serde_json::from_str::<Datum>("[4,3,2,1,0]").unwrap()
        );
    }

    #[test]
    fn reduce_and_count() {
        let mut env = Env::detached(Interruptor::new());
        let add = Func::binary(&mut env, |env, a, b| {
            let x = env.to_datum(a)?.as_num()? + env.to_datum(b)?.as_num()?;
            env.alloc(Node::Num(x))
        })
        .unwrap();
        let s = nums(&mut env, 5);
        let total = s.reduce(&mut env, None, add.clone()).unwrap();
        assert_eq!(env.to_datum(total).unwrap(), Datum::from(10i64));

        let empty = DatumStream::from_refs(Vec::new());
        let err = empty.reduce(&mut env, None, add).unwrap_err();
        assert_eq!(err.to_string(), "Cannot reduce over an empty stream with no base.");

        let s = nums(&mut env, 7);
        let n = s.count(&mut env).unwrap();
        assert_eq!(env.to_datum(n).unwrap(), Datum::from(7i64));
        assert_eq!(env.num_checkpoints(), 0);
    }

    #[test]
    fn interrupted_streams_stop() {
        let intr = Interruptor::new();
        let mut env = Env::detached(intr.clone());
        let mut s = nums(&mut env, 3);
        intr.pulse();
        assert!(s.next(&mut env).unwrap_err().is_interrupted());
    }
}
