//! Per-element transforms and reducing terminals shared by every stream.
//!
//! Eager streams apply a `Transform` as a wrapper around their source; lazy
//! streams stack transforms and apply them as rows come off storage pages.
//! Terminals fold either kind through the same accumulator, so eager and
//! lazy evaluation agree element for element.

use std::collections::{BTreeMap, HashMap};

use docql_core::datum::Datum;
use docql_core::error::{Error, Result};
use docql_core::hash::{hash_datum, Hash256};
use docql_env::{DatumRef, Env, GcCheckpoint, Node};

use super::DatumStream;
use crate::func::Func;

#[derive(Debug, Clone)]
pub enum Transform {
    Map(Func),
    Filter(Func),
    ConcatMap(Func),
}

impl Transform {
    /// Apply to one element, appending zero or more outputs.
    pub fn apply(&self, env: &mut Env, item: DatumRef, out: &mut Vec<DatumRef>) -> Result<()> {
        match self {
            Transform::Map(f) => out.push(f.call_datum(env, &[item])?),
            Transform::Filter(f) => {
                if f.filter_call(env, item)? {
                    out.push(item);
                }
            }
            Transform::ConcatMap(f) => {
                let mut sub = f.call(env, &[item])?.as_seq(env)?;
                while let Some(r) = sub.next(env)? {
                    out.push(r);
                }
            }
        }
        Ok(())
    }
}

/// Run `item` through `transforms` in order.
pub fn apply_all(
    env: &mut Env,
    transforms: &[Transform],
    item: DatumRef,
    out: &mut Vec<DatumRef>,
) -> Result<()> {
    let mut cur = vec![item];
    let mut next = Vec::new();
    for t in transforms {
        for r in cur.drain(..) {
            t.apply(env, r, &mut next)?;
        }
        std::mem::swap(&mut cur, &mut next);
    }
    out.append(&mut cur);
    Ok(())
}

#[derive(Debug, Clone)]
pub enum Terminal {
    Count,
    Reduce {
        base: Option<DatumRef>,
        f: Func,
    },
    GroupedMapReduce {
        group: Func,
        map: Func,
        base: Option<DatumRef>,
        reduce: Func,
    },
}

pub enum Accumulator {
    Count(usize),
    Reduce(Option<DatumRef>),
    Groups {
        index: HashMap<Hash256, usize>,
        groups: Vec<(Datum, DatumRef, DatumRef)>,
    },
}

impl Accumulator {
    /// Heap values the accumulator keeps alive.
    pub fn roots(&self) -> Vec<DatumRef> {
        match self {
            Accumulator::Count(_) => Vec::new(),
            Accumulator::Reduce(acc) => acc.iter().copied().collect(),
            Accumulator::Groups { groups, .. } => groups
                .iter()
                .flat_map(|(_, g, acc)| [*g, *acc])
                .collect(),
        }
    }
}

impl Terminal {
    pub fn start(&self) -> Accumulator {
        match self {
            Terminal::Count => Accumulator::Count(0),
            Terminal::Reduce { base, .. } => Accumulator::Reduce(*base),
            Terminal::GroupedMapReduce { .. } => Accumulator::Groups {
                index: HashMap::new(),
                groups: Vec::new(),
            },
        }
    }

    pub fn accumulate(&self, env: &mut Env, acc: &mut Accumulator, item: DatumRef) -> Result<()> {
        match (self, acc) {
            (Terminal::Count, Accumulator::Count(n)) => *n += 1,
            (Terminal::Reduce { f, .. }, Accumulator::Reduce(cur)) => {
                *cur = Some(match *cur {
                    None => item,
                    Some(prev) => f.call_datum(env, &[prev, item])?,
                });
            }
            (
                Terminal::GroupedMapReduce {
                    group,
                    map,
                    base,
                    reduce,
                },
                Accumulator::Groups { index, groups },
            ) => {
                let g = group.call_datum(env, &[item])?;
                let m = map.call_datum(env, &[item])?;
                let key = env.to_datum(g)?;
                let h = hash_datum(&key);
                match index.get(&h) {
                    Some(&i) => {
                        let prev = groups[i].2;
                        groups[i].2 = reduce.call_datum(env, &[prev, m])?;
                    }
                    None => {
                        let first = match base {
                            Some(b) => reduce.call_datum(env, &[*b, m])?,
                            None => m,
                        };
                        index.insert(h, groups.len());
                        groups.push((key, g, first));
                    }
                }
            }
            _ => return Err(Error::invariant("terminal/accumulator mismatch")),
        }
        Ok(())
    }

    pub fn finish(&self, env: &mut Env, acc: Accumulator) -> Result<DatumRef> {
        match acc {
            Accumulator::Count(n) => env.alloc(Node::Num(n as f64)),
            Accumulator::Reduce(Some(r)) => Ok(r),
            Accumulator::Reduce(None) => Err(Error::query(
                "Cannot reduce over an empty stream with no base.",
            )),
            Accumulator::Groups { mut groups, .. } => {
                groups.sort_by(|a, b| a.0.compare(&b.0));
                let mut rows = Vec::with_capacity(groups.len());
                for (_, g, reduction) in groups {
                    let fields = BTreeMap::from([
                        ("group".to_string(), g),
                        ("reduction".to_string(), reduction),
                    ]);
                    rows.push(env.alloc(Node::Object(fields))?);
                }
                env.alloc(Node::Array(rows))
            }
        }
    }
}

/// Drain `stream` into `terminal` under a generational GC checkpoint.
pub fn fold(env: &mut Env, mut stream: DatumStream, terminal: &Terminal) -> Result<DatumRef> {
    let mut gc = GcCheckpoint::new(env);
    let mut acc = terminal.start();
    let mut batch = Vec::new();
    loop {
        stream.pull_chunk(&mut gc, &mut batch)?;
        if batch.is_empty() {
            break;
        }
        for r in batch.drain(..) {
            terminal.accumulate(&mut gc, &mut acc, r)?;
        }
        let mut roots = acc.roots();
        roots.extend(stream.retained());
        gc.maybe_gc(&roots)?;
    }
    let out = terminal.finish(&mut gc, acc)?;
    gc.finalize(&[out])?;
    Ok(out)
}
