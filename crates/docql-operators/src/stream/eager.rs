//! In-process stream variants.

use std::collections::VecDeque;

use docql_core::error::{Error, Result};
use docql_env::{DatumRef, Env, Node};

use super::DatumStream;
use crate::func::Func;

pub(super) struct ArrayStream {
    items: VecDeque<DatumRef>,
}

impl ArrayStream {
    pub(super) fn new(env: &Env, array: DatumRef) -> Result<Self> {
        match env.node(array)? {
            Node::Array(items) => Ok(Self::from_refs(items.clone())),
            other => Err(Error::type_mismatch("ARRAY", other.type_name())),
        }
    }

    pub(super) fn from_refs(items: Vec<DatumRef>) -> Self {
        Self {
            items: items.into(),
        }
    }

    pub(super) fn next(&mut self) -> Option<DatumRef> {
        self.items.pop_front()
    }

    pub(super) fn remaining(&self) -> impl Iterator<Item = DatumRef> + '_ {
        self.items.iter().copied()
    }
}

/// Flattens `f(x)` for each source element, draining one sub-stream fully
/// before pulling the next source element.
pub(super) struct ConcatMapStream {
    source: Box<DatumStream>,
    f: Func,
    current: Option<Box<DatumStream>>,
}

impl ConcatMapStream {
    pub(super) fn new(source: DatumStream, f: Func) -> Self {
        Self {
            source: Box::new(source),
            f,
            current: None,
        }
    }

    pub(super) fn source(&self) -> &DatumStream {
        &self.source
    }

    pub(super) fn current(&self) -> Option<&DatumStream> {
        self.current.as_deref()
    }

    pub(super) fn next(&mut self, env: &mut Env) -> Result<Option<DatumRef>> {
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(r) = cur.next(env)? {
                    return Ok(Some(r));
                }
                self.current = None;
            }
            let Some(outer) = self.source.next(env)? else {
                return Ok(None);
            };
            let sub = self.f.call(env, &[outer])?.as_seq(env)?;
            self.current = Some(Box::new(sub));
        }
    }
}

pub(super) struct SliceStream {
    source: Box<DatumStream>,
    index: usize,
    left: usize,
    right: Option<usize>,
}

impl SliceStream {
    pub(super) fn new(source: DatumStream, left: usize, right: Option<usize>) -> Self {
        Self {
            source: Box::new(source),
            index: 0,
            left,
            right,
        }
    }

    pub(super) fn source(&self) -> &DatumStream {
        &self.source
    }

    pub(super) fn next(&mut self, env: &mut Env) -> Result<Option<DatumRef>> {
        loop {
            if matches!(self.right, Some(r) if self.index >= r) {
                return Ok(None);
            }
            let Some(item) = self.source.next(env)? else {
                return Ok(None);
            };
            let i = self.index;
            self.index += 1;
            if i >= self.left {
                return Ok(Some(item));
            }
        }
    }
}

pub(super) struct ZipStream {
    source: Box<DatumStream>,
}

fn not_a_join() -> Error {
    Error::query("ZIP can only be called on the result of a join.")
}

impl ZipStream {
    pub(super) fn new(source: DatumStream) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub(super) fn source(&self) -> &DatumStream {
        &self.source
    }

    pub(super) fn next(&mut self, env: &mut Env) -> Result<Option<DatumRef>> {
        let Some(row) = self.source.next(env)? else {
            return Ok(None);
        };
        let (left, right) = match env.node(row)? {
            Node::Object(fields) => (
                fields.get("left").copied().ok_or_else(not_a_join)?,
                fields.get("right").copied(),
            ),
            _ => return Err(not_a_join()),
        };
        let mut merged = match env.node(left)? {
            Node::Object(fields) => fields.clone(),
            other => return Err(Error::type_mismatch("OBJECT", other.type_name())),
        };
        if let Some(right) = right {
            match env.node(right)? {
                Node::Object(fields) => {
                    merged.extend(fields.iter().map(|(k, v)| (k.clone(), *v)));
                }
                other => return Err(Error::type_mismatch("OBJECT", other.type_name())),
            }
        }
        Ok(Some(env.alloc(Node::Object(merged))?))
    }
}

/// Streams concatenated in order; each is drained before the next starts.
pub(super) struct UnionStream {
    streams: VecDeque<DatumStream>,
}

impl UnionStream {
    pub(super) fn new(streams: Vec<DatumStream>) -> Self {
        Self {
            streams: streams.into(),
        }
    }

    pub(super) fn streams(&self) -> impl Iterator<Item = &DatumStream> {
        self.streams.iter()
    }

    pub(super) fn next(&mut self, env: &mut Env) -> Result<Option<DatumRef>> {
        while let Some(front) = self.streams.front_mut() {
            if let Some(r) = front.next(env)? {
                return Ok(Some(r));
            }
            self.streams.pop_front();
        }
        Ok(None)
    }
}
