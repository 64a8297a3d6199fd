//! Copying collection between arenas.
//!
//! Collection walks the value graph from a set of roots. Every reachable value
//! owned by the old arena is yielded to the new one and its children are
//! walked in turn; a reachable value owned by an ancestor arena is left in
//! place and not descended into. Whatever the old arena still owns afterwards
//! is unreachable and is dropped with it.

use docql_core::id::ArenaId;

use crate::arena::{Heap, Ref};
use crate::error::{Error, Result};

/// Values that hold handles to other heap values.
pub trait Trace {
    /// Push every handle directly referenced by `self`.
    fn trace(&self, out: &mut Vec<Ref>);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Reachable values moved from the old arena to the new one.
    pub moved: usize,
    /// Reachable values left in an ancestor arena.
    pub retained: usize,
    /// Unreachable values dropped with the old arena.
    pub freed: usize,
}

impl<T: Trace> Heap<T> {
    /// Yield everything reachable from `roots` out of `old` into `new`.
    ///
    /// `ancestors` lists the arenas a reachable value may legitimately live in
    /// besides `old`. Any other owner is an invariant violation.
    pub fn collect(
        &mut self,
        old: ArenaId,
        new: ArenaId,
        roots: &[Ref],
        ancestors: &[ArenaId],
    ) -> Result<GcStats> {
        let old = self.resolve(old)?;
        let new = self.resolve(new)?;
        let ancestors = ancestors
            .iter()
            .map(|&a| self.resolve(a))
            .collect::<Result<Vec<_>>>()?;

        let mut stats = GcStats::default();
        let mut work: Vec<Ref> = roots.to_vec();
        let mut children = Vec::new();
        while let Some(r) = work.pop() {
            let owner = match self.owner(r) {
                Some(owner) => owner,
                None => {
                    return Err(Error::Dangling {
                        slot: r.slot(),
                        generation: r.generation(),
                    })
                }
            };
            if owner == new {
                continue;
            }
            if owner == old {
                self.yield_to(old, new, r)?;
                stats.moved += 1;
                self.get(r)?.trace(&mut children);
                work.append(&mut children);
            } else if ancestors.contains(&owner) {
                stats.retained += 1;
            } else {
                return Err(Error::Unrooted {
                    slot: r.slot(),
                    owner,
                });
            }
        }
        Ok(stats)
    }

    /// Collect `arena` into a fresh arena and destroy the old one.
    /// Returns the replacement arena id.
    pub fn gc(
        &mut self,
        arena: ArenaId,
        roots: &[Ref],
        ancestors: &[ArenaId],
    ) -> Result<(ArenaId, GcStats)> {
        let fresh = self.create_arena();
        let mut stats = match self.collect(arena, fresh, roots, ancestors) {
            Ok(stats) => stats,
            Err(e) => {
                // Leave the old arena intact; hand moved values back.
                for r in self.members(fresh)? {
                    self.yield_to(fresh, arena, r)?;
                }
                self.destroy(fresh)?;
                return Err(e);
            }
        };
        stats.freed = self.destroy(arena)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            old = %arena,
            new = %fresh,
            moved = stats.moved,
            retained = stats.retained,
            freed = stats.freed,
            "arena gc"
        );
        Ok((fresh, stats))
    }
}
