//! Scope guards over the environment's checkpoint stack.
//!
//! A guard pushes arenas when built and pops them when dropped, so the stack
//! is restored on every exit path including `?` returns and panics. Guards
//! borrow the environment mutably and deref to it, so evaluation inside the
//! scope goes through the guard.

use std::ops::{Deref, DerefMut};

use docql_core::error::Result;
use docql_mem::{GcStats, PeakTracker};

use crate::env::Env;
use crate::node::{DatumRef, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Hand the scope's values to the enclosing arena.
    Merge,
    /// Drop every value allocated in the scope.
    Discard,
}

/// Pop every checkpoint at or above `depth`, applying `policy`.
fn unwind_to(env: &mut Env, depth: usize, policy: ExitPolicy) {
    while env.num_checkpoints() >= depth && env.num_checkpoints() > 0 {
        let res = match policy {
            ExitPolicy::Merge => env.merge_checkpoint(),
            ExitPolicy::Discard => env.discard_checkpoint(),
        };
        if let Err(e) = res {
            tracing::error!(error = %e, depth, ?policy, "checkpoint unwind failed");
            break;
        }
    }
}

pub struct EnvCheckpoint<'a> {
    env: &'a mut Env,
    policy: ExitPolicy,
    depth: usize,
}

impl<'a> EnvCheckpoint<'a> {
    pub fn new(env: &'a mut Env, policy: ExitPolicy) -> Self {
        env.checkpoint();
        let depth = env.num_checkpoints();
        Self { env, policy, depth }
    }

    /// Change what happens on exit.
    pub fn reset(&mut self, policy: ExitPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> ExitPolicy {
        self.policy
    }

    /// Collect this scope's arena around `root`.
    pub fn gc(&mut self, root: DatumRef) -> Result<GcStats> {
        self.env.gc(root)
    }
}

impl Deref for EnvCheckpoint<'_> {
    type Target = Env;
    fn deref(&self) -> &Env {
        self.env
    }
}

impl DerefMut for EnvCheckpoint<'_> {
    fn deref_mut(&mut self) -> &mut Env {
        self.env
    }
}

impl Drop for EnvCheckpoint<'_> {
    fn drop(&mut self) {
        unwind_to(self.env, self.depth, self.policy);
    }
}

/// Two nested checkpoints (gen2 outside, gen1 inside) realizing generational
/// collection for long evaluation loops.
///
/// Call `maybe_gc` after producing each result and `finalize` once at the
/// end. Dropping without `finalize` merges both generations uncollected.
pub struct GcCheckpoint<'a> {
    env: &'a mut Env,
    gen1: usize,
    gen2: usize,
    depth: usize,
    peak: PeakTracker,
}

impl<'a> GcCheckpoint<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        let node_size = std::mem::size_of::<Node>();
        let gen1 = env.config().gen1_cutoff_for(node_size);
        let gen2 = env.config().gen2_cutoff_for(node_size);
        Self::with_cutoffs(env, gen1, gen2)
    }

    pub fn with_cutoffs(env: &'a mut Env, gen1: usize, gen2: usize) -> Self {
        env.checkpoint(); // gen2
        let depth = env.num_checkpoints();
        env.checkpoint(); // gen1
        Self {
            env,
            gen1,
            gen2,
            depth,
            peak: PeakTracker::new(),
        }
    }

    pub fn gen2_cutoff(&self) -> usize {
        self.gen2
    }

    /// Highest gen1 estimate observed by `maybe_gc`.
    pub fn peak_estimate(&self) -> usize {
        self.peak.peak()
    }

    /// Collect gen1 if it is over budget, then gen2 if the merge pushed it
    /// over. A gen2 that stays near capacity after collection has its
    /// threshold grown fourfold.
    pub fn maybe_gc(&mut self, roots: &[DatumRef]) -> Result<()> {
        let estimate = self.env.current_estimate()?;
        self.peak.record(estimate);
        if estimate <= self.gen1 {
            return Ok(());
        }
        self.env.gc_roots(roots)?;
        self.env.merge_checkpoint()?;
        if self.env.current_estimate()? > self.gen2 {
            self.env.gc_roots(roots)?;
            if self.env.current_estimate()? > self.gen2 * 2 / 3 {
                self.gen2 *= 4;
                tracing::debug!(gen2 = self.gen2, "gen2 cutoff grown");
            }
        }
        self.env.checkpoint();
        Ok(())
    }

    /// Collect both generations around `roots` and merge them outward.
    /// An empty root set merges without collecting.
    pub fn finalize(self, roots: &[DatumRef]) -> Result<()> {
        if !roots.is_empty() {
            self.env.gc_roots(roots)?;
        }
        self.env.merge_checkpoint()?;
        if !roots.is_empty() {
            self.env.gc_roots(roots)?;
        }
        self.env.merge_checkpoint()?;
        Ok(())
    }
}

impl Deref for GcCheckpoint<'_> {
    type Target = Env;
    fn deref(&self) -> &Env {
        self.env
    }
}

impl DerefMut for GcCheckpoint<'_> {
    fn deref_mut(&mut self) -> &mut Env {
        self.env
    }
}

impl Drop for GcCheckpoint<'_> {
    fn drop(&mut self) {
        unwind_to(self.env, self.depth, ExitPolicy::Merge);
    }
}
