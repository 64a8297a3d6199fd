//! Generational slot heap partitioned into arenas.

use std::collections::{HashMap, HashSet};

use docql_core::id::ArenaId;

use crate::error::{Error, Result};

/// Reported estimates are the raw byte count scaled by this factor, so
/// thresholds account for bookkeeping the raw count ignores.
pub const MEM_ESTIMATE_MULTIPLIER: usize = 2;

/// Handle to a heap value. Valid while its slot generation matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ref {
    index: u32,
    generation: u32,
}

impl Ref {
    pub fn slot(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

struct Entry<T> {
    owner: ArenaId,
    value: T,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

#[derive(Default)]
struct ArenaState {
    /// Set once this arena has been shadowed; adds are redirected here.
    parent: Option<ArenaId>,
    /// Arenas that shadowed into this one; dropped along with it.
    shadows: Vec<ArenaId>,
    members: HashSet<u32>,
    raw_estimate: usize,
}

pub struct Heap<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    arenas: HashMap<ArenaId, ArenaState>,
    next_arena: u64,
}

impl<T> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Heap<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            arenas: HashMap::new(),
            next_arena: 0,
        }
    }

    const fn value_size() -> usize {
        std::mem::size_of::<T>()
    }

    pub fn create_arena(&mut self) -> ArenaId {
        let id = ArenaId::new(self.next_arena);
        self.next_arena += 1;
        self.arenas.insert(id, ArenaState::default());
        id
    }

    pub fn contains_arena(&self, arena: ArenaId) -> bool {
        self.arenas.contains_key(&arena)
    }

    fn state(&self, arena: ArenaId) -> Result<&ArenaState> {
        self.arenas.get(&arena).ok_or(Error::UnknownArena(arena))
    }

    fn state_mut(&mut self, arena: ArenaId) -> Result<&mut ArenaState> {
        self.arenas.get_mut(&arena).ok_or(Error::UnknownArena(arena))
    }

    /// Follow shadow links to the arena that actually holds members.
    pub fn resolve(&self, arena: ArenaId) -> Result<ArenaId> {
        let mut cur = arena;
        while let Some(parent) = self.state(cur)?.parent {
            cur = parent;
        }
        Ok(cur)
    }

    fn entry(&self, r: Ref) -> Result<&Entry<T>> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.entry.as_ref())
            .ok_or(Error::Dangling {
                slot: r.index,
                generation: r.generation,
            })
    }

    /// Register `value` with `arena` (or whatever it shadows into).
    pub fn add(&mut self, arena: ArenaId, value: T) -> Result<Ref> {
        let owner = self.resolve(arena)?;
        let entry = Entry { owner, value };
        let r = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                Ref {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                Ref {
                    index,
                    generation: 0,
                }
            }
        };
        let state = self.state_mut(owner)?;
        state.members.insert(r.index);
        state.raw_estimate += Self::value_size();
        Ok(r)
    }

    pub fn get(&self, r: Ref) -> Result<&T> {
        self.entry(r).map(|e| &e.value)
    }

    pub fn owner(&self, r: Ref) -> Option<ArenaId> {
        self.entry(r).ok().map(|e| e.owner)
    }

    /// Membership after shadow resolution. Stale handles are never members.
    pub fn has(&self, arena: ArenaId, r: Ref) -> bool {
        match (self.resolve(arena), self.entry(r)) {
            (Ok(owner), Ok(e)) => e.owner == owner,
            _ => false,
        }
    }

    /// Move `r` from `from` to `to`. `r` must be a direct member of `from`.
    pub fn yield_to(&mut self, from: ArenaId, to: ArenaId, r: Ref) -> Result<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        let owner = self.entry(r)?.owner;
        if owner != from {
            return Err(Error::OwnershipViolation {
                slot: r.index,
                owner,
                claimed: from,
            });
        }
        let size = Self::value_size();
        let src = self.state_mut(from)?;
        if !src.members.remove(&r.index) {
            return Err(Error::NotAMember {
                arena: from,
                slot: r.index,
            });
        }
        src.raw_estimate = src.raw_estimate.saturating_sub(size);
        let dst = self.state_mut(to)?;
        dst.members.insert(r.index);
        dst.raw_estimate += size;
        if let Some(e) = self.slots[r.index as usize].entry.as_mut() {
            e.owner = to;
        }
        Ok(())
    }

    /// Hand every member of `child` to `parent` and redirect future adds.
    /// Returns the raw estimate `child` carried, which `parent` absorbs.
    pub fn shadow(&mut self, child: ArenaId, parent: ArenaId) -> Result<usize> {
        let target = self.resolve(parent)?;
        if target == child || self.state(child)?.parent.is_some() {
            return Err(Error::ShadowCycle { child, parent });
        }
        let state = self.state_mut(child)?;
        let members = std::mem::take(&mut state.members);
        let carried = std::mem::take(&mut state.raw_estimate);
        state.parent = Some(target);
        for &index in &members {
            if let Some(e) = self.slots[index as usize].entry.as_mut() {
                e.owner = target;
            }
        }
        let dst = self.state_mut(target)?;
        dst.members.extend(members);
        dst.raw_estimate += carried;
        dst.shadows.push(child);
        Ok(carried)
    }

    /// Hand every member of `child` to `parent`, then forget `child` and
    /// any arenas that shadowed into it. Unlike `shadow`, later adds to
    /// `child` fail with `UnknownArena`.
    pub fn absorb(&mut self, child: ArenaId, parent: ArenaId) -> Result<usize> {
        let carried = self.shadow(child, parent)?;
        let target = self.resolve(parent)?;
        self.state_mut(target)?.shadows.retain(|&a| a != child);
        let mut pending = vec![child];
        while let Some(id) = pending.pop() {
            if let Some(s) = self.arenas.remove(&id) {
                debug_assert!(s.members.is_empty());
                pending.extend(s.shadows);
            }
        }
        Ok(carried)
    }

    /// Heuristic footprint of `arena`; shadowed arenas report their target.
    pub fn mem_estimate(&self, arena: ArenaId) -> Result<usize> {
        let owner = self.resolve(arena)?;
        Ok(self.state(owner)?.raw_estimate * MEM_ESTIMATE_MULTIPLIER)
    }

    pub fn len(&self, arena: ArenaId) -> Result<usize> {
        Ok(self.state(arena)?.members.len())
    }

    pub fn is_empty(&self, arena: ArenaId) -> Result<bool> {
        Ok(self.len(arena)? == 0)
    }

    pub fn members(&self, arena: ArenaId) -> Result<Vec<Ref>> {
        let mut out: Vec<Ref> = self
            .state(arena)?
            .members
            .iter()
            .map(|&index| Ref {
                index,
                generation: self.slots[index as usize].generation,
            })
            .collect();
        out.sort();
        Ok(out)
    }

    /// Drop every value still owned by `arena`, exactly once each, and forget
    /// the arena along with any arenas that shadowed into it. Returns the
    /// number of values dropped.
    pub fn destroy(&mut self, arena: ArenaId) -> Result<usize> {
        let state = self.arenas.remove(&arena).ok_or(Error::UnknownArena(arena))?;
        let mut dropped = 0;
        for index in state.members {
            let slot = &mut self.slots[index as usize];
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
                dropped += 1;
            }
        }
        let mut pending = state.shadows;
        while let Some(id) = pending.pop() {
            if let Some(s) = self.arenas.remove(&id) {
                debug_assert!(s.members.is_empty());
                pending.extend(s.shadows);
            }
        }
        Ok(dropped)
    }

    pub fn print_debug(&self, arena: ArenaId) -> Result<String> {
        let state = self.state(arena)?;
        let members = self
            .members(arena)?
            .iter()
            .map(|r| format!("#{}", r.index))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "{}({}) [{}]",
            state.members.len(),
            state.raw_estimate,
            members
        ))
    }

    /// Values alive across every arena.
    pub fn live_slots(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }
}
