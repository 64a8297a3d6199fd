//! The per-query execution environment.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use docql_core::config::EngineConfig;
use docql_core::datum::Datum;
use docql_core::error::{Error, Result};
use docql_core::id::{ArenaId, VarId};
use docql_core::signal::Interruptor;
use docql_io::metadata::{ClusterMetadata, MetadataView};
use docql_io::storage::{Read, ReadResponse, Storage, Write, WriteResponse};
use docql_io::MemoryStore;
use docql_mem::{GcStats, Heap};

use crate::node::{DatumRef, Node};

/// Fresh ids at or above this value may bind the implicit variable.
const MIN_NORMAL_GENSYM: i64 = -1_000_000;

pub struct Env {
    heap: Heap<Node>,
    /// Checkpoint stack; `bags[0]` is the root arena and is never popped.
    bags: Vec<ArenaId>,
    vars: HashMap<VarId, Vec<DatumRef>>,
    implicit: Vec<DatumRef>,
    scope_stack: Vec<Vec<VarId>>,
    next_gensym: i64,
    optargs: BTreeMap<String, Datum>,
    interruptor: Interruptor,
    storage: Arc<dyn Storage>,
    metadata: MetadataView,
    config: EngineConfig,
}

impl Env {
    pub fn new(
        storage: Arc<dyn Storage>,
        metadata: MetadataView,
        interruptor: Interruptor,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut heap = Heap::new();
        let root = heap.create_arena();
        Ok(Self {
            heap,
            bags: vec![root],
            vars: HashMap::new(),
            implicit: Vec::new(),
            scope_stack: Vec::new(),
            next_gensym: -2,
            optargs: BTreeMap::new(),
            interruptor,
            storage,
            metadata,
            config,
        })
    }

    /// An environment with an empty in-memory store and no cluster metadata.
    pub fn detached(interruptor: Interruptor) -> Self {
        let mut heap = Heap::new();
        let root = heap.create_arena();
        Self {
            heap,
            bags: vec![root],
            vars: HashMap::new(),
            implicit: Vec::new(),
            scope_stack: Vec::new(),
            next_gensym: -2,
            optargs: BTreeMap::new(),
            interruptor,
            storage: Arc::new(MemoryStore::new()),
            metadata: MetadataView::new(ClusterMetadata::default()),
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- arena ------------------------------------------------------------

    pub fn current_arena(&self) -> ArenaId {
        self.bags[self.bags.len() - 1]
    }

    /// Checkpoints pushed above the root arena.
    pub fn num_checkpoints(&self) -> usize {
        self.bags.len() - 1
    }

    pub fn alloc(&mut self, node: Node) -> Result<DatumRef> {
        let arena = self.current_arena();
        Ok(self.heap.add(arena, node)?)
    }

    /// Copy an owned datum tree into the current arena.
    pub fn alloc_datum(&mut self, d: &Datum) -> Result<DatumRef> {
        let node = match d {
            Datum::Null => Node::Null,
            Datum::Bool(b) => Node::Bool(*b),
            Datum::Num(n) => Node::Num(*n),
            Datum::Str(s) => Node::Str(s.clone()),
            Datum::Array(items) => Node::Array(
                items
                    .iter()
                    .map(|i| self.alloc_datum(i))
                    .collect::<Result<_>>()?,
            ),
            Datum::Object(fields) => {
                let mut out = BTreeMap::new();
                for (k, v) in fields {
                    out.insert(k.clone(), self.alloc_datum(v)?);
                }
                Node::Object(out)
            }
        };
        self.alloc(node)
    }

    pub fn node(&self, r: DatumRef) -> Result<&Node> {
        Ok(self.heap.get(r)?)
    }

    /// Rebuild the owned tree rooted at `r`.
    pub fn to_datum(&self, r: DatumRef) -> Result<Datum> {
        Ok(match self.node(r)? {
            Node::Null => Datum::Null,
            Node::Bool(b) => Datum::Bool(*b),
            Node::Num(n) => Datum::Num(*n),
            Node::Str(s) => Datum::Str(s.clone()),
            Node::Array(items) => Datum::Array(
                items
                    .iter()
                    .map(|&i| self.to_datum(i))
                    .collect::<Result<_>>()?,
            ),
            Node::Object(fields) => {
                let mut out = BTreeMap::new();
                for (k, &v) in fields {
                    out.insert(k.clone(), self.to_datum(v)?);
                }
                Datum::Object(out)
            }
        })
    }

    pub fn get_field(&self, r: DatumRef, key: &str) -> Result<Option<DatumRef>> {
        match self.node(r)? {
            Node::Object(fields) => Ok(fields.get(key).copied()),
            other => Err(Error::type_mismatch("OBJECT", other.type_name())),
        }
    }

    /// Datum truthiness of a heap value.
    pub fn is_truthy(&self, r: DatumRef) -> Result<bool> {
        Ok(!matches!(self.node(r)?, Node::Null | Node::Bool(false)))
    }

    /// Whether some arena on the checkpoint stack owns `r`.
    pub fn is_owned(&self, r: DatumRef) -> bool {
        self.bags.iter().any(|&b| self.heap.has(b, r))
    }

    pub fn live_values(&self) -> usize {
        self.heap.live_slots()
    }

    /// Arenas the heap still tracks, including the root.
    pub fn arena_count(&self) -> usize {
        self.heap.arena_count()
    }

    pub fn current_estimate(&self) -> Result<usize> {
        Ok(self.heap.mem_estimate(self.current_arena())?)
    }

    pub fn print_arena(&self) -> Result<String> {
        Ok(self.heap.print_debug(self.current_arena())?)
    }

    /// Push a fresh arena. Prefer `EnvCheckpoint`, which guarantees the pop.
    pub fn checkpoint(&mut self) {
        let arena = self.heap.create_arena();
        self.bags.push(arena);
    }

    /// Pop the top arena, handing its members to the one below.
    pub fn merge_checkpoint(&mut self) -> Result<()> {
        if self.bags.len() < 2 {
            return Err(Error::invariant("merge_checkpoint with no checkpoint"));
        }
        let child = self.bags[self.bags.len() - 1];
        let parent = self.bags[self.bags.len() - 2];
        self.heap.absorb(child, parent)?;
        self.bags.pop();
        Ok(())
    }

    /// Pop the top arena and drop everything it owns.
    pub fn discard_checkpoint(&mut self) -> Result<()> {
        if self.bags.len() < 2 {
            return Err(Error::invariant("discard_checkpoint with no checkpoint"));
        }
        let child = self.bags[self.bags.len() - 1];
        self.heap.destroy(child)?;
        self.bags.pop();
        Ok(())
    }

    pub fn gc(&mut self, root: DatumRef) -> Result<GcStats> {
        self.gc_roots(&[root])
    }

    /// Collect the current arena, keeping what `roots` and every live
    /// variable binding reach.
    pub fn gc_roots(&mut self, roots: &[DatumRef]) -> Result<GcStats> {
        let mut all: Vec<DatumRef> = roots.to_vec();
        all.extend(self.vars.values().flatten().copied());
        all.extend(self.implicit.iter().copied());
        let depth = self.bags.len() - 1;
        let (old, ancestors) = (self.bags[depth], self.bags[..depth].to_vec());
        let (fresh, stats) = self.heap.gc(old, &all, &ancestors)?;
        self.bags[depth] = fresh;
        tracing::trace!(
            depth,
            moved = stats.moved,
            retained = stats.retained,
            freed = stats.freed,
            "env gc"
        );
        Ok(stats)
    }

    // ---- variables --------------------------------------------------------

    /// Mint a fresh variable id. Ids minted with `allow_implicit == false`
    /// land below `MIN_NORMAL_GENSYM` and never bind the implicit variable.
    pub fn gensym(&mut self, allow_implicit: bool) -> Result<VarId> {
        if !(self.next_gensym < 0 && self.next_gensym >= MIN_NORMAL_GENSYM) {
            return Err(Error::invariant("fresh variable ids exhausted"));
        }
        let mut id = self.next_gensym;
        self.next_gensym -= 1;
        if !allow_implicit {
            id += MIN_NORMAL_GENSYM;
        }
        Ok(VarId::new(id))
    }

    pub fn var_allows_implicit(var: VarId) -> bool {
        var.get() >= MIN_NORMAL_GENSYM
    }

    pub fn push_var(&mut self, var: VarId, value: DatumRef) {
        self.vars.entry(var).or_default().push(value);
    }

    pub fn top_var(&self, var: VarId) -> Result<DatumRef> {
        self.vars
            .get(&var)
            .and_then(|s| s.last().copied())
            .ok_or_else(|| Error::query(format!("Unrecognized variable {}", var.get())))
    }

    pub fn pop_var(&mut self, var: VarId) -> Result<()> {
        let stack = self
            .vars
            .get_mut(&var)
            .ok_or_else(|| Error::invariant(format!("pop of unbound variable {}", var.get())))?;
        stack
            .pop()
            .ok_or_else(|| Error::invariant(format!("pop of unbound variable {}", var.get())))?;
        if stack.is_empty() {
            self.vars.remove(&var);
        }
        Ok(())
    }

    pub fn push_implicit(&mut self, value: DatumRef) {
        self.implicit.push(value);
    }

    pub fn top_implicit(&self) -> Result<DatumRef> {
        match self.implicit.as_slice() {
            [] => Err(Error::query(
                "The implicit variable is not defined in this context.",
            )),
            [only] => Ok(*only),
            _ => Err(Error::query(
                "Cannot use the implicit variable in nested queries.  Use functions instead.",
            )),
        }
    }

    pub fn pop_implicit(&mut self) -> Result<()> {
        self.implicit
            .pop()
            .map(|_| ())
            .ok_or_else(|| Error::invariant("pop_implicit on empty stack"))
    }

    pub fn implicit_depth(&self) -> usize {
        self.implicit.len()
    }

    /// Innermost binding of every bound variable.
    pub fn dump_scope(&self) -> Result<BTreeMap<VarId, Datum>> {
        let mut out = BTreeMap::new();
        for (var, stack) in &self.vars {
            if let Some(&top) = stack.last() {
                out.insert(*var, self.to_datum(top)?);
            }
        }
        Ok(out)
    }

    /// Re-enter a scope captured by `dump_scope`.
    pub fn push_scope(&mut self, scope: &BTreeMap<VarId, Datum>) -> Result<()> {
        let mut frame = Vec::with_capacity(scope.len());
        for (var, d) in scope {
            let r = self.alloc_datum(d)?;
            self.push_var(*var, r);
            frame.push(*var);
        }
        self.scope_stack.push(frame);
        Ok(())
    }

    pub fn pop_scope(&mut self) -> Result<()> {
        let frame = self
            .scope_stack
            .pop()
            .ok_or_else(|| Error::invariant("pop_scope with no pushed scope"))?;
        for var in frame {
            self.pop_var(var)?;
        }
        Ok(())
    }

    // ---- optional arguments -----------------------------------------------

    /// Returns true if `key` was already present; the existing value wins.
    pub fn add_optarg(&mut self, key: &str, value: Datum) -> bool {
        if self.optargs.contains_key(key) {
            return true;
        }
        self.optargs.insert(key.to_string(), value);
        false
    }

    pub fn init_optargs(&mut self, optargs: BTreeMap<String, Datum>) -> Result<()> {
        if !self.optargs.is_empty() {
            return Err(Error::invariant("init_optargs on a populated table"));
        }
        self.optargs = optargs;
        Ok(())
    }

    pub fn get_optarg(&self, key: &str) -> Option<&Datum> {
        self.optargs.get(key)
    }

    pub fn all_optargs(&self) -> &BTreeMap<String, Datum> {
        &self.optargs
    }

    /// Optional arguments seen by a nested evaluation: inherited ones,
    /// overridden by `local`.
    pub fn scoped_optargs(&self, local: &BTreeMap<String, Datum>) -> BTreeMap<String, Datum> {
        let mut out = self.optargs.clone();
        out.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    // ---- interruption and collaborators -------------------------------------

    pub fn interruptor(&self) -> &Interruptor {
        &self.interruptor
    }

    /// Rebind to the signal of the request currently driving evaluation.
    pub fn set_interruptor(&mut self, interruptor: Interruptor) {
        self.interruptor = interruptor;
    }

    pub fn check_interrupted(&self) -> Result<()> {
        self.interruptor.check()
    }

    pub fn read(&self, query: &Read) -> Result<ReadResponse> {
        self.check_interrupted()?;
        tracing::trace!(?query, "storage read");
        Ok(self.storage.read(query, &self.interruptor)?)
    }

    pub fn write(&self, query: &Write) -> Result<WriteResponse> {
        self.check_interrupted()?;
        tracing::trace!("storage write");
        Ok(self.storage.write(query, &self.interruptor)?)
    }

    pub fn metadata(&self) -> &MetadataView {
        &self.metadata
    }

    /// Join `update` into the cluster metadata and block until the watched
    /// view reflects it or the query is interrupted.
    pub fn join_and_wait_to_propagate(&self, update: &ClusterMetadata) -> Result<()> {
        self.metadata.join(update)?;
        self.metadata.watchable().run_until_satisfied(
            |current| current.contains(update),
            &self.interruptor,
            Duration::from_millis(self.config.metadata_poll_ms),
        )?;
        Ok(())
    }
}
