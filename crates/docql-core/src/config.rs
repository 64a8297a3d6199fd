//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default cursor batch size: small in debug builds so tests exercise
/// multi-round-trip paths, larger in release builds.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = if cfg!(debug_assertions) { 5 } else { 1000 };

/// Release-build gen1 reclamation threshold.
pub const RELEASE_GEN1_CUTOFF_BYTES: usize = 8 * 1024 * 1024;

/// Debug-build gen1 threshold, in arena nodes; multiplied by the node size.
pub const DEBUG_GEN1_CUTOFF_NODES: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Documents per cursor response. Zero means unlimited.
    pub max_chunk_size: usize,

    /// Idle age after which a cursor may be evicted. Zero means never.
    /// No eviction policy reads this yet.
    pub max_cursor_age_secs: u64,

    /// Arena estimate above which the gen1 checkpoint collects. `None` picks
    /// the build-dependent default (see `gen1_cutoff_for`).
    pub gen1_cutoff_bytes: Option<usize>,

    /// Gen2 threshold as a multiple of the gen1 threshold.
    pub gen2_size_multiplier: usize,

    /// Hard ceiling on elements buffered by a sort.
    pub sort_element_limit: usize,

    /// Rows requested from storage per lazy-scan page.
    pub scan_batch_size: usize,

    /// Poll interval for blocking metadata waits.
    pub metadata_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_cursor_age_secs: 0,
            gen1_cutoff_bytes: None,
            gen2_size_multiplier: 8,
            sort_element_limit: 1_000_000,
            scan_batch_size: 64,
            metadata_poll_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `DOCQL_MAX_CHUNK_SIZE`: documents per cursor batch
    /// - `DOCQL_MAX_CURSOR_AGE_SECS`: idle cursor age
    /// - `DOCQL_GEN1_CUTOFF_BYTES`: gen1 GC threshold
    /// - `DOCQL_GEN2_SIZE_MULTIPLIER`: gen2 threshold multiplier
    /// - `DOCQL_SORT_ELEMENT_LIMIT`: sort buffer ceiling
    /// - `DOCQL_SCAN_BATCH_SIZE`: lazy scan page size
    /// - `DOCQL_METADATA_POLL_MS`: metadata wait poll interval
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("DOCQL_MAX_CHUNK_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_chunk_size = v;
            }
        }

        if let Ok(s) = std::env::var("DOCQL_MAX_CURSOR_AGE_SECS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_cursor_age_secs = v;
            }
        }

        if let Ok(s) = std::env::var("DOCQL_GEN1_CUTOFF_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.gen1_cutoff_bytes = Some(v);
            }
        }

        if let Ok(s) = std::env::var("DOCQL_GEN2_SIZE_MULTIPLIER") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.gen2_size_multiplier = v;
            }
        }

        if let Ok(s) = std::env::var("DOCQL_SORT_ELEMENT_LIMIT") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.sort_element_limit = v;
            }
        }

        if let Ok(s) = std::env::var("DOCQL_SCAN_BATCH_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.scan_batch_size = v;
            }
        }

        if let Ok(s) = std::env::var("DOCQL_METADATA_POLL_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.metadata_poll_ms = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size > i32::MAX as usize {
            return Err(Error::Config(format!(
                "max_chunk_size {} exceeds {}",
                self.max_chunk_size,
                i32::MAX
            )));
        }
        if self.gen2_size_multiplier == 0 {
            return Err(Error::Config("gen2_size_multiplier must be positive".into()));
        }
        if self.scan_batch_size == 0 {
            return Err(Error::Config("scan_batch_size must be positive".into()));
        }
        if self.sort_element_limit == 0 {
            return Err(Error::Config("sort_element_limit must be positive".into()));
        }
        Ok(())
    }

    /// Gen1 threshold for arenas whose nodes are `node_size` bytes each.
    pub fn gen1_cutoff_for(&self, node_size: usize) -> usize {
        self.gen1_cutoff_bytes.unwrap_or(if cfg!(debug_assertions) {
            // Scaled so tests trigger collection after a handful of nodes.
            node_size * 2 * DEBUG_GEN1_CUTOFF_NODES
        } else {
            RELEASE_GEN1_CUTOFF_BYTES
        })
    }

    pub fn gen2_cutoff_for(&self, node_size: usize) -> usize {
        self.gen1_cutoff_for(node_size) * self.gen2_size_multiplier
    }
}
