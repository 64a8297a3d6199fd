use docql_core::id::ArenaId;
use thiserror::Error;

/// Result type local to docql-mem.
pub type Result<T> = std::result::Result<T, Error>;

/// Arena failures. All of these are invariant violations from the engine's
/// point of view; correct evaluation code never triggers them.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("unknown arena {0}")]
    UnknownArena(ArenaId),

    #[error("value {slot} is not a member of {arena}")]
    NotAMember { arena: ArenaId, slot: u32 },

    #[error("value {slot} is owned by {owner}, not {claimed}")]
    OwnershipViolation {
        slot: u32,
        owner: ArenaId,
        claimed: ArenaId,
    },

    #[error("dangling reference to slot {slot} (generation {generation})")]
    Dangling { slot: u32, generation: u32 },

    #[error("reachable value {slot} is owned by {owner}, which is neither the collected arena nor an ancestor")]
    Unrooted { slot: u32, owner: ArenaId },

    #[error("shadowing {child} into {parent} would create a cycle")]
    ShadowCycle { child: ArenaId, parent: ArenaId },
}

impl From<Error> for docql_core::error::Error {
    fn from(e: Error) -> Self {
        docql_core::error::Error::Invariant(e.to_string())
    }
}
