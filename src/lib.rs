// townhall - Core Library
// Civic issue tracker: problems, solutions, bounties, comments and the
// per-user vote ledger shared by every votable entity.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod verification;
pub mod vote;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    count, delete_document, get_document, get_events_for_entity, get_versioned, insert_document,
    insert_event, list_by_parent, list_documents, open_database, require_document, setup_database,
    top_by_votes, Event, Versioned,
};
pub use engine::{VoteEngine, VoteOutcome};
pub use entities::{
    Author, Bounty, BountyStatus, Comment, Document, EntityKind, Problem, Solution, Votable,
};
pub use error::{Result, TownhallError};
pub use verification::VerificationCodes;
pub use vote::{apply_vote, compute_tally, next_state, Direction, VoteLedger, VoteState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
