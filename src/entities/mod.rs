// Entity Models
//
// Problem, Solution and Bounty are votable aggregate roots: each embeds its
// own vote ledger and a totalVotes field derived from it. Comment is a plain
// document attached to a Problem.
//
// Each entity has:
// - Stable identity (UUID) assigned at creation, never changes
// - A JSON document representation (what the store persists)
// - An owner uid (author / sponsor) who alone may delete it

pub mod bounty;
pub mod comment;
pub mod problem;
pub mod solution;

pub use bounty::{Bounty, BountyStatus, NewBounty};
pub use comment::{Comment, NewComment};
pub use problem::{
    GeoPoint, NewProblem, NewRelationship, Problem, ProblemRelationship, RelationshipKind,
    RelationshipStats,
};
pub use solution::{NewSolution, Solution};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TownhallError};
use crate::vote::{compute_tally, Direction, VoteLedger, VoteState};

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Problem,
    Solution,
    Bounty,
    Comment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Problem,
        EntityKind::Solution,
        EntityKind::Bounty,
        EntityKind::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Problem => "problem",
            EntityKind::Solution => "solution",
            EntityKind::Bounty => "bounty",
            EntityKind::Comment => "comment",
        }
    }

    /// Backing table. Always a compile-time constant, safe to splice into SQL.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Problem => "problems",
            EntityKind::Solution => "solutions",
            EntityKind::Bounty => "bounties",
            EntityKind::Comment => "comments",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Problem => "Problem",
            EntityKind::Solution => "Solution",
            EntityKind::Bounty => "Bounty",
            EntityKind::Comment => "Comment",
        };
        f.write_str(label)
    }
}

// ============================================================================
// AUTHOR
// ============================================================================

/// Identity as supplied by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    pub uid: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "photoURL")]
    pub photo_url: String,
}

impl Author {
    pub fn new(uid: &str, name: &str) -> Self {
        Author {
            uid: uid.to_string(),
            name: name.to_string(),
            photo_url: String::new(),
        }
    }

    pub fn validate(&self, role: &str) -> Result<()> {
        if self.uid.trim().is_empty() {
            return Err(TownhallError::invalid(format!("{}.uid is required", role)));
        }
        Ok(())
    }
}

// ============================================================================
// DOCUMENT / VOTABLE SEAMS
// ============================================================================

/// Anything the store can persist as a JSON document row.
pub trait Document: Serialize + DeserializeOwned + Send {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// Id of the owning parent document, if any (problem of a solution, ...)
    fn parent_id(&self) -> Option<&str>;

    /// uid allowed to delete this document
    fn owner_uid(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    fn total_votes(&self) -> i64 {
        0
    }
}

/// A document carrying a vote ledger and its derived tally.
pub trait Votable: Document {
    fn ledger(&self) -> &VoteLedger;

    fn ledger_mut(&mut self) -> &mut VoteLedger;

    /// Only ever called with `compute_tally(self.ledger())`.
    fn set_total_votes(&mut self, total: i64);

    /// Apply the toggle rule for `voter_id`, then recompute the tally from
    /// scratch. Returns the voter's resulting state.
    fn cast_vote(&mut self, voter_id: &str, direction: Direction) -> Result<VoteState> {
        let state = self.ledger_mut().apply(voter_id, direction)?;
        let total = compute_tally(self.ledger());
        self.set_total_votes(total);
        Ok(state)
    }
}

pub(crate) fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TownhallError::invalid(format!("{} is required", field)));
    }
    Ok(())
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
