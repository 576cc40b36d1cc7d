// Bounty Entity - money pledged toward a Solution
//
// Votable; the ledger is serialized as `votes`. The owner is the sponsor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, require_text, Author, Document, EntityKind, Votable};
use crate::error::{Result, TownhallError};
use crate::vote::VoteLedger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BountyStatus {
    #[default]
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl BountyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BountyStatus::Open => "open",
            BountyStatus::InProgress => "in_progress",
            BountyStatus::Completed => "completed",
            BountyStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounty {
    pub id: String,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub solution_id: String,
    pub sponsor: Author,
    #[serde(default)]
    pub votes: VoteLedger,
    #[serde(default)]
    pub total_votes: i64,
    #[serde(default)]
    pub status: BountyStatus,
    pub created_at: DateTime<Utc>,
}

/// Request body for pledging a bounty
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBounty {
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    pub solution_id: String,
    pub sponsor: Author,
}

impl Bounty {
    /// Build an open bounty. The caller checks that `solution_id` resolves.
    pub fn create(draft: NewBounty) -> Result<Self> {
        if !draft.amount.is_finite() || draft.amount <= 0.0 {
            return Err(TownhallError::invalid("amount must be a positive number"));
        }
        require_text(&draft.solution_id, "solutionId")?;
        draft.sponsor.validate("sponsor")?;

        Ok(Bounty {
            id: new_id(),
            amount: draft.amount,
            description: draft.description.unwrap_or_default(),
            solution_id: draft.solution_id,
            sponsor: draft.sponsor,
            votes: VoteLedger::new(),
            total_votes: 0,
            status: BountyStatus::Open,
            created_at: Utc::now(),
        })
    }
}

impl Document for Bounty {
    const KIND: EntityKind = EntityKind::Bounty;

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.solution_id)
    }

    fn owner_uid(&self) -> &str {
        &self.sponsor.uid
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn total_votes(&self) -> i64 {
        self.total_votes
    }
}

impl Votable for Bounty {
    fn ledger(&self) -> &VoteLedger {
        &self.votes
    }

    fn ledger_mut(&mut self) -> &mut VoteLedger {
        &mut self.votes
    }

    fn set_total_votes(&mut self, total: i64) {
        self.total_votes = total;
    }
}
