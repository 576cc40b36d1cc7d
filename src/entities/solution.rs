// Solution Entity - a proposed fix for a Problem
//
// Votable; the ledger is serialized as `votes`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, require_text, Author, Document, EntityKind, Votable};
use crate::error::Result;
use crate::vote::VoteLedger;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub problem_id: String,
    pub author: Author,
    #[serde(default)]
    pub votes: VoteLedger,
    #[serde(default)]
    pub total_votes: i64,
    pub created_at: DateTime<Utc>,
}

/// Request body for proposing a solution
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSolution {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub problem_id: String,
    pub author: Author,
}

impl Solution {
    /// Build a solution. The caller checks that `problem_id` resolves.
    pub fn create(draft: NewSolution) -> Result<Self> {
        require_text(&draft.title, "title")?;
        require_text(&draft.problem_id, "problemId")?;
        draft.author.validate("author")?;

        Ok(Solution {
            id: new_id(),
            title: draft.title,
            description: draft.description.unwrap_or_default(),
            problem_id: draft.problem_id,
            author: draft.author,
            votes: VoteLedger::new(),
            total_votes: 0,
            created_at: Utc::now(),
        })
    }
}

impl Document for Solution {
    const KIND: EntityKind = EntityKind::Solution;

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.problem_id)
    }

    fn owner_uid(&self) -> &str {
        &self.author.uid
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn total_votes(&self) -> i64 {
        self.total_votes
    }
}

impl Votable for Solution {
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
