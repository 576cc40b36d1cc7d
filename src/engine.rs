// Vote Engine - one generic read-modify-write for every votable kind
//
// vote(entity, voter, direction):
//   1. load entity + row version        (NotFound if absent)
//   2. apply toggle rule to its ledger
//   3. recompute tally from the ledger
//   4. compare-and-swap on the version  (audit event in the same txn)
//   5. on a lost race, start over from 1, at most `max_attempts` times
//
// Two voters racing on the same entity can no longer clobber each other: the
// loser's CAS fails, it reloads the winner's ledger and re-applies its vote.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{self, Event, Versioned};
use crate::entities::{Document, Votable};
use crate::error::{Result, TownhallError};
use crate::vote::{Direction, VoteState};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// An updated entity annotated with the caller's resulting vote, so the
/// client can highlight the right button without a second lookup.
#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome<T> {
    #[serde(flatten)]
    pub entity: T,

    #[serde(rename = "userVote")]
    pub user_vote: Option<Direction>,
}

#[derive(Debug, Clone, Copy)]
pub struct VoteEngine {
    max_attempts: u32,
}

impl Default for VoteEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl VoteEngine {
    pub fn new(max_attempts: u32) -> Self {
        VoteEngine {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Cast (or retract) `voter_id`'s vote on entity `entity_id`.
    pub fn vote<T: Votable>(
        &self,
        conn: &Connection,
        entity_id: &str,
        voter_id: &str,
        direction: Direction,
    ) -> Result<VoteOutcome<T>> {
        let mut resulting = VoteState::NoVote;

        let entity = self.update::<T, _>(conn, entity_id, voter_id, "vote_cast", |doc| {
            resulting = doc.cast_vote(voter_id, direction)?;
            Ok(serde_json::json!({
                "direction": direction,
                "result": resulting.direction(),
                "totalVotes": doc.total_votes(),
            }))
        })?;

        info!(
            kind = %T::KIND,
            id = entity_id,
            direction = %direction,
            total_votes = entity.total_votes(),
            "vote recorded"
        );

        Ok(VoteOutcome {
            entity,
            user_vote: resulting.direction(),
        })
    }

    /// Optimistic read-modify-write of one document.
    ///
    /// `mutate` may run several times (once per attempt) and must derive
    /// everything from the freshly loaded document it is handed. Its return
    /// value becomes the audit event payload. Errors from `mutate` abort
    /// immediately without writing.
    pub fn update<T, F>(
        &self,
        conn: &Connection,
        id: &str,
        actor: &str,
        event_type: &str,
        mut mutate: F,
    ) -> Result<T>
    where
        T: Document,
        F: FnMut(&mut T) -> Result<serde_json::Value>,
    {
        for attempt in 1..=self.max_attempts {
            let Versioned { mut doc, version } = db::get_versioned::<T>(conn, id)?
                .ok_or_else(|| TownhallError::not_found(T::KIND, id))?;

            let data = mutate(&mut doc)?;
            let event = Event::new(event_type, T::KIND, id, data, actor);

            match db::compare_and_swap(conn, version, &doc, Some(&event)) {
                Ok(true) => return Ok(doc),
                Ok(false) => {
                    debug!(kind = %T::KIND, id, attempt, "version moved, retrying");
                }
                Err(e) if db::is_busy(&e) => {
                    warn!(kind = %T::KIND, id, attempt, "database busy, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(kind = %T::KIND, id, attempts = self.max_attempts, "giving up on contended update");
        Err(TownhallError::ConflictRetry {
            kind: T::KIND,
            id: id.to_string(),
            attempts: self.max_attempts,
        })
    }
}
