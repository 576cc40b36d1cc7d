// Vote ledger, toggle rule and tally
//
// A ledger maps voter identity -> direction. The tally is ALWAYS derived from
// the ledger (count(up) - count(down)); it is never patched incrementally.
//
// Toggle rule per (entity, voter):
//
//   NoVote + d    -> d
//   Up     + any  -> NoVote
//   Down   + any  -> NoVote
//
// Switching direction retracts the existing vote instead of flipping it.
// This mirrors the behavior users have today; whether a switch should flip
// is an open product question, so keep it a retraction until decided.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TownhallError};

// ============================================================================
// DIRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// Contribution of one vote in this direction to the tally
    pub fn weight(&self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TownhallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(TownhallError::invalid(format!(
                "direction must be \"up\" or \"down\", got {:?}",
                other
            ))),
        }
    }
}

// ============================================================================
// VOTE STATE (one voter's relationship to one entity)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    NoVote,
    Voted(Direction),
}

impl VoteState {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            VoteState::NoVote => None,
            VoteState::Voted(direction) => Some(*direction),
        }
    }
}

impl From<Option<Direction>> for VoteState {
    fn from(direction: Option<Direction>) -> Self {
        direction.map_or(VoteState::NoVote, VoteState::Voted)
    }
}

/// Pure transition function of the toggle rule
pub fn next_state(current: VoteState, input: Direction) -> VoteState {
    match current {
        VoteState::NoVote => VoteState::Voted(input),
        // Same direction toggles off, a different direction retracts.
        VoteState::Voted(_) => VoteState::NoVote,
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// Per-entity record of which voter cast which direction.
///
/// Serialized as a plain JSON object `{ "<voterId>": "up" | "down" }` so it
/// embeds directly in the entity document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteLedger {
    entries: HashMap<String, Direction>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, voter_id: &str) -> VoteState {
        self.entries.get(voter_id).copied().into()
    }

    pub fn get(&self, voter_id: &str) -> Option<Direction> {
        self.entries.get(voter_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, direction: Direction) -> usize {
        self.entries.values().filter(|d| **d == direction).count()
    }

    /// Apply the toggle rule in place and return the voter's resulting state.
    pub fn apply(&mut self, voter_id: &str, direction: Direction) -> Result<VoteState> {
        if voter_id.is_empty() {
            return Err(TownhallError::invalid("userId is required"));
        }

        let next = next_state(self.state_of(voter_id), direction);
        match next {
            VoteState::NoVote => {
                self.entries.remove(voter_id);
            }
            VoteState::Voted(d) => {
                self.entries.insert(voter_id.to_string(), d);
            }
        }

        Ok(next)
    }
}

impl FromIterator<(String, Direction)> for VoteLedger {
    fn from_iter<I: IntoIterator<Item = (String, Direction)>>(iter: I) -> Self {
        VoteLedger {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Non-mutating form of [`VoteLedger::apply`]
pub fn apply_vote(ledger: &VoteLedger, voter_id: &str, direction: Direction) -> Result<VoteLedger> {
    let mut next = ledger.clone();
    next.apply(voter_id, direction)?;
    Ok(next)
}

/// Net score: +1 per up, -1 per down, over the whole ledger.
pub fn compute_tally(ledger: &VoteLedger) -> i64 {
    ledger.entries.values().map(Direction::weight).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_of(entries: &[(&str, Direction)]) -> VoteLedger {
        entries
            .iter()
            .map(|(voter, d)| (voter.to_string(), *d))
            .collect()
    }

    #[test]
    fn test_transition_table() {
        use Direction::*;
        use VoteState::*;

        assert_eq!(next_state(NoVote, Up), Voted(Up));
        assert_eq!(next_state(NoVote, Down), Voted(Down));
        assert_eq!(next_state(Voted(Up), Up), NoVote);
        assert_eq!(next_state(Voted(Up), Down), NoVote);
        assert_eq!(next_state(Voted(Down), Down), NoVote);
        assert_eq!(next_state(Voted(Down), Up), NoVote);
    }

    #[test]
    fn test_same_direction_twice_toggles_off() {
        let mut ledger = VoteLedger::new();
        let before = compute_tally(&ledger);

        assert_eq!(ledger.apply("v", Direction::Up).unwrap(), VoteState::Voted(Direction::Up));
        assert_eq!(ledger.apply("v", Direction::Up).unwrap(), VoteState::NoVote);

        assert_eq!(ledger.get("v"), None);
        assert_eq!(compute_tally(&ledger), before);
    }

    #[test]
    fn test_switch_direction_retracts() {
        let mut ledger = VoteLedger::new();
        ledger.apply("v", Direction::Up).unwrap();
        let state = ledger.apply("v", Direction::Down).unwrap();

        assert_eq!(state, VoteState::NoVote);
        assert!(ledger.is_empty());
        assert_eq!(compute_tally(&ledger), 0);
    }

    #[test]
    fn test_scenario_two_voters() {
        let mut ledger = VoteLedger::new();
        assert_eq!(compute_tally(&ledger), 0);

        ledger.apply("A", Direction::Up).unwrap();
        assert_eq!(ledger, ledger_of(&[("A", Direction::Up)]));
        assert_eq!(compute_tally(&ledger), 1);

        ledger.apply("B", Direction::Down).unwrap();
        assert_eq!(ledger, ledger_of(&[("A", Direction::Up), ("B", Direction::Down)]));
        assert_eq!(compute_tally(&ledger), 0);

        ledger.apply("A", Direction::Up).unwrap();
        assert_eq!(ledger, ledger_of(&[("B", Direction::Down)]));
        assert_eq!(compute_tally(&ledger), -1);
    }

    #[test]
    fn test_tally_matches_counts_after_every_mutation() {
        let mut ledger = VoteLedger::new();
        let script = [
            ("a", Direction::Up),
            ("b", Direction::Up),
            ("c", Direction::Down),
            ("a", Direction::Down),
            ("d", Direction::Down),
            ("b", Direction::Up),
            ("a", Direction::Up),
        ];

        for (voter, direction) in script {
            ledger.apply(voter, direction).unwrap();
            let expected =
                ledger.count(Direction::Up) as i64 - ledger.count(Direction::Down) as i64;
            assert_eq!(compute_tally(&ledger), expected);
        }
    }

    #[test]
    fn test_apply_vote_leaves_input_untouched() {
        let ledger = ledger_of(&[("x", Direction::Down)]);
        let next = apply_vote(&ledger, "y", Direction::Up).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(next.len(), 2);
        assert_eq!(compute_tally(&next), 0);
    }

    #[test]
    fn test_empty_voter_rejected() {
        let mut ledger = VoteLedger::new();
        let err = ledger.apply("", Direction::Up).unwrap_err();
        assert!(matches!(err, TownhallError::InvalidArgument(_)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_voter_id_is_opaque() {
        let mut ledger = VoteLedger::new();

        ledger.apply("  ", Direction::Up).unwrap();
        ledger.apply("user with spaces", Direction::Down).unwrap();

        assert_eq!(ledger.get("  "), Some(Direction::Up));
        assert_eq!(ledger.len(), 2);
        assert_eq!(compute_tally(&ledger), 0);
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("down".parse::<Direction>().unwrap(), Direction::Down);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(TownhallError::InvalidArgument(_))
        ));
        assert!("UP".parse::<Direction>().is_err());
    }

    #[test]
    fn test_ledger_json_shape() {
        let ledger = ledger_of(&[("uid-1", Direction::Up)]);
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json, serde_json::json!({ "uid-1": "up" }));

        let back: VoteLedger = serde_json::from_value(json).unwrap();
        assert_eq!(back.get("uid-1"), Some(Direction::Up));
    }
}
