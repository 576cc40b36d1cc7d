// Problem Entity - a locally reported civic issue
//
// Votable. Problems can also be linked to each other (causes / caused_by /
// related_to); `stats` is a derived count over `relationships`, recomputed on
// every change the same way totalVotes is recomputed from the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, require_text, Author, Document, EntityKind, Votable};
use crate::error::{Result, TownhallError};
use crate::vote::VoteLedger;

// ============================================================================
// LOCATION
// ============================================================================

/// GeoJSON point: `{ "type": "Point", "coordinates": [lon, lat] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        GeoPoint {
            kind: "Point".to_string(),
            coordinates: [longitude, latitude],
        }
    }

    fn validate(&self) -> Result<()> {
        if self.kind != "Point" {
            return Err(TownhallError::invalid("location.type must be \"Point\""));
        }
        if !self.coordinates.iter().all(|c| c.is_finite()) {
            return Err(TownhallError::invalid("location.coordinates must be finite"));
        }
        Ok(())
    }
}

// ============================================================================
// RELATIONSHIPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Causes,
    CausedBy,
    RelatedTo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemRelationship {
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    pub problem_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request body for linking a problem to another one
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRelationship {
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    pub problem_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipStats {
    pub causes: u32,
    pub caused_by: u32,
    pub related_to: u32,
}

impl RelationshipStats {
    fn from_relationships(relationships: &[ProblemRelationship]) -> Self {
        let mut stats = RelationshipStats::default();
        for rel in relationships {
            match rel.kind {
                RelationshipKind::Causes => stats.causes += 1,
                RelationshipKind::CausedBy => stats.caused_by += 1,
                RelationshipKind::RelatedTo => stats.related_to += 1,
            }
        }
        stats
    }
}

// ============================================================================
// PROBLEM
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: GeoPoint,
    pub author: Author,
    #[serde(default)]
    pub total_votes: i64,
    #[serde(default)]
    pub user_votes: VoteLedger,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub relationships: Vec<ProblemRelationship>,
    #[serde(default)]
    pub stats: RelationshipStats,
}

/// Request body for creating a problem
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProblem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location: GeoPoint,
    pub author: Author,
}

impl Problem {
    pub fn create(draft: NewProblem) -> Result<Self> {
        require_text(&draft.title, "title")?;
        draft.location.validate()?;
        draft.author.validate("author")?;

        Ok(Problem {
            id: new_id(),
            title: draft.title,
            description: draft.description.unwrap_or_default(),
            location: draft.location,
            author: draft.author,
            total_votes: 0,
            user_votes: VoteLedger::new(),
            created_at: Utc::now(),
            relationships: Vec::new(),
            stats: RelationshipStats::default(),
        })
    }

    /// Link this problem to another one. The caller checks the target exists.
    pub fn add_relationship(&mut self, link: NewRelationship) -> Result<()> {
        require_text(&link.problem_id, "problemId")?;

        if link.problem_id == self.id {
            return Err(TownhallError::invalid("a problem cannot relate to itself"));
        }

        let duplicate = self
            .relationships
            .iter()
            .any(|r| r.kind == link.kind && r.problem_id == link.problem_id);
        if duplicate {
            return Err(TownhallError::invalid("relationship already exists"));
        }

        self.relationships.push(ProblemRelationship {
            kind: link.kind,
            problem_id: link.problem_id,
            description: link.description.filter(|d| !d.trim().is_empty()),
        });
        self.stats = RelationshipStats::from_relationships(&self.relationships);

        Ok(())
    }
}

impl Document for Problem {
    const KIND: EntityKind = EntityKind::Problem;

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        None
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

impl Votable for Problem {
    fn ledger(&self) -> &VoteLedger {
        &self.user_votes
    }

    fn ledger_mut(&mut self) -> &mut VoteLedger {
        &mut self.user_votes
    }

    fn set_total_votes(&mut self, total: i64) {
        self.total_votes = total;
    }
}
