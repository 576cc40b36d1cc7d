// Comment Entity - discussion attached to a Problem (not votable)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, require_text, Author, Document, EntityKind};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub author: Author,
    pub problem_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub text: String,
    pub author: Author,
    pub problem_id: String,
}

impl Comment {
    pub fn create(draft: NewComment) -> Result<Self> {
        require_text(&draft.text, "text")?;
        require_text(&draft.problem_id, "problemId")?;
        draft.author.validate("author")?;

        Ok(Comment {
            id: new_id(),
            text: draft.text,
            author: draft.author,
            problem_id: draft.problem_id,
            created_at: Utc::now(),
        })
    }
}

impl Document for Comment {
    const KIND: EntityKind = EntityKind::Comment;

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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_requires_text() {
        let draft = NewComment {
            text: "".to_string(),
            author: Author::new("u", "U"),
            problem_id: "p".to_string(),
        };
        assert!(Comment::create(draft).is_err());
    }

    #[test]
    fn test_comment_has_no_votes() {
        let comment = Comment::create(NewComment {
            text: "Seen it too".to_string(),
            author: Author::new("u", "U"),
            problem_id: "p".to_string(),
        })
        .unwrap();

        assert_eq!(comment.total_votes(), 0);
        assert_eq!(comment.parent_id(), Some("p"));
    }
}
