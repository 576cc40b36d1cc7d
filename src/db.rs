use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::entities::{Document, EntityKind};
use crate::error::{Result, TownhallError};

/// How long a connection waits on a locked database before reporting busy
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A document together with the row version it was read at.
///
/// The version is the optimistic-concurrency token: a write only lands if the
/// row still carries the version the writer read.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub doc: T,
    pub version: i64,
}

/// Event for audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: EntityKind,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.as_str().to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    // Fixed width so lexical order == chronological order
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Open (or create) the database file and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery and concurrent readers
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Document tables, one per entity kind. The full entity (vote ledger
    // included) lives in `document`; the other columns are query keys.
    // ==========================================================================
    for kind in EntityKind::ALL {
        let table = kind.table();

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT,
                    owner_uid TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    total_votes INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    document TEXT NOT NULL
                )"
            ),
            [],
        )?;

        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_id)"),
            [],
        )?;

        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_created ON {table}(created_at)"),
            [],
        )?;
    }

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// DOCUMENTS
// ============================================================================

pub fn insert_document<T: Document>(conn: &Connection, doc: &T) -> Result<()> {
    let document = serde_json::to_string(doc)?;

    conn.execute(
        &format!(
            "INSERT INTO {} (id, parent_id, owner_uid, version, total_votes, created_at, document)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)",
            T::KIND.table()
        ),
        params![
            doc.id(),
            doc.parent_id(),
            doc.owner_uid(),
            doc.total_votes(),
            timestamp(doc.created_at()),
            document,
        ],
    )?;

    debug!(kind = %T::KIND, id = doc.id(), "document inserted");
    Ok(())
}

pub fn get_versioned<T: Document>(conn: &Connection, id: &str) -> Result<Option<Versioned<T>>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            &format!("SELECT document, version FROM {} WHERE id = ?1", T::KIND.table()),
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((document, version)) => Ok(Some(Versioned {
            doc: serde_json::from_str(&document)?,
            version,
        })),
        None => Ok(None),
    }
}

pub fn get_document<T: Document>(conn: &Connection, id: &str) -> Result<Option<T>> {
    Ok(get_versioned::<T>(conn, id)?.map(|v| v.doc))
}

/// Like [`get_document`] but an absent id is a `NotFound` error
pub fn require_document<T: Document>(conn: &Connection, id: &str) -> Result<T> {
    get_document(conn, id)?.ok_or_else(|| TownhallError::not_found(T::KIND, id))
}

pub fn exists(conn: &Connection, kind: EntityKind, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", kind.table()),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn decode_all<T: Document>(documents: Vec<String>) -> Result<Vec<T>> {
    documents
        .iter()
        .map(|d| serde_json::from_str(d).map_err(TownhallError::from))
        .collect()
}

/// All documents of a kind, newest first
pub fn list_documents<T: Document>(conn: &Connection) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT document FROM {} ORDER BY created_at DESC, rowid DESC",
        T::KIND.table()
    ))?;

    let documents = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    decode_all(documents)
}

/// Documents attached to `parent_id` (solutions of a problem, ...), newest first
pub fn list_by_parent<T: Document>(conn: &Connection, parent_id: &str) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT document FROM {} WHERE parent_id = ?1 ORDER BY created_at DESC, rowid DESC",
        T::KIND.table()
    ))?;

    let documents = stmt
        .query_map([parent_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    decode_all(documents)
}

/// Highest tallies first
pub fn top_by_votes<T: Document>(conn: &Connection, limit: usize) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT document FROM {} ORDER BY total_votes DESC, created_at DESC LIMIT ?1",
        T::KIND.table()
    ))?;

    let documents = stmt
        .query_map([limit as i64], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    decode_all(documents)
}

pub fn count(conn: &Connection, kind: EntityKind) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", kind.table()),
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Delete a document on behalf of `requester_uid`, who must be its owner.
///
/// The owner check, the DELETE and the audit event share one IMMEDIATE
/// transaction; if any step fails the row stays.
pub fn delete_document<T: Document>(conn: &Connection, id: &str, requester_uid: &str) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    // Dropping `tx` on an early return rolls it back
    let doc: T = require_document(&tx, id)?;

    if requester_uid.is_empty() || doc.owner_uid() != requester_uid {
        return Err(TownhallError::Forbidden(format!(
            "only the owner may delete this {}",
            T::KIND.as_str()
        )));
    }

    tx.execute(
        &format!("DELETE FROM {} WHERE id = ?1", T::KIND.table()),
        [id],
    )?;

    let event = Event::new(
        "deleted",
        T::KIND,
        id,
        serde_json::json!({}),
        requester_uid,
    );
    insert_event(&tx, &event)?;

    tx.commit()?;
    Ok(())
}

/// Write `doc` only if its row is still at `expected_version`.
///
/// Runs as one IMMEDIATE transaction: the conditional UPDATE, the version
/// bump and the optional audit event commit together or not at all.
/// Returns `Ok(false)` when the row moved on (or vanished) since it was read.
pub fn compare_and_swap<T: Document>(
    conn: &Connection,
    expected_version: i64,
    doc: &T,
    event: Option<&Event>,
) -> Result<bool> {
    let document = serde_json::to_string(doc)?;
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let changed = tx.execute(
        &format!(
            "UPDATE {}
             SET document = ?1, total_votes = ?2, version = version + 1
             WHERE id = ?3 AND version = ?4",
            T::KIND.table()
        ),
        params![document, doc.total_votes(), doc.id(), expected_version],
    )?;

    if changed == 0 {
        tx.rollback()?;
        return Ok(false);
    }

    if let Some(event) = event {
        insert_event(&tx, event)?;
    }

    tx.commit()?;
    Ok(true)
}

/// SQLite reported the database as locked by another writer
pub fn is_busy(err: &TownhallError) -> bool {
    match err {
        TownhallError::Storage(rusqlite::Error::SqliteFailure(e, _)) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            timestamp(event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: EntityKind,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type.as_str(), entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut events = Vec::with_capacity(rows.len());
    for (event_id, timestamp_str, event_type, entity_type, entity_id, data_json, actor) in rows {
        let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
            .map_err(|e| TownhallError::invalid(format!("bad event timestamp: {}", e)))?
            .with_timezone(&Utc);

        events.push(Event {
            event_id,
            timestamp,
            event_type,
            entity_type,
            entity_id,
            data: serde_json::from_str(&data_json)?,
            actor,
        });
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        Author, Comment, GeoPoint, NewComment, NewProblem, NewSolution, Problem, Solution, Votable,
    };
    use crate::vote::Direction;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn create_test_problem(title: &str, author_uid: &str) -> Problem {
        Problem::create(NewProblem {
            title: title.to_string(),
            description: None,
            location: GeoPoint::new(144.75, 13.47),
            author: Author::new(author_uid, "Tester"),
        })
        .unwrap()
    }

    fn create_test_solution(problem_id: &str) -> Solution {
        Solution::create(NewSolution {
            title: "Fix".to_string(),
            description: None,
            problem_id: problem_id.to_string(),
            author: Author::new("s-author", "Sol"),
        })
        .unwrap()
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_db();
        setup_database(&conn).unwrap();

        for kind in EntityKind::ALL {
            assert_eq!(count(&conn, kind).unwrap(), 0);
        }
    }

    #[test]
    fn test_insert_and_fetch_roundtrip() {
        let conn = test_db();
        let mut problem = create_test_problem("Pothole", "a1");
        problem.cast_vote("v1", Direction::Up).unwrap();

        insert_document(&conn, &problem).unwrap();

        let loaded = get_versioned::<Problem>(&conn, &problem.id).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.doc.title, "Pothole");
        assert_eq!(loaded.doc.total_votes, 1);
        assert_eq!(loaded.doc.user_votes.get("v1"), Some(Direction::Up));
    }

    #[test]
    fn test_require_missing_is_not_found() {
        let conn = test_db();
        let err = require_document::<Problem>(&conn, "nope").unwrap_err();
        assert!(matches!(err, TownhallError::NotFound { kind: EntityKind::Problem, .. }));
    }

    #[test]
    fn test_list_newest_first_and_by_parent() {
        let conn = test_db();
        let p1 = create_test_problem("first", "a");
        let p2 = create_test_problem("second", "a");
        insert_document(&conn, &p1).unwrap();
        insert_document(&conn, &p2).unwrap();

        let problems: Vec<Problem> = list_documents(&conn).unwrap();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].title, "second");

        insert_document(&conn, &create_test_solution(&p1.id)).unwrap();
        insert_document(&conn, &create_test_solution(&p1.id)).unwrap();
        insert_document(&conn, &create_test_solution(&p2.id)).unwrap();

        let for_p1: Vec<Solution> = list_by_parent(&conn, &p1.id).unwrap();
        assert_eq!(for_p1.len(), 2);
        assert!(for_p1.iter().all(|s| s.problem_id == p1.id));
    }

    #[test]
    fn test_compare_and_swap_checks_version() {
        let conn = test_db();
        let problem = create_test_problem("Graffiti", "a");
        insert_document(&conn, &problem).unwrap();

        let mut first = get_versioned::<Problem>(&conn, &problem.id).unwrap().unwrap();
        let mut stale = first.clone();

        first.doc.cast_vote("x", Direction::Up).unwrap();
        assert!(compare_and_swap(&conn, first.version, &first.doc, None).unwrap());

        // Second writer read version 1 too; its write must not land
        stale.doc.cast_vote("y", Direction::Down).unwrap();
        assert!(!compare_and_swap(&conn, stale.version, &stale.doc, None).unwrap());

        let current = get_versioned::<Problem>(&conn, &problem.id).unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.doc.total_votes, 1);
        assert_eq!(current.doc.user_votes.get("y"), None);
    }

    #[test]
    fn test_compare_and_swap_writes_event_atomically() {
        let conn = test_db();
        let problem = create_test_problem("Stray dogs", "a");
        insert_document(&conn, &problem).unwrap();

        let event = Event::new("vote_cast", EntityKind::Problem, &problem.id, serde_json::json!({}), "v");
        assert!(!compare_and_swap(&conn, 99, &problem, Some(&event)).unwrap());
        assert!(get_events_for_entity(&conn, EntityKind::Problem, &problem.id)
            .unwrap()
            .is_empty());

        assert!(compare_and_swap(&conn, 1, &problem, Some(&event)).unwrap());
        let events = get_events_for_entity(&conn, EntityKind::Problem, &problem.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "vote_cast");
        assert_eq!(events[0].actor, "v");
    }

    #[test]
    fn test_delete_requires_owner() {
        let conn = test_db();
        let problem = create_test_problem("Power outage", "owner");
        insert_document(&conn, &problem).unwrap();

        let err = delete_document::<Problem>(&conn, &problem.id, "someone-else").unwrap_err();
        assert!(matches!(err, TownhallError::Forbidden(_)));
        assert!(exists(&conn, EntityKind::Problem, &problem.id).unwrap());

        delete_document::<Problem>(&conn, &problem.id, "owner").unwrap();
        assert!(!exists(&conn, EntityKind::Problem, &problem.id).unwrap());

        let again = delete_document::<Problem>(&conn, &problem.id, "owner").unwrap_err();
        assert!(matches!(again, TownhallError::NotFound { .. }));
    }

    #[test]
    fn test_delete_keeps_row_when_audit_write_fails() {
        let conn = test_db();
        let problem = create_test_problem("Abandoned car", "owner");
        insert_document(&conn, &problem).unwrap();

        // Without the events table the audit insert cannot succeed
        conn.execute("DROP TABLE events", []).unwrap();

        let result = delete_document::<Problem>(&conn, &problem.id, "owner");
        assert!(matches!(result, Err(TownhallError::Storage(_))));
        assert!(exists(&conn, EntityKind::Problem, &problem.id).unwrap());
        assert!(conn.is_autocommit(), "transaction must not be left open");
    }

    #[test]
    fn test_forbidden_delete_leaves_no_open_transaction() {
        let conn = test_db();
        let problem = create_test_problem("Loose wires", "owner");
        insert_document(&conn, &problem).unwrap();

        assert!(delete_document::<Problem>(&conn, &problem.id, "intruder").is_err());
        assert!(conn.is_autocommit());
        assert!(get_events_for_entity(&conn, EntityKind::Problem, &problem.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_top_by_votes_orders_by_tally() {
        let conn = test_db();
        let mut low = create_test_problem("low", "a");
        let mut high = create_test_problem("high", "a");
        low.cast_vote("v", Direction::Down).unwrap();
        high.cast_vote("v", Direction::Up).unwrap();
        high.cast_vote("w", Direction::Up).unwrap();
        insert_document(&conn, &low).unwrap();
        insert_document(&conn, &high).unwrap();

        let top: Vec<Problem> = top_by_votes(&conn, 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].title, "high");
    }

    #[test]
    fn test_comments_listed_per_problem() {
        let conn = test_db();
        let comment = Comment::create(NewComment {
            text: "Still broken".to_string(),
            author: Author::new("c", "C"),
            problem_id: "p-1".to_string(),
        })
        .unwrap();
        insert_document(&conn, &comment).unwrap();

        let comments: Vec<Comment> = list_by_parent(&conn, "p-1").unwrap();
        assert_eq!(comments.len(), 1);
        assert!(list_by_parent::<Comment>(&conn, "p-2").unwrap().is_empty());
    }
}
