//! Append-only per-task event log. Rows are never updated or deleted
//! individually; they only disappear with their task via cascade.

use super::convert::decode_json_opt;
use super::{Database, now_ms};
use crate::error::{Result, StoreError};
use crate::types::EventRecord;
use rusqlite::{Connection, Row, params, params_from_iter};

fn parse_event_row(row: &Row) -> rusqlite::Result<EventRecord> {
    let payload_json: Option<String> = row.get("payload")?;
    Ok(EventRecord {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        kind: row.get("kind")?,
        payload: decode_json_opt("event payload", payload_json),
        created_at: row.get("created_at")?,
    })
}

/// Append on an existing connection so claim/release can log inside their
/// own transaction.
pub(crate) fn append_event_internal(
    conn: &Connection,
    task_id: &str,
    kind: &str,
    payload: Option<serde_json::Value>,
) -> Result<EventRecord> {
    let now = now_ms();
    let encoded = match &payload {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };

    let inserted = conn.execute(
        "INSERT INTO events (task_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![task_id, kind, encoded, now],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(StoreError::not_found("task", task_id));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(EventRecord {
        id: conn.last_insert_rowid(),
        task_id: task_id.to_string(),
        kind: kind.to_string(),
        payload,
        created_at: now,
    })
}

impl Database {
    /// Append an event to a task's log and return the stored record.
    pub fn append_event(
        &self,
        task_id: &str,
        kind: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<EventRecord> {
        self.with_conn(|conn| append_event_internal(conn, task_id, kind, payload))
    }

    /// List a task's events in append order, optionally only those after a
    /// known id (for incremental tailing) and up to a row limit.
    pub fn list_events(
        &self,
        task_id: &str,
        after_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<EventRecord>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, task_id, kind, payload, created_at FROM events WHERE task_id = ?1",
            );
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(task_id.to_string())];

            if let Some(after) = after_id {
                bound.push(Box::new(after));
                sql.push_str(&format!(" AND id > ?{}", bound.len()));
            }
            sql.push_str(" ORDER BY id");
            if let Some(limit) = limit {
                bound.push(Box::new(limit));
                sql.push_str(&format!(" LIMIT ?{}", bound.len()));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(bound.iter().map(|p| p.as_ref())),
                parse_event_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_missing_task_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.append_event("T-404", "claim", None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
