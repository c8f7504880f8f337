//! Review findings and QA results, keyed by (task, round).
//!
//! Rounds are immutable once recorded: writes are plain INSERTs and a
//! duplicate round surfaces as `InvalidState` instead of silently
//! overwriting history.

use super::convert::{decode_json_or_default, encode_json};
use super::{Database, now_ms};
use crate::error::{Result, StoreError};
use crate::types::{QaResult, ReviewFindings};
use rusqlite::{Row, params};

fn parse_review_row(row: &Row) -> rusqlite::Result<ReviewFindings> {
    let issues: Option<String> = row.get("issues")?;
    let questions: Option<String> = row.get("questions")?;
    let positives: Option<String> = row.get("positives")?;
    Ok(ReviewFindings {
        task_id: row.get("task_id")?,
        round: row.get("round")?,
        summary: row.get("summary")?,
        issues: decode_json_or_default("issues", issues),
        questions: decode_json_or_default("questions", questions),
        positives: decode_json_or_default("positives", positives),
        created_at: row.get("created_at")?,
    })
}

fn parse_qa_row(row: &Row) -> rusqlite::Result<QaResult> {
    let issues: Option<String> = row.get("issues")?;
    let questions: Option<String> = row.get("questions")?;
    let positives: Option<String> = row.get("positives")?;
    Ok(QaResult {
        task_id: row.get("task_id")?,
        round: row.get("round")?,
        passed: row.get("passed")?,
        summary: row.get("summary")?,
        issues: decode_json_or_default("issues", issues),
        questions: decode_json_or_default("questions", questions),
        positives: decode_json_or_default("positives", positives),
        created_at: row.get("created_at")?,
    })
}

fn map_insert_error(err: rusqlite::Error, what: &str, task_id: &str, round: i32) -> StoreError {
    match err {
        // A composite TEXT primary key surfaces duplicates as a UNIQUE
        // violation, not as SQLITE_CONSTRAINT_PRIMARYKEY.
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            StoreError::invalid_state(format!(
                "{what} round {round} for task {task_id} is already recorded"
            ))
        }
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            StoreError::not_found("task", task_id)
        }
        other => other.into(),
    }
}

impl Database {
    /// Record one review round. The round must not exist yet.
    pub fn save_review_findings(&self, findings: &ReviewFindings) -> Result<()> {
        let issues = encode_json(&findings.issues)?;
        let questions = encode_json(&findings.questions)?;
        let positives = encode_json(&findings.positives)?;
        let created_at = if findings.created_at != 0 {
            findings.created_at
        } else {
            now_ms()
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO review_findings (
                    task_id, round, summary, issues, questions, positives, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    findings.task_id,
                    findings.round,
                    findings.summary,
                    issues,
                    questions,
                    positives,
                    created_at,
                ],
            )
            .map_err(|e| map_insert_error(e, "review", &findings.task_id, findings.round))?;
            Ok(())
        })
    }

    pub fn load_review_findings(&self, task_id: &str, round: i32) -> Result<ReviewFindings> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT * FROM review_findings WHERE task_id = ?1 AND round = ?2",
                params![task_id, round],
                parse_review_row,
            ) {
                Ok(findings) => Ok(findings),
                Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::not_found(
                    "review",
                    format!("{task_id} round {round}"),
                )),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Most recent review round for a task, if any.
    pub fn latest_review_findings(&self, task_id: &str) -> Result<Option<ReviewFindings>> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT * FROM review_findings WHERE task_id = ?1 ORDER BY round DESC LIMIT 1",
                params![task_id],
                parse_review_row,
            ) {
                Ok(findings) => Ok(Some(findings)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn list_review_findings(&self, task_id: &str) -> Result<Vec<ReviewFindings>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM review_findings WHERE task_id = ?1 ORDER BY round")?;
            let rows = stmt.query_map(params![task_id], parse_review_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    /// Record one QA round. The round must not exist yet.
    pub fn save_qa_result(&self, result: &QaResult) -> Result<()> {
        let issues = encode_json(&result.issues)?;
        let questions = encode_json(&result.questions)?;
        let positives = encode_json(&result.positives)?;
        let created_at = if result.created_at != 0 {
            result.created_at
        } else {
            now_ms()
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO qa_results (
                    task_id, round, passed, summary, issues, questions, positives, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    result.task_id,
                    result.round,
                    result.passed,
                    result.summary,
                    issues,
                    questions,
                    positives,
                    created_at,
                ],
            )
            .map_err(|e| map_insert_error(e, "qa", &result.task_id, result.round))?;
            Ok(())
        })
    }

    pub fn load_qa_result(&self, task_id: &str, round: i32) -> Result<QaResult> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT * FROM qa_results WHERE task_id = ?1 AND round = ?2",
                params![task_id, round],
                parse_qa_row,
            ) {
                Ok(result) => Ok(result),
                Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::not_found(
                    "qa result",
                    format!("{task_id} round {round}"),
                )),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Most recent QA round for a task, if any.
    pub fn latest_qa_result(&self, task_id: &str) -> Result<Option<QaResult>> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT * FROM qa_results WHERE task_id = ?1 ORDER BY round DESC LIMIT 1",
                params![task_id],
                parse_qa_row,
            ) {
                Ok(result) => Ok(Some(result)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn list_qa_results(&self, task_id: &str) -> Result<Vec<QaResult>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM qa_results WHERE task_id = ?1 ORDER BY round")?;
            let rows = stmt.query_map(params![task_id], parse_qa_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }
}
