//! Branch registry: which git branches the orchestrator owns, what they are
//! for, and when they were last touched. Every write validates the name
//! first; nothing unsafe is allowed into this table.

use super::{Database, now_ms};
use crate::error::{Result, StoreError};
use crate::refname::validate_ref_name;
use crate::types::{Branch, BranchStatus, BranchType};
use rusqlite::{Row, params, params_from_iter};
use tracing::debug;

use super::convert::{decode_branch_status, decode_branch_type};

fn parse_branch_row(row: &Row) -> rusqlite::Result<Branch> {
    let branch_type: String = row.get("branch_type")?;
    let status: String = row.get("status")?;
    Ok(Branch {
        name: row.get("name")?,
        branch_type: decode_branch_type(&branch_type),
        owner: row.get("owner")?,
        status: decode_branch_status(&status),
        created_at: row.get("created_at")?,
        last_activity_at: row.get("last_activity_at")?,
    })
}

impl Database {
    /// Register a branch, or refresh its type/owner and activity time if it
    /// is already registered. Status is not touched on re-registration; use
    /// [`set_branch_status`](Self::set_branch_status) for that.
    pub fn upsert_branch(
        &self,
        name: &str,
        branch_type: BranchType,
        owner: Option<&str>,
    ) -> Result<Branch> {
        validate_ref_name(name)?;
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO branches (name, branch_type, owner, status, created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    branch_type = excluded.branch_type,
                    owner = excluded.owner,
                    last_activity_at = excluded.last_activity_at",
                params![
                    name,
                    branch_type.as_str(),
                    owner,
                    BranchStatus::Active.as_str(),
                    now,
                ],
            )?;
            debug!(name, branch_type = branch_type.as_str(), "branch registered");
            conn.query_row("SELECT * FROM branches WHERE name = ?1", params![name], parse_branch_row)
                .map_err(Into::into)
        })
    }

    pub fn get_branch(&self, name: &str) -> Result<Branch> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT * FROM branches WHERE name = ?1",
                params![name],
                parse_branch_row,
            ) {
                Ok(branch) => Ok(branch),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(StoreError::not_found("branch", name))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// List branches, optionally narrowed by type and/or status.
    pub fn list_branches(
        &self,
        branch_type: Option<BranchType>,
        status: Option<BranchStatus>,
    ) -> Result<Vec<Branch>> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM branches");
            let mut clauses: Vec<String> = Vec::new();
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(branch_type) = branch_type {
                bound.push(Box::new(branch_type.as_str().to_string()));
                clauses.push(format!("branch_type = ?{}", bound.len()));
            }
            if let Some(status) = status {
                bound.push(Box::new(status.as_str().to_string()));
                clauses.push(format!("status = ?{}", bound.len()));
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY name");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(bound.iter().map(|p| p.as_ref())),
                parse_branch_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    /// Record activity on a branch (called on every commit to it).
    pub fn touch_branch(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE branches SET last_activity_at = ?1 WHERE name = ?2",
                params![now_ms(), name],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("branch", name));
            }
            Ok(())
        })
    }

    pub fn set_branch_status(&self, name: &str, status: BranchStatus) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE branches SET status = ?1, last_activity_at = ?2 WHERE name = ?3",
                params![status.as_str(), now_ms(), name],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("branch", name));
            }
            Ok(())
        })
    }

    /// Active branches with no recorded activity since `cutoff_ms`, oldest
    /// first. Cleanup tooling decides what to do with them.
    pub fn stale_branches(&self, cutoff_ms: i64) -> Result<Vec<Branch>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM branches
                 WHERE status = ?1 AND last_activity_at < ?2
                 ORDER BY last_activity_at",
            )?;
            let rows = stmt.query_map(
                params![BranchStatus::Active.as_str(), cutoff_ms],
                parse_branch_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM branches WHERE name = ?1", params![name])?;
            if changed == 0 {
                return Err(StoreError::not_found("branch", name));
            }
            Ok(())
        })
    }
}
