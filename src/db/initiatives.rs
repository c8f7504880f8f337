//! Initiative aggregate: initiative row, decision log, task links,
//! dependency edges between initiatives.
//!
//! Decision ids are only unique within one initiative, so every query here
//! filters or groups by initiative id first. Task links are refreshed from
//! the live tasks table on load; links to tasks that no longer exist are
//! skipped rather than treated as errors.

use super::convert::{decode_initiative_status, decode_task_status};
use super::{Database, ensure_active};
use crate::error::{Result, StoreError};
use crate::types::{Decision, Initiative, TaskRef};
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

fn parse_initiative_row(row: &Row) -> rusqlite::Result<Initiative> {
    let status: String = row.get("status")?;
    Ok(Initiative {
        id: row.get("id")?,
        title: row.get("title")?,
        status: decode_initiative_status(&status),
        owner: row.get("owner")?,
        vision: row.get("vision")?,
        branch_base: row.get("branch_base")?,
        branch_prefix: row.get("branch_prefix")?,
        merge_status: row.get("merge_status")?,
        merge_commit: row.get("merge_commit")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        decisions: Vec::new(),
        tasks: Vec::new(),
        blocked_by: Vec::new(),
        blocks: Vec::new(),
    })
}

fn parse_decision_row(row: &Row) -> rusqlite::Result<(String, Decision)> {
    let initiative_id: String = row.get("initiative_id")?;
    let decision = Decision {
        id: row.get("decision_id")?,
        date: row.get("date")?,
        author: row.get("author")?,
        text: row.get("decision")?,
        rationale: row.get("rationale")?,
    };
    Ok((initiative_id, decision))
}

fn parse_task_ref_row(row: &Row) -> rusqlite::Result<(String, TaskRef)> {
    let initiative_id: String = row.get("initiative_id")?;
    let status: String = row.get("status")?;
    Ok((
        initiative_id,
        TaskRef {
            task_id: row.get("task_id")?,
            title: row.get("title")?,
            status: decode_task_status(&status),
        },
    ))
}

fn upsert_initiative_row(conn: &Connection, initiative: &Initiative) -> Result<()> {
    conn.execute(
        "INSERT INTO initiatives (
            id, title, status, owner, vision, branch_base, branch_prefix,
            merge_status, merge_commit, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            status = excluded.status,
            owner = excluded.owner,
            vision = excluded.vision,
            branch_base = excluded.branch_base,
            branch_prefix = excluded.branch_prefix,
            merge_status = excluded.merge_status,
            merge_commit = excluded.merge_commit,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at",
        params![
            initiative.id,
            initiative.title,
            initiative.status.as_str(),
            initiative.owner,
            initiative.vision,
            initiative.branch_base,
            initiative.branch_prefix,
            initiative.merge_status,
            initiative.merge_commit,
            initiative.created_at,
            initiative.updated_at,
        ],
    )?;
    Ok(())
}

fn sync_decisions(conn: &Connection, initiative_id: &str, decisions: &[Decision]) -> Result<()> {
    conn.execute(
        "DELETE FROM initiative_decisions WHERE initiative_id = ?1",
        params![initiative_id],
    )?;
    for (position, decision) in decisions.iter().enumerate() {
        conn.execute(
            "INSERT INTO initiative_decisions (
                initiative_id, decision_id, date, author, decision, rationale, position
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                initiative_id,
                decision.id,
                decision.date,
                decision.author,
                decision.text,
                decision.rationale,
                position as i64,
            ],
        )?;
    }
    Ok(())
}

/// Replace the task links. The snapshot title/status stored here is what the
/// caller last saw; loads re-join against live tasks.
fn sync_task_links(conn: &Connection, initiative_id: &str, tasks: &[TaskRef]) -> Result<()> {
    conn.execute(
        "DELETE FROM initiative_tasks WHERE initiative_id = ?1",
        params![initiative_id],
    )?;
    for (position, task_ref) in tasks.iter().enumerate() {
        conn.execute(
            "INSERT INTO initiative_tasks (initiative_id, task_id, title, status, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                initiative_id,
                task_ref.task_id,
                task_ref.title,
                task_ref.status.as_str(),
                position as i64,
            ],
        )?;
    }
    Ok(())
}

fn sync_initiative_deps(conn: &Connection, initiative_id: &str, deps: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM initiative_deps WHERE initiative_id = ?1",
        params![initiative_id],
    )?;
    for (position, dep) in deps.iter().enumerate() {
        conn.execute(
            "INSERT INTO initiative_deps (initiative_id, depends_on, position) VALUES (?1, ?2, ?3)",
            params![initiative_id, dep, position as i64],
        )?;
    }
    Ok(())
}

const TASK_REF_JOIN: &str = "SELECT it.initiative_id, it.task_id, t.title, t.status
     FROM initiative_tasks it
     INNER JOIN tasks t ON t.id = it.task_id";

fn load_initiative_internal(conn: &Connection, initiative_id: &str) -> Result<Option<Initiative>> {
    let mut stmt = conn.prepare("SELECT * FROM initiatives WHERE id = ?1")?;
    let mut initiative = match stmt.query_row(params![initiative_id], parse_initiative_row) {
        Ok(initiative) => initiative,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut stmt = conn.prepare(
        "SELECT * FROM initiative_decisions WHERE initiative_id = ?1 ORDER BY position",
    )?;
    initiative.decisions = stmt
        .query_map(params![initiative_id], parse_decision_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(|(_, decision)| decision)
        .collect();

    let sql = format!("{TASK_REF_JOIN} WHERE it.initiative_id = ?1 ORDER BY it.position");
    let mut stmt = conn.prepare(&sql)?;
    initiative.tasks = stmt
        .query_map(params![initiative_id], parse_task_ref_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(|(_, task_ref)| task_ref)
        .collect();

    let mut stmt = conn.prepare(
        "SELECT depends_on FROM initiative_deps WHERE initiative_id = ?1 ORDER BY position",
    )?;
    initiative.blocked_by = stmt
        .query_map(params![initiative_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    let mut stmt = conn.prepare(
        "SELECT initiative_id FROM initiative_deps WHERE depends_on = ?1 ORDER BY initiative_id",
    )?;
    initiative.blocks = stmt
        .query_map(params![initiative_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    Ok(Some(initiative))
}

fn load_all_decisions(conn: &Connection) -> Result<HashMap<String, Vec<Decision>>> {
    let mut stmt =
        conn.prepare("SELECT * FROM initiative_decisions ORDER BY initiative_id, position")?;
    let rows = stmt.query_map([], parse_decision_row)?;

    let mut grouped: HashMap<String, Vec<Decision>> = HashMap::new();
    for row in rows {
        let (initiative_id, decision) = row?;
        grouped.entry(initiative_id).or_default().push(decision);
    }
    Ok(grouped)
}

fn load_all_task_refs(conn: &Connection) -> Result<HashMap<String, Vec<TaskRef>>> {
    let sql = format!("{TASK_REF_JOIN} ORDER BY it.initiative_id, it.position");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], parse_task_ref_row)?;

    let mut grouped: HashMap<String, Vec<TaskRef>> = HashMap::new();
    for row in rows {
        let (initiative_id, task_ref) = row?;
        grouped.entry(initiative_id).or_default().push(task_ref);
    }
    Ok(grouped)
}

/// Forward and inverse dependency edges, from one scan of initiative_deps.
fn load_all_initiative_deps(
    conn: &Connection,
) -> Result<(HashMap<String, Vec<String>>, HashMap<String, Vec<String>>)> {
    let mut stmt = conn
        .prepare("SELECT initiative_id, depends_on FROM initiative_deps ORDER BY initiative_id, position")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut blocked_by: HashMap<String, Vec<String>> = HashMap::new();
    let mut blocks: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (initiative_id, dep) = row?;
        blocks
            .entry(dep.clone())
            .or_default()
            .push(initiative_id.clone());
        blocked_by.entry(initiative_id).or_default().push(dep);
    }
    Ok((blocked_by, blocks))
}

impl Database {
    /// Upsert an initiative and replace its decisions, task links, and
    /// dependency edges in one transaction.
    pub fn save_initiative(&self, initiative: &Initiative) -> Result<()> {
        self.save_initiative_inner(initiative, None)
    }

    /// [`save_initiative`](Self::save_initiative) with cancellation checks
    /// at each statement-group boundary.
    pub fn save_initiative_ctx(
        &self,
        ctx: &CancellationToken,
        initiative: &Initiative,
    ) -> Result<()> {
        self.save_initiative_inner(initiative, Some(ctx))
    }

    fn save_initiative_inner(
        &self,
        initiative: &Initiative,
        ctx: Option<&CancellationToken>,
    ) -> Result<()> {
        ensure_active(ctx)?;
        self.run_in_transaction(|tx| {
            upsert_initiative_row(tx, initiative)?;
            ensure_active(ctx)?;
            sync_decisions(tx, &initiative.id, &initiative.decisions)?;
            ensure_active(ctx)?;
            sync_task_links(tx, &initiative.id, &initiative.tasks)?;
            ensure_active(ctx)?;
            sync_initiative_deps(tx, &initiative.id, &initiative.blocked_by)?;
            Ok(())
        })
    }

    /// Load an initiative with decisions, live task links, and both
    /// dependency directions.
    pub fn load_initiative(&self, initiative_id: &str) -> Result<Initiative> {
        self.with_conn(|conn| {
            load_initiative_internal(conn, initiative_id)?
                .ok_or_else(|| StoreError::not_found("initiative", initiative_id))
        })
    }

    /// Load every initiative with the same completeness as
    /// [`load_initiative`](Self::load_initiative), in a constant number of
    /// queries. A failed sub-query degrades that sub-aggregate to empty with
    /// a warning.
    pub fn load_all_initiatives(&self) -> Result<Vec<Initiative>> {
        self.load_all_initiatives_inner(None)
    }

    /// [`load_all_initiatives`](Self::load_all_initiatives) with cancellation
    /// checks between the batch queries.
    pub fn load_all_initiatives_ctx(&self, ctx: &CancellationToken) -> Result<Vec<Initiative>> {
        self.load_all_initiatives_inner(Some(ctx))
    }

    fn load_all_initiatives_inner(
        &self,
        ctx: Option<&CancellationToken>,
    ) -> Result<Vec<Initiative>> {
        ensure_active(ctx)?;
        self.with_conn(|conn| {
            let mut initiatives = {
                let mut stmt = conn.prepare("SELECT * FROM initiatives ORDER BY created_at, id")?;
                let rows = stmt.query_map([], parse_initiative_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            ensure_active(ctx)?;

            let mut decisions = match load_all_decisions(conn) {
                Ok(grouped) => grouped,
                Err(err) => {
                    warn!(error = %err, "decision batch load failed, listing initiatives without decisions");
                    HashMap::new()
                }
            };
            ensure_active(ctx)?;

            let mut task_refs = match load_all_task_refs(conn) {
                Ok(grouped) => grouped,
                Err(err) => {
                    warn!(error = %err, "task link batch load failed, listing initiatives without tasks");
                    HashMap::new()
                }
            };
            ensure_active(ctx)?;

            let (mut blocked_by, mut blocks) = match load_all_initiative_deps(conn) {
                Ok(maps) => maps,
                Err(err) => {
                    warn!(error = %err, "dependency batch load failed, listing initiatives without deps");
                    (HashMap::new(), HashMap::new())
                }
            };

            for initiative in &mut initiatives {
                if let Some(list) = decisions.remove(&initiative.id) {
                    initiative.decisions = list;
                }
                if let Some(list) = task_refs.remove(&initiative.id) {
                    initiative.tasks = list;
                }
                if let Some(list) = blocked_by.remove(&initiative.id) {
                    initiative.blocked_by = list;
                }
                if let Some(list) = blocks.remove(&initiative.id) {
                    initiative.blocks = list;
                }
            }

            Ok(initiatives)
        })
    }

    /// Delete an initiative and its child rows. Tasks that referenced it
    /// keep their `initiative_id` field; those references are data, not
    /// constraints.
    pub fn delete_initiative(&self, initiative_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM initiatives WHERE id = ?1",
                params![initiative_id],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("initiative", initiative_id));
            }
            Ok(())
        })
    }
}
