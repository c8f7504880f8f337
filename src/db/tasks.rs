//! Task aggregate: task row, dependency edges, phase states, gate decisions.

use super::convert::{
    decode_flagged_list, decode_json_opt, decode_json_or_default, decode_phase_status,
    decode_task_status, decode_weight, encode_flagged_list, encode_json, encode_json_opt,
};
use super::{Database, ensure_active};
use crate::error::{Result, StoreError};
use crate::refname::validate_ref_name;
use crate::types::{ExecutorIdentity, GateDecision, PhaseState, Task};
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let weight: String = row.get("weight")?;
    let metadata_json: Option<String> = row.get("metadata")?;
    let quality_json: Option<String> = row.get("quality")?;

    let pr_labels_json: Option<String> = row.get("pr_labels")?;
    let pr_labels_set: bool = row.get("pr_labels_set")?;
    let pr_reviewers_json: Option<String> = row.get("pr_reviewers")?;
    let pr_reviewers_set: bool = row.get("pr_reviewers_set")?;

    let executor_pid: Option<i64> = row.get("executor_pid")?;
    let executor = match executor_pid {
        Some(pid) => Some(ExecutorIdentity {
            pid: pid as u32,
            hostname: row
                .get::<_, Option<String>>("executor_host")?
                .unwrap_or_default(),
            started_at: row
                .get::<_, Option<i64>>("executor_started_at")?
                .unwrap_or_default(),
            last_heartbeat: row
                .get::<_, Option<i64>>("executor_heartbeat")?
                .unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        weight: decode_weight(&weight),
        workflow: row.get("workflow")?,
        status: decode_task_status(&status),
        phase: row.get("phase")?,
        branch: row.get("branch")?,
        target_branch: row.get("target_branch")?,
        queue: row.get("queue")?,
        priority: row.get("priority")?,
        category: row.get("category")?,
        initiative_id: row.get("initiative_id")?,
        metadata: decode_json_or_default("metadata", metadata_json),
        quality: decode_json_opt("quality", quality_json),
        branch_controls: crate::types::BranchControls {
            branch_name: row.get("branch_override")?,
            pr_draft: row.get("pr_draft")?,
            pr_labels: decode_flagged_list("pr_labels", pr_labels_json, pr_labels_set),
            pr_reviewers: decode_flagged_list("pr_reviewers", pr_reviewers_json, pr_reviewers_set),
        },
        executor,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        updated_at: row.get("updated_at")?,
        deps: Vec::new(),
        phases: HashMap::new(),
        gates: Vec::new(),
    })
}

fn parse_phase_row(row: &Row) -> rusqlite::Result<(String, String, PhaseState)> {
    let task_id: String = row.get("task_id")?;
    let phase: String = row.get("phase")?;
    let status: String = row.get("status")?;
    let state = PhaseState {
        status: decode_phase_status(&status),
        iteration: row.get("iteration")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        tokens_in: row.get("tokens_in")?,
        tokens_out: row.get("tokens_out")?,
        error: row.get("error")?,
        commit: row.get("commit_ref")?,
        session_id: row.get("session_id")?,
    };
    Ok((task_id, phase, state))
}

fn parse_gate_row(row: &Row) -> rusqlite::Result<(String, GateDecision)> {
    let task_id: String = row.get("task_id")?;
    let decision = GateDecision {
        phase: row.get("phase")?,
        gate: row.get("gate")?,
        approved: row.get("approved")?,
        reason: row.get("reason")?,
        decided_at: row.get("decided_at")?,
    };
    Ok((task_id, decision))
}

/// Upsert the task row itself.
///
/// When the incoming task carries no executor identity, the executor columns
/// are left out of the conflict update so an existing live claim survives a
/// metadata-only save. An incoming executor always overwrites.
fn upsert_task_row(conn: &Connection, task: &Task) -> Result<()> {
    let metadata = encode_json(&task.metadata)?;
    let quality = encode_json_opt(&task.quality)?;
    let (pr_labels, pr_labels_set) = encode_flagged_list(&task.branch_controls.pr_labels)?;
    let (pr_reviewers, pr_reviewers_set) = encode_flagged_list(&task.branch_controls.pr_reviewers)?;

    match &task.executor {
        Some(executor) => {
            conn.execute(
                "INSERT INTO tasks (
                    id, title, description, weight, workflow, status, phase,
                    branch, target_branch, queue, priority, category, initiative_id,
                    metadata, quality,
                    branch_override, pr_draft, pr_labels, pr_labels_set,
                    pr_reviewers, pr_reviewers_set,
                    executor_pid, executor_host, executor_started_at, executor_heartbeat,
                    created_at, started_at, completed_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                          ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25,
                          ?26, ?27, ?28, ?29)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    weight = excluded.weight,
                    workflow = excluded.workflow,
                    status = excluded.status,
                    phase = excluded.phase,
                    branch = excluded.branch,
                    target_branch = excluded.target_branch,
                    queue = excluded.queue,
                    priority = excluded.priority,
                    category = excluded.category,
                    initiative_id = excluded.initiative_id,
                    metadata = excluded.metadata,
                    quality = excluded.quality,
                    branch_override = excluded.branch_override,
                    pr_draft = excluded.pr_draft,
                    pr_labels = excluded.pr_labels,
                    pr_labels_set = excluded.pr_labels_set,
                    pr_reviewers = excluded.pr_reviewers,
                    pr_reviewers_set = excluded.pr_reviewers_set,
                    executor_pid = excluded.executor_pid,
                    executor_host = excluded.executor_host,
                    executor_started_at = excluded.executor_started_at,
                    executor_heartbeat = excluded.executor_heartbeat,
                    created_at = excluded.created_at,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    updated_at = excluded.updated_at",
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.weight.as_str(),
                    task.workflow,
                    task.status.as_str(),
                    task.phase,
                    task.branch,
                    task.target_branch,
                    task.queue,
                    task.priority,
                    task.category,
                    task.initiative_id,
                    metadata,
                    quality,
                    task.branch_controls.branch_name,
                    task.branch_controls.pr_draft,
                    pr_labels,
                    pr_labels_set,
                    pr_reviewers,
                    pr_reviewers_set,
                    executor.pid as i64,
                    executor.hostname,
                    executor.started_at,
                    executor.last_heartbeat,
                    task.created_at,
                    task.started_at,
                    task.completed_at,
                    task.updated_at,
                ],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO tasks (
                    id, title, description, weight, workflow, status, phase,
                    branch, target_branch, queue, priority, category, initiative_id,
                    metadata, quality,
                    branch_override, pr_draft, pr_labels, pr_labels_set,
                    pr_reviewers, pr_reviewers_set,
                    created_at, started_at, completed_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                          ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    weight = excluded.weight,
                    workflow = excluded.workflow,
                    status = excluded.status,
                    phase = excluded.phase,
                    branch = excluded.branch,
                    target_branch = excluded.target_branch,
                    queue = excluded.queue,
                    priority = excluded.priority,
                    category = excluded.category,
                    initiative_id = excluded.initiative_id,
                    metadata = excluded.metadata,
                    quality = excluded.quality,
                    branch_override = excluded.branch_override,
                    pr_draft = excluded.pr_draft,
                    pr_labels = excluded.pr_labels,
                    pr_labels_set = excluded.pr_labels_set,
                    pr_reviewers = excluded.pr_reviewers,
                    pr_reviewers_set = excluded.pr_reviewers_set,
                    created_at = excluded.created_at,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    updated_at = excluded.updated_at",
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.weight.as_str(),
                    task.workflow,
                    task.status.as_str(),
                    task.phase,
                    task.branch,
                    task.target_branch,
                    task.queue,
                    task.priority,
                    task.category,
                    task.initiative_id,
                    metadata,
                    quality,
                    task.branch_controls.branch_name,
                    task.branch_controls.pr_draft,
                    pr_labels,
                    pr_labels_set,
                    pr_reviewers,
                    pr_reviewers_set,
                    task.created_at,
                    task.started_at,
                    task.completed_at,
                    task.updated_at,
                ],
            )?;
        }
    }

    Ok(())
}

/// Replace the dependency edges for a task.
/// Targets are not checked for existence; a stale edge is data, not an error.
fn sync_task_deps(conn: &Connection, task_id: &str, deps: &[String]) -> Result<()> {
    conn.execute("DELETE FROM task_deps WHERE task_id = ?1", params![task_id])?;
    for (position, dep) in deps.iter().enumerate() {
        conn.execute(
            "INSERT INTO task_deps (task_id, depends_on, position) VALUES (?1, ?2, ?3)",
            params![task_id, dep, position as i64],
        )?;
    }
    Ok(())
}

/// Replace the phase states for a task.
fn sync_task_phases(
    conn: &Connection,
    task_id: &str,
    phases: &HashMap<String, PhaseState>,
) -> Result<()> {
    conn.execute("DELETE FROM phases WHERE task_id = ?1", params![task_id])?;
    for (phase, state) in phases {
        conn.execute(
            "INSERT INTO phases (
                task_id, phase, status, iteration, started_at, completed_at,
                tokens_in, tokens_out, error, commit_ref, session_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                task_id,
                phase,
                state.status.as_str(),
                state.iteration,
                state.started_at,
                state.completed_at,
                state.tokens_in,
                state.tokens_out,
                state.error,
                state.commit,
                state.session_id,
            ],
        )?;
    }
    Ok(())
}

/// Replace the gate decision history for a task, preserving order.
fn sync_gate_decisions(conn: &Connection, task_id: &str, gates: &[GateDecision]) -> Result<()> {
    conn.execute(
        "DELETE FROM gate_decisions WHERE task_id = ?1",
        params![task_id],
    )?;
    for gate in gates {
        conn.execute(
            "INSERT INTO gate_decisions (task_id, phase, gate, approved, reason, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task_id,
                gate.phase,
                gate.gate,
                gate.approved,
                gate.reason,
                gate.decided_at,
            ],
        )?;
    }
    Ok(())
}

/// Internal helper to get a task row (no sub-aggregates) on an existing
/// connection, avoiding a second lock acquisition.
fn get_task_row_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;

    let result = stmt.query_row(params![task_id], parse_task_row);

    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Internal helper to load a full task aggregate on an existing connection.
pub(crate) fn load_task_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let Some(mut task) = get_task_row_internal(conn, task_id)? else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT depends_on FROM task_deps WHERE task_id = ?1 ORDER BY position",
    )?;
    task.deps = stmt
        .query_map(params![task_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    let mut stmt = conn.prepare("SELECT * FROM phases WHERE task_id = ?1")?;
    task.phases = stmt
        .query_map(params![task_id], parse_phase_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(|(_, phase, state)| (phase, state))
        .collect();

    let mut stmt =
        conn.prepare("SELECT * FROM gate_decisions WHERE task_id = ?1 ORDER BY id")?;
    task.gates = stmt
        .query_map(params![task_id], parse_gate_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(|(_, decision)| decision)
        .collect();

    Ok(Some(task))
}

fn load_all_deps(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt =
        conn.prepare("SELECT task_id, depends_on FROM task_deps ORDER BY task_id, position")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (task_id, dep) = row?;
        grouped.entry(task_id).or_default().push(dep);
    }
    Ok(grouped)
}

fn load_all_phases(conn: &Connection) -> Result<HashMap<String, HashMap<String, PhaseState>>> {
    let mut stmt = conn.prepare("SELECT * FROM phases")?;
    let rows = stmt.query_map([], parse_phase_row)?;

    let mut grouped: HashMap<String, HashMap<String, PhaseState>> = HashMap::new();
    for row in rows {
        let (task_id, phase, state) = row?;
        grouped.entry(task_id).or_default().insert(phase, state);
    }
    Ok(grouped)
}

fn load_all_gates(conn: &Connection) -> Result<HashMap<String, Vec<GateDecision>>> {
    let mut stmt = conn.prepare("SELECT * FROM gate_decisions ORDER BY task_id, id")?;
    let rows = stmt.query_map([], parse_gate_row)?;

    let mut grouped: HashMap<String, Vec<GateDecision>> = HashMap::new();
    for row in rows {
        let (task_id, decision) = row?;
        grouped.entry(task_id).or_default().push(decision);
    }
    Ok(grouped)
}

impl Database {
    /// Allocate the next monotonic task id ("T-001", "T-002", ...).
    /// Caller-chosen ids remain valid; this is only the default source.
    pub fn allocate_task_id(&self) -> Result<String> {
        self.run_in_transaction(|tx| {
            let current = match tx.query_row(
                "SELECT value FROM counters WHERE name = 'task_id'",
                [],
                |row| row.get::<_, i64>(0),
            ) {
                Ok(value) => value,
                Err(rusqlite::Error::QueryReturnedNoRows) => 0,
                Err(e) => return Err(e.into()),
            };
            let next = current + 1;
            tx.execute(
                "INSERT INTO counters (name, value) VALUES ('task_id', ?1)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![next],
            )?;
            Ok(format!("T-{next:03}"))
        })
    }

    /// Upsert a task and replace its dependency edges, phase states, and
    /// gate decisions in one transaction.
    ///
    /// Executor identity is preserved from the existing row when the incoming
    /// task carries none, so a metadata-only save cannot clear a live claim.
    pub fn save_task(&self, task: &Task) -> Result<()> {
        self.save_task_inner(task, None)
    }

    /// [`save_task`](Self::save_task) with cancellation checks at each
    /// statement-group boundary.
    pub fn save_task_ctx(&self, ctx: &CancellationToken, task: &Task) -> Result<()> {
        self.save_task_inner(task, Some(ctx))
    }

    fn save_task_inner(&self, task: &Task, ctx: Option<&CancellationToken>) -> Result<()> {
        // Branch overrides can reach shell-invoking git operations later;
        // reject unsafe names before anything touches the database.
        if let Some(name) = &task.branch_controls.branch_name {
            validate_ref_name(name)?;
        }
        ensure_active(ctx)?;

        self.run_in_transaction(|tx| {
            upsert_task_row(tx, task)?;
            ensure_active(ctx)?;
            sync_task_deps(tx, &task.id, &task.deps)?;
            ensure_active(ctx)?;
            sync_task_phases(tx, &task.id, &task.phases)?;
            ensure_active(ctx)?;
            sync_gate_decisions(tx, &task.id, &task.gates)?;
            Ok(())
        })
    }

    /// Load a task with its full aggregate.
    pub fn load_task(&self, task_id: &str) -> Result<Task> {
        self.with_conn(|conn| {
            load_task_internal(conn, task_id)?
                .ok_or_else(|| StoreError::not_found("task", task_id))
        })
    }

    /// Load every task with the same completeness as [`load_task`](Self::load_task).
    ///
    /// Issues exactly four queries regardless of task count (tasks, all
    /// dependency edges, all phase states, all gate decisions) and assembles
    /// in memory. A failed sub-query degrades that sub-aggregate to empty
    /// with a warning instead of failing the listing.
    pub fn load_all_tasks(&self) -> Result<Vec<Task>> {
        self.load_all_tasks_inner(None)
    }

    /// [`load_all_tasks`](Self::load_all_tasks) with cancellation checks
    /// between the batch queries.
    pub fn load_all_tasks_ctx(&self, ctx: &CancellationToken) -> Result<Vec<Task>> {
        self.load_all_tasks_inner(Some(ctx))
    }

    fn load_all_tasks_inner(&self, ctx: Option<&CancellationToken>) -> Result<Vec<Task>> {
        ensure_active(ctx)?;
        self.with_conn(|conn| {
            let mut tasks = {
                let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY created_at, id")?;
                let rows = stmt.query_map([], parse_task_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            ensure_active(ctx)?;

            let mut deps = match load_all_deps(conn) {
                Ok(grouped) => grouped,
                Err(err) => {
                    warn!(error = %err, "dependency batch load failed, listing tasks without deps");
                    HashMap::new()
                }
            };
            ensure_active(ctx)?;

            let mut phases = match load_all_phases(conn) {
                Ok(grouped) => grouped,
                Err(err) => {
                    warn!(error = %err, "phase batch load failed, listing tasks without phases");
                    HashMap::new()
                }
            };
            ensure_active(ctx)?;

            let mut gates = match load_all_gates(conn) {
                Ok(grouped) => grouped,
                Err(err) => {
                    warn!(error = %err, "gate batch load failed, listing tasks without gates");
                    HashMap::new()
                }
            };

            for task in &mut tasks {
                if let Some(list) = deps.remove(&task.id) {
                    task.deps = list;
                }
                if let Some(map) = phases.remove(&task.id) {
                    task.phases = map;
                }
                if let Some(list) = gates.remove(&task.id) {
                    task.gates = list;
                }
            }

            Ok(tasks)
        })
    }

    /// Delete a task. Child rows (deps, phases, gates, findings, QA results,
    /// events) go with it via cascade.
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            if changed == 0 {
                return Err(StoreError::not_found("task", task_id));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_save_leaves_no_partial_state() {
        let db = Database::open_in_memory().unwrap();
        let task = Task::new("T-001", "atomic");

        // Simulate a failure after the row and the first sub-insert.
        let result: Result<()> = db.run_in_transaction(|tx| {
            upsert_task_row(tx, &task)?;
            sync_task_deps(tx, &task.id, &["T-000".to_string()])?;
            Err(StoreError::storage("injected failure"))
        });
        assert!(result.is_err());

        assert!(matches!(
            db.load_task("T-001"),
            Err(StoreError::NotFound { .. })
        ));
        let edges: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM task_deps", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(edges, 0);
    }

    #[test]
    fn allocated_ids_are_monotonic() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.allocate_task_id().unwrap(), "T-001");
        assert_eq!(db.allocate_task_id().unwrap(), "T-002");
        assert_eq!(db.allocate_task_id().unwrap(), "T-003");
    }
}
