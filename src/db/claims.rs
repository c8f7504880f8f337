//! Execution claims: at most one live executor per task.
//!
//! Ownership is not tracked with an advisory lock. Liveness is re-derived
//! from the OS on every attempt, so a crashed executor never wedges its
//! task, and the final update is a compare-and-swap on the previously
//! observed pid so two callers racing past the same dead pid cannot both
//! win.

use super::events::append_event_internal;
use super::tasks::load_task_internal;
use super::{Database, now_ms};
use crate::error::{Result, StoreError};
use crate::proc::ProcessProbe;
use crate::types::{ExecutorIdentity, Task, TaskStatus};
use rusqlite::{Connection, params};
use serde_json::json;
use tracing::{debug, info};

fn task_exists(conn: &Connection, task_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE id = ?1",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl Database {
    /// Claim a task for execution by `pid` on `hostname`.
    ///
    /// Only resumable tasks (running, paused, blocked, failed) can be
    /// claimed; a created or planned task goes through the normal start
    /// path instead. A recorded pid blocks the claim only while its process
    /// is alive. The claim itself is a conditional update guarded by the
    /// observed pid, so of two racers exactly one wins and the other gets
    /// [`StoreError::RaceLost`].
    pub fn try_claim(
        &self,
        task_id: &str,
        pid: u32,
        hostname: &str,
        probe: &dyn ProcessProbe,
    ) -> Result<Task> {
        let now = now_ms();
        let claimed = self.run_in_transaction(|tx| {
            let task = load_task_internal(tx, task_id)?
                .ok_or_else(|| StoreError::not_found("task", task_id))?;

            if !task.status.is_resumable() {
                return Err(StoreError::invalid_state(format!(
                    "task {task_id} is {} and cannot be claimed",
                    task.status.as_str()
                )));
            }

            let prior_pid = task.executor.as_ref().map(|e| e.pid).unwrap_or(0);
            if prior_pid != 0 {
                if probe.is_alive(prior_pid) {
                    return Err(StoreError::already_claimed(task_id, prior_pid));
                }
                info!(
                    task_id,
                    stale_pid = prior_pid,
                    "overriding claim held by dead process"
                );
            }

            let changed = tx.execute(
                "UPDATE tasks SET
                    status = ?1,
                    executor_pid = ?2,
                    executor_host = ?3,
                    executor_started_at = ?4,
                    executor_heartbeat = ?4,
                    updated_at = ?4
                 WHERE id = ?5 AND COALESCE(executor_pid, 0) = ?6",
                params![
                    TaskStatus::Running.as_str(),
                    pid as i64,
                    hostname,
                    now,
                    task_id,
                    prior_pid as i64,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::race_lost(task_id));
            }

            append_event_internal(
                tx,
                task_id,
                "claim",
                Some(json!({ "pid": pid, "hostname": hostname })),
            )?;

            Ok(Task {
                status: TaskStatus::Running,
                executor: Some(ExecutorIdentity {
                    pid,
                    hostname: hostname.to_string(),
                    started_at: now,
                    last_heartbeat: now,
                }),
                updated_at: now,
                ..task
            })
        })?;

        info!(task_id, pid, hostname, "claimed task for execution");
        Ok(claimed)
    }

    /// Release a claim held by `pid`, clearing the executor identity.
    /// The task status is left alone; the caller records the outcome with
    /// its own save.
    pub fn release_claim(&self, task_id: &str, pid: u32) -> Result<()> {
        self.run_in_transaction(|tx| {
            let changed = tx.execute(
                "UPDATE tasks SET
                    executor_pid = NULL,
                    executor_host = NULL,
                    executor_started_at = NULL,
                    executor_heartbeat = NULL,
                    updated_at = ?1
                 WHERE id = ?2 AND executor_pid = ?3",
                params![now_ms(), task_id, pid as i64],
            )?;
            if changed == 0 {
                if !task_exists(tx, task_id)? {
                    return Err(StoreError::not_found("task", task_id));
                }
                return Err(StoreError::invalid_state(format!(
                    "task {task_id} is not claimed by pid {pid}"
                )));
            }

            append_event_internal(tx, task_id, "release", Some(json!({ "pid": pid })))?;
            Ok(())
        })?;

        info!(task_id, pid, "released execution claim");
        Ok(())
    }

    /// Record that the claiming process is still alive.
    pub fn refresh_heartbeat(&self, task_id: &str, pid: u32) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET executor_heartbeat = ?1
                 WHERE id = ?2 AND executor_pid = ?3",
                params![now_ms(), task_id, pid as i64],
            )?;
            if changed == 0 {
                if !task_exists(conn, task_id)? {
                    return Err(StoreError::not_found("task", task_id));
                }
                return Err(StoreError::invalid_state(format!(
                    "task {task_id} is not claimed by pid {pid}"
                )));
            }
            debug!(task_id, pid, "heartbeat refreshed");
            Ok(())
        })
    }
}
