//! The shared global store: workflow and agent definitions that apply
//! across every project.
//!
//! This store lives outside any project directory and is never placed in
//! the project store cache; definitions are always resident while project
//! state comes and goes.

use crate::config::StoreConfig;
use crate::db::convert::{decode_json_or_default, encode_json};
use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, Database, now_ms};
use crate::error::{Result, StoreError};
use crate::types::{AgentDef, WorkflowDef};
use rusqlite::{Row, params};
use std::path::Path;
use tracing::debug;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations_global");
}

/// File name of the global store in the platform data directory.
pub const GLOBAL_STORE_FILE_NAME: &str = "global.db";

fn parse_workflow_row(row: &Row) -> rusqlite::Result<WorkflowDef> {
    let phases: Option<String> = row.get("phases")?;
    Ok(WorkflowDef {
        id: row.get("id")?,
        description: row.get("description")?,
        phases: decode_json_or_default("phases", phases),
        updated_at: row.get("updated_at")?,
    })
}

fn parse_agent_row(row: &Row) -> rusqlite::Result<AgentDef> {
    Ok(AgentDef {
        id: row.get("id")?,
        role: row.get("role")?,
        model: row.get("model")?,
        updated_at: row.get("updated_at")?,
    })
}

pub struct GlobalStore {
    db: Database,
}

impl GlobalStore {
    /// Open (and migrate) the global store at an explicit path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open_raw(path, DEFAULT_BUSY_TIMEOUT_MS)?;
        db.with_conn_mut(|conn| {
            embedded::migrations::runner().run(conn)?;
            Ok(())
        })?;
        Ok(Self { db })
    }

    /// Open at the configured location, falling back to the platform data
    /// directory.
    pub fn open_default(config: &StoreConfig) -> Result<Self> {
        let path = match &config.global_store_path {
            Some(path) => path.clone(),
            None => {
                let base = dirs::data_dir().ok_or_else(|| {
                    StoreError::storage("no platform data directory available")
                })?;
                base.join("orc").join(GLOBAL_STORE_FILE_NAME)
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::storage(format!("create {}: {e}", parent.display())))?;
        }
        debug!(path = %path.display(), "opening global store");
        Self::open(path)
    }

    /// In-memory global store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_raw_in_memory()?;
        db.with_conn_mut(|conn| {
            embedded::migrations::runner().run(conn)?;
            Ok(())
        })?;
        Ok(Self { db })
    }

    pub fn close(&self) -> Result<()> {
        self.db.close()
    }

    pub fn save_workflow(&self, workflow: &WorkflowDef) -> Result<()> {
        let phases = encode_json(&workflow.phases)?;
        let updated_at = if workflow.updated_at != 0 {
            workflow.updated_at
        } else {
            now_ms()
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workflows (id, description, phases, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    description = excluded.description,
                    phases = excluded.phases,
                    updated_at = excluded.updated_at",
                params![workflow.id, workflow.description, phases, updated_at],
            )?;
            Ok(())
        })
    }

    pub fn get_workflow(&self, id: &str) -> Result<WorkflowDef> {
        self.db.with_conn(|conn| {
            match conn.query_row(
                "SELECT * FROM workflows WHERE id = ?1",
                params![id],
                parse_workflow_row,
            ) {
                Ok(workflow) => Ok(workflow),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(StoreError::not_found("workflow", id))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn list_workflows(&self) -> Result<Vec<WorkflowDef>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM workflows ORDER BY id")?;
            let rows = stmt.query_map([], parse_workflow_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    pub fn delete_workflow(&self, id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM workflows WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::not_found("workflow", id));
            }
            Ok(())
        })
    }

    pub fn save_agent(&self, agent: &AgentDef) -> Result<()> {
        let updated_at = if agent.updated_at != 0 {
            agent.updated_at
        } else {
            now_ms()
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (id, role, model, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    role = excluded.role,
                    model = excluded.model,
                    updated_at = excluded.updated_at",
                params![agent.id, agent.role, agent.model, updated_at],
            )?;
            Ok(())
        })
    }

    pub fn get_agent(&self, id: &str) -> Result<AgentDef> {
        self.db.with_conn(|conn| {
            match conn.query_row(
                "SELECT * FROM agents WHERE id = ?1",
                params![id],
                parse_agent_row,
            ) {
                Ok(agent) => Ok(agent),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(StoreError::not_found("agent", id))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn list_agents(&self) -> Result<Vec<AgentDef>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM agents ORDER BY id")?;
            let rows = stmt.query_map([], parse_agent_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    pub fn delete_agent(&self, id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::not_found("agent", id));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_round_trip() {
        let store = GlobalStore::open_in_memory().unwrap();
        let workflow = WorkflowDef {
            id: "standard".to_string(),
            description: Some("plan, build, review".to_string()),
            phases: vec!["plan".to_string(), "build".to_string(), "review".to_string()],
            updated_at: 1_700_000_000_000,
        };
        store.save_workflow(&workflow).unwrap();
        assert_eq!(store.get_workflow("standard").unwrap(), workflow);
    }

    #[test]
    fn agent_round_trip_and_delete() {
        let store = GlobalStore::open_in_memory().unwrap();
        let agent = AgentDef {
            id: "reviewer".to_string(),
            role: "review".to_string(),
            model: Some("large".to_string()),
            updated_at: 1_700_000_000_000,
        };
        store.save_agent(&agent).unwrap();
        assert_eq!(store.get_agent("reviewer").unwrap(), agent);

        store.delete_agent("reviewer").unwrap();
        assert!(matches!(
            store.get_agent("reviewer"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn global_store_has_no_project_tables() {
        let store = GlobalStore::open_in_memory().unwrap();
        let result = store
            .db
            .with_conn(|conn| Ok(conn.execute("SELECT id FROM tasks", [])?));
        assert!(result.is_err());
    }
}
