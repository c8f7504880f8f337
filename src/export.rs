//! Read-only export projections: human-readable artifacts built from store
//! aggregates. Nothing here writes back to the store.

use crate::db::{Database, now_ms};
use crate::error::Result;
use crate::types::{Branch, Initiative, Task};
use serde::Serialize;

/// Everything a project store holds, in one exportable structure.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSnapshot {
    pub generated_at: i64,
    pub tasks: Vec<Task>,
    pub initiatives: Vec<Initiative>,
    pub branches: Vec<Branch>,
}

/// Read a full snapshot of a project store.
pub fn snapshot(db: &Database) -> Result<ProjectSnapshot> {
    Ok(ProjectSnapshot {
        generated_at: now_ms(),
        tasks: db.load_all_tasks()?,
        initiatives: db.load_all_initiatives()?,
        branches: db.list_branches(None, None)?,
    })
}

/// Snapshot serialized as pretty JSON.
pub fn snapshot_json(db: &Database) -> Result<String> {
    let snap = snapshot(db)?;
    Ok(serde_json::to_string_pretty(&snap)?)
}

/// Format a single task as markdown.
pub fn render_task_markdown(task: &Task) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Task: {}\n", task.title));
    md.push_str(&format!("- **id**: `{}`\n", task.id));
    md.push_str(&format!("- **status**: {}\n", task.status.as_str()));
    md.push_str(&format!("- **weight**: {}\n", task.weight.as_str()));

    if let Some(ref workflow) = task.workflow {
        md.push_str(&format!("- **workflow**: {}\n", workflow));
    }
    if let Some(ref phase) = task.phase {
        md.push_str(&format!("- **phase**: {}\n", phase));
    }
    if let Some(ref branch) = task.branch {
        md.push_str(&format!("- **branch**: `{}`\n", branch));
    }
    if let Some(ref initiative_id) = task.initiative_id {
        md.push_str(&format!("- **initiative**: `{}`\n", initiative_id));
    }
    if !task.deps.is_empty() {
        let deps: Vec<String> = task.deps.iter().map(|id| format!("`{id}`")).collect();
        md.push_str(&format!("- **depends on**: {}\n", deps.join(", ")));
    }
    if let Some(ref executor) = task.executor {
        md.push_str(&format!(
            "- **executor**: pid {} on {}\n",
            executor.pid, executor.hostname
        ));
    }

    if let Some(ref description) = task.description {
        md.push_str("\n### Description\n");
        md.push_str(description);
        md.push('\n');
    }

    if !task.phases.is_empty() {
        md.push_str("\n### Phases\n");
        let mut names: Vec<&String> = task.phases.keys().collect();
        names.sort();
        for name in names {
            let state = &task.phases[name];
            md.push_str(&format!(
                "- **{}**: {} (iteration {})\n",
                name,
                state.status.as_str(),
                state.iteration
            ));
        }
    }

    if !task.gates.is_empty() {
        md.push_str("\n### Gate decisions\n");
        for gate in &task.gates {
            let verdict = if gate.approved { "approved" } else { "rejected" };
            md.push_str(&format!("- {}/{}: {}\n", gate.phase, gate.gate, verdict));
        }
    }

    md
}

/// Format a single initiative as markdown.
pub fn render_initiative_markdown(initiative: &Initiative) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Initiative: {}\n", initiative.title));
    md.push_str(&format!("- **id**: `{}`\n", initiative.id));
    md.push_str(&format!("- **status**: {}\n", initiative.status.as_str()));
    if let Some(ref owner) = initiative.owner {
        md.push_str(&format!("- **owner**: {}\n", owner));
    }
    if !initiative.blocked_by.is_empty() {
        let blockers: Vec<String> = initiative
            .blocked_by
            .iter()
            .map(|id| format!("`{id}`"))
            .collect();
        md.push_str(&format!("- **blocked by**: {}\n", blockers.join(", ")));
    }

    if let Some(ref vision) = initiative.vision {
        md.push_str("\n### Vision\n");
        md.push_str(vision);
        md.push('\n');
    }

    if !initiative.decisions.is_empty() {
        md.push_str("\n### Decisions\n");
        for decision in &initiative.decisions {
            md.push_str(&format!("- **{}**: {}\n", decision.id, decision.text));
        }
    }

    if !initiative.tasks.is_empty() {
        md.push_str(&format!("\n### Tasks ({})\n", initiative.tasks.len()));
        for task_ref in &initiative.tasks {
            let mark = if task_ref.status.is_terminal() { "x" } else { " " };
            md.push_str(&format!(
                "- [{}] `{}` {} ({})\n",
                mark,
                task_ref.task_id,
                task_ref.title,
                task_ref.status.as_str()
            ));
        }
    }

    md
}
