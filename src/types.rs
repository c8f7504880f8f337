//! Core domain types for the orc store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task lifecycle status.
///
/// created -> classifying -> planned -> running <-> paused <-> blocked ->
/// finalizing -> completed/finished, with failed reachable from running and
/// finalizing. The store does not enforce the transition graph; the claim
/// manager only cares which states are resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Created,
    Classifying,
    Planned,
    Running,
    Paused,
    Blocked,
    Finalizing,
    Completed,
    Finished,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Classifying => "classifying",
            TaskStatus::Planned => "planned",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Finalizing => "finalizing",
            TaskStatus::Completed => "completed",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(TaskStatus::Created),
            "classifying" => Some(TaskStatus::Classifying),
            "planned" => Some(TaskStatus::Planned),
            "running" => Some(TaskStatus::Running),
            "paused" => Some(TaskStatus::Paused),
            "blocked" => Some(TaskStatus::Blocked),
            "finalizing" => Some(TaskStatus::Finalizing),
            "completed" => Some(TaskStatus::Completed),
            "finished" => Some(TaskStatus::Finished),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// States an interrupted execution may be resumed from.
    /// Everything else must go through a normal start.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Running | TaskStatus::Paused | TaskStatus::Blocked | TaskStatus::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Finished)
    }
}

/// Task size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Trivial,
    Small,
    #[default]
    Medium,
    Large,
    Epic,
}

impl Weight {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weight::Trivial => "trivial",
            Weight::Small => "small",
            Weight::Medium => "medium",
            Weight::Large => "large",
            Weight::Epic => "epic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trivial" => Some(Weight::Trivial),
            "small" => Some(Weight::Small),
            "medium" => Some(Weight::Medium),
            "large" => Some(Weight::Large),
            "epic" => Some(Weight::Epic),
            _ => None,
        }
    }
}

/// Status of a single workflow phase within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhaseStatus::Pending),
            "running" => Some(PhaseStatus::Running),
            "completed" => Some(PhaseStatus::Completed),
            "failed" => Some(PhaseStatus::Failed),
            "skipped" => Some(PhaseStatus::Skipped),
            _ => None,
        }
    }
}

/// Identity of the process currently executing a task.
///
/// Used only by the claim/orphan logic. `None` on the task means unclaimed;
/// there is no pid-0 sentinel in the domain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorIdentity {
    pub pid: u32,
    pub hostname: String,
    pub started_at: i64,
    pub last_heartbeat: i64,
}

/// Per-task quality counters, stored as a single JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Retry count per phase id.
    #[serde(default)]
    pub phase_retries: HashMap<String, i32>,
    #[serde(default)]
    pub review_rejections: i32,
    #[serde(default)]
    pub manual_intervention: bool,
    pub intervention_reason: Option<String>,
}

/// Per-task overrides for branch and pull-request handling.
///
/// Every field is independently optional: `None` means "inherit the
/// configured default". For the two list fields `Some(vec![])` means
/// "explicitly none" and is persisted distinctly from `None` via companion
/// `*_set` row flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchControls {
    pub branch_name: Option<String>,
    pub pr_draft: Option<bool>,
    pub pr_labels: Option<Vec<String>>,
    pub pr_reviewers: Option<Vec<String>>,
}

/// Execution state of one workflow phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: PhaseStatus,
    pub iteration: i32,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub error: Option<String>,
    pub commit: Option<String>,
    pub session_id: Option<String>,
}

/// One gate verdict. Append-only history: never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub phase: String,
    /// Free-form gate type; the approval policy system is out of scope here.
    pub gate: String,
    pub approved: bool,
    pub reason: Option<String>,
    pub decided_at: i64,
}

/// The unit of orchestrated work, with its full sub-aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub weight: Weight,
    pub workflow: Option<String>,
    pub status: TaskStatus,
    /// Current phase id within the workflow, once execution has started.
    pub phase: Option<String>,
    pub branch: Option<String>,
    pub target_branch: Option<String>,

    // Classifiers
    pub queue: Option<String>,
    pub priority: i32,
    pub category: Option<String>,
    pub initiative_id: Option<String>,

    pub metadata: HashMap<String, serde_json::Value>,
    pub quality: Option<QualityMetrics>,
    pub branch_controls: BranchControls,

    /// Present while a live process holds the execution slot.
    pub executor: Option<ExecutorIdentity>,

    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,

    /// Ordered blocked-by edges (task ids this task waits on).
    pub deps: Vec<String>,
    /// Exactly one entry per phase id.
    pub phases: HashMap<String, PhaseState>,
    /// Append-only gate decision history, in insertion order.
    pub gates: Vec<GateDecision>,
}

impl Task {
    /// A task with the given id and title and defaults everywhere else.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = crate::db::now_ms();
        Task {
            id: id.into(),
            title: title.into(),
            description: None,
            weight: Weight::default(),
            workflow: None,
            status: TaskStatus::Created,
            phase: None,
            branch: None,
            target_branch: None,
            queue: None,
            priority: 0,
            category: None,
            initiative_id: None,
            metadata: HashMap::new(),
            quality: None,
            branch_controls: BranchControls::default(),
            executor: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            deps: Vec::new(),
            phases: HashMap::new(),
            gates: Vec::new(),
        }
    }
}

/// Initiative lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiativeStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Archived,
}

impl InitiativeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiativeStatus::Draft => "draft",
            InitiativeStatus::Active => "active",
            InitiativeStatus::Completed => "completed",
            InitiativeStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InitiativeStatus::Draft),
            "active" => Some(InitiativeStatus::Active),
            "completed" => Some(InitiativeStatus::Completed),
            "archived" => Some(InitiativeStatus::Archived),
            _ => None,
        }
    }
}

/// A recorded decision within an initiative.
///
/// Decision ids are scoped by initiative: two initiatives may each carry a
/// "DEC-001" without colliding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub date: Option<String>,
    pub author: Option<String>,
    pub text: String,
    pub rationale: Option<String>,
}

/// Task membership entry on an initiative.
///
/// Title and status are denormalized snapshots; loads refresh them from the
/// live tasks table and silently skip refs whose task no longer exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// A grouping of tasks toward a larger goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiative {
    pub id: String,
    pub title: String,
    pub status: InitiativeStatus,
    pub owner: Option<String>,
    pub vision: Option<String>,
    pub branch_base: Option<String>,
    pub branch_prefix: Option<String>,
    pub merge_status: Option<String>,
    pub merge_commit: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,

    pub decisions: Vec<Decision>,
    pub tasks: Vec<TaskRef>,
    /// Initiative ids this initiative waits on.
    pub blocked_by: Vec<String>,
    /// Inverse of blocked_by across all initiatives; derived at load, never stored.
    pub blocks: Vec<String>,
}

impl Initiative {
    /// An initiative with the given id and title and defaults everywhere else.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = crate::db::now_ms();
        Initiative {
            id: id.into(),
            title: title.into(),
            status: InitiativeStatus::Draft,
            owner: None,
            vision: None,
            branch_base: None,
            branch_prefix: None,
            merge_status: None,
            merge_commit: None,
            created_at: now,
            updated_at: now,
            decisions: Vec::new(),
            tasks: Vec::new(),
            blocked_by: Vec::new(),
            blocks: Vec::new(),
        }
    }
}

/// Kind of tracked git branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchType {
    Initiative,
    Staging,
    Task,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Initiative => "initiative",
            BranchType::Staging => "staging",
            BranchType::Task => "task",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initiative" => Some(BranchType::Initiative),
            "staging" => Some(BranchType::Staging),
            "task" => Some(BranchType::Task),
            _ => None,
        }
    }
}

/// Branch lifecycle status. Transitions happen only via explicit calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    #[default]
    Active,
    Merged,
    Stale,
    Orphaned,
}

impl BranchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchStatus::Active => "active",
            BranchStatus::Merged => "merged",
            BranchStatus::Stale => "stale",
            BranchStatus::Orphaned => "orphaned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BranchStatus::Active),
            "merged" => Some(BranchStatus::Merged),
            "stale" => Some(BranchStatus::Stale),
            "orphaned" => Some(BranchStatus::Orphaned),
            _ => None,
        }
    }
}

/// A git ref created and tracked by the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub branch_type: BranchType,
    pub owner: Option<String>,
    pub status: BranchStatus,
    pub created_at: i64,
    pub last_activity_at: i64,
}

/// One issue raised by a review or QA pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: String,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub description: String,
    pub suggestion: Option<String>,
    /// Originating agent, when the issue came from an automated reviewer.
    pub agent: Option<String>,
}

/// Structured output of a review phase, immutable per (task, round).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewFindings {
    pub task_id: String,
    pub round: i32,
    pub summary: String,
    pub issues: Vec<Issue>,
    pub questions: Vec<String>,
    pub positives: Vec<String>,
    pub created_at: i64,
}

/// Structured output of a QA phase, immutable per (task, round).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaResult {
    pub task_id: String,
    pub round: i32,
    pub passed: bool,
    pub summary: String,
    pub issues: Vec<Issue>,
    pub questions: Vec<String>,
    pub positives: Vec<String>,
    pub created_at: i64,
}

/// Append-only transcript/event entry for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub task_id: String,
    pub kind: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: i64,
}

/// A shared workflow definition, stored in the global store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub id: String,
    pub description: Option<String>,
    /// Ordered phase ids.
    pub phases: Vec<String>,
    pub updated_at: i64,
}

/// A shared agent definition, stored in the global store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    pub id: String,
    pub role: String,
    pub model: Option<String>,
    pub updated_at: i64,
}
