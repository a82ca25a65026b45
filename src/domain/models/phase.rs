//! Phase model.
//!
//! Phases are defined by the plan and form a dependency graph: a phase may
//! not start until every phase it depends on is completed (gating). The
//! advancement rules themselves live in `services::phase_advancer`.

use serde::{Deserialize, Serialize};

/// Status of a plan phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }
}

/// Status of one task within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

/// A task entry within a phase's ordered task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTask {
    pub id: String,
    pub status: PhaseTaskStatus,
}

impl PhaseTask {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: PhaseTaskStatus::Pending,
        }
    }
}

/// One phase of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub status: PhaseStatus,
    /// Ordered task list with per-task status.
    pub tasks: Vec<PhaseTask>,
    /// Phase ids that must be `completed` before this phase may start.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Phase {
    /// A pending phase with the given tasks, no dependencies.
    pub fn new(id: impl Into<String>, title: impl Into<String>, task_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: PhaseStatus::Pending,
            tasks: task_ids.into_iter().map(PhaseTask::pending).collect(),
            dependencies: Vec::new(),
        }
    }

    /// Add dependency phase ids (builder-style).
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }
}
