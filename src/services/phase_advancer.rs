//! Phase progress and dependency gating.
//!
//! Phases form a dependency graph; a phase may not start until every phase
//! it depends on is completed. The advancer computes per-phase completion
//! metrics, resolves the next eligible phase in plan order, and performs the
//! `currentPhase` transition on the state store.

use tracing::{debug, info};

use crate::domain::models::{Phase, PhaseStatus, PhaseTaskStatus};
use crate::infrastructure::state_store::{StateStore, StoreError};

/// Completion metrics for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgress {
    pub completed: usize,
    pub total: usize,
    /// `round(completed / total * 100)`; an empty phase reports 100.
    pub percentage: u32,
    /// True only for a non-empty phase with every task completed.
    pub is_complete: bool,
}

/// Completion metrics over the phase's own task list.
pub fn phase_progress(phase: &Phase) -> PhaseProgress {
    let total = phase.tasks.len();
    let completed = phase
        .tasks
        .iter()
        .filter(|t| t.status == PhaseTaskStatus::Completed)
        .count();
    let percentage = if total == 0 {
        100
    } else {
        (completed as f64 / total as f64 * 100.0).round() as u32
    };
    PhaseProgress {
        completed,
        total,
        percentage,
        is_complete: total > 0 && completed == total,
    }
}

/// Resolve the next eligible phase: the first phase in list order whose
/// dependencies are all satisfied and whose own status is not `completed`.
///
/// A dependency is satisfied when its phase is `completed`, or when it is
/// `completed_phase_id` itself — the caller may not have persisted that
/// completion yet; for the same reason the just-completed phase is never a
/// candidate. `None` means no phase is currently eligible.
pub fn find_next_phase<'a>(phases: &'a [Phase], completed_phase_id: &str) -> Option<&'a Phase> {
    phases.iter().find(|phase| {
        if phase.status == PhaseStatus::Completed || phase.id == completed_phase_id {
            return false;
        }
        phase.dependencies.iter().all(|dep| {
            dep == completed_phase_id
                || phases
                    .iter()
                    .any(|p| p.id == *dep && p.status == PhaseStatus::Completed)
        })
    })
}

/// Record the completion of `completed_phase_id` and transition the store's
/// `currentPhase` to the next eligible phase, appending a `phase_complete`
/// checkpoint. Returns the id of the phase now current, or `None` when no
/// phase is eligible (the run is finished or fully gated).
pub async fn advance_phase(
    store: &StateStore,
    phases: &[Phase],
    completed_phase_id: &str,
) -> Result<Option<String>, StoreError> {
    let next_id = find_next_phase(phases, completed_phase_id).map(|p| p.id.clone());

    let note = match &next_id {
        Some(next) => format!("Phase {completed_phase_id} complete; advancing to {next}"),
        None => format!("Phase {completed_phase_id} complete; no eligible phase remains"),
    };
    store
        .set_current_phase(next_id.clone(), "phase_complete", &note)
        .await?;

    match &next_id {
        Some(next) => info!(completed = %completed_phase_id, next = %next, "Phase advanced"),
        None => debug!(completed = %completed_phase_id, "No eligible next phase"),
    }
    Ok(next_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Budget, ExecutionState, LockConfig, PhaseTask};
    use crate::infrastructure::lock::FileLock;

    fn phase(id: &str, status: PhaseStatus, deps: &[&str]) -> Phase {
        let mut phase = Phase::new(id, format!("Phase {id}"), vec![]);
        phase.status = status;
        phase.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
        phase
    }

    fn task(id: &str, status: PhaseTaskStatus) -> PhaseTask {
        PhaseTask {
            id: id.to_string(),
            status,
        }
    }

    #[test]
    fn test_progress_two_of_three() {
        let mut p = Phase::new("p1", "One", vec![]);
        p.tasks = vec![
            task("t1", PhaseTaskStatus::Completed),
            task("t2", PhaseTaskStatus::Completed),
            task("t3", PhaseTaskStatus::InProgress),
        ];

        let progress = phase_progress(&p);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.percentage, 67);
        assert!(!progress.is_complete);
    }

    #[test]
    fn test_progress_all_complete() {
        let mut p = Phase::new("p1", "One", vec![]);
        p.tasks = vec![
            task("t1", PhaseTaskStatus::Completed),
            task("t2", PhaseTaskStatus::Completed),
            task("t3", PhaseTaskStatus::Completed),
        ];

        let progress = phase_progress(&p);
        assert_eq!(progress.percentage, 100);
        assert!(progress.is_complete);
    }

    #[test]
    fn test_progress_empty_phase() {
        let progress = phase_progress(&Phase::new("p1", "Empty", vec![]));
        assert_eq!(progress.percentage, 100);
        assert!(!progress.is_complete);
    }

    #[test]
    fn test_find_next_skips_gated_phase() {
        let phases = vec![
            phase("p1", PhaseStatus::InProgress, &[]),
            phase("p2", PhaseStatus::Pending, &["p1"]),
        ];
        // p1 is not completed, so p2 is gated; p1 itself is still eligible.
        let next = find_next_phase(&phases, "p0").unwrap();
        assert_eq!(next.id, "p1");
    }

    #[test]
    fn test_find_next_honors_completed_dependency() {
        let phases = vec![
            phase("p1", PhaseStatus::Completed, &[]),
            phase("p2", PhaseStatus::Pending, &["p1"]),
        ];
        let next = find_next_phase(&phases, "p1").unwrap();
        assert_eq!(next.id, "p2");
    }

    #[test]
    fn test_find_next_treats_argument_as_completed() {
        // p1's status not yet persisted as completed, but the caller just
        // finished it.
        let phases = vec![
            phase("p1", PhaseStatus::InProgress, &[]),
            phase("p2", PhaseStatus::Pending, &["p1"]),
        ];
        let next = find_next_phase(&phases, "p1").unwrap();
        assert_eq!(next.id, "p2");
    }

    #[test]
    fn test_find_next_none_when_all_done() {
        let phases = vec![
            phase("p1", PhaseStatus::Completed, &[]),
            phase("p2", PhaseStatus::Completed, &["p1"]),
        ];
        assert!(find_next_phase(&phases, "p2").is_none());
    }

    #[test]
    fn test_find_next_multi_dependency_gate() {
        let phases = vec![
            phase("p1", PhaseStatus::Completed, &[]),
            phase("p2", PhaseStatus::InProgress, &[]),
            phase("p3", PhaseStatus::Pending, &["p1", "p2"]),
        ];
        // p3 needs both; p2 is not finished, so p2 is the next eligible.
        let next = find_next_phase(&phases, "p1").unwrap();
        assert_eq!(next.id, "p2");
    }

    #[tokio::test]
    async fn test_advance_phase_writes_current_and_checkpoint() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(
            dir.path().join("execution-state.json"),
            FileLock::new(LockConfig::default()),
        );
        store
            .init(ExecutionState::new("plan", "plan.md", vec![], Budget::new(1_000)))
            .await
            .unwrap();

        let phases = vec![
            phase("p1", PhaseStatus::InProgress, &[]),
            phase("p2", PhaseStatus::Pending, &["p1"]),
        ];
        let next = advance_phase(&store, &phases, "p1").await.unwrap();
        assert_eq!(next.as_deref(), Some("p2"));

        let state = store.load().await.unwrap().unwrap();
        assert_eq!(state.current_phase.as_deref(), Some("p2"));
        assert_eq!(state.checkpoints.len(), 1);
        assert_eq!(state.checkpoints[0].phase, "phase_complete");
    }
}
