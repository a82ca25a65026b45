//! Persistent store for the execution-state document.
//!
//! One JSON document per orchestration run, stored at
//! `<state_dir>/execution-state.json` (or one level deeper under
//! `projects/<project>/` for per-project runs). Every mutation runs a locked
//! read-modify-write cycle: acquire the advisory lock, read and parse the
//! full document, apply one logical mutation, write the full document back
//! (temp file + rename, so the document is never partially written), release
//! the lock on every exit path via the RAII guard.
//!
//! Read-only queries bypass the lock and may observe a document mid-update
//! relative to concurrent writers; callers get eventual consistency, not
//! linearizability.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{BudgetError, StateError};
use crate::domain::models::{
    AgentOutcome, AgentRecord, Budget, Config, ExecutionState, Message, MessageDraft,
    MessageFilters, RunStatus,
};

use super::lock::{FileLock, LockError};

/// File name of the execution-state document.
pub const STATE_FILE_NAME: &str = "execution-state.json";

/// Errors raised by state-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Execution state not initialized at {0}")]
    NotInitialized(String),

    #[error("Malformed execution state document at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("State I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

/// Store for one execution-state document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock: FileLock,
}

impl StateStore {
    /// A store for the document at `path`.
    pub fn new(path: impl Into<PathBuf>, lock: FileLock) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    /// Resolve the document path from configuration: per-project documents
    /// nest one level deeper, keyed by the project identifier.
    pub fn from_config(config: &Config) -> Self {
        let base = PathBuf::from(&config.state.dir);
        let path = match &config.state.project {
            Some(project) => base.join("projects").join(project).join(STATE_FILE_NAME),
            None => base.join(STATE_FILE_NAME),
        };
        Self::new(path, FileLock::new(config.lock.clone()))
    }

    /// Path of the underlying document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ------------------------------------------------------------------
    // Reads (lock-free)
    // ------------------------------------------------------------------

    /// Load the document. `Ok(None)` when no document exists; malformed JSON
    /// is surfaced as [`StoreError::Malformed`] so callers choose between
    /// re-initializing and failing, rather than silently getting defaults.
    pub async fn load(&self) -> Result<Option<ExecutionState>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let state =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
                        path: self.path.display().to_string(),
                        source,
                    })?;
                Ok(Some(state))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Load the document, failing with [`StoreError::NotInitialized`] when
    /// it does not exist.
    pub async fn load_required(&self) -> Result<ExecutionState, StoreError> {
        self.load()
            .await?
            .ok_or_else(|| StoreError::NotInitialized(self.path.display().to_string()))
    }

    /// Load the document, falling back to `fresh` when it is missing or
    /// unreadable. The fallback is returned, not persisted. For callers that
    /// must distinguish missing from corrupt, use [`load`](Self::load).
    pub async fn load_or_default<F>(&self, fresh: F) -> ExecutionState
    where
        F: FnOnce() -> ExecutionState,
    {
        match self.load().await {
            Ok(Some(state)) => state,
            Ok(None) => fresh(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Falling back to fresh state");
                fresh()
            }
        }
    }

    /// Filtered view over the message log. Lock-free; an uninitialized store
    /// has no messages.
    pub async fn get_messages(
        &self,
        filters: &MessageFilters,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .load()
            .await?
            .map(|state| state.messages_matching(filters))
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Mutations (locked read-modify-write)
    // ------------------------------------------------------------------

    /// Create the document if absent. When a document already exists it is
    /// returned unchanged — callers wanting a fresh run must remove it first.
    pub async fn init(&self, state: ExecutionState) -> Result<ExecutionState, StoreError> {
        let _guard = self.lock.acquire(&self.path).await?;

        if let Some(existing) = self.load().await? {
            debug!(path = %self.path.display(), "State already initialized, leaving as-is");
            return Ok(existing);
        }
        self.write_document(&state).await?;
        info!(path = %self.path.display(), plan_id = %state.plan_id, "Execution state initialized");
        Ok(state)
    }

    /// Apply one logical mutation under the lock and persist the result.
    /// The returned document reflects the mutation.
    pub async fn update<F>(&self, mutation: F) -> Result<ExecutionState, StoreError>
    where
        F: FnOnce(&mut ExecutionState) -> Result<(), StoreError> + Send,
    {
        let _guard = self.lock.acquire(&self.path).await?;

        let mut state = self.load_required().await?;
        mutation(&mut state)?;
        state.updated_at = Utc::now();
        self.write_document(&state).await?;
        Ok(state)
    }

    /// Register a spawned agent and pull its task out of `pendingTasks`.
    pub async fn add_active_agent(
        &self,
        agent: AgentRecord,
    ) -> Result<ExecutionState, StoreError> {
        let agent_id = agent.id.clone();
        let state = self
            .update(move |state| {
                state.add_agent(agent);
                Ok(())
            })
            .await?;
        debug!(agent_id = %agent_id, "Agent registered");
        Ok(state)
    }

    /// Apply a terminal outcome for an agent, filing its task into exactly
    /// one of the terminal task sets.
    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        outcome: AgentOutcome,
        result: Option<Value>,
        reason: Option<String>,
    ) -> Result<ExecutionState, StoreError> {
        let state = self
            .update(move |state| {
                state.resolve_agent(agent_id, outcome, result, reason)?;
                Ok(())
            })
            .await?;
        debug!(agent_id = %agent_id, outcome = ?outcome, "Agent resolved");
        Ok(state)
    }

    /// Append a message with a generated id, returning it.
    pub async fn add_message(&self, draft: MessageDraft) -> Result<Message, StoreError> {
        let state = self
            .update(|state| {
                state.append_message(draft);
                Ok(())
            })
            .await?;
        state
            .messages
            .last()
            .cloned()
            .ok_or_else(|| StoreError::NotInitialized(self.path.display().to_string()))
    }

    /// Flip a message's `processed` flag and stamp the processing time.
    pub async fn mark_message_processed(&self, id: Uuid) -> Result<(), StoreError> {
        self.update(|state| {
            state.mark_message_processed(id)?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Append a checkpoint for `phase`.
    pub async fn add_checkpoint(
        &self,
        phase: &str,
        note: &str,
    ) -> Result<ExecutionState, StoreError> {
        self.update(|state| {
            state.add_checkpoint(phase, note);
            Ok(())
        })
        .await
    }

    /// Set `currentPhase` and append a checkpoint in the same locked write,
    /// so a phase transition is never observable without its checkpoint.
    pub async fn set_current_phase(
        &self,
        phase: Option<String>,
        checkpoint_phase: &str,
        note: &str,
    ) -> Result<ExecutionState, StoreError> {
        self.update(|state| {
            state.current_phase = phase;
            state.add_checkpoint(checkpoint_phase, note);
            Ok(())
        })
        .await
    }

    /// Set the run status.
    pub async fn set_status(&self, status: RunStatus) -> Result<ExecutionState, StoreError> {
        self.update(|state| {
            state.status = status;
            Ok(())
        })
        .await
    }

    /// Apply a budget operation under the lock and persist the returned
    /// value, yielding the updated budget.
    pub async fn update_budget<F>(&self, op: F) -> Result<Budget, StoreError>
    where
        F: FnOnce(&Budget) -> Result<Budget, BudgetError> + Send,
    {
        let state = self
            .update(|state| {
                state.token_budget = op(&state.token_budget)?;
                Ok(())
            })
            .await?;
        Ok(state.token_budget)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Serialize and write the full document: temp file in the same
    /// directory, then rename over the target.
    async fn write_document(&self, state: &ExecutionState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let body = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Malformed {
            path: self.path.display().to_string(),
            source,
        })?;

        let tmp = self.path.with_extension(format!("json.tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LockConfig, MessageType, Tier, RECIPIENT_ORCHESTRATOR};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::new(
            dir.path().join(STATE_FILE_NAME),
            FileLock::new(LockConfig {
                timeout_ms: 1_000,
                stale_ms: 5_000,
                poll_interval_ms: 5,
            }),
        )
    }

    fn fresh_state(tasks: &[&str]) -> ExecutionState {
        ExecutionState::new(
            "plan-1",
            "plans/plan-1.md",
            tasks.iter().map(|t| (*t).to_string()).collect(),
            Budget::new(50_000),
        )
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_init_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let state = store.init(fresh_state(&["t1"])).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_init_is_noop_when_present() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.init(fresh_state(&["t1"])).await.unwrap();
        let second = store.init(fresh_state(&["other"])).await.unwrap();
        assert_eq!(second.pending_tasks, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_document_is_an_explicit_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), b"{not json").await.unwrap();

        assert!(matches!(
            store.load().await,
            Err(StoreError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_requires_initialized_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let result = store.set_status(RunStatus::Paused).await;
        assert!(matches!(result, Err(StoreError::NotInitialized(_))));
        // Lock was released on the error path.
        assert!(!FileLock::lock_path(store.path()).exists());
    }

    #[tokio::test]
    async fn test_agent_lifecycle_through_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.init(fresh_state(&["t1"])).await.unwrap();

        store
            .add_active_agent(AgentRecord::spawned("a1", Tier::L3, "backend", "t1", None))
            .await
            .unwrap();
        let state = store
            .update_agent_status("a1", AgentOutcome::Completed, None, None)
            .await
            .unwrap();

        assert!(state.active_agents.is_empty());
        assert_eq!(state.completed_tasks, vec!["t1".to_string()]);
        assert!(state.pending_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_messages_and_lock_free_query() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.init(fresh_state(&[])).await.unwrap();

        let message = store
            .add_message(MessageDraft {
                kind: MessageType::Progress,
                sender: "a1".into(),
                recipient: RECIPIENT_ORCHESTRATOR.into(),
                correlation_id: None,
                payload: serde_json::json!({"pct": 50}),
            })
            .await
            .unwrap();

        let unprocessed = store
            .get_messages(&MessageFilters {
                unprocessed_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unprocessed.len(), 1);

        store.mark_message_processed(message.id).await.unwrap();
        let unprocessed = store
            .get_messages(&MessageFilters {
                unprocessed_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(unprocessed.is_empty());
    }

    #[tokio::test]
    async fn test_update_budget_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.init(fresh_state(&[])).await.unwrap();

        let budget = store
            .update_budget(|b| b.allocate("phase-1", 10_000, serde_json::Map::new()))
            .await
            .unwrap();
        assert_eq!(budget.available, 40_000);

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.token_budget.allocations["phase-1"].allocated, 10_000);
    }

    #[tokio::test]
    async fn test_budget_error_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.init(fresh_state(&[])).await.unwrap();

        let result = store
            .update_budget(|b| b.allocate("x", 999_999, serde_json::Map::new()))
            .await;
        assert!(matches!(result, Err(StoreError::Budget(_))));
        assert!(!FileLock::lock_path(store.path()).exists());
    }

    #[tokio::test]
    async fn test_project_scoped_path() {
        let mut config = Config::default();
        config.state.dir = "/tmp/echelon-test".into();
        config.state.project = Some("svc-api".into());
        let store = StateStore::from_config(&config);
        assert_eq!(
            store.path(),
            Path::new("/tmp/echelon-test/projects/svc-api/execution-state.json")
        );
    }
}
