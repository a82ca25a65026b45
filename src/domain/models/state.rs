//! Execution-state document model.
//!
//! One [`ExecutionState`] exists per orchestration run. It is persisted as a
//! single JSON object (camelCase keys — external tooling reads the document
//! directly) and mutated only through the state store's locked
//! read-modify-write cycle. The logical mutations themselves live here so
//! they can be tested without touching disk.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::StateError;

use super::budget::Budget;

/// Logical level in the agent hierarchy: L0 epic, L1 roadmap, L2 phase
/// specialist, L3 task worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    L0,
    L1,
    L2,
    L3,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L0 => "L0",
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Paused,
    Completed,
}

/// Status of a single agent.
///
/// Transitions are one-way: `Running` is the only non-terminal state and an
/// agent never re-enters it. Terminal transitions are expressed through
/// [`AgentOutcome`] so the type system rules out `running -> running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    Blocked,
}

/// Terminal outcome reported for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Completed,
    Failed,
    Blocked,
}

impl AgentOutcome {
    pub fn as_status(&self) -> AgentStatus {
        match self {
            Self::Completed => AgentStatus::Completed,
            Self::Failed => AgentStatus::Failed,
            Self::Blocked => AgentStatus::Blocked,
        }
    }
}

/// A live agent registered in the execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    /// Unique agent id within the run.
    pub id: String,
    pub tier: Tier,
    /// Domain tag (e.g. `backend`, `docs`).
    pub domain: String,
    /// Task this agent owns.
    pub task_id: String,
    /// Spawning agent, `None` for roots. Forms the spawn tree.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub spawned_at: DateTime<Utc>,
    pub status: AgentStatus,
    /// Terminal result payload; `None` until the agent reaches a terminal
    /// status.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl AgentRecord {
    /// A freshly spawned, running agent.
    pub fn spawned(
        id: impl Into<String>,
        tier: Tier,
        domain: impl Into<String>,
        task_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tier,
            domain: domain.into(),
            task_id: task_id.into(),
            parent_id,
            spawned_at: Utc::now(),
            status: AgentStatus::Running,
            result: None,
        }
    }
}

/// Kind of an inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Spawn,
    Complete,
    Blocked,
    Failed,
    Progress,
}

/// Recipient wildcard for broadcast messages.
pub const RECIPIENT_ALL: &str = "all";
/// Recipient address of the top-level orchestrator.
pub const RECIPIENT_ORCHESTRATOR: &str = "orchestrator";

/// An entry in the append-only message log. Immutable once appended, except
/// for the `processed` flag which flips exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub sender: String,
    /// `orchestrator`, `all`, or a specific agent id.
    pub recipient: String,
    /// Groups a batch of sub-task messages under one parent request.
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

/// The caller-supplied part of a message; id, timestamp, and the processed
/// flag are stamped by the store on append.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub kind: MessageType,
    pub sender: String,
    pub recipient: String,
    pub correlation_id: Option<String>,
    pub payload: serde_json::Value,
}

/// Filters for querying the message log. All present filters compose with
/// logical AND.
#[derive(Debug, Clone, Default)]
pub struct MessageFilters {
    /// Match messages addressed to this recipient, or to `all`.
    pub recipient: Option<String>,
    pub kind: Option<MessageType>,
    pub correlation_id: Option<String>,
    pub unprocessed_only: bool,
    pub since: Option<DateTime<Utc>>,
}

impl MessageFilters {
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(recipient) = &self.recipient {
            if message.recipient != *recipient && message.recipient != RECIPIENT_ALL {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if message.kind != kind {
                return false;
            }
        }
        if let Some(correlation_id) = &self.correlation_id {
            if message.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                return false;
            }
        }
        if self.unprocessed_only && message.processed {
            return false;
        }
        if let Some(since) = self.since {
            if message.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Point-in-time summary appended when a phase boundary is crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub phase: String,
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

/// Monotonic counters maintained across the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_blocked: u64,
    /// Spawn counts keyed by tier.
    #[serde(default)]
    pub agents_spawned: BTreeMap<Tier, u64>,
}

/// The canonical execution-state document for one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub plan_id: String,
    pub plan_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Phase currently being worked, once the run has started.
    #[serde(default)]
    pub current_phase: Option<String>,
    pub active_agents: Vec<AgentRecord>,
    /// Disjoint task-id sets: a task id lives in exactly one of these.
    pub completed_tasks: Vec<String>,
    pub pending_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub blocked_tasks: Vec<String>,
    /// Error / blocker reason per non-completed terminal task.
    #[serde(default)]
    pub task_reasons: BTreeMap<String, String>,
    pub messages: Vec<Message>,
    pub token_budget: Budget,
    pub checkpoints: Vec<Checkpoint>,
    pub metrics: RunMetrics,
    /// Opaque findings block written by L2 specialists; read/write
    /// passthrough, never validated here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l2_findings: Option<serde_json::Value>,
}

impl ExecutionState {
    /// A fresh document for a new run.
    pub fn new(
        plan_id: impl Into<String>,
        plan_path: impl Into<String>,
        pending_tasks: Vec<String>,
        budget: Budget,
    ) -> Self {
        let now = Utc::now();
        Self {
            plan_id: plan_id.into(),
            plan_path: plan_path.into(),
            created_at: now,
            updated_at: now,
            status: RunStatus::Active,
            current_phase: None,
            active_agents: Vec::new(),
            completed_tasks: Vec::new(),
            pending_tasks,
            failed_tasks: Vec::new(),
            blocked_tasks: Vec::new(),
            task_reasons: BTreeMap::new(),
            messages: Vec::new(),
            token_budget: budget,
            checkpoints: Vec::new(),
            metrics: RunMetrics::default(),
            l2_findings: None,
        }
    }

    /// Register a spawned agent: append to `active_agents` (re-adding an id
    /// replaces the stale record), bump the per-tier spawn counter, and pull
    /// the owning task out of `pending_tasks`.
    pub fn add_agent(&mut self, agent: AgentRecord) {
        self.active_agents.retain(|a| a.id != agent.id);
        *self.metrics.agents_spawned.entry(agent.tier).or_insert(0) += 1;
        self.pending_tasks.retain(|t| *t != agent.task_id);
        self.active_agents.push(agent);
    }

    /// Apply a terminal outcome: remove the agent from `active_agents` and
    /// file its task into exactly one of the terminal task sets, recording
    /// `reason` for non-completed outcomes.
    pub fn resolve_agent(
        &mut self,
        agent_id: &str,
        outcome: AgentOutcome,
        result: Option<serde_json::Value>,
        reason: Option<String>,
    ) -> Result<AgentRecord, StateError> {
        let index = self
            .active_agents
            .iter()
            .position(|a| a.id == agent_id)
            .ok_or_else(|| StateError::AgentNotFound(agent_id.to_string()))?;

        let mut agent = self.active_agents.remove(index);
        agent.status = outcome.as_status();
        agent.result = result;

        let task_id = agent.task_id.clone();
        self.remove_task_everywhere(&task_id);
        match outcome {
            AgentOutcome::Completed => {
                self.completed_tasks.push(task_id);
                self.metrics.tasks_completed += 1;
            }
            AgentOutcome::Failed => {
                self.failed_tasks.push(task_id.clone());
                self.metrics.tasks_failed += 1;
                self.task_reasons
                    .insert(task_id, reason.unwrap_or_else(|| "Unknown error".to_string()));
            }
            AgentOutcome::Blocked => {
                self.blocked_tasks.push(task_id.clone());
                self.metrics.tasks_blocked += 1;
                self.task_reasons
                    .insert(task_id, reason.unwrap_or_else(|| "Unknown blocker".to_string()));
            }
        }
        Ok(agent)
    }

    /// Append a message, stamping id, timestamp, and the unprocessed flag.
    /// Returns the appended message.
    pub fn append_message(&mut self, draft: MessageDraft) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            kind: draft.kind,
            sender: draft.sender,
            recipient: draft.recipient,
            correlation_id: draft.correlation_id,
            timestamp: Utc::now(),
            processed: false,
            processed_at: None,
            payload: draft.payload,
        };
        self.messages.push(message.clone());
        message
    }

    /// Flip a message's `processed` flag (false -> true) and stamp the time.
    pub fn mark_message_processed(&mut self, id: Uuid) -> Result<(), StateError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StateError::MessageNotFound(id))?;
        if !message.processed {
            message.processed = true;
            message.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Filtered view over the message log, in append order.
    pub fn messages_matching(&self, filters: &MessageFilters) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| filters.matches(m))
            .cloned()
            .collect()
    }

    /// Append a checkpoint for `phase`.
    pub fn add_checkpoint(&mut self, phase: impl Into<String>, note: impl Into<String>) {
        self.checkpoints.push(Checkpoint {
            phase: phase.into(),
            timestamp: Utc::now(),
            note: note.into(),
        });
    }

    fn remove_task_everywhere(&mut self, task_id: &str) {
        self.pending_tasks.retain(|t| t != task_id);
        self.completed_tasks.retain(|t| t != task_id);
        self.failed_tasks.retain(|t| t != task_id);
        self.blocked_tasks.retain(|t| t != task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_tasks(tasks: &[&str]) -> ExecutionState {
        ExecutionState::new(
            "plan-1",
            "plans/plan-1.md",
            tasks.iter().map(|t| (*t).to_string()).collect(),
            Budget::new(100_000),
        )
    }

    #[test]
    fn test_add_agent_moves_task_out_of_pending() {
        let mut state = state_with_tasks(&["t1", "t2"]);
        state.add_agent(AgentRecord::spawned("a1", Tier::L3, "backend", "t1", None));

        assert_eq!(state.pending_tasks, vec!["t2".to_string()]);
        assert_eq!(state.active_agents.len(), 1);
        assert_eq!(state.metrics.agents_spawned[&Tier::L3], 1);
    }

    #[test]
    fn test_readding_agent_id_replaces_record() {
        let mut state = state_with_tasks(&["t1"]);
        state.add_agent(AgentRecord::spawned("a1", Tier::L3, "backend", "t1", None));
        state.add_agent(AgentRecord::spawned("a1", Tier::L3, "docs", "t1", None));

        assert_eq!(state.active_agents.len(), 1);
        assert_eq!(state.active_agents[0].domain, "docs");
        // Spawn counter still counts both registrations.
        assert_eq!(state.metrics.agents_spawned[&Tier::L3], 2);
    }

    #[test]
    fn test_resolve_agent_completed() {
        let mut state = state_with_tasks(&["t1"]);
        state.add_agent(AgentRecord::spawned("a1", Tier::L3, "backend", "t1", None));

        let agent = state
            .resolve_agent("a1", AgentOutcome::Completed, Some(serde_json::json!({"ok": true})), None)
            .unwrap();

        assert_eq!(agent.status, AgentStatus::Completed);
        assert!(state.active_agents.is_empty());
        assert_eq!(state.completed_tasks, vec!["t1".to_string()]);
        assert!(state.failed_tasks.is_empty());
        assert_eq!(state.metrics.tasks_completed, 1);
    }

    #[test]
    fn test_resolve_agent_blocked_records_reason() {
        let mut state = state_with_tasks(&["t1"]);
        state.add_agent(AgentRecord::spawned("a1", Tier::L3, "backend", "t1", None));

        state
            .resolve_agent("a1", AgentOutcome::Blocked, None, Some("waiting on api keys".into()))
            .unwrap();

        assert_eq!(state.blocked_tasks, vec!["t1".to_string()]);
        assert_eq!(state.task_reasons["t1"], "waiting on api keys");
    }

    #[test]
    fn test_resolve_unknown_agent_fails() {
        let mut state = state_with_tasks(&[]);
        assert!(matches!(
            state.resolve_agent("ghost", AgentOutcome::Failed, None, None),
            Err(StateError::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_task_sets_stay_disjoint_across_retry() {
        let mut state = state_with_tasks(&["t1"]);
        state.add_agent(AgentRecord::spawned("a1", Tier::L3, "backend", "t1", None));
        state
            .resolve_agent("a1", AgentOutcome::Failed, None, Some("flaky".into()))
            .unwrap();

        // Retry with a new agent on the same task.
        state.add_agent(AgentRecord::spawned("a2", Tier::L3, "backend", "t1", None));
        state.resolve_agent("a2", AgentOutcome::Completed, None, None).unwrap();

        assert_eq!(state.completed_tasks, vec!["t1".to_string()]);
        assert!(state.failed_tasks.is_empty());
    }

    #[test]
    fn test_message_filters_compose_with_and() {
        let mut state = state_with_tasks(&[]);
        state.append_message(MessageDraft {
            kind: MessageType::Progress,
            sender: "a1".into(),
            recipient: RECIPIENT_ORCHESTRATOR.into(),
            correlation_id: Some("batch-1".into()),
            payload: serde_json::json!({}),
        });
        state.append_message(MessageDraft {
            kind: MessageType::Complete,
            sender: "a2".into(),
            recipient: RECIPIENT_ALL.into(),
            correlation_id: None,
            payload: serde_json::json!({}),
        });

        // Broadcast messages match any recipient filter.
        let to_orchestrator = state.messages_matching(&MessageFilters {
            recipient: Some(RECIPIENT_ORCHESTRATOR.into()),
            ..Default::default()
        });
        assert_eq!(to_orchestrator.len(), 2);

        let complete_only = state.messages_matching(&MessageFilters {
            recipient: Some(RECIPIENT_ORCHESTRATOR.into()),
            kind: Some(MessageType::Complete),
            ..Default::default()
        });
        assert_eq!(complete_only.len(), 1);
        assert_eq!(complete_only[0].sender, "a2");

        let correlated = state.messages_matching(&MessageFilters {
            correlation_id: Some("batch-1".into()),
            ..Default::default()
        });
        assert_eq!(correlated.len(), 1);
    }

    #[test]
    fn test_mark_message_processed_is_one_way() {
        let mut state = state_with_tasks(&[]);
        let id = state
            .append_message(MessageDraft {
                kind: MessageType::Progress,
                sender: "a1".into(),
                recipient: RECIPIENT_ALL.into(),
                correlation_id: None,
                payload: serde_json::json!({}),
            })
            .id;

        state.mark_message_processed(id).unwrap();
        let first_stamp = state.messages[0].processed_at;
        assert!(state.messages[0].processed);
        assert!(first_stamp.is_some());

        // Second call is a no-op, stamp unchanged.
        state.mark_message_processed(id).unwrap();
        assert_eq!(state.messages[0].processed_at, first_stamp);
    }

    #[test]
    fn test_unprocessed_filter() {
        let mut state = state_with_tasks(&[]);
        let id = state
            .append_message(MessageDraft {
                kind: MessageType::Progress,
                sender: "a1".into(),
                recipient: RECIPIENT_ALL.into(),
                correlation_id: None,
                payload: serde_json::json!({}),
            })
            .id;
        state.append_message(MessageDraft {
            kind: MessageType::Progress,
            sender: "a2".into(),
            recipient: RECIPIENT_ALL.into(),
            correlation_id: None,
            payload: serde_json::json!({}),
        });
        state.mark_message_processed(id).unwrap();

        let unprocessed = state.messages_matching(&MessageFilters {
            unprocessed_only: true,
            ..Default::default()
        });
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].sender, "a2");
    }

    #[test]
    fn test_state_document_round_trips_camel_case() {
        let mut state = state_with_tasks(&["t1"]);
        state.l2_findings = Some(serde_json::json!({"snippets": []}));

        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("pendingTasks").is_some());
        assert!(json.get("tokenBudget").is_some());
        assert!(json.get("l2Findings").is_some());

        let back: ExecutionState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
