pub mod budget;
pub mod config;
pub mod phase;
pub mod state;

pub use budget::{
    Allocation, AllocationStatus, Budget, BudgetCheck, BudgetSummary, ChildSummary, UsageEntry,
};
pub use config::{
    AggregationConfig, BudgetConfig, Config, LockConfig, LoggingConfig, StateConfig,
};
pub use phase::{Phase, PhaseStatus, PhaseTask, PhaseTaskStatus};
pub use state::{
    AgentOutcome, AgentRecord, AgentStatus, Checkpoint, ExecutionState, Message, MessageDraft,
    MessageFilters, MessageType, RunMetrics, RunStatus, Tier, RECIPIENT_ALL,
    RECIPIENT_ORCHESTRATOR,
};
