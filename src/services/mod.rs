//! Service layer: the delegation protocol, phase advancement, and result
//! aggregation built on top of the domain models and the state store.

pub mod aggregator;
pub mod delegation;
pub mod phase_advancer;

pub use aggregator::{
    AggregateOptions, AggregateOutcome, AggregateReport, AggregationStrategy, ResultAggregator,
    WorkerResult, WorkerStatus,
};
pub use delegation::{parse_report, AgentReport, CompletionMetrics, DelegationMessage};
pub use phase_advancer::{advance_phase, find_next_phase, phase_progress, PhaseProgress};
