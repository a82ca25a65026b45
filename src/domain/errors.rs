//! Domain errors for the Echelon coordination core.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by budget-allocator operations.
///
/// All variants are invariant violations: fatal to the specific operation,
/// never retryable without changing the inputs.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Allocation amount must be positive (got {0})")]
    NegativeAmount(u64),

    #[error("Insufficient budget: requested {requested}, available {available}")]
    InsufficientBudget { requested: u64, available: u64 },

    #[error("Child {0} already has an allocation")]
    DuplicateAllocation(String),

    #[error("No allocation exists for child {0}")]
    UnknownChild(String),

    #[error("Reallocation is disabled for this budget")]
    ReallocationDisabled,

    #[error("Insufficient available tokens on {from}: requested {requested}, available {available}")]
    InsufficientAvailable {
        from: String,
        requested: u64,
        available: i64,
    },
}

/// Errors raised when mutating the execution-state document in memory.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),
}

/// Errors raised by the result aggregator.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Unknown aggregation strategy '{0}'; valid strategies: merge, grouped, sum, dedupe")]
    UnknownStrategy(String),
}

pub type BudgetResult<T> = Result<T, BudgetError>;
