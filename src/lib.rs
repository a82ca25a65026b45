//! Echelon - coordination core for hierarchical agent runs.
//!
//! Echelon is the shared substrate under a tiered swarm of task-execution
//! agents: a single JSON execution-state document guarded by an advisory
//! file lock, a hierarchical token budget, a line-oriented delegation
//! protocol between tiers, phase advancement with dependency gating, and
//! fan-out result aggregation.
//!
//! # Architecture
//!
//! - [`domain`]: models (execution state, budget, phases, configuration)
//!   and per-concern error types
//! - [`services`]: delegation protocol codec, phase advancer, result
//!   aggregator
//! - [`infrastructure`]: file lock, state store, configuration loading
//! - [`cli`]: the `echelon` command-line surface

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{AggregationError, BudgetError, StateError};
pub use domain::models::{Budget, Config, ExecutionState};
pub use infrastructure::lock::FileLock;
pub use infrastructure::state_store::StateStore;
