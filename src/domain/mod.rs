//! Domain layer for the Echelon coordination core
//!
//! This module contains core business logic and domain models.

pub mod errors;
pub mod models;

// Re-export error types for convenient access
pub use errors::{AggregationError, BudgetError, BudgetResult, StateError};
