//! Hierarchical token-budget model.
//!
//! A [`Budget`] is the root ledger for one orchestration run: the total
//! token allowance, a per-child [`Allocation`] map, and an append-only usage
//! history. Every operation borrows `&self` and returns a fresh value (or a
//! read-only projection) — the budget is a persistent value type with no
//! in-place mutation, so sequences of operations are trivially replayable
//! and safe to test.
//!
//! The root `available` counter is maintained at allocation/release time,
//! while each child's `available` is derived from `allocated - used`. Both
//! books are kept deliberately; `tests/property_budget.rs` checks they never
//! diverge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{BudgetError, BudgetResult};

/// Default fraction of an allocation that may be used before a child is
/// flagged for compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.8;

/// Health of a single child allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AllocationStatus {
    /// Usage below the compaction threshold.
    Available,
    /// Usage at or above the compaction threshold but not exhausted.
    Low,
    /// Nothing left (`available <= 0`).
    Exhausted,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Low => "LOW",
            Self::Exhausted => "EXHAUSTED",
        }
    }
}

/// One child's reserved slice of the root budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Tokens reserved for this child.
    pub allocated: u64,
    /// Tokens the child has reported consuming.
    pub used: u64,
    /// `allocated - used`; may go negative when a child overruns.
    pub available: i64,
    pub status: AllocationStatus,
    /// Free-form caller metadata (domain tag, task id, ...). Not interpreted.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One usage report, appended on every `track_usage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub child_id: String,
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
}

/// Root token budget for an orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Total token allowance for the run.
    pub total: u64,
    /// Tokens consumed across all children.
    pub used: u64,
    /// Tokens not yet reserved by any allocation.
    pub available: u64,
    /// Fraction of an allocation consumed before `Low` / `should_compact`.
    pub compaction_threshold: f64,
    /// Whether `reallocate` is permitted on this budget.
    pub allow_reallocation: bool,
    /// Child id -> allocation. Ordered for stable serialization.
    #[serde(default)]
    pub allocations: BTreeMap<String, Allocation>,
    /// Append-only log of usage reports.
    #[serde(default)]
    pub usage_history: Vec<UsageEntry>,
}

impl Budget {
    /// Create a fresh budget with `total` tokens, nothing allocated or used.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            used: 0,
            available: total,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            allow_reallocation: true,
            allocations: BTreeMap::new(),
            usage_history: Vec::new(),
        }
    }

    /// Override the compaction threshold (builder-style).
    pub fn with_compaction_threshold(mut self, threshold: f64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Enable or disable reallocation (builder-style).
    pub fn with_reallocation(mut self, allow: bool) -> Self {
        self.allow_reallocation = allow;
        self
    }

    /// Reserve `amount` tokens for `child_id`.
    ///
    /// Fails with [`BudgetError::NegativeAmount`] for a zero amount,
    /// [`BudgetError::InsufficientBudget`] when `amount` exceeds the
    /// unreserved remainder, and [`BudgetError::DuplicateAllocation`] when
    /// the child already holds an allocation.
    pub fn allocate(
        &self,
        child_id: &str,
        amount: u64,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> BudgetResult<Budget> {
        if amount == 0 {
            return Err(BudgetError::NegativeAmount(amount));
        }
        if amount > self.available {
            return Err(BudgetError::InsufficientBudget {
                requested: amount,
                available: self.available,
            });
        }
        if self.allocations.contains_key(child_id) {
            return Err(BudgetError::DuplicateAllocation(child_id.to_string()));
        }

        let mut next = self.clone();
        next.available -= amount;
        next.allocations.insert(
            child_id.to_string(),
            Allocation {
                allocated: amount,
                used: 0,
                available: amount as i64,
                status: AllocationStatus::Available,
                metadata,
            },
        );
        Ok(next)
    }

    /// Record `tokens_used` against `child_id`'s allocation.
    ///
    /// Adds to both the child's and the root's `used` counters, re-derives
    /// the child's `available` (which may go negative on overrun) and its
    /// status, and appends one [`UsageEntry`].
    pub fn track_usage(&self, child_id: &str, tokens_used: u64) -> BudgetResult<Budget> {
        if !self.allocations.contains_key(child_id) {
            return Err(BudgetError::UnknownChild(child_id.to_string()));
        }

        let mut next = self.clone();
        next.used += tokens_used;
        {
            let threshold = next.compaction_threshold;
            let alloc = next
                .allocations
                .get_mut(child_id)
                .ok_or_else(|| BudgetError::UnknownChild(child_id.to_string()))?;
            alloc.used += tokens_used;
            alloc.available = alloc.allocated as i64 - alloc.used as i64;
            alloc.status = derive_status(alloc, threshold);
        }
        next.usage_history.push(UsageEntry {
            child_id: child_id.to_string(),
            tokens_used,
            timestamp: Utc::now(),
        });
        Ok(next)
    }

    /// Read-only projection of a child's allocation health.
    ///
    /// Unknown children return the `allocated: false` shape instead of
    /// failing, so callers can poll speculatively.
    pub fn check(&self, child_id: &str) -> BudgetCheck {
        match self.allocations.get(child_id) {
            None => BudgetCheck {
                allocated: false,
                status: None,
                percent_used: 0.0,
                should_compact: false,
            },
            Some(alloc) => {
                let ratio = usage_ratio(alloc);
                BudgetCheck {
                    allocated: true,
                    status: Some(alloc.status),
                    percent_used: ratio * 100.0,
                    should_compact: ratio >= self.compaction_threshold,
                }
            }
        }
    }

    /// Whether `child_id` has crossed the compaction threshold.
    ///
    /// `threshold_override` substitutes for the budget's configured
    /// threshold when present. Unknown children are never compactable.
    pub fn should_compact(&self, child_id: &str, threshold_override: Option<f64>) -> bool {
        let threshold = threshold_override.unwrap_or(self.compaction_threshold);
        self.allocations
            .get(child_id)
            .is_some_and(|alloc| usage_ratio(alloc) >= threshold)
    }

    /// Move `amount` reserved tokens from `from_id` to `to_id`.
    ///
    /// Only `allocated` / `available` move; `used` and the root totals are
    /// untouched, so allocated tokens are conserved. The destination
    /// allocation is created when absent.
    pub fn reallocate(&self, from_id: &str, to_id: &str, amount: u64) -> BudgetResult<Budget> {
        if !self.allow_reallocation {
            return Err(BudgetError::ReallocationDisabled);
        }
        let from = self
            .allocations
            .get(from_id)
            .ok_or_else(|| BudgetError::UnknownChild(from_id.to_string()))?;
        if amount as i64 > from.available {
            return Err(BudgetError::InsufficientAvailable {
                from: from_id.to_string(),
                requested: amount,
                available: from.available,
            });
        }

        let mut next = self.clone();
        let threshold = next.compaction_threshold;
        {
            let from = next
                .allocations
                .get_mut(from_id)
                .ok_or_else(|| BudgetError::UnknownChild(from_id.to_string()))?;
            from.allocated -= amount;
            from.available -= amount as i64;
            from.status = derive_status(from, threshold);
        }
        {
            let to = next
                .allocations
                .entry(to_id.to_string())
                .or_insert_with(|| Allocation {
                    allocated: 0,
                    used: 0,
                    available: 0,
                    status: AllocationStatus::Available,
                    metadata: serde_json::Map::new(),
                });
            to.allocated += amount;
            to.available += amount as i64;
            to.status = derive_status(to, threshold);
        }
        Ok(next)
    }

    /// Return a child's unspent tokens to the root pool.
    ///
    /// The released amount is the child's `available` clamped to zero; the
    /// allocation record itself is retained (with `available` zeroed) so the
    /// usage history stays interpretable.
    pub fn release(&self, child_id: &str) -> BudgetResult<(u64, Budget)> {
        let alloc = self
            .allocations
            .get(child_id)
            .ok_or_else(|| BudgetError::UnknownChild(child_id.to_string()))?;
        let released = alloc.available.max(0) as u64;

        let mut next = self.clone();
        if let Some(alloc) = next.allocations.get_mut(child_id) {
            alloc.available = 0;
            alloc.status = AllocationStatus::Exhausted;
        }
        next.available += released;
        Ok((released, next))
    }

    /// Human-readable rollup of the whole budget. Reporting only — control
    /// decisions should use [`check`](Self::check) / [`should_compact`](Self::should_compact).
    pub fn summarize(&self) -> BudgetSummary {
        let allocated: u64 = self.allocations.values().map(|a| a.allocated).sum();
        let children = self
            .allocations
            .iter()
            .map(|(id, alloc)| {
                (
                    id.clone(),
                    ChildSummary {
                        allocated: alloc.allocated,
                        used: alloc.used,
                        available: alloc.available,
                        status: alloc.status,
                        percent_used: usage_ratio(alloc) * 100.0,
                    },
                )
            })
            .collect();

        BudgetSummary {
            total: self.total,
            allocated,
            used: self.used,
            available: self.available,
            unallocated: self.total.saturating_sub(allocated),
            percent_used: if self.total == 0 {
                0.0
            } else {
                self.used as f64 / self.total as f64 * 100.0
            },
            children,
        }
    }
}

/// Result of [`Budget::check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCheck {
    /// Whether the child holds an allocation at all.
    pub allocated: bool,
    pub status: Option<AllocationStatus>,
    pub percent_used: f64,
    pub should_compact: bool,
}

/// Per-child line in a [`BudgetSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSummary {
    pub allocated: u64,
    pub used: u64,
    pub available: i64,
    pub status: AllocationStatus,
    pub percent_used: f64,
}

/// Result of [`Budget::summarize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub total: u64,
    /// Sum of all child `allocated` values.
    pub allocated: u64,
    pub used: u64,
    /// Root available counter (maintained at allocate/release time).
    pub available: u64,
    /// `total - allocated`.
    pub unallocated: u64,
    pub percent_used: f64,
    pub children: BTreeMap<String, ChildSummary>,
}

fn usage_ratio(alloc: &Allocation) -> f64 {
    if alloc.allocated == 0 {
        1.0
    } else {
        alloc.used as f64 / alloc.allocated as f64
    }
}

fn derive_status(alloc: &Allocation, threshold: f64) -> AllocationStatus {
    if alloc.available <= 0 {
        AllocationStatus::Exhausted
    } else if usage_ratio(alloc) >= threshold {
        AllocationStatus::Low
    } else {
        AllocationStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    #[test]
    fn test_allocate_success() {
        let budget = Budget::new(100_000);
        let budget = budget.allocate("phase-1", 40_000, meta()).unwrap();

        assert_eq!(budget.available, 60_000);
        let alloc = &budget.allocations["phase-1"];
        assert_eq!(alloc.allocated, 40_000);
        assert_eq!(alloc.used, 0);
        assert_eq!(alloc.available, 40_000);
        assert_eq!(alloc.status, AllocationStatus::Available);
    }

    #[test]
    fn test_allocate_zero_amount_rejected() {
        let budget = Budget::new(100);
        assert!(matches!(
            budget.allocate("a", 0, meta()),
            Err(BudgetError::NegativeAmount(0))
        ));
    }

    #[test]
    fn test_allocate_insufficient_budget() {
        let budget = Budget::new(100);
        assert!(matches!(
            budget.allocate("a", 101, meta()),
            Err(BudgetError::InsufficientBudget { .. })
        ));
    }

    #[test]
    fn test_allocate_duplicate_child() {
        let budget = Budget::new(100).allocate("a", 10, meta()).unwrap();
        assert!(matches!(
            budget.allocate("a", 10, meta()),
            Err(BudgetError::DuplicateAllocation(_))
        ));
    }

    #[test]
    fn test_track_usage_updates_both_books() {
        let budget = Budget::new(100_000).allocate("a", 10_000, meta()).unwrap();
        let budget = budget.track_usage("a", 2_500).unwrap();

        assert_eq!(budget.used, 2_500);
        let alloc = &budget.allocations["a"];
        assert_eq!(alloc.used, 2_500);
        assert_eq!(alloc.available, 7_500);
        assert_eq!(alloc.status, AllocationStatus::Available);
        assert_eq!(budget.usage_history.len(), 1);
        assert_eq!(budget.usage_history[0].child_id, "a");
        assert_eq!(budget.usage_history[0].tokens_used, 2_500);
    }

    #[test]
    fn test_track_usage_low_then_exhausted() {
        let budget = Budget::new(1_000).allocate("a", 100, meta()).unwrap();

        let low = budget.track_usage("a", 80).unwrap();
        assert_eq!(low.allocations["a"].status, AllocationStatus::Low);

        let exhausted = low.track_usage("a", 30).unwrap();
        let alloc = &exhausted.allocations["a"];
        assert_eq!(alloc.available, -10);
        assert_eq!(alloc.status, AllocationStatus::Exhausted);
    }

    #[test]
    fn test_track_usage_unknown_child() {
        let budget = Budget::new(100);
        assert!(matches!(
            budget.track_usage("nope", 1),
            Err(BudgetError::UnknownChild(_))
        ));
    }

    #[test]
    fn test_check_unknown_child_is_unallocated() {
        let budget = Budget::new(100);
        let check = budget.check("nope");
        assert!(!check.allocated);
        assert!(check.status.is_none());
        assert!(!check.should_compact);
    }

    #[test]
    fn test_check_reports_compaction_at_threshold() {
        let budget = Budget::new(1_000).allocate("a", 100, meta()).unwrap();
        let budget = budget.track_usage("a", 80).unwrap();

        let check = budget.check("a");
        assert!(check.allocated);
        assert!((check.percent_used - 80.0).abs() < f64::EPSILON);
        assert!(check.should_compact);
    }

    #[test]
    fn test_should_compact_with_override() {
        let budget = Budget::new(1_000).allocate("a", 100, meta()).unwrap();
        let budget = budget.track_usage("a", 50).unwrap();

        assert!(!budget.should_compact("a", None));
        assert!(budget.should_compact("a", Some(0.5)));
        assert!(!budget.should_compact("unknown", Some(0.0)));
    }

    #[test]
    fn test_reallocate_conserves_allocated() {
        let budget = Budget::new(1_000)
            .allocate("a", 400, meta())
            .unwrap()
            .allocate("b", 100, meta())
            .unwrap();
        let before: u64 = budget.allocations.values().map(|x| x.allocated).sum();

        let budget = budget.reallocate("a", "b", 150).unwrap();
        let after: u64 = budget.allocations.values().map(|x| x.allocated).sum();

        assert_eq!(before, after);
        assert_eq!(budget.allocations["a"].allocated, 250);
        assert_eq!(budget.allocations["b"].allocated, 250);
        assert_eq!(budget.allocations["b"].available, 250);
    }

    #[test]
    fn test_reallocate_more_than_available_fails() {
        let budget = Budget::new(1_000).allocate("a", 100, meta()).unwrap();
        let budget = budget.track_usage("a", 60).unwrap();
        assert!(matches!(
            budget.reallocate("a", "b", 50),
            Err(BudgetError::InsufficientAvailable { .. })
        ));
    }

    #[test]
    fn test_reallocate_disabled() {
        let budget = Budget::new(1_000)
            .with_reallocation(false)
            .allocate("a", 100, meta())
            .unwrap();
        assert!(matches!(
            budget.reallocate("a", "b", 10),
            Err(BudgetError::ReallocationDisabled)
        ));
    }

    #[test]
    fn test_release_returns_unspent_to_root() {
        let budget = Budget::new(1_000).allocate("a", 400, meta()).unwrap();
        let budget = budget.track_usage("a", 100).unwrap();

        let (released, budget) = budget.release("a").unwrap();
        assert_eq!(released, 300);
        assert_eq!(budget.available, 900);
        assert_eq!(budget.allocations["a"].available, 0);
        // Record is retained for history.
        assert_eq!(budget.allocations["a"].allocated, 400);
        assert_eq!(budget.allocations["a"].used, 100);
    }

    #[test]
    fn test_release_overrun_child_releases_nothing() {
        let budget = Budget::new(1_000).allocate("a", 100, meta()).unwrap();
        let budget = budget.track_usage("a", 150).unwrap();

        let (released, budget) = budget.release("a").unwrap();
        assert_eq!(released, 0);
        assert_eq!(budget.available, 900);
    }

    #[test]
    fn test_summarize_reflects_release() {
        let budget = Budget::new(1_000).allocate("a", 400, meta()).unwrap();
        let (_, budget) = budget.release("a").unwrap();

        let summary = budget.summarize();
        assert_eq!(summary.total, 1_000);
        assert_eq!(summary.allocated, 400);
        assert_eq!(summary.unallocated, 600);
        assert_eq!(summary.available, 1_000);
        assert_eq!(summary.children["a"].available, 0);
    }

    #[test]
    fn test_operations_do_not_mutate_input() {
        let budget = Budget::new(1_000);
        let _ = budget.allocate("a", 500, meta()).unwrap();
        assert_eq!(budget.available, 1_000);
        assert!(budget.allocations.is_empty());
    }
}
