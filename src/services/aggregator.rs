//! Result aggregation for fan-out work.
//!
//! A supervisor that fans a unit of work out to several leaf workers
//! collects their results here, keyed by worker id, and reduces them with a
//! named strategy once everyone has reported (or the collection window has
//! elapsed). Instances are in-memory and scoped to one supervisor's
//! lifetime; after a restart they are rehydrated from persisted messages.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::errors::AggregationError;
use crate::domain::models::AggregationConfig;

/// Default numeric field summed by the `sum` strategy.
pub const DEFAULT_SUM_FIELD: &str = "totalOccurrences";

/// Default collection window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Terminal status a worker reports with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Completed,
    Failed,
}

/// One worker's reported result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub status: WorkerStatus,
    /// Items produced by the worker; concatenated / deduped by strategies.
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: serde_json::Map<String, Value>,
    /// Any extra top-level fields the worker reported (e.g. the field the
    /// `sum` strategy reads).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WorkerResult {
    pub fn completed(data: Vec<Value>) -> Self {
        Self {
            status: WorkerStatus::Completed,
            data,
            error: None,
            metrics: serde_json::Map::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::Failed,
            data: Vec::new(),
            error: Some(error.into()),
            metrics: serde_json::Map::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// The fixed registry of reduction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    Merge,
    Grouped,
    Sum,
    Dedupe,
}

impl AggregationStrategy {
    pub const ALL: [AggregationStrategy; 4] =
        [Self::Merge, Self::Grouped, Self::Sum, Self::Dedupe];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Grouped => "grouped",
            Self::Sum => "sum",
            Self::Dedupe => "dedupe",
        }
    }
}

impl FromStr for AggregationStrategy {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "grouped" => Ok(Self::Grouped),
            "sum" => Ok(Self::Sum),
            "dedupe" => Ok(Self::Dedupe),
            other => Err(AggregationError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Strategy tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Field summed by `sum`; [`DEFAULT_SUM_FIELD`] when absent.
    pub sum_field: Option<String>,
    /// Item field used as the dedupe key; the whole item when absent.
    pub dedupe_key: Option<String>,
}

/// A failed worker's entry in a merge report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerFailure {
    pub worker_id: String,
    pub error: String,
}

/// One worker's line in a grouped report, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedWorker {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub data: Vec<Value>,
    pub error: Option<String>,
    pub metrics: serde_json::Map<String, Value>,
}

/// One worker's contribution in a sum report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSum {
    pub worker_id: String,
    pub value: f64,
}

/// Strategy-specific payload of an [`AggregateReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum AggregateOutcome {
    #[serde(rename_all = "camelCase")]
    Merge {
        items: Vec<Value>,
        total_count: usize,
        failures: Vec<WorkerFailure>,
    },
    #[serde(rename_all = "camelCase")]
    Grouped {
        workers: Vec<GroupedWorker>,
        succeeded: usize,
        failed: usize,
    },
    #[serde(rename_all = "camelCase")]
    Sum {
        field: String,
        total: f64,
        per_worker: Vec<WorkerSum>,
    },
    #[serde(rename_all = "camelCase")]
    Dedupe {
        items: Vec<Value>,
        total_unique: usize,
        duplicates_removed: usize,
    },
}

/// An aggregation result. The envelope fields are stable across strategies;
/// only `outcome` varies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub worker_count: usize,
    pub pending_count: usize,
    pub complete: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: AggregateOutcome,
}

struct Received {
    result: WorkerResult,
    #[allow(dead_code)]
    received_at: DateTime<Utc>,
}

/// Collects per-worker results and reduces them on demand.
pub struct ResultAggregator {
    started: Instant,
    timeout: Duration,
    /// Worker ids in registration order; reductions iterate this.
    order: Vec<String>,
    pending: HashSet<String>,
    results: HashMap<String, Received>,
}

impl ResultAggregator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            order: Vec::new(),
            pending: HashSet::new(),
            results: HashMap::new(),
        }
    }

    /// An aggregator with the configured collection window.
    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::new(Duration::from_millis(config.timeout_ms))
    }

    /// Seed the pending set. May be called more than once; duplicate ids are
    /// ignored.
    pub fn register_workers<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            if !self.order.contains(&id) {
                self.pending.insert(id.clone());
                self.order.push(id);
            }
        }
    }

    /// Record a worker's result, moving it out of the pending set. A result
    /// from an unregistered worker is accepted and appended to the order.
    pub fn add_result(&mut self, worker_id: impl Into<String>, result: WorkerResult) {
        let worker_id = worker_id.into();
        if !self.order.contains(&worker_id) {
            self.order.push(worker_id.clone());
        }
        self.pending.remove(&worker_id);
        debug!(worker_id = %worker_id, status = ?result.status, "Worker result received");
        self.results.insert(
            worker_id,
            Received {
                result,
                received_at: Utc::now(),
            },
        );
    }

    /// True once every registered worker has reported.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// True once the collection window has elapsed. Advisory — nothing is
    /// cancelled.
    pub fn is_timed_out(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }

    /// Wall time since construction.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Ids still awaited.
    pub fn pending_workers(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.pending.contains(*id))
            .cloned()
            .collect()
    }

    /// Reduce the collected results with the named strategy.
    pub fn aggregate(
        &self,
        strategy: &str,
        options: &AggregateOptions,
    ) -> Result<AggregateReport, AggregationError> {
        let strategy = AggregationStrategy::from_str(strategy)?;
        let outcome = match strategy {
            AggregationStrategy::Merge => self.merge(),
            AggregationStrategy::Grouped => self.grouped(),
            AggregationStrategy::Sum => self.sum(options),
            AggregationStrategy::Dedupe => self.dedupe(options),
        };
        Ok(AggregateReport {
            worker_count: self.order.len(),
            pending_count: self.pending.len(),
            complete: self.is_complete(),
            timed_out: self.is_timed_out(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            outcome,
        })
    }

    fn received_in_order(&self) -> impl Iterator<Item = (&String, &WorkerResult)> {
        self.order
            .iter()
            .filter_map(|id| self.results.get(id).map(|r| (id, &r.result)))
    }

    fn merge(&self) -> AggregateOutcome {
        let mut items = Vec::new();
        let mut failures = Vec::new();
        for (id, result) in self.received_in_order() {
            match result.status {
                WorkerStatus::Completed => items.extend(result.data.iter().cloned()),
                WorkerStatus::Failed => failures.push(WorkerFailure {
                    worker_id: id.clone(),
                    error: result
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                }),
            }
        }
        AggregateOutcome::Merge {
            total_count: items.len(),
            items,
            failures,
        }
    }

    fn grouped(&self) -> AggregateOutcome {
        let mut workers = Vec::new();
        let mut succeeded = 0;
        let mut failed = 0;
        for (id, result) in self.received_in_order() {
            match result.status {
                WorkerStatus::Completed => succeeded += 1,
                WorkerStatus::Failed => failed += 1,
            }
            workers.push(GroupedWorker {
                worker_id: id.clone(),
                status: result.status,
                data: result.data.clone(),
                error: result.error.clone(),
                metrics: result.metrics.clone(),
            });
        }
        AggregateOutcome::Grouped {
            workers,
            succeeded,
            failed,
        }
    }

    fn sum(&self, options: &AggregateOptions) -> AggregateOutcome {
        let field = options
            .sum_field
            .clone()
            .unwrap_or_else(|| DEFAULT_SUM_FIELD.to_string());
        let mut per_worker = Vec::new();
        let mut total = 0.0;
        for (id, result) in self.received_in_order() {
            if result.status != WorkerStatus::Completed {
                continue;
            }
            let value = result
                .extra
                .get(&field)
                .or_else(|| result.metrics.get(&field))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            total += value;
            per_worker.push(WorkerSum {
                worker_id: id.clone(),
                value,
            });
        }
        AggregateOutcome::Sum {
            field,
            total,
            per_worker,
        }
    }

    fn dedupe(&self, options: &AggregateOptions) -> AggregateOutcome {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut total_seen = 0usize;
        for (_, result) in self.received_in_order() {
            if result.status != WorkerStatus::Completed {
                continue;
            }
            for item in &result.data {
                total_seen += 1;
                let key = options
                    .dedupe_key
                    .as_deref()
                    .and_then(|k| item.get(k))
                    .unwrap_or(item);
                // Value is not hashable; the serialized key stands in.
                let key = key.to_string();
                if seen.insert(key) {
                    items.push(item.clone());
                }
            }
        }
        AggregateOutcome::Dedupe {
            total_unique: items.len(),
            duplicates_removed: total_seen - items.len(),
            items,
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
