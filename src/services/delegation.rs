//! Delegation protocol: the line-oriented text surface between the
//! orchestrator and its agents.
//!
//! Outbound, the orchestrator formats [`DelegationMessage`]s into plain-text
//! blocks handed to a spawned agent. Inbound, whatever free-form text an
//! agent emits is scanned by [`parse_report`] for a recognizable report
//! header; everything else in the text is ignored. `SPAWN` is
//! orchestrator-to-agent only and is never parsed back.
//!
//! The wire format is deliberately simple: a header line
//! `<TIER>_<KIND>: <id>` followed by `KEY: value` lines. Structured values
//! (`METRICS`, `CONSTRAINTS`) are inline JSON; `ARTIFACTS` is a JSON array
//! so that formatting and parsing agree field-for-field; remaining lists
//! are comma-joined. Empty collections emit no line at all.

use serde::{Deserialize, Serialize};

use crate::domain::models::Tier;

/// Default blocker text when a BLOCKED report carries no `BLOCKER:` line.
pub const DEFAULT_BLOCKER: &str = "Unknown blocker";
/// Default action when a BLOCKED report carries no `SUGGESTED_ACTION:` line.
pub const DEFAULT_SUGGESTED_ACTION: &str = "Manual intervention required";
/// Default error text when a FAILED report carries no `ERROR:` line.
pub const DEFAULT_ERROR: &str = "Unknown error";

/// Normalized completion counters. Missing counters default to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionMetrics {
    pub items_completed: u64,
    pub tests_passed: u64,
    pub tokens_used: u64,
    pub duration_ms: u64,
}

/// Instruction to spawn a child agent.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnMessage {
    pub tier: Tier,
    pub parent_id: String,
    pub child_id: String,
    pub title: String,
    pub scope: String,
    pub token_budget: Option<u64>,
    pub dependencies: Vec<String>,
    pub constraints: serde_json::Map<String, serde_json::Value>,
    pub tools: Vec<String>,
}

impl SpawnMessage {
    pub fn new(
        tier: Tier,
        parent_id: impl Into<String>,
        child_id: impl Into<String>,
        title: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            tier,
            parent_id: parent_id.into(),
            child_id: child_id.into(),
            title: title.into(),
            scope: scope.into(),
            token_budget: None,
            dependencies: Vec::new(),
            constraints: serde_json::Map::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_token_budget(mut self, tokens: u64) -> Self {
        self.token_budget = Some(tokens);
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_constraints(
        mut self,
        constraints: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

/// Successful-completion report.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteMessage {
    pub tier: Tier,
    pub id: String,
    pub metrics: CompletionMetrics,
    pub summary: String,
    pub artifacts: Vec<String>,
}

impl CompleteMessage {
    pub fn new(
        tier: Tier,
        id: impl Into<String>,
        metrics: CompletionMetrics,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            tier,
            id: id.into(),
            metrics,
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Report that work cannot proceed without intervention.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedMessage {
    pub tier: Tier,
    pub id: String,
    pub blocker: String,
    pub suggested_action: String,
}

impl BlockedMessage {
    pub fn new(
        tier: Tier,
        id: impl Into<String>,
        blocker: impl Into<String>,
        suggested_action: impl Into<String>,
    ) -> Self {
        Self {
            tier,
            id: id.into(),
            blocker: blocker.into(),
            suggested_action: suggested_action.into(),
        }
    }
}

/// Report of a failure, with the remediations that were attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedMessage {
    pub tier: Tier,
    pub id: String,
    pub error: String,
    pub attempted: Vec<String>,
}

impl FailedMessage {
    pub fn new(tier: Tier, id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tier,
            id: id.into(),
            error: error.into(),
            attempted: Vec::new(),
        }
    }

    pub fn with_attempted(mut self, attempted: Vec<String>) -> Self {
        self.attempted = attempted;
        self
    }
}

/// The closed set of outbound protocol messages.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegationMessage {
    Spawn(SpawnMessage),
    Complete(CompleteMessage),
    Blocked(BlockedMessage),
    Failed(FailedMessage),
}

impl DelegationMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "SPAWN",
            Self::Complete(_) => "COMPLETE",
            Self::Blocked(_) => "BLOCKED",
            Self::Failed(_) => "FAILED",
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Self::Spawn(m) => m.tier,
            Self::Complete(m) => m.tier,
            Self::Blocked(m) => m.tier,
            Self::Failed(m) => m.tier,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Spawn(m) => &m.child_id,
            Self::Complete(m) => &m.id,
            Self::Blocked(m) => &m.id,
            Self::Failed(m) => &m.id,
        }
    }

    /// Render the line-oriented wire form.
    pub fn format(&self) -> String {
        let mut lines = vec![format!("{}_{}: {}", self.tier(), self.kind(), self.id())];
        match self {
            Self::Spawn(m) => {
                push_text(&mut lines, "PARENT", &m.parent_id);
                push_text(&mut lines, "TITLE", &m.title);
                push_text(&mut lines, "SCOPE", &m.scope);
                if let Some(tokens) = m.token_budget {
                    lines.push(format!("TOKEN_BUDGET: {tokens}"));
                }
                push_list(&mut lines, "DEPENDENCIES", &m.dependencies);
                if !m.constraints.is_empty() {
                    lines.push(format!(
                        "CONSTRAINTS: {}",
                        serde_json::Value::Object(m.constraints.clone())
                    ));
                }
                push_list(&mut lines, "TOOLS", &m.tools);
            }
            Self::Complete(m) => {
                push_text(&mut lines, "SUMMARY", &m.summary);
                // Metrics are normalized counters, always emitted.
                if let Ok(json) = serde_json::to_string(&m.metrics) {
                    lines.push(format!("METRICS: {json}"));
                }
                if !m.artifacts.is_empty() {
                    if let Ok(json) = serde_json::to_string(&m.artifacts) {
                        lines.push(format!("ARTIFACTS: {json}"));
                    }
                }
            }
            Self::Blocked(m) => {
                push_text(&mut lines, "BLOCKER", &m.blocker);
                push_text(&mut lines, "SUGGESTED_ACTION", &m.suggested_action);
            }
            Self::Failed(m) => {
                push_text(&mut lines, "ERROR", &m.error);
                push_list(&mut lines, "ATTEMPTED", &m.attempted);
            }
        }
        lines.join("\n")
    }
}

fn push_text(lines: &mut Vec<String>, key: &str, value: &str) {
    if !value.is_empty() {
        lines.push(format!("{key}: {value}"));
    }
}

fn push_list(lines: &mut Vec<String>, key: &str, values: &[String]) {
    if !values.is_empty() {
        lines.push(format!("{key}: {}", values.join(", ")));
    }
}

/// A report parsed out of an agent's textual output.
///
/// `level` is the free-form label preceding `_KIND` in the header
/// (conventionally `TASK`, `PHASE`, `ROADMAP`, `EPIC` — not validated
/// against [`Tier`]).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReport {
    Complete {
        level: String,
        id: String,
        summary: Option<String>,
        metrics: Option<CompletionMetrics>,
        artifacts: Option<Vec<String>>,
    },
    Blocked {
        level: String,
        id: String,
        blocker: String,
        suggested_action: String,
    },
    Failed {
        level: String,
        id: String,
        error: String,
    },
}

impl AgentReport {
    pub fn level(&self) -> &str {
        match self {
            Self::Complete { level, .. }
            | Self::Blocked { level, .. }
            | Self::Failed { level, .. } => level,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Complete { id, .. } | Self::Blocked { id, .. } | Self::Failed { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportKind {
    Complete,
    Blocked,
    Failed,
}

/// Scan free-form agent output for a protocol report.
///
/// Returns `None` when no recognizable header is present — callers must
/// treat that as "not a protocol message", not as an error. Field lines
/// after the header are best-effort: malformed JSON in `METRICS:` or
/// `ARTIFACTS:` simply leaves the field absent.
pub fn parse_report(text: &str) -> Option<AgentReport> {
    let lines: Vec<&str> = text.lines().collect();
    let (header_index, level, kind, id) = lines.iter().enumerate().find_map(|(i, line)| {
        let (level, kind, id) = parse_header(line)?;
        Some((i, level, kind, id))
    })?;

    let mut summary = None;
    let mut metrics = None;
    let mut artifacts = None;
    let mut blocker = None;
    let mut suggested_action = None;
    let mut error = None;

    for line in &lines[header_index + 1..] {
        let line = line.trim();
        if let Some(value) = field(line, "SUMMARY:") {
            summary.get_or_insert_with(|| value.to_string());
        } else if let Some(value) = field(line, "METRICS:") {
            if metrics.is_none() {
                metrics = serde_json::from_str::<CompletionMetrics>(value).ok();
            }
        } else if let Some(value) = field(line, "ARTIFACTS:") {
            if artifacts.is_none() {
                artifacts = serde_json::from_str::<Vec<String>>(value).ok();
            }
        } else if let Some(value) = field(line, "BLOCKER:") {
            blocker.get_or_insert_with(|| value.to_string());
        } else if let Some(value) = field(line, "SUGGESTED_ACTION:") {
            suggested_action.get_or_insert_with(|| value.to_string());
        } else if let Some(value) = field(line, "ERROR:") {
            error.get_or_insert_with(|| value.to_string());
        }
    }

    Some(match kind {
        ReportKind::Complete => AgentReport::Complete {
            level,
            id,
            summary,
            metrics,
            artifacts,
        },
        ReportKind::Blocked => AgentReport::Blocked {
            level,
            id,
            blocker: blocker.unwrap_or_else(|| DEFAULT_BLOCKER.to_string()),
            suggested_action: suggested_action
                .unwrap_or_else(|| DEFAULT_SUGGESTED_ACTION.to_string()),
        },
        ReportKind::Failed => AgentReport::Failed {
            level,
            id,
            error: error.unwrap_or_else(|| DEFAULT_ERROR.to_string()),
        },
    })
}

/// Match `<LEVEL>_<KIND>: <id>` where KIND is COMPLETE, BLOCKED, or FAILED.
fn parse_header(line: &str) -> Option<(String, ReportKind, String)> {
    let line = line.trim();
    let (head, id) = line.split_once(':')?;
    let id = id.trim();
    if id.is_empty() || head.contains(char::is_whitespace) {
        return None;
    }
    let (level, kind_token) = head.rsplit_once('_')?;
    if level.is_empty() {
        return None;
    }
    let kind = match kind_token {
        "COMPLETE" => ReportKind::Complete,
        "BLOCKED" => ReportKind::Blocked,
        "FAILED" => ReportKind::Failed,
        _ => return None,
    };
    Some((level.to_string(), kind, id.to_string()))
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key).map(str::trim)
}
