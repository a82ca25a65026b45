//! Implementation of the `echelon report` command.
//!
//! Reads an agent's raw textual output, extracts the protocol report, and
//! applies it to the run state: the agent is resolved with the reported
//! outcome and, when the report carries token metrics, usage is tracked
//! against the agent's budget allocation.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::AgentOutcome;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::state_store::StateStore;
use crate::services::delegation::{parse_report, AgentReport};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Read the agent output from a file instead of stdin
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Agent id the report applies to; defaults to the reported id
    #[arg(long)]
    pub agent: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutput {
    pub agent_id: String,
    pub level: String,
    pub report_id: String,
    pub outcome: String,
    pub tokens_tracked: Option<u64>,
}

impl CommandOutput for ReportOutput {
    fn to_human(&self) -> String {
        let mut line = format!(
            "Agent {} resolved as {} ({} {})",
            self.agent_id, self.outcome, self.level, self.report_id
        );
        if let Some(tokens) = self.tokens_tracked {
            line.push_str(&format!("; {tokens} tokens tracked"));
        }
        line
    }
}

async fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read agent output from stdin")?;
            Ok(text)
        }
    }
}

pub async fn execute(args: ReportArgs, json_mode: bool) -> Result<()> {
    let text = read_input(args.file.as_ref()).await?;
    let Some(report) = parse_report(&text) else {
        bail!("No recognizable agent report in input (expected a <TIER>_<KIND>: <id> header)");
    };

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let store = StateStore::from_config(&config);

    let agent_id = args.agent.unwrap_or_else(|| report.id().to_string());
    let level = report.level().to_string();
    let report_id = report.id().to_string();

    let (outcome, result, reason, tokens) = match &report {
        AgentReport::Complete {
            summary,
            metrics,
            artifacts,
            ..
        } => (
            AgentOutcome::Completed,
            Some(serde_json::json!({
                "summary": summary,
                "metrics": metrics,
                "artifacts": artifacts,
            })),
            None,
            metrics.as_ref().map(|m| m.tokens_used).filter(|t| *t > 0),
        ),
        AgentReport::Blocked {
            blocker,
            suggested_action,
            ..
        } => (
            AgentOutcome::Blocked,
            Some(serde_json::json!({ "suggestedAction": suggested_action })),
            Some(blocker.clone()),
            None,
        ),
        AgentReport::Failed { error, .. } => {
            (AgentOutcome::Failed, None, Some(error.clone()), None)
        }
    };

    let state = store
        .update_agent_status(&agent_id, outcome, result, reason)
        .await
        .with_context(|| format!("Failed to resolve agent '{agent_id}'"))?;

    // Track usage only when the agent holds an allocation; reports from
    // agents budgeted under a parent allocation are still valid.
    let tokens_tracked = match tokens {
        Some(t) if state.token_budget.allocations.contains_key(&agent_id) => {
            store
                .update_budget(|budget| budget.track_usage(&agent_id, t))
                .await
                .context("Failed to track token usage")?;
            Some(t)
        }
        _ => None,
    };

    let output_data = ReportOutput {
        agent_id,
        level,
        report_id,
        outcome: format!("{outcome:?}").to_lowercase(),
        tokens_tracked,
    };
    output(&output_data, json_mode);
    Ok(())
}
