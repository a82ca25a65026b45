//! Implementation of the `echelon init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Budget, ExecutionState};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::state_store::StateStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Plan identifier for this run
    #[arg(long)]
    pub plan_id: String,

    /// Path to the plan document
    #[arg(long, default_value = "plan.md")]
    pub plan_path: String,

    /// Initial pending task ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tasks: Vec<String>,

    /// Total token budget; overrides the configured default
    #[arg(long)]
    pub budget: Option<u64>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutput {
    pub created: bool,
    pub message: String,
    pub state_path: PathBuf,
    pub plan_id: String,
    pub pending_tasks: usize,
    pub budget_total: u64,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        lines.push(format!("  State:  {}", self.state_path.display()));
        lines.push(format!("  Plan:   {}", self.plan_id));
        lines.push(format!("  Tasks:  {} pending", self.pending_tasks));
        lines.push(format!("  Budget: {} tokens", self.budget_total));
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let store = StateStore::from_config(&config);

    let budget = Budget::new(args.budget.unwrap_or(config.budget.total))
        .with_compaction_threshold(config.budget.compaction_threshold)
        .with_reallocation(config.budget.allow_reallocation);
    let fresh = ExecutionState::new(&args.plan_id, &args.plan_path, args.tasks, budget);

    let existed = store.load().await?.is_some();
    let state = store
        .init(fresh)
        .await
        .context("Failed to initialize execution state")?;

    let output_data = InitOutput {
        created: !existed,
        message: if existed {
            format!(
                "Execution state already initialized for plan '{}'; left unchanged.",
                state.plan_id
            )
        } else {
            "Execution state initialized.".to_string()
        },
        state_path: store.path().to_path_buf(),
        plan_id: state.plan_id.clone(),
        pending_tasks: state.pending_tasks.len(),
        budget_total: state.token_budget.total,
    };
    output(&output_data, json_mode);
    Ok(())
}
