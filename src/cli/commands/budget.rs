//! Implementation of the `echelon budget` subcommands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{Budget, BudgetCheck, BudgetSummary};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::state_store::StateStore;

#[derive(Args, Debug)]
pub struct BudgetArgs {
    #[command(subcommand)]
    pub command: BudgetCommands,
}

#[derive(Subcommand, Debug)]
pub enum BudgetCommands {
    /// Show the budget rollup
    Summary,

    /// Reserve tokens for a child
    Allocate {
        /// Child identifier (agent or phase id)
        child_id: String,

        /// Tokens to reserve
        amount: u64,

        /// Domain tag recorded in the allocation metadata
        #[arg(long)]
        domain: Option<String>,
    },

    /// Record token usage against a child allocation
    Track {
        child_id: String,

        /// Tokens consumed
        tokens: u64,
    },

    /// Return a child's unspent tokens to the root pool
    Release { child_id: String },

    /// Move reserved tokens from one child to another
    Reallocate {
        from_id: String,
        to_id: String,
        amount: u64,
    },

    /// Check a child's allocation health
    Check { child_id: String },
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutput {
    #[serde(flatten)]
    pub summary: BudgetSummary,
}

impl CommandOutput for SummaryOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let mut lines = vec![
            format!(
                "Budget: {} / {} tokens used ({:.1}%)",
                s.used, s.total, s.percent_used
            ),
            format!(
                "Reserved: {} allocated, {} unallocated, {} unreserved",
                s.allocated, s.unallocated, s.available
            ),
        ];
        if s.children.is_empty() {
            lines.push("No allocations.".to_string());
        } else {
            let mut table = list_table(&["child", "allocated", "used", "available", "status"]);
            for (id, child) in &s.children {
                table.add_row(vec![
                    id.clone(),
                    child.allocated.to_string(),
                    child.used.to_string(),
                    child.available.to_string(),
                    child.status.as_str().to_string(),
                ]);
            }
            lines.push(format!("{table}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutput {
    pub message: String,
    pub budget: BudgetSummary,
}

impl CommandOutput for MutationOutput {
    fn to_human(&self) -> String {
        format!(
            "{}\nUnreserved: {} tokens",
            self.message, self.budget.available
        )
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutput {
    pub child_id: String,
    #[serde(flatten)]
    pub check: BudgetCheck,
}

impl CommandOutput for CheckOutput {
    fn to_human(&self) -> String {
        if !self.check.allocated {
            return format!("{}: no allocation", self.child_id);
        }
        format!(
            "{}: {} ({:.1}% used){}",
            self.child_id,
            self.check
                .status
                .map(|s| s.as_str())
                .unwrap_or("UNKNOWN"),
            self.check.percent_used,
            if self.check.should_compact {
                ", compaction recommended"
            } else {
                ""
            }
        )
    }
}

fn allocation_metadata(domain: Option<String>) -> serde_json::Map<String, serde_json::Value> {
    let mut metadata = serde_json::Map::new();
    if let Some(domain) = domain {
        metadata.insert("domain".into(), serde_json::Value::String(domain));
    }
    metadata
}

pub async fn execute(args: BudgetArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let store = StateStore::from_config(&config);

    match args.command {
        BudgetCommands::Summary => {
            let state = store
                .load_required()
                .await
                .context("Failed to load execution state")?;
            output(
                &SummaryOutput {
                    summary: state.token_budget.summarize(),
                },
                json_mode,
            );
        }
        BudgetCommands::Allocate {
            child_id,
            amount,
            domain,
        } => {
            let metadata = allocation_metadata(domain);
            let budget = store
                .update_budget(|b: &Budget| b.allocate(&child_id, amount, metadata))
                .await
                .context("Allocation failed")?;
            output(
                &MutationOutput {
                    message: format!("Allocated {amount} tokens to '{child_id}'."),
                    budget: budget.summarize(),
                },
                json_mode,
            );
        }
        BudgetCommands::Track { child_id, tokens } => {
            let budget = store
                .update_budget(|b: &Budget| b.track_usage(&child_id, tokens))
                .await
                .context("Usage tracking failed")?;
            output(
                &MutationOutput {
                    message: format!("Tracked {tokens} tokens against '{child_id}'."),
                    budget: budget.summarize(),
                },
                json_mode,
            );
        }
        BudgetCommands::Release { child_id } => {
            let mut reclaimed = 0u64;
            let budget = store
                .update_budget(|b: &Budget| {
                    let (amount, next) = b.release(&child_id)?;
                    reclaimed = amount;
                    Ok(next)
                })
                .await
                .context("Release failed")?;
            output(
                &MutationOutput {
                    message: format!("Released {reclaimed} tokens from '{child_id}'."),
                    budget: budget.summarize(),
                },
                json_mode,
            );
        }
        BudgetCommands::Reallocate {
            from_id,
            to_id,
            amount,
        } => {
            let budget = store
                .update_budget(|b: &Budget| b.reallocate(&from_id, &to_id, amount))
                .await
                .context("Reallocation failed")?;
            output(
                &MutationOutput {
                    message: format!("Moved {amount} tokens from '{from_id}' to '{to_id}'."),
                    budget: budget.summarize(),
                },
                json_mode,
            );
        }
        BudgetCommands::Check { child_id } => {
            let state = store
                .load_required()
                .await
                .context("Failed to load execution state")?;
            output(
                &CheckOutput {
                    check: state.token_budget.check(&child_id),
                    child_id,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
