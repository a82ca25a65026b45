//! Implementation of the `echelon status` command.

use anyhow::{Context, Result};
use clap::Args;
use console::style;

use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{BudgetSummary, ExecutionState};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::state_store::StateStore;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Include the full per-child budget table
    #[arg(long)]
    pub budget: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutput {
    pub plan_id: String,
    pub status: String,
    pub current_phase: Option<String>,
    pub active_agents: Vec<AgentLine>,
    pub tasks: TaskCounts,
    pub unprocessed_messages: usize,
    pub budget: BudgetSummary,
    #[serde(skip)]
    show_budget_table: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLine {
    pub id: String,
    pub tier: String,
    pub domain: String,
    pub task_id: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Plan:    {}", style(&self.plan_id).bold()),
            format!("Status:  {}", self.status),
            format!(
                "Phase:   {}",
                self.current_phase.as_deref().unwrap_or("-")
            ),
            format!(
                "Tasks:   {} pending, {} completed, {} failed, {} blocked",
                self.tasks.pending, self.tasks.completed, self.tasks.failed, self.tasks.blocked
            ),
            format!("Inbox:   {} unprocessed message(s)", self.unprocessed_messages),
            format!(
                "Budget:  {} / {} tokens used ({:.1}%), {} unreserved",
                self.budget.used, self.budget.total, self.budget.percent_used, self.budget.available
            ),
        ];

        if self.active_agents.is_empty() {
            lines.push("\nNo active agents.".to_string());
        } else {
            let mut table = list_table(&["id", "tier", "domain", "task"]);
            for agent in &self.active_agents {
                table.add_row(vec![
                    agent.id.clone(),
                    agent.tier.clone(),
                    agent.domain.clone(),
                    agent.task_id.clone(),
                ]);
            }
            lines.push(format!(
                "\n{} active agent(s):\n{table}",
                self.active_agents.len()
            ));
        }

        if self.show_budget_table && !self.budget.children.is_empty() {
            let mut table = list_table(&["child", "allocated", "used", "available", "status"]);
            for (id, child) in &self.budget.children {
                table.add_row(vec![
                    id.clone(),
                    child.allocated.to_string(),
                    child.used.to_string(),
                    child.available.to_string(),
                    child.status.as_str().to_string(),
                ]);
            }
            lines.push(format!("\nAllocations:\n{table}"));
        }

        lines.join("\n")
    }
}

fn build_output(state: &ExecutionState, show_budget_table: bool) -> StatusOutput {
    StatusOutput {
        plan_id: state.plan_id.clone(),
        status: format!("{:?}", state.status).to_lowercase(),
        current_phase: state.current_phase.clone(),
        active_agents: state
            .active_agents
            .iter()
            .map(|a| AgentLine {
                id: a.id.clone(),
                tier: a.tier.as_str().to_string(),
                domain: a.domain.clone(),
                task_id: a.task_id.clone(),
            })
            .collect(),
        tasks: TaskCounts {
            pending: state.pending_tasks.len(),
            completed: state.completed_tasks.len(),
            failed: state.failed_tasks.len(),
            blocked: state.blocked_tasks.len(),
        },
        unprocessed_messages: state.messages.iter().filter(|m| !m.processed).count(),
        budget: state.token_budget.summarize(),
        show_budget_table,
    }
}

pub async fn execute(args: StatusArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let store = StateStore::from_config(&config);

    let state = store
        .load_required()
        .await
        .context("Failed to load execution state")?;

    output(&build_output(&state, args.budget), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentRecord, Budget, Tier};

    #[test]
    fn test_status_output_counts() {
        let mut state = ExecutionState::new(
            "plan-9",
            "plan.md",
            vec!["t1".into(), "t2".into()],
            Budget::new(1_000),
        );
        state.add_agent(AgentRecord::spawned("a1", Tier::L3, "backend", "t1", None));

        let out = build_output(&state, false);
        assert_eq!(out.plan_id, "plan-9");
        assert_eq!(out.tasks.pending, 1);
        assert_eq!(out.active_agents.len(), 1);
        assert_eq!(out.active_agents[0].tier, "L3");
    }
}
