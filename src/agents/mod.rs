//! Event planning agents.
//!
//! The tree is one coordinator with five specialist leaves:
//!
//! - `get_venues_agent`: venue search, checks dates with `check_availability`
//! - `budget_agent`: line-item budgets via `create_budget_and_fill_sheet`
//! - `catering_agent`: caterers by cuisine, budget and size
//! - `social_media_agent`: promotional posts
//! - `proposal_agent`: a full proposal built from the others' outputs
//!
//! Each leaf records its answer under its own output key in session state.
//! The coordinator routes a request, delegates sequentially, then composes the
//! recorded outputs into a single response.

pub mod catalog;
pub mod context;
pub mod coordinator;
pub mod descriptor;
pub mod flow;
pub mod leaf;
pub mod router;

use anyhow::Result;
use serde::Serialize;

use self::context::InvocationContext;
use self::coordinator::CoordinatorAgent;
use self::descriptor::AgentDescriptor;
use self::leaf::LeafAgent;

/// Where control goes after an agent has handled a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NextStep {
    Complete,
    TransferTo(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    pub response: String,
    pub next: NextStep,
}

pub enum Agent {
    Leaf(LeafAgent),
    Coordinator(CoordinatorAgent),
}

impl Agent {
    pub fn descriptor(&self) -> &AgentDescriptor {
        match self {
            Agent::Leaf(leaf) => leaf.descriptor(),
            Agent::Coordinator(coordinator) => coordinator.descriptor(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }

    pub async fn handle_request(&self, ctx: &mut InvocationContext) -> Result<AgentOutcome> {
        match self {
            Agent::Leaf(leaf) => leaf.handle_request(ctx).await,
            Agent::Coordinator(coordinator) => coordinator.handle_request(ctx).await,
        }
    }

    /// Every descriptor in the tree, root first.
    pub fn descriptors(&self) -> Vec<&AgentDescriptor> {
        match self {
            Agent::Leaf(leaf) => vec![leaf.descriptor()],
            Agent::Coordinator(coordinator) => std::iter::once(coordinator.descriptor())
                .chain(coordinator.children().iter().map(LeafAgent::descriptor))
                .collect(),
        }
    }
}

pub fn run_agents_list(root: &AgentDescriptor, children: &[AgentDescriptor]) -> Result<()> {
    println!("Coordinator: {} ({})", root.name, root.description);
    println!("Sub-agents (delegation priority order):");
    for (idx, child) in children.iter().enumerate() {
        println!(
            "  {}. {} -> {} | {}",
            idx + 1,
            child.name,
            child.output_key.as_deref().unwrap_or("<none>"),
            child.description
        );
    }
    Ok(())
}

pub fn run_agents_show(
    root: &AgentDescriptor,
    children: &[AgentDescriptor],
    requested_name: Option<String>,
) -> Result<()> {
    let name = requested_name.unwrap_or_else(|| root.name.clone());
    let agent = std::iter::once(root)
        .chain(children.iter())
        .find(|agent| agent.name == name)
        .ok_or_else(|| {
            let names = std::iter::once(root)
                .chain(children.iter())
                .map(|agent| agent.name.as_str())
                .collect::<Vec<_>>();
            anyhow::anyhow!(
                "agent '{}' not found. Available agents: {}",
                name,
                names.join(", ")
            )
        })?;

    println!("Agent: {}", agent.name);
    println!("Title: {}", agent.title);
    println!("Description: {}", agent.description);
    println!(
        "Output key: {}",
        agent.output_key.as_deref().unwrap_or("<none>")
    );
    println!(
        "Temperature: {}",
        agent
            .temperature
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<model default>".to_string())
    );
    println!(
        "Tools: {}",
        if agent.tools.is_empty() {
            "<none>".to_string()
        } else {
            agent.tool_names().join(", ")
        }
    );
    println!(
        "Routing keywords: {}",
        if agent.keywords.is_empty() {
            "<none>".to_string()
        } else {
            agent.keywords.join(", ")
        }
    );
    println!("Instruction:\n{}", agent.instruction);
    Ok(())
}
