use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::agents::context::InvocationContext;
use crate::agents::descriptor::AgentDescriptor;
use crate::agents::flow::{LoopOutcome, TransferTarget, run_agent_loop};
use crate::agents::leaf::LeafAgent;
use crate::agents::router::KeywordRouter;
use crate::agents::{AgentOutcome, NextStep};
use crate::error::PlannerError;
use crate::model::{Content, Llm, ROLE_MODEL};

pub const DEFAULT_MAX_DELEGATIONS: usize = 8;

pub const SUMMARY_TITLE: &str = "Summary";

pub const CLARIFICATION_REQUEST: &str = "I couldn't tell which part of your event you need help with. \
Could you share a few details (event type, location, date, guest count or budget) and say whether you \
need a venue, catering, a budget, promotion, or a full proposal?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    AwaitingRequest,
    Routing,
    Delegating(String),
    Aggregating,
    Responding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delegation {
    pub agent: String,
    pub output: Option<String>,
    pub next: NextStep,
}

/// Everything one user turn did inside the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReport {
    pub response: String,
    pub delegations: Vec<Delegation>,
    pub transitions: Vec<CoordinatorState>,
}

impl TurnReport {
    pub fn delegated_agents(&self) -> Vec<&str> {
        self.delegations.iter().map(|d| d.agent.as_str()).collect()
    }
}

struct StateTrace {
    states: Vec<CoordinatorState>,
}

impl StateTrace {
    fn new() -> Self {
        Self {
            states: vec![CoordinatorState::AwaitingRequest],
        }
    }

    fn enter(&mut self, agent: &str, next: CoordinatorState) {
        tracing::debug!(agent = %agent, state = ?next, "coordinator transition");
        self.states.push(next);
    }
}

pub struct CoordinatorAgent {
    descriptor: AgentDescriptor,
    model: Arc<dyn Llm>,
    children: Vec<LeafAgent>,
    router: KeywordRouter,
    max_delegations: usize,
}

impl CoordinatorAgent {
    /// Wires `children` under `descriptor`. Names must be unique across the
    /// tree and output keys unique among the children.
    pub fn new(
        descriptor: AgentDescriptor,
        model: Arc<dyn Llm>,
        children: Vec<AgentDescriptor>,
        max_delegations: usize,
    ) -> Result<Self> {
        validate_tree(&descriptor, &children)?;

        let router = KeywordRouter::new(children.iter());
        let children = children
            .into_iter()
            .map(|child| LeafAgent::new(child, model.clone()).with_parent(&descriptor))
            .collect();

        Ok(Self {
            descriptor,
            model,
            children,
            router,
            max_delegations: max_delegations.max(1),
        })
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn children(&self) -> &[LeafAgent] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&LeafAgent> {
        self.children.iter().find(|c| c.descriptor().name == name)
    }

    fn transfer_targets(&self) -> Vec<TransferTarget> {
        self.children
            .iter()
            .map(|c| TransferTarget::of(c.descriptor()))
            .collect()
    }

    pub async fn handle_request(&self, ctx: &mut InvocationContext) -> Result<AgentOutcome> {
        let report = self.run_turn(ctx).await?;
        Ok(AgentOutcome {
            response: report.response,
            next: NextStep::Complete,
        })
    }

    /// One pass through the routing state machine for the latest user turn.
    pub async fn run_turn(&self, ctx: &mut InvocationContext) -> Result<TurnReport> {
        let name = self.descriptor.name.as_str();
        let mut trace = StateTrace::new();
        trace.enter(name, CoordinatorState::Routing);

        let query = ctx.user_text();
        let mut plan = VecDeque::from(self.router.plan(&query));
        tracing::info!(agent = %name, plan = ?plan, "routing plan");
        for delegate in &plan {
            tracing::debug!(
                agent = %name,
                delegate = %delegate,
                keywords = ?self.router.matched_keywords(delegate, &query),
                "keyword match"
            );
        }

        let targets = self.transfer_targets();
        let mut delegations: Vec<Delegation> = Vec::new();
        let mut coordinator_text = String::new();

        loop {
            if delegations.len() >= self.max_delegations {
                tracing::warn!(
                    agent = %name,
                    limit = self.max_delegations,
                    pending = plan.len(),
                    "delegation budget spent; composing with what we have"
                );
                break;
            }

            let target = match plan.pop_front() {
                Some(next) => next,
                None => match run_agent_loop(&self.descriptor, &self.model, ctx, &targets).await? {
                    LoopOutcome::Transfer(next) => next,
                    LoopOutcome::Answered(text) => {
                        coordinator_text = text;
                        break;
                    }
                },
            };

            let Some(child) = self.child(&target) else {
                tracing::warn!(agent = %name, target = %target, "skipping unknown delegate");
                continue;
            };

            trace.enter(name, CoordinatorState::Delegating(target.clone()));
            let outcome = child.handle_request(ctx).await?;
            tracing::info!(
                agent = %name,
                delegate = %target,
                produced_output = !outcome.response.trim().is_empty(),
                "delegation completed"
            );
            delegations.push(Delegation {
                agent: target,
                output: Some(outcome.response).filter(|text| !text.trim().is_empty()),
                next: outcome.next,
            });
            trace.enter(name, CoordinatorState::Routing);
        }

        trace.enter(name, CoordinatorState::Aggregating);
        let sections = self.collect_sections(&delegations);
        let response = compose_response(&sections, &coordinator_text);

        trace.enter(name, CoordinatorState::Responding);
        let event = ctx
            .new_event(name)
            .with_content(Content::new(ROLE_MODEL).with_text(response.clone()))
            .into_final();
        ctx.emit(event).await?;
        trace.enter(name, CoordinatorState::AwaitingRequest);

        Ok(TurnReport {
            response,
            delegations,
            transitions: trace.states,
        })
    }

    /// One `(title, text)` per leaf that produced output, in first-invocation
    /// order, using the leaf's latest output of the turn.
    fn collect_sections(&self, delegations: &[Delegation]) -> Vec<(String, String)> {
        let mut order: Vec<&str> = Vec::new();
        for delegation in delegations {
            if delegation.output.is_some() && !order.contains(&delegation.agent.as_str()) {
                order.push(&delegation.agent);
            }
        }

        order
            .into_iter()
            .filter_map(|agent| {
                let text = delegations
                    .iter()
                    .rev()
                    .filter(|d| d.agent == agent)
                    .find_map(|d| d.output.clone())?;
                let title = self
                    .child(agent)
                    .map(|c| c.descriptor().title.clone())
                    .unwrap_or_else(|| agent.to_string());
                Some((title, text))
            })
            .collect()
    }
}

/// Agent names must be unique across the tree and output keys unique among
/// the root and its children.
pub fn validate_tree(root: &AgentDescriptor, children: &[AgentDescriptor]) -> Result<()> {
    let mut names = BTreeSet::new();
    names.insert(root.name.as_str());
    let mut output_keys = BTreeSet::new();
    if let Some(key) = &root.output_key {
        output_keys.insert(key.as_str());
    }

    for child in children {
        if !names.insert(child.name.as_str()) {
            return Err(PlannerError::DuplicateAgentName(child.name.clone()).into());
        }
        if let Some(key) = &child.output_key
            && !output_keys.insert(key.as_str())
        {
            return Err(PlannerError::DuplicateOutputKey {
                parent: root.name.clone(),
                key: key.clone(),
            }
            .into());
        }
    }
    Ok(())
}

pub fn compose_response(sections: &[(String, String)], coordinator_text: &str) -> String {
    let coordinator_text = coordinator_text.trim();
    match sections {
        [] if coordinator_text.is_empty() => CLARIFICATION_REQUEST.to_string(),
        [] => coordinator_text.to_string(),
        [(title, text)] => {
            let mut out = format!("## {}\n\n{}", title, text.trim());
            if !coordinator_text.is_empty() {
                out.push_str("\n\n");
                out.push_str(coordinator_text);
            }
            out
        }
        _ => {
            let mut blocks = sections
                .iter()
                .map(|(title, text)| format!("## {}\n\n{}", title, text.trim()))
                .collect::<Vec<_>>();
            let summary = if coordinator_text.is_empty() {
                fallback_summary(sections)
            } else {
                coordinator_text.to_string()
            };
            blocks.push(format!("## {SUMMARY_TITLE}\n\n{summary}"));
            blocks.join("\n\n")
        }
    }
}

fn fallback_summary(sections: &[(String, String)]) -> String {
    let titles = sections.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>();
    let covered = match titles.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
        Some((last, _)) => (*last).to_string(),
        None => String::new(),
    };
    format!(
        "This plan covers {covered}. Review each section above and tell me what to adjust."
    )
}
