use std::sync::Arc;

use anyhow::Result;

use crate::agents::Agent;
use crate::agents::coordinator::CoordinatorAgent;
use crate::agents::descriptor::{AgentDescriptor, LlmAgentBuilder};
use crate::config::RuntimeConfig;
use crate::model::Llm;
use crate::tools::budget::create_budget_tool;
use crate::tools::venue::check_availability_tool;

pub const ROOT_AGENT_NAME: &str = "event_planner_agent";
pub const VENUES_AGENT_NAME: &str = "get_venues_agent";
pub const BUDGET_AGENT_NAME: &str = "budget_agent";
pub const CATERING_AGENT_NAME: &str = "catering_agent";
pub const SOCIAL_MEDIA_AGENT_NAME: &str = "social_media_agent";
pub const PROPOSAL_AGENT_NAME: &str = "proposal_agent";

pub const VENUE_OPTIONS_KEY: &str = "venue_options";
pub const BUDGET_SUMMARY_KEY: &str = "budget_summary";
pub const CATERING_PLAN_KEY: &str = "catering_plan";
pub const SOCIAL_MEDIA_POST_KEY: &str = "social_media_post";
pub const EVENT_PROPOSAL_KEY: &str = "event_proposal";

const RETURN_TO_PARENT_POLICY: &str = "Your parent agent is event_planner_agent. If neither you nor any \
other agent fits the request according to the descriptions, call transfer_to_agent with \
event_planner_agent instead of answering. Once your part is done, answer with your result only; \
control returns to your parent automatically.";

fn leaf_instruction(role: &str) -> String {
    format!("{role}\n\n{RETURN_TO_PARENT_POLICY}")
}

fn venues_agent(max_steps: usize) -> Result<AgentDescriptor> {
    LlmAgentBuilder::new(VENUES_AGENT_NAME)
        .description(
            "Provides a list of available venues for the event, with directions and mapping help.",
        )
        .title("Venues")
        .instruction(&leaf_instruction(
            "You are a helpful venue finder. Help the user with mapping, directions and finding places. \
Prefer public venues first. Use the check_availability tool to confirm a venue is free on the \
requested date before recommending it, and offer an alternative when it is unavailable. If you \
cannot find suitable places, ask the user for one. If the event size is unclear, ask for an \
estimated number of guests.",
        ))
        .keywords(&[
            "venue",
            "venues",
            "location",
            "locations",
            "place",
            "places",
            "hall",
            "halls",
            "directions",
            "map",
            "maps",
            "search",
        ])
        .tool(check_availability_tool())
        .output_key(VENUE_OPTIONS_KEY)
        .temperature(0.5)
        .max_steps(max_steps)
        .build()
}

fn budget_agent(max_steps: usize) -> Result<AgentDescriptor> {
    LlmAgentBuilder::new(BUDGET_AGENT_NAME)
        .description("Helps with creating a budget for events.")
        .title("Budget")
        .instruction(&leaf_instruction(
            "You are a budget specialist. Create a budget for the event. When the user asks for a \
budget, break it into line items and call create_budget_and_fill_sheet with those costs, then \
report the total and the spreadsheet link. If any figure is unclear, make a reasonable assumption \
and state it. Do not share your reasoning, just answer.",
        ))
        .keywords(&[
            "budget",
            "budgets",
            "cost",
            "costs",
            "costing",
            "spreadsheet",
            "expense",
            "expenses",
        ])
        .tool(create_budget_tool())
        .output_key(BUDGET_SUMMARY_KEY)
        .max_steps(max_steps)
        .build()
}

fn catering_agent(max_steps: usize) -> Result<AgentDescriptor> {
    LlmAgentBuilder::new(CATERING_AGENT_NAME)
        .description("Helps with catering arrangements for events.")
        .title("Catering")
        .instruction(&leaf_instruction(
            "You are a catering specialist. Find caterers based on cuisine, budget and event size. \
If you cannot find proper caterers, ask the user for one.",
        ))
        .keywords(&[
            "catering",
            "caterer",
            "caterers",
            "food",
            "menu",
            "menus",
            "cuisine",
            "cuisines",
        ])
        .tool(check_availability_tool())
        .output_key(CATERING_PLAN_KEY)
        .max_steps(max_steps)
        .build()
}

fn social_media_agent(max_steps: usize) -> Result<AgentDescriptor> {
    LlmAgentBuilder::new(SOCIAL_MEDIA_AGENT_NAME)
        .description("Helps with creating social media posts for events.")
        .title("Social Media")
        .instruction(&leaf_instruction(
            "You are a social media marketing specialist. Write engaging content for the event: \
attention-grabbing and shareable, tailored to the target audience, suited to the platform, with \
relevant hashtags and a call to action. Keep a professional, informative and lively tone that \
matches the event's goals. Work autonomously from the details you have and give only the post, \
never your working.",
        ))
        .keywords(&[
            "social media",
            "promo",
            "promos",
            "promote",
            "promotion",
            "post",
            "posts",
            "posting",
            "instagram",
            "hashtag",
            "hashtags",
            "marketing",
        ])
        .output_key(SOCIAL_MEDIA_POST_KEY)
        .max_steps(max_steps)
        .build()
}

fn proposal_agent(max_steps: usize) -> Result<AgentDescriptor> {
    LlmAgentBuilder::new(PROPOSAL_AGENT_NAME)
        .description(
            "Drafts a complete event proposal from the venue, budget, catering and promotion work.",
        )
        .title("Proposal")
        .instruction(&leaf_instruction(
            "You are an event proposal writer. Draft a concise proposal covering the event concept, \
venue, catering, budget and promotion. Build on the work already done where it exists:\n\
Venue options: {venue_options?}\n\
Budget: {budget_summary?}\n\
Catering: {catering_plan?}\n\
Promotion: {social_media_post?}\n\
Fill any gaps with clearly labelled assumptions.",
        ))
        .keywords(&["proposal", "proposals", "plan a", "plan an", "pitch"])
        .output_key(EVENT_PROPOSAL_KEY)
        .max_steps(max_steps)
        .build()
}

fn root_agent(max_steps: usize) -> Result<AgentDescriptor> {
    LlmAgentBuilder::new(ROOT_AGENT_NAME)
        .description("Provides event planning assistance.")
        .title("Event Planner")
        .instruction(
            "You are a comprehensive event planning assistant. Coordinate specialised agents while \
keeping oversight of the whole plan.\n\
- Venue, location, mapping or search questions: transfer to get_venues_agent.\n\
- Budget questions: transfer to budget_agent.\n\
- Catering and food questions: transfer to catering_agent.\n\
- Social media and marketing: transfer to social_media_agent.\n\
- Full proposals: transfer to proposal_agent.\n\
When a request needs a full plan, work in this order: venue, budget, catering, social media, \
proposal. Make sure each task matches the agent's expertise and follow up when a response is \
incomplete. When the specialists have answered, reply with a short synthesis that ties their \
results together without repeating them. If you are the best fit, answer directly; if details are \
missing, answer with sensible assumptions, and only ask the user for clarification when you \
cannot. Do not share your reasoning, just answer.",
        )
        .temperature(0.2)
        .max_steps(max_steps)
        .build()
}

/// The root descriptor and its children, in delegation priority order.
pub fn event_planner_descriptors(
    max_agent_steps: usize,
) -> Result<(AgentDescriptor, Vec<AgentDescriptor>)> {
    let children = vec![
        venues_agent(max_agent_steps)?,
        budget_agent(max_agent_steps)?,
        catering_agent(max_agent_steps)?,
        social_media_agent(max_agent_steps)?,
        proposal_agent(max_agent_steps)?,
    ];
    Ok((root_agent(max_agent_steps)?, children))
}

pub fn build_event_planner(model: Arc<dyn Llm>, cfg: &RuntimeConfig) -> Result<Agent> {
    let (root, children) = event_planner_descriptors(cfg.max_agent_steps)?;
    let coordinator = CoordinatorAgent::new(root, model, children, cfg.max_delegations)?;
    tracing::info!(
        root = ROOT_AGENT_NAME,
        children = coordinator.children().len(),
        max_delegations = cfg.max_delegations,
        "event planner agent tree built"
    );
    Ok(Agent::Coordinator(coordinator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::descriptor::inject_session_state;
    use crate::agents::router::KeywordRouter;
    use std::collections::BTreeMap;

    #[test]
    fn children_are_declared_in_priority_order() {
        let (root, children) = event_planner_descriptors(12).expect("descriptors");
        assert_eq!(root.name, ROOT_AGENT_NAME);
        assert_eq!(root.temperature, Some(0.2));
        let names = children.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                VENUES_AGENT_NAME,
                BUDGET_AGENT_NAME,
                CATERING_AGENT_NAME,
                SOCIAL_MEDIA_AGENT_NAME,
                PROPOSAL_AGENT_NAME
            ]
        );
        assert_eq!(children[0].tool_names(), vec!["check_availability"]);
        assert_eq!(children[1].tool_names(), vec!["create_budget_and_fill_sheet"]);
        assert!(children[3].tools.is_empty());
    }

    #[test]
    fn every_instruction_renders_against_empty_state() {
        let (root, children) = event_planner_descriptors(12).expect("descriptors");
        for agent in std::iter::once(&root).chain(children.iter()) {
            inject_session_state(&agent.instruction, &BTreeMap::new())
                .unwrap_or_else(|err| panic!("{} failed to render: {err:#}", agent.name));
        }
    }

    #[test]
    fn every_keyword_routes_to_its_leaf() {
        let (_, children) = event_planner_descriptors(12).expect("descriptors");
        let router = KeywordRouter::new(children.iter());
        for child in &children {
            for keyword in &child.keywords {
                let query = format!("Could you help with the {keyword} for our gala?");
                assert!(
                    router.plan(&query).contains(&child.name),
                    "'{keyword}' did not route to {}",
                    child.name
                );
            }
        }
    }

    #[test]
    fn look_alike_words_do_not_route() {
        let (_, children) = event_planner_descriptors(12).expect("descriptors");
        let router = KeywordRouter::new(children.iter());
        for query in [
            "Throw a costume party",
            "Should we postpone the gala?",
            "Photos of maple leaves",
            "Mapping out a foodie tour",
        ] {
            assert!(router.plan(query).is_empty(), "'{query}' should not route");
        }
    }
}
