use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::session::USER_AUTHOR;
use crate::tools::Tool;

pub const DEFAULT_MAX_STEPS: usize = 12;

/// Static configuration of one agent: what it is for, how it is told to
/// behave, which tools it may call and where its answer is recorded.
#[derive(Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub output_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_steps: usize,
}

impl AgentDescriptor {
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    pub fn render_instruction(&self, state: &BTreeMap<String, Value>) -> Result<String> {
        inject_session_state(&self.instruction, state).map_err(|err| {
            err.context(format!(
                "failed to render instruction for agent '{}'",
                self.name
            ))
        })
    }
}

pub struct LlmAgentBuilder {
    name: String,
    description: String,
    instruction: String,
    title: Option<String>,
    keywords: Vec<String>,
    tools: Vec<Arc<dyn Tool>>,
    output_key: Option<String>,
    temperature: Option<f32>,
    max_steps: usize,
}

impl LlmAgentBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            instruction: String::new(),
            title: None,
            keywords: Vec::new(),
            tools: Vec::new(),
            output_key: None,
            temperature: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn instruction(mut self, instruction: &str) -> Self {
        self.instruction = instruction.to_string();
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_ascii_lowercase()).collect();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn output_key(mut self, key: &str) -> Self {
        self.output_key = Some(key.to_string());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn build(self) -> Result<AgentDescriptor> {
        let name = self.name.trim().to_string();
        if !is_identifier(&name) {
            return Err(anyhow::anyhow!(
                "invalid agent name '{}': use letters, digits and underscores, starting with a letter",
                self.name
            ));
        }
        if name == USER_AUTHOR {
            return Err(anyhow::anyhow!(
                "agent name '{USER_AUTHOR}' is reserved for user turns"
            ));
        }
        if let Some(key) = &self.output_key
            && !is_identifier(key)
        {
            return Err(anyhow::anyhow!(
                "invalid output key '{}' for agent '{}'",
                key,
                name
            ));
        }

        let mut tool_names = self
            .tools
            .iter()
            .map(|tool| tool.name().to_string())
            .collect::<Vec<_>>();
        tool_names.sort();
        if let Some(dup) = tool_names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(anyhow::anyhow!(
                "agent '{}' binds tool '{}' more than once",
                name,
                dup[0]
            ));
        }

        Ok(AgentDescriptor {
            title: self.title.unwrap_or_else(|| name.clone()),
            name,
            description: self.description,
            instruction: self.instruction,
            keywords: self.keywords,
            tools: self.tools,
            output_key: self.output_key,
            temperature: self.temperature,
            max_steps: self.max_steps,
        })
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_state_key(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replaces `{key}` and `{key?}` with values from session state. Braces whose
/// contents are not a state key are left untouched.
pub fn inject_session_state(template: &str, state: &BTreeMap<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let inner = &after[..end];
        let (key, optional) = match inner.strip_suffix('?') {
            Some(key) => (key, true),
            None => (inner, false),
        };
        if !is_state_key(key) {
            out.push('{');
            rest = after;
            continue;
        }

        match state.get(key) {
            Some(Value::String(text)) => out.push_str(text),
            Some(Value::Null) | None if optional => {}
            Some(other) => out.push_str(&other.to_string()),
            None => {
                return Err(anyhow::anyhow!(
                    "session state has no value for '{{{key}}}'"
                ));
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::venue::check_availability_tool;
    use serde_json::json;

    #[test]
    fn injects_required_and_optional_keys() {
        let mut state = BTreeMap::new();
        state.insert("venue_options".to_string(), json!("Darwin Waterfront"));
        state.insert("guests".to_string(), json!(500));

        let rendered = inject_session_state(
            "Venues: {venue_options}. Guests: {guests}. Budget: {budget_summary?}.",
            &state,
        )
        .expect("render");
        assert_eq!(rendered, "Venues: Darwin Waterfront. Guests: 500. Budget: .");
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let err = inject_session_state("Use {budget_summary}", &BTreeMap::new())
            .expect_err("required key");
        assert!(err.to_string().contains("budget_summary"));
    }

    #[test]
    fn non_key_braces_are_kept() {
        let rendered =
            inject_session_state("Return {\"status\": 1} or {not a key} {", &BTreeMap::new())
                .expect("render");
        assert_eq!(rendered, "Return {\"status\": 1} or {not a key} {");
    }

    #[test]
    fn builder_validates_names_and_tools() {
        assert!(LlmAgentBuilder::new("9lives").build().is_err());
        assert!(LlmAgentBuilder::new("user").build().is_err());
        assert!(
            LlmAgentBuilder::new("venue_agent")
                .tool(check_availability_tool())
                .tool(check_availability_tool())
                .build()
                .is_err()
        );

        let agent = LlmAgentBuilder::new("venue_agent")
            .keywords(&["Venue", "hall"])
            .output_key("venue_options")
            .max_steps(0)
            .build()
            .expect("valid agent");
        assert_eq!(agent.title, "venue_agent");
        assert_eq!(agent.keywords, vec!["venue", "hall"]);
        assert_eq!(agent.max_steps, 1);
    }
}
