//! Narrow boundary to the language model. Every agent talks to the model
//! through [`Llm::generate`], so tests can swap in [`MockLlm`].
use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ROLE_USER: &str = "user";
pub const ROLE_MODEL: &str = "model";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Text { text: String },
    FunctionCall { function_call: FunctionCall },
    FunctionResponse { function_response: FunctionResponse },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Part::Text { text: text.into() });
        self
    }

    pub fn with_function_call(mut self, name: &str, args: Value) -> Self {
        self.parts.push(Part::FunctionCall {
            function_call: FunctionCall {
                name: name.to_string(),
                args,
            },
        });
        self
    }

    pub fn with_function_response(mut self, name: &str, response: Value) -> Self {
        self.parts.push(Part::FunctionResponse {
            function_response: FunctionResponse {
                name: name.to_string(),
                response,
            },
        });
        self
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::FunctionCall { function_call } => Some(function_call),
                _ => None,
            })
            .collect()
    }

    pub fn has_function_parts(&self) -> bool {
        self.parts
            .iter()
            .any(|part| !matches!(part, Part::Text { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system_instruction: String,
    pub contents: Vec<Content>,
    pub tools: Vec<ToolDeclaration>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Content,
}

impl LlmResponse {
    pub fn new(content: Content) -> Self {
        Self { content }
    }

    pub fn text(text: &str) -> Self {
        Self::new(Content::new(ROLE_MODEL).with_text(text))
    }

    pub fn function_call(name: &str, args: Value) -> Self {
        Self::new(Content::new(ROLE_MODEL).with_function_call(name, args))
    }
}

#[async_trait]
pub trait Llm: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Scripted model: hands out queued responses in order and records every
/// request it receives.
pub struct MockLlm {
    name: String,
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(self, response: LlmResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_response(LlmResponse::text(text))
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl Llm for MockLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| {
                anyhow::anyhow!("mock model '{}' has no scripted responses left", self.name)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_request() -> LlmRequest {
        LlmRequest {
            model: "mock".to_string(),
            system_instruction: String::new(),
            contents: Vec::new(),
            tools: Vec::new(),
            temperature: None,
        }
    }

    #[tokio::test]
    async fn mock_model_replays_script_then_fails() {
        let model = MockLlm::new("mock")
            .with_text("first")
            .with_response(LlmResponse::function_call("lookup", json!({"q": 1})));

        let first = model.generate(empty_request()).await.expect("first response");
        assert_eq!(first.content.text(), "first");

        let second = model.generate(empty_request()).await.expect("second response");
        assert_eq!(second.content.function_calls().len(), 1);

        let err = model.generate(empty_request()).await.expect_err("script exhausted");
        assert!(err.to_string().contains("no scripted responses left"));
        assert_eq!(model.requests().len(), 3);
    }
}
