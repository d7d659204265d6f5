pub mod budget;
pub mod venue;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde_json::{Value, json};

use crate::model::ToolDeclaration;

pub const CHECK_AVAILABILITY_TOOL_NAME: &str = "check_availability";
pub const CREATE_BUDGET_TOOL_NAME: &str = "create_budget_and_fill_sheet";

/// A callable the model may request. Handlers are total over their declared
/// schema: logical failures come back as ordinary result objects, and only
/// malformed arguments produce an `Err`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value) -> Result<Value>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: ToolHandler,
}

impl FunctionTool {
    pub fn new<F, Fut>(name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        (self.handler)(args).await
    }
}

/// JSON schema for `T`, reduced to the subset function-calling APIs accept.
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| json!({ "type": "object" }));
    strip_schema_metadata(&mut value);
    value
}

fn strip_schema_metadata(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in ["$schema", "title", "definitions", "additionalProperties"] {
                map.remove(key);
            }
            for nested in map.values_mut() {
                strip_schema_metadata(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_schema_metadata(item);
            }
        }
        _ => {}
    }
}

pub fn build_event_tools() -> Vec<Arc<dyn Tool>> {
    vec![venue::check_availability_tool(), budget::create_budget_tool()]
}

pub fn find_tool(tools: &[Arc<dyn Tool>], name: &str) -> Option<Arc<dyn Tool>> {
    tools.iter().find(|tool| tool.name() == name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tools_expose_sanitized_schemas() {
        let tools = build_event_tools();
        let names = tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names, vec![CHECK_AVAILABILITY_TOOL_NAME, CREATE_BUDGET_TOOL_NAME]);

        let venue = tools[0].declaration();
        assert!(venue.parameters.get("$schema").is_none());
        assert!(venue.parameters.get("title").is_none());
        let props = venue.parameters["properties"]
            .as_object()
            .expect("venue schema has properties");
        assert!(props.contains_key("venue_name"));
        assert!(props.contains_key("date"));
    }

    #[tokio::test]
    async fn function_tool_runs_async_handler() {
        let tool = FunctionTool::new("echo", "Echoes its arguments.", |args| async move {
            Ok(json!({ "echo": args }))
        });
        let out = tool.execute(json!({"a": 1})).await.expect("echo runs");
        assert_eq!(out, json!({"echo": {"a": 1}}));
        assert_eq!(tool.declaration().parameters["type"], "object");
    }
}
