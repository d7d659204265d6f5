use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ProviderCredentials, RuntimeConfig};
use crate::model::{
    Content, FunctionCall, FunctionResponse, Llm, LlmRequest, LlmResponse, Part, ROLE_MODEL,
    ToolDeclaration,
};

const GENERATIVE_LANGUAGE_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub fn validate_model_name(model_name: &str) -> Result<()> {
    if model_name.trim().starts_with("gemini") {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "model '{}' is not a Gemini model id (expected gemini-*)",
        model_name
    ))
}

pub fn gemini_endpoint(credentials: &ProviderCredentials, model_name: &str) -> String {
    if credentials.use_vertexai {
        format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model_name}:generateContent",
            location = credentials.location,
            project = credentials.project_id,
        )
    } else {
        format!("{GENERATIVE_LANGUAGE_BASE}/models/{model_name}:generateContent")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool<'a> {
    function_declarations: &'a [ToolDeclaration],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl From<&Content> for WireContent {
    fn from(content: &Content) -> Self {
        let parts = content
            .parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => WirePart {
                    text: Some(text.clone()),
                    ..WirePart::default()
                },
                Part::FunctionCall { function_call } => WirePart {
                    function_call: Some(function_call.clone()),
                    ..WirePart::default()
                },
                Part::FunctionResponse { function_response } => WirePart {
                    function_response: Some(function_response.clone()),
                    ..WirePart::default()
                },
            })
            .collect();
        WireContent {
            role: Some(content.role.clone()),
            parts,
        }
    }
}

impl From<WireContent> for Content {
    fn from(wire: WireContent) -> Self {
        let mut content = Content::new(wire.role.as_deref().unwrap_or(ROLE_MODEL));
        for part in wire.parts {
            if let Some(text) = part.text {
                content.parts.push(Part::Text { text });
            }
            if let Some(function_call) = part.function_call {
                content.parts.push(Part::FunctionCall { function_call });
            }
            if let Some(function_response) = part.function_response {
                content.parts.push(Part::FunctionResponse {
                    function_response,
                });
            }
        }
        content
    }
}

/// Gemini `generateContent` over HTTP, either the Generative Language API or
/// the Vertex AI publisher endpoint.
pub struct GeminiModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GeminiModel {
    pub fn new(credentials: &ProviderCredentials, model_name: &str) -> Result<Self> {
        validate_model_name(model_name)?;
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for Gemini provider")?;
        Ok(Self {
            client,
            endpoint: gemini_endpoint(credentials, model_name),
            api_key: credentials.api_key.clone(),
            model: model_name.to_string(),
        })
    }

    fn build_body<'a>(&self, request: &'a LlmRequest) -> GenerateContentRequest<'a> {
        let system_instruction = (!request.system_instruction.trim().is_empty()).then(|| {
            WireContent {
                role: None,
                parts: vec![WirePart {
                    text: Some(request.system_instruction.clone()),
                    ..WirePart::default()
                }],
            }
        });
        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![WireTool {
                function_declarations: &request.tools,
            }]
        };
        GenerateContentRequest {
            system_instruction,
            contents: request.contents.iter().map(WireContent::from).collect(),
            tools,
            generation_config: request
                .temperature
                .map(|temperature| GenerationConfig { temperature }),
        }
    }
}

#[async_trait]
impl Llm for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_body(&request);
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to call Gemini model '{}'", self.model))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Gemini API error ({status}) for model '{}': {error_text}",
                self.model
            ));
        }

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .context("failed to decode Gemini generateContent response")?;

        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
            anyhow::anyhow!(
                "Gemini model '{}' returned no candidates (prompt feedback: {})",
                self.model,
                parsed
                    .prompt_feedback
                    .map(|feedback| feedback.to_string())
                    .unwrap_or_else(|| "<none>".to_string())
            )
        })?;

        tracing::debug!(
            model = %self.model,
            finish_reason = candidate.finish_reason.as_deref().unwrap_or("<none>"),
            "Gemini candidate received"
        );

        let content = candidate
            .content
            .map(Content::from)
            .unwrap_or_else(|| Content::new(ROLE_MODEL));
        Ok(LlmResponse::new(content))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            attempts: cfg.model_retry_attempts.max(1),
            timeout: Duration::from_secs(cfg.model_timeout_secs.max(1)),
            delay: Duration::from_millis(cfg.model_retry_delay_ms),
        }
    }
}

/// Bounded retry with a per-attempt timeout around another model.
pub struct RetryingLlm {
    inner: Arc<dyn Llm>,
    policy: RetryPolicy,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn Llm>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Llm for RetryingLlm {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let max_attempts = self.policy.attempts.max(1);
        let mut attempts = 0u32;
        let mut last_error: Option<anyhow::Error> = None;

        while attempts < max_attempts {
            attempts += 1;
            match tokio::time::timeout(self.policy.timeout, self.inner.generate(request.clone()))
                .await
            {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) => {
                    tracing::warn!(
                        model = %self.inner.name(),
                        attempt = attempts,
                        error = %err,
                        "model call failed"
                    );
                    last_error = Some(err);
                }
                Err(_) => {
                    tracing::warn!(
                        model = %self.inner.name(),
                        attempt = attempts,
                        timeout_ms = self.policy.timeout.as_millis() as u64,
                        "model call timed out"
                    );
                    last_error = Some(anyhow::anyhow!(
                        "model call timed out after {} ms",
                        self.policy.timeout.as_millis()
                    ));
                }
            }

            if attempts < max_attempts && !self.policy.delay.is_zero() {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("model call failed unexpectedly"))
            .context(format!(
                "model '{}' failed after {} attempt(s)",
                self.inner.name(),
                attempts
            )))
    }
}

pub fn resolve_model(
    cfg: &RuntimeConfig,
    credentials: &ProviderCredentials,
) -> Result<Arc<dyn Llm>> {
    let gemini = GeminiModel::new(credentials, &cfg.model)?;
    tracing::info!(
        model = %cfg.model,
        vertexai = credentials.use_vertexai,
        "Using Gemini model"
    );
    Ok(Arc::new(RetryingLlm::new(
        Arc::new(gemini),
        RetryPolicy::from_config(cfg),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockLlm;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn credentials(use_vertexai: bool) -> ProviderCredentials {
        ProviderCredentials {
            api_key: "test-key".to_string(),
            project_id: "demo-project".to_string(),
            location: "australia-southeast1".to_string(),
            use_vertexai,
            maps_api_key: None,
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            model: "gemini-2.0-flash".to_string(),
            system_instruction: "Be brief.".to_string(),
            contents: vec![Content::new("user").with_text("hello")],
            tools: Vec::new(),
            temperature: Some(0.2),
        }
    }

    struct FlakyLlm {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Llm for FlakyLlm {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow::anyhow!("transient upstream error"));
            }
            Ok(LlmResponse::text("recovered"))
        }
    }

    struct SlowLlm;

    #[async_trait]
    impl Llm for SlowLlm {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(LlmResponse::text("too late"))
        }
    }

    fn policy(attempts: u32, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy {
            attempts,
            timeout: Duration::from_millis(timeout_ms),
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn endpoint_follows_vertex_flag() {
        assert_eq!(
            gemini_endpoint(&credentials(false), "gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        let vertex = gemini_endpoint(&credentials(true), "gemini-2.0-flash");
        assert!(vertex.starts_with("https://australia-southeast1-aiplatform.googleapis.com/"));
        assert!(vertex.contains("/projects/demo-project/"));
    }

    #[test]
    fn rejects_non_gemini_models() {
        assert!(validate_model_name("gemini-2.5-pro").is_ok());
        assert!(validate_model_name("gpt-4o").is_err());
        assert!(GeminiModel::new(&credentials(false), "claude-3").is_err());
    }

    #[test]
    fn request_body_uses_gemini_wire_names() {
        let model = GeminiModel::new(&credentials(false), "gemini-2.0-flash").expect("model");
        let mut req = request();
        req.tools.push(ToolDeclaration {
            name: "check_availability".to_string(),
            description: "Checks a venue.".to_string(),
            parameters: json!({"type": "object", "properties": {"date": {"type": "string"}}}),
        });
        req.contents.push(
            Content::new("model").with_function_call("check_availability", json!({"date": "x"})),
        );
        let body = serde_json::to_value(model.build_body(&req)).expect("serialize");

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"]["name"],
            "check_availability"
        );
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "check_availability"
        );
        let temperature = body["generationConfig"]["temperature"]
            .as_f64()
            .expect("temperature is numeric");
        assert!((temperature - 0.2).abs() < 1e-6);
    }

    #[test]
    fn wire_content_converts_function_calls() {
        let wire: WireContent = serde_json::from_value(json!({
            "role": "model",
            "parts": [
                {"text": "checking"},
                {"functionCall": {"name": "transfer_to_agent", "args": {"agent_name": "budget_agent"}}}
            ]
        }))
        .expect("decode");
        let content = Content::from(wire);
        assert_eq!(content.text(), "checking");
        assert_eq!(content.function_calls()[0].name, "transfer_to_agent");
    }

    #[tokio::test]
    async fn retrying_model_recovers_from_transient_failure() {
        let flaky = Arc::new(FlakyLlm {
            failures_left: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let model = RetryingLlm::new(flaky.clone(), policy(3, 1_000));
        let response = model.generate(request()).await.expect("second attempt succeeds");
        assert_eq!(response.content.text(), "recovered");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retrying_model_gives_up_after_bounded_attempts() {
        let model = RetryingLlm::new(Arc::new(SlowLlm), policy(2, 20));
        let err = model.generate(request()).await.expect_err("times out");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("failed after 2 attempt(s)"));
        assert!(rendered.contains("timed out"));
    }

    #[tokio::test]
    async fn retrying_model_passes_through_success() {
        let model = RetryingLlm::new(
            Arc::new(MockLlm::new("mock").with_text("ok")),
            policy(1, 1_000),
        );
        assert_eq!(model.generate(request()).await.expect("ok").content.text(), "ok");
    }
}
