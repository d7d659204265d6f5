use thiserror::Error;

/// Conditions callers match on. They travel inside `anyhow::Error` and are
/// recovered with `downcast_ref`.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("required environment variable {0} is not set")]
    MissingEnv(String),
    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: String, value: String },
    #[error("no final response was produced for session '{session_id}'")]
    NoFinalResponse { session_id: String },
    #[error("agent name '{0}' is used more than once in the agent tree")]
    DuplicateAgentName(String),
    #[error("output key '{key}' is used by more than one sub-agent of '{parent}'")]
    DuplicateOutputKey { parent: String, key: String },
    #[error("invalid budget data: {0}")]
    InvalidBudgetData(String),
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidToolArgs { tool: String, reason: String },
    #[error("session '{session_id}' not found for app '{app_name}' and user '{user_id}'")]
    SessionNotFound {
        app_name: String,
        user_id: String,
        session_id: String,
    },
    #[error("agent '{agent}' exceeded its limit of {limit} model steps")]
    AgentStepLimit { agent: String, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Provider,
    Session,
    Tooling,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Session => "SESSION",
            ErrorCategory::Tooling => "TOOLING",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Config => {
                "Export GOOGLE_API_KEY, GOOGLE_CLOUD_PROJECT_ID, GOOGLE_CLOUD_LOCATION and \
                 GOOGLE_GENAI_USE_VERTEXAI, then run event-planner doctor."
            }
            ErrorCategory::Provider => {
                "Check the model id (gemini-*) and network access, or retry with RUST_LOG=info."
            }
            ErrorCategory::Session => {
                "Sessions live in process memory only. Check --app-name/--user-id/--session-id."
            }
            ErrorCategory::Tooling => {
                "Review tool arguments and retry with RUST_LOG=info for detailed tool logs."
            }
            ErrorCategory::Input => "Run event-planner --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(planner) = err.chain().find_map(|cause| cause.downcast_ref::<PlannerError>()) {
        return match planner {
            PlannerError::MissingEnv(_) | PlannerError::InvalidEnv { .. } => {
                ErrorCategory::Config
            }
            PlannerError::NoFinalResponse { .. } | PlannerError::AgentStepLimit { .. } => {
                ErrorCategory::Provider
            }
            PlannerError::DuplicateAgentName(_) | PlannerError::DuplicateOutputKey { .. } => {
                ErrorCategory::Internal
            }
            PlannerError::InvalidBudgetData(_) | PlannerError::InvalidToolArgs { .. } => {
                ErrorCategory::Tooling
            }
            PlannerError::SessionNotFound { .. } => ErrorCategory::Session,
        };
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("profile") || msg.contains("invalid value") || msg.contains("expected") {
        return ErrorCategory::Input;
    }

    if msg.contains("model") || msg.contains("gemini") || msg.contains("provider") {
        return ErrorCategory::Provider;
    }

    if msg.contains("session") {
        return ErrorCategory::Session;
    }

    if msg.contains("tool") {
        return ErrorCategory::Tooling;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let category = categorize_error(err);
    let rendered_error = render_error_message(err, show_sensitive_config);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        rendered_error,
        category.hint()
    )
}

pub fn render_error_message(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let text = format!("{err:#}");
    if show_sensitive_config {
        text
    } else {
        redact_sensitive_text(&text)
    }
}

pub fn redact_sensitive_text(text: &str) -> String {
    let redacted = redact_after_marker(text, "key=");
    redact_after_marker(&redacted, "x-goog-api-key: ")
}

/// Replaces the value following every occurrence of `marker`, up to the next
/// delimiter, with `[REDACTED]`.
pub fn redact_after_marker(text: &str, marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some(offset) = text[cursor..].find(marker) {
        let value_start = cursor + offset + marker.len();
        out.push_str(&text[cursor..value_start]);

        let remainder = &text[value_start..];
        let end = remainder
            .find(|ch: char| {
                ch.is_whitespace()
                    || matches!(ch, '&' | '"' | '\'' | ')' | ']' | '}' | ',' | ';')
            })
            .unwrap_or(remainder.len());
        if end > 0 {
            out.push_str("[REDACTED]");
        }
        cursor = value_start + end;
    }

    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_key_query_parameters() {
        let text = "request to https://example.test/v1?key=abc123&alt=json failed";
        assert_eq!(
            redact_sensitive_text(text),
            "request to https://example.test/v1?key=[REDACTED]&alt=json failed"
        );
    }

    #[test]
    fn typed_errors_map_to_categories() {
        let missing = anyhow::Error::new(PlannerError::MissingEnv("GOOGLE_API_KEY".to_string()));
        assert_eq!(categorize_error(&missing), ErrorCategory::Config);

        let wrapped = anyhow::Error::new(PlannerError::InvalidBudgetData("x".to_string()))
            .context("budget tool failed");
        assert_eq!(categorize_error(&wrapped), ErrorCategory::Tooling);

        let rendered = format_cli_error(&missing, false);
        assert!(rendered.starts_with("[CONFIG]"));
        assert!(rendered.contains("Hint:"));
    }
}
