use anyhow::Result;

use crate::agents::catalog::event_planner_descriptors;
use crate::agents::coordinator::validate_tree;
use crate::config::{GOOGLE_MAPS_API_KEY, ProviderCredentials, REQUIRED_ENV_VARS, RuntimeConfig};
use crate::error::format_cli_error;
use crate::provider::{gemini_endpoint, validate_model_name};

/// `(variable, present, required)` for every credential the planner reads.
pub fn credential_checks<F>(present: F) -> Vec<(&'static str, bool, bool)>
where
    F: Fn(&str) -> bool,
{
    REQUIRED_ENV_VARS
        .iter()
        .map(|key| (*key, present(key), true))
        .chain(std::iter::once((
            GOOGLE_MAPS_API_KEY,
            present(GOOGLE_MAPS_API_KEY),
            false,
        )))
        .collect()
}

/// `lookup` is the process environment in `main` and a fixture in tests.
pub fn run_doctor<F>(cfg: &RuntimeConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    println!("Credential environment check:");
    let present = |key: &str| lookup(key).is_some_and(|value| !value.trim().is_empty());
    for (key, ok, required) in credential_checks(present) {
        let status = match (ok, required) {
            (true, _) => "set",
            (false, true) => "missing (required for ask/chat)",
            (false, false) => "missing (optional)",
        };
        println!("- {key}: {status}");
    }

    match ProviderCredentials::from_lookup(&lookup) {
        Ok(credentials) => {
            let mode = if credentials.use_vertexai {
                "vertex-ai"
            } else {
                "generative-language"
            };
            println!(
                "Provider: gemini ({mode}) endpoint={}",
                gemini_endpoint(&credentials, &cfg.model)
            );
        }
        Err(err) => {
            println!("Provider: not ready");
            println!("{}", format_cli_error(&err, cfg.show_sensitive_config));
        }
    }

    match validate_model_name(&cfg.model) {
        Ok(()) => println!("Model: {}", cfg.model),
        Err(err) => println!("Model: {} (invalid: {err})", cfg.model),
    }
    println!(
        "Session: memory (app: {}, user: {}, session_id: {})",
        cfg.app_name, cfg.user_id, cfg.session_id
    );
    println!(
        "Model calls: timeout_secs={}, attempts={}, retry_delay_ms={}",
        cfg.model_timeout_secs, cfg.model_retry_attempts, cfg.model_retry_delay_ms
    );
    println!(
        "Delegation: max_delegations={}, max_agent_steps={}",
        cfg.max_delegations, cfg.max_agent_steps
    );
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );

    let (root, children) = event_planner_descriptors(cfg.max_agent_steps)?;
    validate_tree(&root, &children)?;
    println!(
        "Agent tree: ok ({} with {} sub-agents)",
        root.name,
        children.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_checks_mark_required_and_optional() {
        let checks = credential_checks(|key| key == "GOOGLE_API_KEY");
        assert_eq!(checks.len(), 5);
        assert_eq!(checks[0], ("GOOGLE_API_KEY", true, true));
        assert!(checks[1..4].iter().all(|(_, ok, required)| !ok && *required));
        assert_eq!(checks[4], (GOOGLE_MAPS_API_KEY, false, false));
    }

    fn doctor_cfg() -> RuntimeConfig {
        RuntimeConfig {
            profile: "default".to_string(),
            config_path: ".event-planner/config.toml".to_string(),
            model: "gemini-2.0-flash".to_string(),
            app_name: "event_planner_app".to_string(),
            user_id: "local-user".to_string(),
            session_id: "default-session".to_string(),
            show_sensitive_config: false,
            model_timeout_secs: 60,
            model_retry_attempts: 2,
            model_retry_delay_ms: 500,
            max_delegations: 8,
            max_agent_steps: 12,
            telemetry_enabled: false,
            telemetry_path: ".event-planner/telemetry/events.jsonl".to_string(),
        }
    }

    #[test]
    fn doctor_reports_without_touching_the_process_environment() {
        run_doctor(&doctor_cfg(), |_| None).expect("missing credentials are reported, not fatal");

        let env = std::collections::HashMap::from([
            ("GOOGLE_API_KEY", "k"),
            ("GOOGLE_CLOUD_PROJECT_ID", "p"),
            ("GOOGLE_CLOUD_LOCATION", "us-central1"),
            ("GOOGLE_GENAI_USE_VERTEXAI", "false"),
        ]);
        run_doctor(&doctor_cfg(), |key| env.get(key).map(|v| v.to_string()))
            .expect("complete credentials");
    }
}
