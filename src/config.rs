use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;
use crate::error::PlannerError;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_APP_NAME: &str = "event_planner_app";

pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const GOOGLE_CLOUD_PROJECT_ID: &str = "GOOGLE_CLOUD_PROJECT_ID";
pub const GOOGLE_CLOUD_LOCATION: &str = "GOOGLE_CLOUD_LOCATION";
pub const GOOGLE_GENAI_USE_VERTEXAI: &str = "GOOGLE_GENAI_USE_VERTEXAI";
pub const GOOGLE_MAPS_API_KEY: &str = "GOOGLE_MAPS_API_KEY";

pub const REQUIRED_ENV_VARS: [&str; 4] = [
    GOOGLE_API_KEY,
    GOOGLE_CLOUD_PROJECT_ID,
    GOOGLE_CLOUD_LOCATION,
    GOOGLE_GENAI_USE_VERTEXAI,
];

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub model: String,
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub show_sensitive_config: bool,
    pub model_timeout_secs: u64,
    pub model_retry_attempts: u32,
    pub model_retry_delay_ms: u64,
    pub max_delegations: usize,
    pub max_agent_steps: usize,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub model: Option<String>,
    pub app_name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub model_timeout_secs: Option<u64>,
    pub model_retry_attempts: Option<u32>,
    pub model_retry_delay_ms: Option<u64>,
    pub max_delegations: Option<usize>,
    pub max_agent_steps: Option<usize>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check field names and value types.",
            path.display()
        )
    })
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        model: cli
            .model
            .clone()
            .or(profile.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        app_name: cli
            .app_name
            .clone()
            .or(profile.app_name)
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
        user_id: cli
            .user_id
            .clone()
            .or(profile.user_id)
            .unwrap_or_else(|| "local-user".to_string()),
        session_id: cli
            .session_id
            .clone()
            .or(profile.session_id)
            .unwrap_or_else(|| "default-session".to_string()),
        show_sensitive_config: cli.show_sensitive_config,
        model_timeout_secs: cli
            .model_timeout_secs
            .or(profile.model_timeout_secs)
            .unwrap_or(60)
            .max(1),
        model_retry_attempts: cli
            .model_retry_attempts
            .or(profile.model_retry_attempts)
            .unwrap_or(2)
            .max(1),
        model_retry_delay_ms: cli
            .model_retry_delay_ms
            .or(profile.model_retry_delay_ms)
            .unwrap_or(500),
        max_delegations: cli
            .max_delegations
            .or(profile.max_delegations)
            .unwrap_or(8)
            .max(1),
        max_agent_steps: cli
            .max_agent_steps
            .or(profile.max_agent_steps)
            .unwrap_or(12)
            .max(1),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".event-planner/telemetry/events.jsonl".to_string()),
    })
}

/// Model credentials, read once at process start.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub project_id: String,
    pub location: String,
    pub use_vertexai: bool,
    pub maps_api_key: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &"[REDACTED]")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("use_vertexai", &self.use_vertexai)
            .field("maps_api_key", &self.maps_api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProviderCredentials {
    /// Fails on the first required variable that is unset or blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Option<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &str| -> Result<String> {
            read(key).ok_or_else(|| PlannerError::MissingEnv(key.to_string()).into())
        };

        let api_key = require(GOOGLE_API_KEY)?;
        let project_id = require(GOOGLE_CLOUD_PROJECT_ID)?;
        let location = require(GOOGLE_CLOUD_LOCATION)?;
        let use_vertexai = parse_bool_flag(
            GOOGLE_GENAI_USE_VERTEXAI,
            &require(GOOGLE_GENAI_USE_VERTEXAI)?,
        )?;

        Ok(Self {
            api_key,
            project_id,
            location,
            use_vertexai,
            maps_api_key: read(GOOGLE_MAPS_API_KEY),
        })
    }
}

pub fn parse_bool_flag(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(PlannerError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }
        .into()),
    }
}
