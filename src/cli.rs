use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Subcommand)]
pub enum AgentCommands {
    #[command(about = "List the coordinator and its sub-agents")]
    List,
    #[command(about = "Show one agent's description, instruction, tools and output key")]
    Show {
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ToolCommands {
    #[command(about = "List the planning tools and their parameter schemas")]
    List,
    #[command(about = "Check venue availability on a date (mock booking system)")]
    CheckAvailability {
        #[arg(long)]
        venue: String,
        #[arg(long)]
        date: String,
    },
    #[command(about = "Create a mock budget spreadsheet from item=cost pairs")]
    Budget {
        #[arg(long = "item", required = true)]
        items: Vec<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize delegations, tool calls and failures from the telemetry file")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = crate::telemetry::DEFAULT_REPORT_LIMIT)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  event-planner ask \"Find a venue in Darwin for 500 guests\"\n\
  event-planner ask \"Plan a cultural festival for 10,000 people with a $100,000 budget, need venue, catering, budget, and a promo post\"\n\
  event-planner --session-id festival chat\n\
  event-planner agents list\n\
  event-planner agents show --name budget_agent\n\
  event-planner tools list\n\
  event-planner tools check-availability --venue \"Darwin Showgrounds\" --date 2025-06-14\n\
  event-planner tools budget --item Venue=40000 --item Catering=35000 --name \"Festival Budget\"\n\
  event-planner telemetry report --limit 2000\n\
  event-planner doctor\n\
\n\
Credentials:\n\
  GOOGLE_API_KEY, GOOGLE_CLOUD_PROJECT_ID, GOOGLE_CLOUD_LOCATION and GOOGLE_GENAI_USE_VERTEXAI\n\
  must be set for ask/chat. Tool and agent inspection commands run without them.";

#[derive(Debug, Parser)]
#[command(name = "event-planner")]
#[command(about = "Multi-agent event planning assistant")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "EVENT_PLANNER_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "EVENT_PLANNER_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "EVENT_PLANNER_CONFIG", default_value = ".event-planner/config.toml")]
    pub config_path: String,

    #[arg(long, env = "EVENT_PLANNER_APP_NAME")]
    pub app_name: Option<String>,

    #[arg(long, env = "EVENT_PLANNER_USER_ID")]
    pub user_id: Option<String>,

    #[arg(long, env = "EVENT_PLANNER_SESSION_ID")]
    pub session_id: Option<String>,

    #[arg(long, env = "EVENT_PLANNER_SHOW_SENSITIVE_CONFIG", default_value_t = false)]
    pub show_sensitive_config: bool,

    #[arg(long, env = "EVENT_PLANNER_MODEL_TIMEOUT_SECS")]
    pub model_timeout_secs: Option<u64>,

    #[arg(long, env = "EVENT_PLANNER_MODEL_RETRY_ATTEMPTS")]
    pub model_retry_attempts: Option<u32>,

    #[arg(long, env = "EVENT_PLANNER_MODEL_RETRY_DELAY_MS")]
    pub model_retry_delay_ms: Option<u64>,

    #[arg(long, env = "EVENT_PLANNER_MAX_DELEGATIONS")]
    pub max_delegations: Option<usize>,

    #[arg(long, env = "EVENT_PLANNER_MAX_AGENT_STEPS")]
    pub max_agent_steps: Option<usize>,

    #[arg(long, env = "EVENT_PLANNER_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "EVENT_PLANNER_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "error")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run a one-shot event planning request and print the final response")]
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    #[command(about = "Run interactive chat mode on one session")]
    Chat,
    #[command(about = "Inspect the agent tree")]
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    #[command(about = "Run the mock planning tools directly")]
    Tools {
        #[command(subcommand)]
        command: ToolCommands,
    },
    #[command(about = "Inspect recorded telemetry")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
    #[command(about = "Report credential presence and resolved runtime settings")]
    Doctor,
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Ask { .. } => "ask".to_string(),
        Commands::Chat => "chat".to_string(),
        Commands::Agents { command } => match command {
            AgentCommands::List => "agents.list".to_string(),
            AgentCommands::Show { .. } => "agents.show".to_string(),
        },
        Commands::Tools { command } => match command {
            ToolCommands::List => "tools.list".to_string(),
            ToolCommands::CheckAvailability { .. } => "tools.check-availability".to_string(),
            ToolCommands::Budget { .. } => "tools.budget".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
        Commands::Doctor => "doctor".to_string(),
    }
}

/// Parses a `name=cost` budget line from the command line.
pub fn parse_budget_item(raw: &str) -> Result<(String, f64)> {
    let (name, cost) = raw.rsplit_once('=').ok_or_else(|| {
        anyhow::anyhow!("invalid value '{raw}' for --item: expected name=cost")
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow::anyhow!(
            "invalid value '{raw}' for --item: item name cannot be empty"
        ));
    }
    let cost = cost.trim().parse::<f64>().map_err(|_| {
        anyhow::anyhow!("invalid value '{raw}' for --item: cost must be a number")
    })?;
    Ok((name.to_string(), cost))
}
