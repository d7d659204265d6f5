use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use event_planner::agents::catalog::{build_event_planner, event_planner_descriptors};
use event_planner::agents::coordinator::validate_tree;
use event_planner::agents::{run_agents_list, run_agents_show};
use event_planner::chat::run_chat;
use event_planner::cli::{
    AgentCommands, Cli, Commands, TelemetryCommands, ToolCommands, command_label,
    parse_budget_item,
};
use event_planner::config::{
    ProviderCredentials, RuntimeConfig, load_profiles, resolve_runtime_config,
};
use event_planner::doctor::run_doctor;
use event_planner::error::{categorize_error, format_cli_error, render_error_message};
use event_planner::provider::resolve_model;
use event_planner::runner::{Runner, build_runner};
use event_planner::session::build_session_service;
use event_planner::streaming::run_prompt;
use event_planner::telemetry::{TelemetrySink, print_report, read_report};
use event_planner::tools::budget::create_budget_and_fill_sheet;
use event_planner::tools::build_event_tools;
use event_planner::tools::venue::check_availability;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let show_sensitive_config = cli.show_sensitive_config;
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err, show_sensitive_config));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;

    let telemetry = TelemetrySink::new(&cfg, command_label(&cli.command));
    telemetry.emit(
        "command.started",
        json!({ "profile": cfg.profile, "model": cfg.model }),
    );
    let started = Instant::now();

    let result = dispatch(cli.command, &cfg, &telemetry).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => telemetry.emit("command.completed", json!({ "duration_ms": duration_ms })),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({
                "duration_ms": duration_ms,
                "category": categorize_error(err).code(),
                "error": render_error_message(err, cfg.show_sensitive_config),
            }),
        ),
    }
    result
}

async fn dispatch(command: Commands, cfg: &RuntimeConfig, telemetry: &TelemetrySink) -> Result<()> {
    match command {
        Commands::Ask { prompt } => {
            let runner = build_planner_runner(cfg, telemetry).await?;
            let prompt = prompt.join(" ");
            let answer = run_prompt(&runner, cfg, &prompt, telemetry).await?;
            println!("{answer}");
        }
        Commands::Chat => {
            let runner = build_planner_runner(cfg, telemetry).await?;
            run_chat(&runner, cfg, telemetry).await?;
        }
        Commands::Agents { command } => {
            let (root, children) = event_planner_descriptors(cfg.max_agent_steps)?;
            validate_tree(&root, &children)?;
            match command {
                AgentCommands::List => run_agents_list(&root, &children)?,
                AgentCommands::Show { name } => run_agents_show(&root, &children, name)?,
            }
        }
        Commands::Tools { command } => match command {
            ToolCommands::List => {
                let declarations = build_event_tools()
                    .iter()
                    .map(|tool| tool.declaration())
                    .collect::<Vec<_>>();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&declarations)
                        .context("failed to render tool declarations")?
                );
            }
            ToolCommands::CheckAvailability { venue, date } => {
                let report = check_availability(&venue, &date);
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .context("failed to render availability report")?
                );
            }
            ToolCommands::Budget { items, name } => {
                let mut budget_data = BTreeMap::new();
                for raw in &items {
                    let (item, cost) = parse_budget_item(raw)?;
                    *budget_data.entry(item).or_insert(0.0) += cost;
                }
                let sheet = create_budget_and_fill_sheet(&budget_data, name.as_deref());
                println!(
                    "{}",
                    serde_json::to_string_pretty(&sheet)
                        .context("failed to render budget sheet")?
                );
            }
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => {
                let path = path.unwrap_or_else(|| cfg.telemetry_path.clone());
                let report = read_report(&path, limit)?;
                print_report(&report, &path);
            }
        },
        Commands::Doctor => run_doctor(cfg, env_var)?,
    }
    Ok(())
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Credentials are read here, once, before any agent exists. A missing value
/// stops the command.
async fn build_planner_runner(cfg: &RuntimeConfig, telemetry: &TelemetrySink) -> Result<Runner> {
    let credentials = ProviderCredentials::from_lookup(env_var)?;
    let model = resolve_model(cfg, &credentials)?;
    telemetry.emit(
        "model.resolved",
        json!({
            "provider": "gemini",
            "model": cfg.model,
            "vertexai": credentials.use_vertexai,
        }),
    );
    let agent = build_event_planner(model, cfg)?;
    build_runner(agent, cfg, build_session_service()).await
}

fn init_tracing(log_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
