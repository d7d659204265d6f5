use std::io::{self, Write};

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::error::format_cli_error;
use crate::runner::Runner;
use crate::session::{GetRequest, ListRequest};
use crate::streaming::run_prompt;
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Exit,
    Status,
    Help,
    State,
    Agents,
    Sessions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    UnknownCommand(String),
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        return ParsedChatCommand::Command(ChatCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    let slashless = trimmed.trim_start_matches('/');
    if slashless.is_empty() {
        return ParsedChatCommand::UnknownCommand("/".to_string());
    }

    let command = slashless
        .split_whitespace()
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match command.as_str() {
        "exit" | "quit" => ParsedChatCommand::Command(ChatCommand::Exit),
        "status" => ParsedChatCommand::Command(ChatCommand::Status),
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "state" => ParsedChatCommand::Command(ChatCommand::State),
        "agents" => ParsedChatCommand::Command(ChatCommand::Agents),
        "sessions" => ParsedChatCommand::Command(ChatCommand::Sessions),
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

pub fn print_chat_help() {
    println!("Chat commands:");
    println!("- /help: show command quick reference");
    println!("- /status: show profile, model and session");
    println!("- /state: show what the agents have recorded in this session");
    println!("- /agents: list the coordinator and its sub-agents");
    println!("- /sessions: list sessions held by this process");
    println!("- /exit: end interactive chat");
}

pub(crate) fn status_line(
    runner: &Runner,
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    turns: usize,
) -> String {
    let telemetry_target = if telemetry.is_enabled() {
        telemetry.path().display().to_string()
    } else {
        "off".to_string()
    };
    format!(
        "profile={} model={} app={} user={} session_id={} turns={} run_id={} telemetry={}",
        cfg.profile,
        cfg.model,
        runner.app_name(),
        cfg.user_id,
        cfg.session_id,
        turns,
        telemetry.run_id(),
        telemetry_target
    )
}

async fn print_session_state(runner: &Runner, cfg: &RuntimeConfig) -> Result<()> {
    let session = runner
        .session_service()
        .get(GetRequest {
            app_name: cfg.app_name.clone(),
            user_id: cfg.user_id.clone(),
            session_id: cfg.session_id.clone(),
            num_recent_events: Some(0),
        })
        .await?;
    if session.state.is_empty() {
        println!("Session state is empty.");
        return Ok(());
    }
    for (key, value) in &session.state {
        let rendered = value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string());
        println!("[{key}]\n{rendered}\n");
    }
    Ok(())
}

async fn print_sessions(runner: &Runner, cfg: &RuntimeConfig) -> Result<()> {
    let sessions = runner
        .session_service()
        .list(ListRequest {
            app_name: cfg.app_name.clone(),
            user_id: cfg.user_id.clone(),
        })
        .await?;
    for session in sessions {
        let marker = if session.id == cfg.session_id { "*" } else { " " };
        println!(
            "{marker} {} events={} keys={}",
            session.id,
            session.events.len(),
            session.state.len()
        );
    }
    Ok(())
}

pub async fn run_chat(
    runner: &Runner,
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
) -> Result<()> {
    println!(
        "Interactive mode started on session '{}'. Type /help for commands, /exit to quit.",
        cfg.session_id
    );
    let stdin = io::stdin();
    let mut line = String::new();
    let mut turns = 0usize;

    loop {
        print!("planner> ");
        io::stdout().flush().context("failed to flush stdout")?;
        line.clear();
        let read = stdin
            .read_line(&mut line)
            .context("failed to read input from stdin")?;
        if read == 0 {
            println!();
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match parse_chat_command(input) {
            ParsedChatCommand::Command(ChatCommand::Exit) => break,
            ParsedChatCommand::Command(ChatCommand::Help) => {
                print_chat_help();
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Status) => {
                println!("{}", status_line(runner, cfg, telemetry, turns));
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::State) => {
                if let Err(err) = print_session_state(runner, cfg).await {
                    eprintln!("{}", format_cli_error(&err, cfg.show_sensitive_config));
                }
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Agents) => {
                for descriptor in runner.agent().descriptors() {
                    println!("- {}: {}", descriptor.name, descriptor.description);
                }
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Sessions) => {
                if let Err(err) = print_sessions(runner, cfg).await {
                    eprintln!("{}", format_cli_error(&err, cfg.show_sensitive_config));
                }
                continue;
            }
            ParsedChatCommand::UnknownCommand(command) => {
                println!("Unknown command '{command}'. Type /help for the list.");
                continue;
            }
            ParsedChatCommand::NotACommand => {}
        }

        turns += 1;
        telemetry.emit("chat.turn.started", json!({ "turn": turns }));
        match run_prompt(runner, cfg, input, telemetry).await {
            Ok(answer) => {
                println!("{answer}\n");
                telemetry.emit(
                    "chat.turn.completed",
                    json!({ "turn": turns, "response_chars": answer.len() }),
                );
            }
            Err(err) => {
                eprintln!("{}", format_cli_error(&err, cfg.show_sensitive_config));
                telemetry.emit(
                    "chat.turn.failed",
                    json!({ "turn": turns, "error": format!("{err:#}") }),
                );
            }
        }
    }

    println!("Chat ended after {turns} turn(s).");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_and_unknown_commands() {
        assert_eq!(parse_chat_command(" /Exit "), ParsedChatCommand::Command(ChatCommand::Exit));
        assert_eq!(parse_chat_command("quit"), ParsedChatCommand::Command(ChatCommand::Exit));
        assert_eq!(parse_chat_command("/state"), ParsedChatCommand::Command(ChatCommand::State));
        assert_eq!(
            parse_chat_command("/SESSIONS"),
            ParsedChatCommand::Command(ChatCommand::Sessions)
        );
        assert_eq!(
            parse_chat_command("/venues please"),
            ParsedChatCommand::UnknownCommand("/venues".to_string())
        );
        assert_eq!(parse_chat_command("/"), ParsedChatCommand::UnknownCommand("/".to_string()));
        assert_eq!(
            parse_chat_command("Find a venue in Darwin"),
            ParsedChatCommand::NotACommand
        );
    }
}
