use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RuntimeConfig;

pub const DEFAULT_REPORT_LIMIT: usize = 5000;

pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// One JSONL line. Event-specific fields sit next to the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub ts_unix_ms: u64,
    pub event: String,
    pub run_id: String,
    pub command: String,
    pub session_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TelemetryRecord {
    fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Append-only JSONL sink for one CLI invocation. Write failures are logged,
/// never raised.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    enabled: bool,
    path: PathBuf,
    run_id: String,
    command: String,
    session_id: String,
    write_lock: Arc<Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        Self {
            enabled: cfg.telemetry_enabled,
            path: PathBuf::from(&cfg.telemetry_path),
            run_id: format!("run-{}-{}", unix_ms_now(), std::process::id()),
            command,
            session_id: cfg.session_id.clone(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Object payloads are merged into the record; anything else lands under
    /// `detail`.
    pub fn emit(&self, event: &str, payload: Value) {
        if !self.enabled {
            return;
        }

        let fields = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("detail".to_string(), other)]),
        };
        let record = TelemetryRecord {
            ts_unix_ms: unix_ms_now(),
            event: event.to_string(),
            run_id: self.run_id.clone(),
            command: self.command.clone(),
            session_id: self.session_id.clone(),
            fields,
        };

        if let Err(err) = self.append(&record) {
            tracing::warn!(
                event = event,
                path = %self.path.display(),
                error = %err,
                "telemetry write failed"
            );
        }
    }

    fn append(&self, record: &TelemetryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .with_context(|| format!("failed to serialize telemetry event '{}'", record.event))?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create telemetry directory '{}'", parent.display())
            })?;
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| {
                format!("failed to append to telemetry file '{}'", self.path.display())
            })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ToolTally {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// What past planner runs did, aggregated from the telemetry file.
#[derive(Debug, Default, Serialize)]
pub struct TelemetryReport {
    pub lines_read: usize,
    pub parse_errors: usize,
    pub run_ids: BTreeSet<String>,
    pub sessions: BTreeSet<String>,
    pub commands_completed: usize,
    pub commands_failed: usize,
    pub failure_categories: BTreeMap<String, usize>,
    pub delegations: BTreeMap<String, usize>,
    pub tools: BTreeMap<String, ToolTally>,
}

/// Folds the last `limit` lines into a report. Unparseable lines are counted,
/// not fatal.
pub fn summarize_lines<I>(lines: I, limit: usize) -> TelemetryReport
where
    I: IntoIterator<Item = String>,
{
    let lines = lines.into_iter().collect::<Vec<_>>();
    let skip = lines.len().saturating_sub(limit.max(1));
    let mut report = TelemetryReport::default();

    for line in lines.into_iter().skip(skip) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        report.lines_read += 1;

        let Ok(record) = serde_json::from_str::<TelemetryRecord>(line) else {
            report.parse_errors += 1;
            continue;
        };
        report.run_ids.insert(record.run_id.clone());
        if !record.session_id.is_empty() {
            report.sessions.insert(record.session_id.clone());
        }

        let tool = record.field("tool").map(str::to_string);
        match record.event.as_str() {
            "command.completed" => report.commands_completed += 1,
            "command.failed" => {
                report.commands_failed += 1;
                let category = record.field("category").unwrap_or("UNKNOWN");
                *report
                    .failure_categories
                    .entry(category.to_string())
                    .or_default() += 1;
            }
            "delegation.completed" => {
                if let Some(agent) = record.field("agent") {
                    *report.delegations.entry(agent.to_string()).or_default() += 1;
                }
            }
            "tool.requested" | "tool.succeeded" | "tool.failed" => {
                let Some(tool) = tool else { continue };
                let tally = report.tools.entry(tool).or_default();
                match record.event.as_str() {
                    "tool.requested" => tally.requested += 1,
                    "tool.succeeded" => tally.succeeded += 1,
                    _ => tally.failed += 1,
                }
            }
            _ => {}
        }
    }

    report
}

pub fn read_report(path: &str, limit: usize) -> Result<TelemetryReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read telemetry file '{path}'"))?;
    Ok(summarize_lines(raw.lines().map(str::to_string), limit))
}

pub fn print_report(report: &TelemetryReport, path: &str) {
    println!("Telemetry report: {path}");
    println!(
        "- lines: {} (unparseable: {})",
        report.lines_read, report.parse_errors
    );
    println!(
        "- runs: {} across {} session(s)",
        report.run_ids.len(),
        report.sessions.len()
    );
    println!(
        "- commands: {} completed, {} failed",
        report.commands_completed, report.commands_failed
    );
    for (category, count) in &report.failure_categories {
        println!("  - [{category}] x{count}");
    }

    if report.delegations.is_empty() {
        println!("- delegations: none");
    } else {
        println!("- delegations:");
        for (agent, count) in &report.delegations {
            println!("  - {agent}: {count}");
        }
    }

    if report.tools.is_empty() {
        println!("- tools: none");
    } else {
        println!("- tools:");
        for (tool, tally) in &report.tools {
            println!(
                "  - {tool}: requested={} succeeded={} failed={}",
                tally.requested, tally.succeeded, tally.failed
            );
        }
    }
}
