//! JSON request/response service over a line-oriented stream.
//!
//! Each input line is one request object `{"action": ..., "parameters": {...}}`
//! and produces exactly one response line. Responses always carry
//! `status` (`success`, `warning` or `error`); failures are reported in
//! `message` and never terminate the loop.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::git::{GitCli, Repository};
use crate::intervention::InterventionEngine;
use crate::monitor::{Lifecycle, Monitor};
use crate::outcome::Outcome;
use crate::scan::CodeScanner;

pub const CAPABILITIES: &[&str] = &[
    "git_checkin_reminder",
    "merge_conflict",
    "code_structure_issue",
    "banned_reference",
    "pr_review",
    "process_outcomes",
];

const DEFAULT_EVENT_LIMIT: usize = 10;
const ANALYZE_ISSUE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ApiResponse {
    fn new(status: ResponseStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            data: Map::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResponseStatus::Success, None)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Warning, Some(message.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Error, Some(message.into()))
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    GetCapabilities,
    GetStatus,
    StartMonitoring,
    StopMonitoring,
    GetEvents { limit: usize },
    AnalyzeRepo { repo_path: PathBuf },
    UpdateConfig { config: Map<String, Value> },
    ProcessOutcomes {
        outcomes: Vec<Outcome>,
        auto_apply: Option<bool>,
    },
}

#[derive(Deserialize)]
struct RawRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Deserialize)]
struct EventsParams {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct AnalyzeParams {
    #[serde(default)]
    repo_path: String,
}

#[derive(Deserialize)]
struct ConfigParams {
    #[serde(default)]
    config: Map<String, Value>,
}

#[derive(Deserialize)]
struct OutcomesParams {
    #[serde(default)]
    outcomes: Vec<Outcome>,
    #[serde(default)]
    auto_apply: Option<bool>,
}

impl ApiRequest {
    /// Decode a request object. The error is a caller-facing message.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let raw: RawRequest =
            serde_json::from_value(value).map_err(|e| format!("malformed request: {e}"))?;
        let params = if raw.parameters.is_null() {
            Value::Object(Map::new())
        } else {
            raw.parameters
        };
        let invalid = |e: serde_json::Error| format!("invalid parameters for {}: {e}", raw.action);

        match raw.action.as_str() {
            "get_capabilities" => Ok(ApiRequest::GetCapabilities),
            "get_status" => Ok(ApiRequest::GetStatus),
            "start_monitoring" => Ok(ApiRequest::StartMonitoring),
            "stop_monitoring" => Ok(ApiRequest::StopMonitoring),
            "get_events" => {
                let p: EventsParams = serde_json::from_value(params).map_err(invalid)?;
                Ok(ApiRequest::GetEvents {
                    limit: p.limit.unwrap_or(DEFAULT_EVENT_LIMIT),
                })
            }
            "analyze_repo" => {
                let p: AnalyzeParams = serde_json::from_value(params).map_err(invalid)?;
                if p.repo_path.trim().is_empty() {
                    return Err("missing parameter: repo_path".to_string());
                }
                Ok(ApiRequest::AnalyzeRepo {
                    repo_path: PathBuf::from(p.repo_path),
                })
            }
            "update_config" => {
                let p: ConfigParams = serde_json::from_value(params).map_err(invalid)?;
                if p.config.is_empty() {
                    return Err("missing parameter: config".to_string());
                }
                Ok(ApiRequest::UpdateConfig { config: p.config })
            }
            "process_outcomes" => {
                let p: OutcomesParams = serde_json::from_value(params).map_err(invalid)?;
                Ok(ApiRequest::ProcessOutcomes {
                    outcomes: p.outcomes,
                    auto_apply: p.auto_apply,
                })
            }
            "" => Err("missing action".to_string()),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Request handler bound to one monitored repository.
pub struct ApiService {
    monitor: Monitor,
    config: ProjectConfig,
    config_path: PathBuf,
}

impl ApiService {
    pub fn new(monitor: Monitor, config_path: PathBuf) -> Self {
        Self {
            config: monitor.config().clone(),
            monitor,
            config_path,
        }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Parse and handle one request line.
    pub fn handle_line(&mut self, line: &str) -> ApiResponse {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => self.handle_value(value),
            Err(e) => ApiResponse::error(format!("invalid JSON: {e}")),
        }
    }

    pub fn handle_value(&mut self, value: Value) -> ApiResponse {
        match ApiRequest::from_value(value) {
            Ok(request) => self.handle(request),
            Err(message) => ApiResponse::error(message),
        }
    }

    pub fn handle(&mut self, request: ApiRequest) -> ApiResponse {
        debug!(request = ?request, "api request");
        let result = match request {
            ApiRequest::GetCapabilities => {
                Ok(ApiResponse::success().with("capabilities", json!(CAPABILITIES)))
            }
            ApiRequest::GetStatus => Ok(self.status()),
            ApiRequest::StartMonitoring => self.start(),
            ApiRequest::StopMonitoring => Ok(self.stop()),
            ApiRequest::GetEvents { limit } => self.events(limit),
            ApiRequest::AnalyzeRepo { repo_path } => self.analyze(&repo_path),
            ApiRequest::UpdateConfig { config } => self.update_config(config),
            ApiRequest::ProcessOutcomes {
                outcomes,
                auto_apply,
            } => self.process_outcomes(&outcomes, auto_apply),
        };
        result.unwrap_or_else(|e| {
            warn!(error = %format!("{e:#}"), "api request failed");
            ApiResponse::error(format!("{e:#}"))
        })
    }

    fn status(&self) -> ApiResponse {
        let status = self.monitor.status();
        let mut by_type = Map::new();
        for event in self.monitor.events() {
            let entry = by_type
                .entry(event.intervention_type.to_string())
                .or_insert(json!(0));
            *entry = json!(entry.as_u64().unwrap_or(0) + 1);
        }
        ApiResponse::success()
            .with("is_monitoring", json!(status.running))
            .with("events_count", json!(status.total_events))
            .with("event_types", Value::Object(by_type))
            .with("monitor", json!(status))
            .with("last_check_time", json!(Utc::now().to_rfc3339()))
    }

    fn start(&mut self) -> Result<ApiResponse> {
        Ok(match self.monitor.start()? {
            Lifecycle::AlreadyRunning => ApiResponse::warning("monitoring is already running"),
            _ => ApiResponse::success().with_message("monitoring started"),
        })
    }

    fn stop(&mut self) -> ApiResponse {
        match self.monitor.stop() {
            Lifecycle::NotRunning => ApiResponse::warning("monitoring is not running"),
            Lifecycle::StopTimedOut => {
                ApiResponse::warning("monitor did not stop in time and was detached")
            }
            _ => ApiResponse::success().with_message("monitoring stopped"),
        }
    }

    fn events(&self, limit: usize) -> Result<ApiResponse> {
        let events = self.monitor.recent_events(limit);
        Ok(ApiResponse::success()
            .with("events_count", json!(self.monitor.events().len()))
            .with(
                "events",
                serde_json::to_value(events).context("failed to serialize events")?,
            ))
    }

    fn analyze(&self, repo_path: &Path) -> Result<ApiResponse> {
        if !repo_path.exists() {
            return Ok(ApiResponse::error(format!(
                "repository path does not exist: {}",
                repo_path.display()
            )));
        }
        let analysis = analyze_repository(repo_path, &self.config)?;
        Ok(ApiResponse::success()
            .with("repo_path", json!(repo_path))
            .with("git_status", analysis.git_status)
            .with("code_issues", analysis.code_issues))
    }

    fn update_config(&mut self, patch: Map<String, Value>) -> Result<ApiResponse> {
        let mut merged =
            serde_json::to_value(&self.config).context("failed to serialize config")?;
        merge_json(&mut merged, Value::Object(patch));
        let updated: ProjectConfig =
            serde_json::from_value(merged).context("invalid configuration")?;
        updated.validate()?;
        updated.save(&self.config_path)?;
        info!(path = %self.config_path.display(), "configuration updated");

        let config = serde_json::to_value(&updated).context("failed to serialize config")?;
        let applied = self.monitor.reconfigure(updated.clone())?;
        self.config = updated;
        let mut response = ApiResponse::success()
            .with_message("configuration updated")
            .with("config", config)
            .with("config_path", json!(self.config_path));
        if !applied {
            response = response.with(
                "note",
                json!("monitor settings apply after the monitor is restarted"),
            );
        }
        Ok(response)
    }

    fn process_outcomes(
        &self,
        outcomes: &[Outcome],
        auto_apply: Option<bool>,
    ) -> Result<ApiResponse> {
        let engine = InterventionEngine::from_config(&self.config, self.monitor.root());
        let auto_apply = auto_apply.unwrap_or(self.config.pipeline.auto_apply);
        let report = engine.process(outcomes, auto_apply);
        let status = if report.success {
            ApiResponse::success()
        } else {
            ApiResponse::warning(report.message.clone())
        };
        Ok(status.with(
            "report",
            serde_json::to_value(&report).context("failed to serialize report")?,
        ))
    }

    pub fn shutdown(&mut self) {
        if self.monitor.is_running() {
            self.monitor.stop();
        }
    }
}

/// Snapshot of a repository's git state and scan findings.
pub struct RepoAnalysis {
    pub git_status: Value,
    pub code_issues: Value,
}

pub fn analyze_repository(path: &Path, config: &ProjectConfig) -> Result<RepoAnalysis> {
    let repo = GitCli::discover(path, config.git.command_timeout())?;
    let changes = repo.uncommitted_changes()?;
    let last_commit = repo.last_commit_time()?;
    let conflicts = repo.conflict_files()?;
    let issues = CodeScanner::from_config(config)?.scan(repo.work_dir());
    let shown: Vec<_> = issues.iter().take(ANALYZE_ISSUE_LIMIT).collect();

    Ok(RepoAnalysis {
        git_status: json!({
            "uncommitted_count": changes.len(),
            "uncommitted_changes": changes,
            "last_commit_time": last_commit.map(|t| t.to_rfc3339()),
            "has_conflicts": !conflicts.is_empty(),
            "conflict_count": conflicts.len(),
            "conflict_files": conflicts,
        }),
        code_issues: json!({
            "issues_count": issues.len(),
            "issues": shown,
        }),
    })
}

/// Objects merge key by key; anything else replaces.
fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Serve requests from `input` until end of stream.
pub fn serve(service: &mut ApiService, input: impl BufRead, mut output: impl Write) -> Result<()> {
    info!(repo = %service.monitor().root().display(), "serving requests");
    for line in input.lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = service.handle_line(&line);
        let json = serde_json::to_string(&response).context("failed to serialize response")?;
        writeln!(output, "{json}").context("failed to write response")?;
        output.flush().context("failed to flush response")?;
    }
    service.shutdown();
    debug!("request stream closed");
    Ok(())
}
