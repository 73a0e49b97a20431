//! Pipeline orchestration and report persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::fixer::{AutoFixer, CommandExecutor, SimulatedExecutor};
use super::validator::{CommandVerifier, FixValidator, SimulatedVerifier};
use super::{AppliedFix, FixSuggestion, Problem, ValidationResult, detect, generate};
use crate::config::{ExecutionMode, ProjectConfig};
use crate::outcome::Outcome;
use crate::paths::unique_file;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportCounts {
    pub outcomes: usize,
    pub problems: usize,
    pub fixes: usize,
    pub applied: usize,
    pub validated: usize,
    pub passed: usize,
}

/// Result of one pipeline run. Immutable once saved.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InterventionReport {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub success: bool,
    pub message: String,
    pub counts: ReportCounts,
    pub problems: Vec<Problem>,
    pub fixes: Vec<FixSuggestion>,
    pub applied_fixes: Vec<AppliedFix>,
    pub validation_results: Vec<ValidationResult>,
}

/// Sequences detect → generate → apply → validate.
#[derive(Default)]
pub struct InterventionEngine {
    fixer: AutoFixer,
    validator: FixValidator,
}

impl InterventionEngine {
    pub fn new(fixer: AutoFixer, validator: FixValidator) -> Self {
        Self { fixer, validator }
    }

    /// Build the engine with executors chosen by `[fixer]` and `[validator]`.
    /// Commands run from `root`.
    pub fn from_config(config: &ProjectConfig, root: &Path) -> Self {
        let fixer = match config.fixer.mode {
            ExecutionMode::Simulate => AutoFixer::new(Box::new(SimulatedExecutor)),
            ExecutionMode::Command => AutoFixer::new(Box::new(CommandExecutor::new(
                config.fixer.commands.clone(),
                root.to_path_buf(),
                Duration::from_secs(config.fixer.timeout_secs),
            ))),
        };
        let validator = match (config.validator.mode, &config.validator.command) {
            (ExecutionMode::Command, Some(template)) => {
                FixValidator::new(Box::new(CommandVerifier::new(
                    template.clone(),
                    root.to_path_buf(),
                    Duration::from_secs(config.validator.timeout_secs),
                )))
            }
            (ExecutionMode::Command, None) => {
                tracing::warn!("validator mode is 'command' but no command is set; simulating");
                FixValidator::new(Box::new(SimulatedVerifier))
            }
            (ExecutionMode::Simulate, _) => FixValidator::new(Box::new(SimulatedVerifier)),
        };
        Self::new(fixer, validator)
    }

    /// Run the pipeline over one outcome batch. No stage is retried.
    pub fn process(&self, outcomes: &[Outcome], auto_apply: bool) -> InterventionReport {
        info!(outcomes = outcomes.len(), auto_apply, "processing outcome batch");
        let mut counts = ReportCounts {
            outcomes: outcomes.len(),
            ..ReportCounts::default()
        };

        let problems = detect(outcomes);
        counts.problems = problems.len();
        if problems.is_empty() {
            return report(
                true,
                "no problems detected".to_string(),
                counts,
                problems,
                vec![],
                vec![],
                vec![],
            );
        }

        let fixes = generate(&problems);
        counts.fixes = fixes.len();
        if !auto_apply {
            return report(
                true,
                "fix suggestions generated, not applied".to_string(),
                counts,
                problems,
                fixes,
                vec![],
                vec![],
            );
        }

        let applied = self.fixer.apply(&fixes);
        counts.applied = applied.len();
        let validations = self.validator.validate(&applied);
        counts.validated = validations.len();
        counts.passed = validations.iter().filter(|v| v.success).count();

        let message = format!(
            "fixes applied and validated, {}/{} validations passed",
            counts.passed, counts.validated
        );
        let success = counts.passed == counts.validated;
        info!(success, passed = counts.passed, total = counts.validated, "pipeline finished");
        report(success, message, counts, problems, fixes, applied, validations)
    }
}

fn report(
    success: bool,
    message: String,
    counts: ReportCounts,
    problems: Vec<Problem>,
    fixes: Vec<FixSuggestion>,
    applied_fixes: Vec<AppliedFix>,
    validation_results: Vec<ValidationResult>,
) -> InterventionReport {
    InterventionReport {
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at: Utc::now(),
        success,
        message,
        counts,
        problems,
        fixes,
        applied_fixes,
        validation_results,
    }
}

/// Write `report` to `dir/intervention_report_<YYYYmmdd_HHMMSS>.json`.
pub fn save_report(report: &InterventionReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create report directory {}", dir.display()))?;
    let stem = format!("intervention_report_{}", Local::now().format("%Y%m%d_%H%M%S"));
    let path = unique_file(dir, &stem, "json");
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "intervention report saved");
    Ok(path)
}
