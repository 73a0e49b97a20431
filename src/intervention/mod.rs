//! Closed-loop test failure intervention.
//!
//! ```text
//! outcomes ─► detect ─► generate ─► [apply ─► validate] ─► InterventionReport
//! ```
//!
//! Each stage is a 1:1 (or, for generation, 1:≤1) mapping over the previous
//! stage's records, and every downstream record embeds the record it was
//! derived from so a report can be read without cross-referencing.

pub mod detector;
pub mod engine;
pub mod fixer;
pub mod generator;
pub mod validator;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outcome::Outcome;
use crate::process::ProcessError;

pub use detector::detect;
pub use engine::{InterventionEngine, InterventionReport};
pub use fixer::{ActionExecutor, AutoFixer, CommandExecutor, SimulatedExecutor};
pub use generator::generate;
pub use validator::{CommandVerifier, FixValidator, SimulatedVerifier, Verifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    ImportError,
    AssertionError,
    TimeoutError,
    TestFailure,
    GeneralError,
    UnknownFailure,
}

impl ProblemKind {
    pub const ALL: [ProblemKind; 6] = [
        ProblemKind::ImportError,
        ProblemKind::AssertionError,
        ProblemKind::TimeoutError,
        ProblemKind::TestFailure,
        ProblemKind::GeneralError,
        ProblemKind::UnknownFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProblemKind::ImportError => "import_error",
            ProblemKind::AssertionError => "assertion_error",
            ProblemKind::TimeoutError => "timeout_error",
            ProblemKind::TestFailure => "test_failure",
            ProblemKind::GeneralError => "general_error",
            ProblemKind::UnknownFailure => "unknown_failure",
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A classified failure. Exactly one per failing outcome.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Problem {
    /// Id of the originating outcome.
    pub problem_id: String,
    pub kind: ProblemKind,
    pub severity: Severity,
    pub description: String,
    pub outcome: Outcome,
}

/// Remediation step kinds a fix can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    InstallDependency,
    UpdateImportPath,
    CheckImportHelpers,
    UpdateExpectedValue,
    CheckTestLogic,
    IncreaseTimeout,
    OptimizeTest,
    AnalyzeFailure,
    UpdateTestCase,
}

impl ActionType {
    /// Key used for `[fixer.commands]` lookups.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::InstallDependency => "install_dependency",
            ActionType::UpdateImportPath => "update_import_path",
            ActionType::CheckImportHelpers => "check_import_helpers",
            ActionType::UpdateExpectedValue => "update_expected_value",
            ActionType::CheckTestLogic => "check_test_logic",
            ActionType::IncreaseTimeout => "increase_timeout",
            ActionType::OptimizeTest => "optimize_test",
            ActionType::AnalyzeFailure => "analyze_failure",
            ActionType::UpdateTestCase => "update_test_case",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FixAction {
    pub action_type: ActionType,
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl FixAction {
    pub fn new(action_type: ActionType, description: &str) -> Self {
        Self {
            action_type,
            description: description.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }
}

/// Proposed remediation for one problem.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FixSuggestion {
    pub problem_id: String,
    pub kind: ProblemKind,
    pub description: String,
    pub actions: Vec<FixAction>,
    pub problem: Problem,
}

/// What happened when one action of a fix ran.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActionResult {
    pub action_type: ActionType,
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppliedFix {
    pub fix_id: String,
    pub success: bool,
    pub description: String,
    #[serde(default)]
    pub actions: Vec<ActionResult>,
    pub fix: FixSuggestion,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ValidationResult {
    pub validation_id: String,
    pub success: bool,
    pub description: String,
    pub applied: AppliedFix,
}

/// Failure of a single fix action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{action} exited with status {code}: {detail}")]
    Failed {
        action: ActionType,
        code: i32,
        detail: String,
    },
    #[error("command template for {action} references unknown parameter '{name}'")]
    MissingParameter { action: ActionType, name: String },
}
