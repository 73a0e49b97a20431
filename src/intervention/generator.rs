//! Fix proposal per problem kind.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use super::{ActionType, FixAction, FixSuggestion, Problem, ProblemKind};

static MISSING_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"No module named ['"]([^'"]+)['"]"#).unwrap());

/// Propose a fix for every problem with a known remediation. Problems with no
/// generator are dropped; order is kept.
pub fn generate(problems: &[Problem]) -> Vec<FixSuggestion> {
    let fixes: Vec<FixSuggestion> = problems.iter().filter_map(suggest).collect();
    info!(
        problems = problems.len(),
        fixes = fixes.len(),
        "fix generation finished"
    );
    fixes
}

pub fn suggest(problem: &Problem) -> Option<FixSuggestion> {
    let (description, actions) = match problem.kind {
        ProblemKind::ImportError => import_fix(problem),
        ProblemKind::AssertionError => (
            "fix assertion error".to_string(),
            vec![
                FixAction::new(
                    ActionType::UpdateExpectedValue,
                    "update the expected value to match the actual result",
                ),
                FixAction::new(ActionType::CheckTestLogic, "check the test logic"),
            ],
        ),
        ProblemKind::TimeoutError => (
            "fix timeout error".to_string(),
            vec![
                FixAction::new(ActionType::IncreaseTimeout, "increase the timeout"),
                FixAction::new(ActionType::OptimizeTest, "optimize test performance"),
            ],
        ),
        ProblemKind::TestFailure => (
            "fix test failure".to_string(),
            vec![
                FixAction::new(ActionType::AnalyzeFailure, "analyze the failure cause"),
                FixAction::new(ActionType::UpdateTestCase, "update the test case"),
            ],
        ),
        ProblemKind::GeneralError | ProblemKind::UnknownFailure => {
            warn!(
                problem = %problem.problem_id,
                kind = %problem.kind,
                "no fix generator for problem kind"
            );
            return None;
        }
    };

    let actions = actions
        .into_iter()
        .map(|action| action.with_param("test_id", &problem.problem_id))
        .collect();

    Some(FixSuggestion {
        problem_id: problem.problem_id.clone(),
        kind: problem.kind,
        description,
        actions,
        problem: problem.clone(),
    })
}

/// Module name from a `No module named 'x'` message.
pub fn missing_module(message: &str) -> Option<&str> {
    MISSING_MODULE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn import_fix(problem: &Problem) -> (String, Vec<FixAction>) {
    match missing_module(problem.outcome.error_message()) {
        Some(module) => (
            format!("fix import error: {module}"),
            vec![
                FixAction::new(ActionType::InstallDependency, "install the missing dependency")
                    .with_param("module_name", module),
                FixAction::new(ActionType::UpdateImportPath, "update the import path")
                    .with_param("module_name", module),
            ],
        ),
        None => (
            "fix import error".to_string(),
            vec![FixAction::new(
                ActionType::CheckImportHelpers,
                "check and use the import helper modules",
            )],
        ),
    }
}
