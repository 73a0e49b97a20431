//! Failure classification.

use tracing::info;

use super::{Problem, ProblemKind, Severity};
use crate::outcome::Outcome;

/// Error kind substrings, checked in priority order.
const KIND_RULES: &[(&[&str], ProblemKind, Severity)] = &[
    (
        &["ImportError", "ModuleNotFoundError"],
        ProblemKind::ImportError,
        Severity::High,
    ),
    (&["AssertionError"], ProblemKind::AssertionError, Severity::Medium),
    (&["TimeoutError"], ProblemKind::TimeoutError, Severity::Medium),
];

/// Classify every failing outcome. Successful outcomes are skipped; order is kept.
pub fn detect(outcomes: &[Outcome]) -> Vec<Problem> {
    let problems: Vec<Problem> = outcomes
        .iter()
        .filter(|outcome| !outcome.success)
        .map(classify)
        .collect();
    info!(
        outcomes = outcomes.len(),
        problems = problems.len(),
        "problem detection finished"
    );
    problems
}

/// Classify a single failing outcome. Never fails: anything unrecognised is
/// an `unknown_failure`.
pub fn classify(outcome: &Outcome) -> Problem {
    let (kind, severity, description) = if outcome.has_error() {
        let error_kind = outcome.error_kind();
        let (kind, severity) = KIND_RULES
            .iter()
            .find(|(needles, _, _)| needles.iter().any(|needle| error_kind.contains(needle)))
            .map(|(_, kind, severity)| (*kind, *severity))
            .unwrap_or((ProblemKind::GeneralError, Severity::Medium));
        let label = match kind {
            ProblemKind::ImportError => "import error",
            ProblemKind::AssertionError => "assertion error",
            ProblemKind::TimeoutError => "timeout error",
            _ => "error",
        };
        (kind, severity, format!("{label}: {}", error_text(outcome)))
    } else if let Some(reason) = outcome.failure_reason() {
        (
            ProblemKind::TestFailure,
            Severity::Medium,
            format!("test failure: {reason}"),
        )
    } else {
        (
            ProblemKind::UnknownFailure,
            Severity::Low,
            "unknown failure cause".to_string(),
        )
    };

    Problem {
        problem_id: outcome.id.clone(),
        kind,
        severity,
        description,
        outcome: outcome.clone(),
    }
}

fn error_text(outcome: &Outcome) -> &str {
    let message = outcome.error_message();
    if message.is_empty() {
        outcome.error_kind()
    } else {
        message
    }
}
