//! Post-apply verification.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{AppliedFix, ValidationResult};
use crate::process::{run_with_timeout, shell, shell_quote};

/// Outcome of re-checking one applied fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub detail: String,
}

/// Re-checks an applied fix. An `Err` means the check itself could not run.
pub trait Verifier: Send {
    fn verify(&self, applied: &AppliedFix) -> Result<Verdict>;
}

/// Accepts every applied fix.
#[derive(Debug, Default, Clone)]
pub struct SimulatedVerifier;

impl Verifier for SimulatedVerifier {
    fn verify(&self, _applied: &AppliedFix) -> Result<Verdict> {
        Ok(Verdict {
            passed: true,
            detail: "simulated check".to_string(),
        })
    }
}

/// Re-runs the originating test through a command template such as
/// `python -m pytest {test_id}`. Exit status 0 passes.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    template: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(template: String, work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            template,
            work_dir,
            timeout,
        }
    }

    pub fn command_for(&self, test_id: &str) -> String {
        self.template.replace("{test_id}", &shell_quote(test_id))
    }
}

impl Verifier for CommandVerifier {
    fn verify(&self, applied: &AppliedFix) -> Result<Verdict> {
        let command = self.command_for(&applied.fix.problem.outcome.id);
        let mut cmd = shell(&command);
        cmd.current_dir(&self.work_dir);
        let output = run_with_timeout(&mut cmd, self.timeout)
            .with_context(|| format!("verification command failed to run: {command}"))?;
        let detail = if output.success() {
            format!("`{command}` passed")
        } else {
            format!(
                "`{command}` exited with {}: {}",
                output.status.code().unwrap_or(-1),
                last_line(&output.error_text())
            )
        };
        Ok(Verdict {
            passed: output.success(),
            detail,
        })
    }
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("")
}

pub struct FixValidator {
    verifier: Box<dyn Verifier>,
}

impl Default for FixValidator {
    fn default() -> Self {
        Self::new(Box::new(SimulatedVerifier))
    }
}

impl FixValidator {
    pub fn new(verifier: Box<dyn Verifier>) -> Self {
        Self { verifier }
    }

    /// Validate each applied fix in order. One result per input.
    pub fn validate(&self, applied: &[AppliedFix]) -> Vec<ValidationResult> {
        let results: Vec<ValidationResult> =
            applied.iter().map(|fix| self.validate_one(fix)).collect();
        info!(validated = results.len(), "fix validation finished");
        results
    }

    pub fn validate_one(&self, applied: &AppliedFix) -> ValidationResult {
        let (success, description) = if !applied.success {
            (false, format!("not validated, fix was not applied: {}", applied.description))
        } else {
            match self.verifier.verify(applied) {
                Ok(verdict) if verdict.passed => {
                    (true, format!("validation passed: {}", verdict.detail))
                }
                Ok(verdict) => (false, format!("validation failed: {}", verdict.detail)),
                Err(e) => (false, format!("validation error: {e:#}")),
            }
        };
        if success {
            info!(fix = %applied.fix_id, "{description}");
        } else {
            warn!(fix = %applied.fix_id, "{description}");
        }
        ValidationResult {
            validation_id: applied.fix_id.clone(),
            success,
            description,
            applied: applied.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervention::detector::classify;
    use crate::intervention::fixer::AutoFixer;
    use crate::intervention::generator::suggest;
    use crate::outcome::Outcome;

    fn applied(id: &str) -> AppliedFix {
        let fix = suggest(&classify(&Outcome::failed(id).with_error("AssertionError", "1 != 2")))
            .unwrap();
        AutoFixer::default().apply_one(&fix)
    }

    struct Rejecting;

    impl Verifier for Rejecting {
        fn verify(&self, _applied: &AppliedFix) -> Result<Verdict> {
            Ok(Verdict {
                passed: false,
                detail: "still failing".to_string(),
            })
        }
    }

    struct Broken;

    impl Verifier for Broken {
        fn verify(&self, _applied: &AppliedFix) -> Result<Verdict> {
            anyhow::bail!("runner unavailable")
        }
    }

    #[test]
    fn simulated_verifier_passes_applied_fixes() {
        let result = FixValidator::default().validate_one(&applied("t1"));
        assert!(result.success);
        assert_eq!(result.validation_id, "t1");
        assert_eq!(result.applied.fix_id, "t1");
    }

    #[test]
    fn unapplied_fix_fails_validation_without_verifying() {
        let mut fix = applied("t1");
        fix.success = false;
        let result = FixValidator::new(Box::new(Broken)).validate_one(&fix);
        assert!(!result.success);
        assert!(result.description.contains("not applied"));
    }

    #[test]
    fn rejected_and_errored_verdicts_fail() {
        let rejected = FixValidator::new(Box::new(Rejecting)).validate_one(&applied("a"));
        assert!(!rejected.success);
        assert!(rejected.description.contains("still failing"));

        let errored = FixValidator::new(Box::new(Broken)).validate_one(&applied("b"));
        assert!(!errored.success);
        assert!(errored.description.contains("runner unavailable"));
    }

    #[test]
    fn validate_is_one_to_one_and_ordered() {
        let fixes = vec![applied("a"), applied("b"), applied("c")];
        let results = FixValidator::default().validate(&fixes);
        let ids: Vec<_> = results.iter().map(|r| r.validation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn command_verifier_quotes_test_id() {
        let verifier = CommandVerifier::new(
            "pytest {test_id}".to_string(),
            PathBuf::from("."),
            Duration::from_secs(1),
        );
        assert_eq!(verifier.command_for("tests/a.py::b"), "pytest tests/a.py::b");
        assert_eq!(verifier.command_for("a b"), "pytest 'a b'");
    }

    #[test]
    fn command_verifier_uses_exit_status() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("good"), "").unwrap();

        let verifier = CommandVerifier::new(
            "test -f {test_id}".to_string(),
            tmp.path().to_path_buf(),
            Duration::from_secs(5),
        );
        assert!(verifier.verify(&applied("good")).unwrap().passed);

        let verdict = verifier.verify(&applied("missing")).unwrap();
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("exited with 1"));
    }
}
