//! Fix application.
//!
//! The auto-fixer decides *whether* a suggestion can be applied; the injected
//! [`ActionExecutor`] decides *how* each action is carried out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use super::{ActionError, ActionResult, AppliedFix, FixAction, FixSuggestion, ProblemKind};
use crate::process::{run_with_timeout, shell, shell_quote};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").unwrap());

/// Carries out a single fix action, returning a short detail string.
pub trait ActionExecutor: Send {
    fn execute(&self, action: &FixAction) -> Result<String, ActionError>;
}

/// Records every action as applied without side effects.
#[derive(Debug, Default, Clone)]
pub struct SimulatedExecutor;

impl ActionExecutor for SimulatedExecutor {
    fn execute(&self, action: &FixAction) -> Result<String, ActionError> {
        Ok(format!("simulated {}", action.action_type))
    }
}

/// Runs a configured shell command per action type.
///
/// Templates reference action parameters as `{name}`; values are shell-quoted
/// before substitution. Actions with no configured command are recorded only.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    commands: BTreeMap<String, String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(commands: BTreeMap<String, String>, work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            commands,
            work_dir,
            timeout,
        }
    }
}

impl ActionExecutor for CommandExecutor {
    fn execute(&self, action: &FixAction) -> Result<String, ActionError> {
        let Some(template) = self.commands.get(action.action_type.as_str()) else {
            return Ok("recorded only: no command configured".to_string());
        };
        let command = render_template(template, action)?;
        info!(action = %action.action_type, command = %command, "running fix action");

        let mut cmd = shell(&command);
        cmd.current_dir(&self.work_dir);
        let output = run_with_timeout(&mut cmd, self.timeout)?;
        if !output.success() {
            return Err(ActionError::Failed {
                action: action.action_type,
                code: output.status.code().unwrap_or(-1),
                detail: output.error_text(),
            });
        }
        Ok(format!("ran `{command}`"))
    }
}

/// Substitute `{param}` placeholders with shell-quoted action parameters.
pub fn render_template(template: &str, action: &FixAction) -> Result<String, ActionError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = action
            .parameters
            .get(name.as_str())
            .ok_or_else(|| ActionError::MissingParameter {
                action: action.action_type,
                name: name.as_str().to_string(),
            })?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(&shell_quote(value));
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

pub struct AutoFixer {
    executor: Box<dyn ActionExecutor>,
}

impl Default for AutoFixer {
    fn default() -> Self {
        Self::new(Box::new(SimulatedExecutor))
    }
}

impl AutoFixer {
    pub fn new(executor: Box<dyn ActionExecutor>) -> Self {
        Self { executor }
    }

    /// Apply each suggestion in order. One result per suggestion.
    pub fn apply(&self, fixes: &[FixSuggestion]) -> Vec<AppliedFix> {
        let applied: Vec<AppliedFix> = fixes.iter().map(|fix| self.apply_one(fix)).collect();
        info!(applied = applied.len(), "fix application finished");
        applied
    }

    pub fn apply_one(&self, fix: &FixSuggestion) -> AppliedFix {
        let applied = match fix.kind {
            ProblemKind::ImportError
            | ProblemKind::AssertionError
            | ProblemKind::TimeoutError
            | ProblemKind::TestFailure => self.run_actions(fix),
            ProblemKind::GeneralError | ProblemKind::UnknownFailure => AppliedFix {
                fix_id: fix.problem_id.clone(),
                success: false,
                description: format!("no applier for fix kind {}", fix.kind),
                actions: Vec::new(),
                fix: fix.clone(),
            },
        };
        if applied.success {
            info!(fix = %applied.fix_id, kind = %fix.kind, "{}", applied.description);
        } else {
            warn!(fix = %applied.fix_id, kind = %fix.kind, "{}", applied.description);
        }
        applied
    }

    /// Run actions in order, stopping at the first failure.
    fn run_actions(&self, fix: &FixSuggestion) -> AppliedFix {
        let mut results = Vec::with_capacity(fix.actions.len());
        let mut failure = None;
        for action in &fix.actions {
            match self.executor.execute(action) {
                Ok(detail) => results.push(ActionResult {
                    action_type: action.action_type,
                    success: true,
                    detail,
                }),
                Err(e) => {
                    let detail = e.to_string();
                    results.push(ActionResult {
                        action_type: action.action_type,
                        success: false,
                        detail: detail.clone(),
                    });
                    failure = Some((action.action_type, detail));
                    break;
                }
            }
        }

        let (success, description) = match failure {
            None => (true, format!("applied: {}", fix.description)),
            Some((action, detail)) => (
                false,
                format!("failed to apply {}: {action} failed: {detail}", fix.description),
            ),
        };
        AppliedFix {
            fix_id: fix.problem_id.clone(),
            success,
            description,
            actions: results,
            fix: fix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervention::detector::classify;
    use crate::intervention::generator::suggest;
    use crate::intervention::{ActionType, Problem};
    use crate::outcome::Outcome;
    use std::sync::{Arc, Mutex};

    /// Records executed action types; fails the configured one.
    struct ScriptedExecutor {
        calls: Arc<Mutex<Vec<ActionType>>>,
        fail_on: Option<ActionType>,
    }

    impl ActionExecutor for ScriptedExecutor {
        fn execute(&self, action: &FixAction) -> Result<String, ActionError> {
            self.calls.lock().unwrap().push(action.action_type);
            if Some(action.action_type) == self.fail_on {
                return Err(ActionError::Failed {
                    action: action.action_type,
                    code: 2,
                    detail: "boom".to_string(),
                });
            }
            Ok("ok".to_string())
        }
    }

    fn import_fix() -> FixSuggestion {
        suggest(&classify(
            &Outcome::failed("test_http").with_error("ModuleNotFoundError", "No module named 'requests'"),
        ))
        .unwrap()
    }

    fn fix_of_kind(kind: ProblemKind) -> FixSuggestion {
        let mut fix = import_fix();
        fix.kind = kind;
        fix
    }

    #[test]
    fn simulated_executor_applies_every_fixable_kind() {
        let fixer = AutoFixer::default();
        for kind in [
            ProblemKind::ImportError,
            ProblemKind::AssertionError,
            ProblemKind::TimeoutError,
            ProblemKind::TestFailure,
        ] {
            let applied = fixer.apply_one(&fix_of_kind(kind));
            assert!(applied.success, "{kind}");
            assert_eq!(applied.actions.len(), 2);
        }
    }

    #[test]
    fn unfixable_kinds_fail_without_running_actions() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fixer = AutoFixer::new(Box::new(ScriptedExecutor {
            calls: Arc::clone(&calls),
            fail_on: None,
        }));
        for kind in [ProblemKind::GeneralError, ProblemKind::UnknownFailure] {
            let applied = fixer.apply_one(&fix_of_kind(kind));
            assert!(!applied.success);
            assert!(applied.description.contains(kind.as_str()));
            assert!(applied.actions.is_empty());
        }
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn stops_at_first_failing_action() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fixer = AutoFixer::new(Box::new(ScriptedExecutor {
            calls: Arc::clone(&calls),
            fail_on: Some(ActionType::InstallDependency),
        }));
        let applied = fixer.apply_one(&import_fix());
        assert!(!applied.success);
        assert_eq!(applied.actions.len(), 1);
        assert!(!applied.actions[0].success);
        assert!(applied.description.contains("install_dependency"));
        assert_eq!(*calls.lock().unwrap(), vec![ActionType::InstallDependency]);
    }

    #[test]
    fn apply_is_one_to_one_and_ordered() {
        let fixes = vec![
            fix_of_kind(ProblemKind::ImportError),
            fix_of_kind(ProblemKind::GeneralError),
            fix_of_kind(ProblemKind::TimeoutError),
        ];
        let applied = AutoFixer::default().apply(&fixes);
        assert_eq!(applied.len(), 3);
        assert_eq!(
            applied.iter().map(|a| a.success).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert_eq!(applied[1].fix, fixes[1]);
    }

    #[test]
    fn render_template_quotes_parameters() {
        let action = FixAction::new(ActionType::InstallDependency, "install")
            .with_param("module_name", "evil; rm -rf /");
        let rendered = render_template("pip install {module_name}", &action).unwrap();
        assert_eq!(rendered, "pip install 'evil; rm -rf /'");
    }

    #[test]
    fn render_template_rejects_unknown_placeholder() {
        let action = FixAction::new(ActionType::IncreaseTimeout, "t");
        let err = render_template("bump {seconds}", &action).unwrap_err();
        assert!(matches!(err, ActionError::MissingParameter { .. }));
    }

    #[test]
    fn command_executor_records_unconfigured_actions() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new(
            BTreeMap::new(),
            tmp.path().to_path_buf(),
            Duration::from_secs(5),
        );
        let detail = executor
            .execute(&FixAction::new(ActionType::OptimizeTest, "o"))
            .unwrap();
        assert!(detail.starts_with("recorded only"));
    }

    #[test]
    fn command_executor_runs_in_work_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut commands = BTreeMap::new();
        commands.insert(
            "install_dependency".to_string(),
            "echo {module_name} > installed.txt".to_string(),
        );
        let executor =
            CommandExecutor::new(commands, tmp.path().to_path_buf(), Duration::from_secs(5));
        let action = FixAction::new(ActionType::InstallDependency, "install")
            .with_param("module_name", "requests");
        executor.execute(&action).unwrap();
        let written = std::fs::read_to_string(tmp.path().join("installed.txt")).unwrap();
        assert_eq!(written.trim(), "requests");
    }

    #[test]
    fn command_executor_reports_non_zero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut commands = BTreeMap::new();
        commands.insert("check_test_logic".to_string(), "echo nope >&2; exit 4".to_string());
        let executor =
            CommandExecutor::new(commands, tmp.path().to_path_buf(), Duration::from_secs(5));
        let err = executor
            .execute(&FixAction::new(ActionType::CheckTestLogic, "c"))
            .unwrap_err();
        match err {
            ActionError::Failed { code, detail, .. } => {
                assert_eq!(code, 4);
                assert_eq!(detail, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn command_executor_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let mut commands = BTreeMap::new();
        commands.insert("optimize_test".to_string(), "sleep 5".to_string());
        let executor =
            CommandExecutor::new(commands, tmp.path().to_path_buf(), Duration::from_millis(200));
        let err = executor
            .execute(&FixAction::new(ActionType::OptimizeTest, "o"))
            .unwrap_err();
        assert!(matches!(err, ActionError::Process(_)));
    }

    #[test]
    fn applied_fix_embeds_suggestion() {
        let fix = import_fix();
        let applied = AutoFixer::default().apply_one(&fix);
        let problem: &Problem = &applied.fix.problem;
        assert_eq!(problem.problem_id, "test_http");
        assert_eq!(applied.fix_id, "test_http");
    }
}
