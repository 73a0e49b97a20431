pub mod render;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::git::ConflictStrategy;

pub const CONFIG_FILENAME: &str = "config.toml";
pub const CONFIG_DIR: &str = ".intervene";

/// Upper bound for minute-valued intervals (one year).
pub const MAX_INTERVAL_MINS: u64 = 525_600;
/// Upper bound for second-valued timeouts and intervals (one year).
pub const MAX_TIMEOUT_SECS: u64 = MAX_INTERVAL_MINS * 60;

/// How fix actions and validations are carried out.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Record every action as successful without touching anything.
    #[default]
    Simulate,
    /// Run the configured shell command for each action.
    Command,
}

#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationMode {
    #[default]
    Desktop,
    Log,
}

fn default_report_dir() -> String {
    ".intervene/reports".to_string()
}

fn default_action_timeout_secs() -> u64 {
    300
}

fn default_reminder_interval_mins() -> u64 {
    30
}

fn default_auto_checkin_timeout_mins() -> u64 {
    10
}

fn default_ignored_paths() -> Vec<String> {
    [".git", "node_modules", "venv", "__pycache__"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_git_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_reviewer() -> String {
    "powerauto.ai".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_scan_interval_mins() -> u64 {
    60
}

fn default_scan_extensions() -> Vec<String> {
    vec![".py".to_string()]
}

fn default_directory_structure() -> BTreeMap<String, Vec<String>> {
    let mut rules = BTreeMap::new();
    rules.insert(
        "src".to_string(),
        vec!["core".into(), "utils".into(), "models".into()],
    );
    rules.insert("tests".to_string(), vec!["unit".into(), "integration".into()]);
    rules.insert("docs".to_string(), vec!["api".into(), "user_guides".into()]);
    rules
}

fn default_file_naming() -> Option<String> {
    Some(r"^[a-z][a-z0-9_]*\.py$".to_string())
}

fn default_class_naming() -> Option<String> {
    Some(r"^[A-Z][a-zA-Z0-9]*$".to_string())
}

fn default_function_naming() -> Option<String> {
    Some(r"^[a-z][a-z0-9_]*$".to_string())
}

fn default_banned_word() -> String {
    "manus".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    30
}

fn default_stop_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub auto_apply: bool,
    /// Report directory, relative to the project root unless absolute.
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_apply: false,
            report_dir: default_report_dir(),
        }
    }
}

/// Fix action execution.
///
/// ```toml
/// [fixer]
/// mode = "command"
///
/// [fixer.commands]
/// install_dependency = "pip install {module_name}"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixerConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_action_timeout_secs")]
    pub timeout_secs: u64,
    /// Action type (snake_case) → shell command template.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            timeout_secs: default_action_timeout_secs(),
            commands: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Command template re-run per fixed test, e.g. `python -m pytest {test_id}`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_action_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            command: None,
            timeout_secs: default_action_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitConfig {
    #[serde(default = "default_reminder_interval_mins")]
    pub checkin_reminder_interval_mins: u64,
    #[serde(default = "default_auto_checkin_timeout_mins")]
    pub auto_checkin_timeout_mins: u64,
    #[serde(default = "default_ignored_paths")]
    pub ignored_paths: Vec<String>,
    #[serde(default = "default_git_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            checkin_reminder_interval_mins: default_reminder_interval_mins(),
            auto_checkin_timeout_mins: default_auto_checkin_timeout_mins(),
            ignored_paths: default_ignored_paths(),
            command_timeout_secs: default_git_timeout_secs(),
        }
    }
}

impl GitConfig {
    pub fn reminder_interval(&self) -> Duration {
        minutes(self.checkin_reminder_interval_mins)
    }

    pub fn auto_checkin_timeout(&self) -> Duration {
        minutes(self.auto_checkin_timeout_mins)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConflictConfig {
    #[serde(default = "default_true")]
    pub auto_resolve: bool,
    #[serde(default)]
    pub strategy: ConflictStrategy,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            auto_resolve: true,
            strategy: ConflictStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullRequestConfig {
    #[serde(default = "default_true")]
    pub auto_review: bool,
    #[serde(default = "default_reviewer")]
    pub reviewer: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

impl Default for PullRequestConfig {
    fn default() -> Self {
        Self {
            auto_review: true,
            reviewer: default_reviewer(),
            base_branch: default_base_branch(),
        }
    }
}

/// Code and directory structure rules.
///
/// ```toml
/// [scan]
/// interval_mins = 60
/// file_naming = '^[a-z][a-z0-9_]*\.py$'
///
/// [scan.directory_structure]
/// src = ["core", "utils"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_interval_mins")]
    pub interval_mins: u64,
    /// Extensions whose files get naming checks.
    #[serde(default = "default_scan_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_directory_structure")]
    pub directory_structure: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_file_naming")]
    pub file_naming: Option<String>,
    #[serde(default = "default_class_naming")]
    pub class_naming: Option<String>,
    #[serde(default = "default_function_naming")]
    pub function_naming: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_mins: default_scan_interval_mins(),
            extensions: default_scan_extensions(),
            directory_structure: default_directory_structure(),
            file_naming: default_file_naming(),
            class_naming: default_class_naming(),
            function_naming: default_function_naming(),
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        minutes(self.interval_mins)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BannedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_banned_word")]
    pub word: String,
    #[serde(default = "default_reviewer")]
    pub replacement: String,
}

impl Default for BannedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            word: default_banned_word(),
            replacement: default_reviewer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default)]
    pub notifications: NotificationMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            notifications: NotificationMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub fixer: FixerConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub conflict: ConflictConfig,
    #[serde(default)]
    pub pull_request: PullRequestConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub banned: BannedConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.intervene/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let config = Self::load_file(&path)?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: ProjectConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Write the config as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Compile every configured pattern so bad regexes fail at load time.
    pub fn validate(&self) -> Result<()> {
        for (name, pattern) in [
            ("scan.file_naming", &self.scan.file_naming),
            ("scan.class_naming", &self.scan.class_naming),
            ("scan.function_naming", &self.scan.function_naming),
        ] {
            if let Some(pattern) = pattern {
                Regex::new(pattern).with_context(|| format!("{name} is not a valid regex"))?;
            }
        }
        if self.banned.enabled && self.banned.word.trim().is_empty() {
            anyhow::bail!("banned.word must not be empty when banned.enabled is true");
        }
        if self.monitor.poll_interval_secs == 0 {
            anyhow::bail!("monitor.poll_interval_secs must be at least 1");
        }
        for (name, value) in [
            ("git.checkin_reminder_interval_mins", self.git.checkin_reminder_interval_mins),
            ("git.auto_checkin_timeout_mins", self.git.auto_checkin_timeout_mins),
            ("scan.interval_mins", self.scan.interval_mins),
        ] {
            if value > MAX_INTERVAL_MINS {
                anyhow::bail!("{name} must be at most {MAX_INTERVAL_MINS}");
            }
        }
        for (name, value) in [
            ("fixer.timeout_secs", self.fixer.timeout_secs),
            ("validator.timeout_secs", self.validator.timeout_secs),
            ("git.command_timeout_secs", self.git.command_timeout_secs),
            ("monitor.poll_interval_secs", self.monitor.poll_interval_secs),
            ("monitor.error_backoff_secs", self.monitor.error_backoff_secs),
            ("monitor.stop_timeout_secs", self.monitor.stop_timeout_secs),
        ] {
            if value > MAX_TIMEOUT_SECS {
                anyhow::bail!("{name} must be at most {MAX_TIMEOUT_SECS}");
            }
        }
        Ok(())
    }

    /// Report directory resolved against `root`.
    pub fn report_dir(&self, root: &Path) -> PathBuf {
        let dir = Path::new(&self.pipeline.report_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            root.join(dir)
        }
    }

    /// Default config location for a project rooted at `root`.
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILENAME)
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

fn minutes(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}
