//! Code and directory structure scanning.
//!
//! The scanner walks a project tree and reports rule violations without
//! touching anything: missing expected directories, badly named files,
//! classes and functions, and banned-word references.

pub mod banned;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use banned::{BannedReferenceRemover, RemovalSummary};

use crate::config::ProjectConfig;

static CLASS_DECL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"class\s+(\w+)").unwrap());
static FUNCTION_DECL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"def\s+(\w+)").unwrap());

/// Characters of surrounding text kept with a banned-word match.
const CONTEXT_CHARS: usize = 20;

/// Always skipped, regardless of configuration.
const STATE_DIR: &str = ".intervene";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    DirectoryStructure,
    FileNaming,
    ClassNaming,
    FunctionNaming,
    BannedReference,
}

impl IssueType {
    pub fn title(self) -> &'static str {
        match self {
            IssueType::DirectoryStructure => "Directory structure",
            IssueType::FileNaming => "File naming",
            IssueType::ClassNaming => "Class naming",
            IssueType::FunctionNaming => "Function naming",
            IssueType::BannedReference => "Banned references",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScanIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub message: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Case-insensitive whole-word matcher for `word`.
pub fn banned_pattern(word: &str) -> Result<Regex> {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(word)))
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid banned word '{word}'"))
}

/// Every regular file under `root`, skipping ignored directory names.
pub(crate) fn walk_files<'a>(
    root: &Path,
    ignored: &'a [String],
) -> impl Iterator<Item = walkdir::DirEntry> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(move |e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            name != STATE_DIR && !ignored.iter().any(|i| i == name.as_ref())
        })
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable path");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

/// Up to `CONTEXT_CHARS` characters either side of `start..end`.
fn context_around(content: &str, start: usize, end: usize) -> String {
    let before: String = content[..start]
        .chars()
        .rev()
        .take(CONTEXT_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let after: String = content[end..].chars().take(CONTEXT_CHARS).collect();
    format!("{before}{}{after}", &content[start..end])
}

pub struct CodeScanner {
    directory_structure: BTreeMap<String, Vec<String>>,
    extensions: Vec<String>,
    file_naming: Option<Regex>,
    class_naming: Option<Regex>,
    function_naming: Option<Regex>,
    banned: Option<Regex>,
    ignored: Vec<String>,
}

impl CodeScanner {
    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        let compile = |name: &str, pattern: &Option<String>| -> Result<Option<Regex>> {
            pattern
                .as_deref()
                .map(|p| Regex::new(p).with_context(|| format!("{name} is not a valid regex")))
                .transpose()
        };
        Ok(Self {
            directory_structure: config.scan.directory_structure.clone(),
            extensions: config.scan.extensions.clone(),
            file_naming: compile("scan.file_naming", &config.scan.file_naming)?,
            class_naming: compile("scan.class_naming", &config.scan.class_naming)?,
            function_naming: compile("scan.function_naming", &config.scan.function_naming)?,
            banned: if config.banned.enabled {
                Some(banned_pattern(&config.banned.word)?)
            } else {
                None
            },
            ignored: config.git.ignored_paths.clone(),
        })
    }

    pub fn scan(&self, root: &Path) -> Vec<ScanIssue> {
        let mut issues = self.check_directory_structure(root);
        for entry in walk_files(root, &self.ignored) {
            let name = entry.file_name().to_string_lossy();
            if self.extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
                self.check_file(entry.path(), &mut issues);
            }
        }
        debug!(root = %root.display(), issues = issues.len(), "scan finished");
        issues
    }

    fn check_directory_structure(&self, root: &Path) -> Vec<ScanIssue> {
        let mut issues = Vec::new();
        for (parent, subdirs) in &self.directory_structure {
            let parent_path = root.join(parent);
            if !parent_path.is_dir() {
                issues.push(structure_issue(format!("missing directory: {parent}"), parent_path));
                continue;
            }
            for sub in subdirs {
                let sub_path = parent_path.join(sub);
                if !sub_path.is_dir() {
                    issues.push(structure_issue(
                        format!("missing subdirectory: {parent}/{sub}"),
                        sub_path,
                    ));
                }
            }
        }
        issues
    }

    fn check_file(&self, path: &Path, issues: &mut Vec<ScanIssue>) {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some(rule) = &self.file_naming {
            if !rule.is_match(&file_name) {
                issues.push(ScanIssue {
                    issue_type: IssueType::FileNaming,
                    severity: IssueSeverity::Warning,
                    message: format!("file name does not follow convention: {file_name}"),
                    path: path.to_path_buf(),
                    line: None,
                    context: None,
                });
            }
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read file for scan");
                return;
            }
        };

        let declarations = [
            (&self.class_naming, &*CLASS_DECL, IssueType::ClassNaming, "class"),
            (&self.function_naming, &*FUNCTION_DECL, IssueType::FunctionNaming, "function"),
        ];
        for (rule, decl, issue_type, what) in declarations {
            let Some(rule) = rule else { continue };
            for caps in decl.captures_iter(&content) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if !rule.is_match(name.as_str()) {
                    issues.push(ScanIssue {
                        issue_type,
                        severity: IssueSeverity::Warning,
                        message: format!("{what} name does not follow convention: {}", name.as_str()),
                        path: path.to_path_buf(),
                        line: Some(line_of(&content, whole.start())),
                        context: None,
                    });
                }
            }
        }

        if let Some(banned) = &self.banned {
            for m in banned.find_iter(&content) {
                issues.push(ScanIssue {
                    issue_type: IssueType::BannedReference,
                    severity: IssueSeverity::Error,
                    message: format!("banned reference: {}", m.as_str()),
                    path: path.to_path_buf(),
                    line: Some(line_of(&content, m.start())),
                    context: Some(context_around(&content, m.start(), m.end())),
                });
            }
        }
    }
}

fn structure_issue(message: String, path: PathBuf) -> ScanIssue {
    ScanIssue {
        issue_type: IssueType::DirectoryStructure,
        severity: IssueSeverity::Warning,
        message,
        path,
        line: None,
        context: None,
    }
}

/// Markdown report grouped by issue type.
pub fn render_markdown(issues: &[ScanIssue]) -> String {
    let mut out = String::from("# Code scan report\n\n");
    if issues.is_empty() {
        out.push_str("No issues found.\n");
        return out;
    }
    let _ = writeln!(out, "{} issue(s) found.\n", issues.len());

    let mut grouped: BTreeMap<IssueType, Vec<&ScanIssue>> = BTreeMap::new();
    for issue in issues {
        grouped.entry(issue.issue_type).or_default().push(issue);
    }
    for (issue_type, group) in grouped {
        let _ = writeln!(out, "## {} ({})\n", issue_type.title(), group.len());
        for issue in group {
            let location = match issue.line {
                Some(line) => format!("{}:{line}", issue.path.display()),
                None => issue.path.display().to_string(),
            };
            let _ = writeln!(out, "- `{location}`: {}", issue.message);
            if let Some(context) = &issue.context {
                let _ = writeln!(out, "  > {}", context.replace('\n', " "));
            }
        }
        out.push('\n');
    }
    out
}
