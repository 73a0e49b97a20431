//! Banned-word replacement across text files.

use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{banned_pattern, walk_files};
use crate::config::ProjectConfig;

const TEXT_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".html", ".css", ".md", ".txt", ".json", ".yml", ".yaml", ".xml", ".sh",
    ".bat", ".ps1", ".c", ".cpp", ".h", ".java",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemovalSummary {
    pub files_scanned: usize,
    pub files_modified: usize,
    pub references_found: usize,
    pub references_replaced: usize,
    pub modified_files: Vec<PathBuf>,
}

pub fn is_text_file(name: &str) -> bool {
    TEXT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

pub struct BannedReferenceRemover {
    pattern: Regex,
    replacement: String,
    ignored: Vec<String>,
}

impl BannedReferenceRemover {
    pub fn new(word: &str, replacement: &str, ignored: Vec<String>) -> Result<Self> {
        Ok(Self {
            pattern: banned_pattern(word)?,
            replacement: replacement.to_string(),
            ignored,
        })
    }

    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        Self::new(
            &config.banned.word,
            &config.banned.replacement,
            config.git.ignored_paths.clone(),
        )
    }

    /// Replace every whole-word, case-insensitive match under `root` in place.
    /// Unreadable or non-UTF-8 files are skipped.
    pub fn scan_and_replace(&self, root: &Path) -> RemovalSummary {
        let mut summary = RemovalSummary::default();
        for entry in walk_files(root, &self.ignored) {
            if !is_text_file(&entry.file_name().to_string_lossy()) {
                continue;
            }
            summary.files_scanned += 1;
            let path = entry.path();
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let found = self.pattern.find_iter(&content).count();
            if found == 0 {
                continue;
            }
            summary.references_found += found;

            let replaced = self
                .pattern
                .replace_all(&content, NoExpand(&self.replacement));
            if let Err(e) = std::fs::write(path, replaced.as_bytes()) {
                warn!(path = %path.display(), error = %e, "failed to write replacement");
                continue;
            }
            summary.files_modified += 1;
            summary.references_replaced += found;
            summary.modified_files.push(path.to_path_buf());
            info!(path = %path.display(), count = found, "replaced banned references");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn remover() -> BannedReferenceRemover {
        BannedReferenceRemover::new("manus", "powerauto.ai", vec!["node_modules".to_string()])
            .unwrap()
    }

    #[test]
    fn text_extensions() {
        assert!(is_text_file("main.py"));
        assert!(is_text_file("README.md"));
        assert!(is_text_file("build.ps1"));
        assert!(!is_text_file("image.png"));
        assert!(!is_text_file("lib.rs"));
    }

    #[test]
    fn replaces_whole_words_only() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("notes.md"),
            "Manus wrote this. manuscript stays. MANUS again.\n",
        )
        .unwrap();
        fs::write(tmp.path().join("clean.txt"), "nothing here\n").unwrap();
        fs::write(tmp.path().join("binary.png"), "manus").unwrap();

        let summary = remover().scan_and_replace(tmp.path());
        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.files_modified, 1);
        assert_eq!(summary.references_found, 2);
        assert_eq!(summary.references_replaced, 2);
        assert_eq!(summary.modified_files, vec![tmp.path().join("notes.md")]);

        let content = fs::read_to_string(tmp.path().join("notes.md")).unwrap();
        assert_eq!(
            content,
            "powerauto.ai wrote this. manuscript stays. powerauto.ai again.\n"
        );
        assert_eq!(fs::read_to_string(tmp.path().join("binary.png")).unwrap(), "manus");
    }

    #[test]
    fn replacement_is_literal() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "manus").unwrap();
        let remover =
            BannedReferenceRemover::new("manus", "$1 cost", Vec::new()).unwrap();
        remover.scan_and_replace(tmp.path());
        assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "$1 cost");
    }

    #[test]
    fn skips_ignored_directories() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        fs::write(tmp.path().join("node_modules/pkg/index.js"), "manus").unwrap();

        let summary = remover().scan_and_replace(tmp.path());
        assert_eq!(summary.files_scanned, 0);
        assert_eq!(
            fs::read_to_string(tmp.path().join("node_modules/pkg/index.js")).unwrap(),
            "manus"
        );
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.py"), "# manus\n").unwrap();
        assert_eq!(remover().scan_and_replace(tmp.path()).files_modified, 1);
        let again = remover().scan_and_replace(tmp.path());
        assert_eq!(again.files_modified, 0);
        assert_eq!(again.references_found, 0);
    }
}
