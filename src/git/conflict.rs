//! Merge conflict resolution strategies.

use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// How a conflicted file is resolved.
///
/// Only the exact strings `"ours"` and `"theirs"` select a side; any other
/// configured value means a line merge that keeps both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ConflictStrategy {
    #[default]
    Ours,
    Theirs,
    LineMerge,
}

impl From<String> for ConflictStrategy {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<&str> for ConflictStrategy {
    fn from(value: &str) -> Self {
        match value {
            "ours" => ConflictStrategy::Ours,
            "theirs" => ConflictStrategy::Theirs,
            _ => ConflictStrategy::LineMerge,
        }
    }
}

impl From<ConflictStrategy> for String {
    fn from(value: ConflictStrategy) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictStrategy::Ours => "ours",
            ConflictStrategy::Theirs => "theirs",
            ConflictStrategy::LineMerge => "smart",
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Outside,
    Ours,
    Base,
    Theirs,
}

/// Resolve every conflict block in `content` by keeping our lines followed by
/// theirs. Lines outside conflict blocks keep their position; a diff3 base
/// section is dropped. Each kept line keeps its own terminator.
pub fn merge_conflict_lines(content: &str) -> Result<String> {
    let mut resolved: Vec<&str> = Vec::new();
    let mut ours: Vec<&str> = Vec::new();
    let mut theirs: Vec<&str> = Vec::new();
    let mut section = Section::Outside;

    for (index, line) in content.split_inclusive('\n').enumerate() {
        section = match (section, marker(line)) {
            (Section::Outside, Some(Marker::Start)) => Section::Ours,
            (Section::Ours, Some(Marker::Base)) => Section::Base,
            (Section::Ours | Section::Base, Some(Marker::Separator)) => Section::Theirs,
            (Section::Theirs, Some(Marker::End)) => {
                resolved.append(&mut ours);
                resolved.append(&mut theirs);
                Section::Outside
            }
            (Section::Outside, _) => {
                resolved.push(line);
                Section::Outside
            }
            (Section::Ours, None) => {
                ours.push(line);
                Section::Ours
            }
            (Section::Base, None) => Section::Base,
            (Section::Theirs, None) => {
                theirs.push(line);
                Section::Theirs
            }
            (_, Some(_)) => bail!("unexpected conflict marker on line {}", index + 1),
        };
    }

    if section != Section::Outside {
        bail!("conflict block is not terminated");
    }

    let mut merged = resolved.concat();
    if !content.ends_with('\n') {
        // The unterminated last line was a marker; the line before it takes its place.
        if let Some(rest) = merged.strip_suffix('\n') {
            let len = rest.strip_suffix('\r').unwrap_or(rest).len();
            merged.truncate(len);
        }
    }
    Ok(merged)
}

/// True when `content` still contains a conflict start marker.
pub fn has_conflict_markers(content: &str) -> bool {
    content.lines().any(|line| marker(line) == Some(Marker::Start))
}

#[derive(Clone, Copy, PartialEq)]
enum Marker {
    Start,
    Base,
    Separator,
    End,
}

fn marker(line: &str) -> Option<Marker> {
    if line.starts_with("<<<<<<<") {
        Some(Marker::Start)
    } else if line.starts_with("|||||||") {
        Some(Marker::Base)
    } else if line.trim_end() == "=======" {
        Some(Marker::Separator)
    } else if line.starts_with(">>>>>>>") {
        Some(Marker::End)
    } else {
        None
    }
}
