use std::path::{Path, PathBuf};

/// Project-local state directory.
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(".intervene")
}

/// Directory for monitor journals.
pub fn logs_dir(root: &Path) -> PathBuf {
    state_dir(root).join("logs")
}

/// Directory for saved event logs.
pub fn events_dir(root: &Path) -> PathBuf {
    state_dir(root).join("events")
}

/// JSON-lines journal written by the monitor.
pub fn monitor_journal(root: &Path) -> PathBuf {
    logs_dir(root).join("monitor.jsonl")
}

/// JSON-lines journal written by `process`.
pub fn pipeline_journal(root: &Path) -> PathBuf {
    logs_dir(root).join("pipeline.jsonl")
}

/// Pick `dir/<stem>.<ext>`, appending `-1`, `-2`, … while the name is taken.
///
/// Timestamped file names have one-second resolution, so two saves in the same
/// second would otherwise overwrite each other.
pub fn unique_file(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}-{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
