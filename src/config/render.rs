//! Human and JSON rendering for the `config` command.

use std::fmt::Display;
use std::path::Path;

use anyhow::{Context, Result};

use super::{CONFIG_DIR, CONFIG_FILENAME, ExecutionMode, NotificationMode, ProjectConfig};

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Simulate => "simulate",
        ExecutionMode::Command => "command",
    }
}

fn notification_label(mode: NotificationMode) -> &'static str {
    match mode {
        NotificationMode::Desktop => "desktop",
        NotificationMode::Log => "log",
    }
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| format!("(defaults, no {CONFIG_DIR}/{CONFIG_FILENAME} found)"))
}

fn push_kv(output: &mut String, key: &str, value: impl Display) {
    output.push_str(&format!("  {key:<28} {value}\n"));
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

pub fn render_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();

    output.push_str("Pipeline\n");
    push_kv(&mut output, "auto_apply", config.pipeline.auto_apply);
    push_kv(&mut output, "report_dir", &config.pipeline.report_dir);
    output.push('\n');

    output.push_str("Fixer\n");
    push_kv(&mut output, "mode", mode_label(config.fixer.mode));
    push_kv(&mut output, "timeout", format!("{}s", config.fixer.timeout_secs));
    if config.fixer.commands.is_empty() {
        push_kv(&mut output, "commands", "(none)");
    } else {
        for (action, command) in &config.fixer.commands {
            push_kv(&mut output, action, command);
        }
    }
    output.push('\n');

    output.push_str("Validator\n");
    push_kv(&mut output, "mode", mode_label(config.validator.mode));
    push_kv(
        &mut output,
        "command",
        config.validator.command.as_deref().unwrap_or("(none)"),
    );
    push_kv(&mut output, "timeout", format!("{}s", config.validator.timeout_secs));
    output.push('\n');

    output.push_str("Git\n");
    push_kv(
        &mut output,
        "checkin_reminder_interval",
        format!("{}m", config.git.checkin_reminder_interval_mins),
    );
    push_kv(
        &mut output,
        "auto_checkin_timeout",
        format!("{}m", config.git.auto_checkin_timeout_mins),
    );
    push_kv(&mut output, "ignored_paths", list_or_none(&config.git.ignored_paths));
    push_kv(&mut output, "command_timeout", format!("{}s", config.git.command_timeout_secs));
    output.push('\n');

    output.push_str("Conflicts\n");
    push_kv(&mut output, "auto_resolve", config.conflict.auto_resolve);
    push_kv(&mut output, "strategy", config.conflict.strategy);
    output.push('\n');

    output.push_str("Pull Requests\n");
    push_kv(&mut output, "auto_review", config.pull_request.auto_review);
    push_kv(&mut output, "reviewer", &config.pull_request.reviewer);
    push_kv(&mut output, "base_branch", &config.pull_request.base_branch);
    output.push('\n');

    output.push_str("Scan\n");
    push_kv(&mut output, "interval", format!("{}m", config.scan.interval_mins));
    push_kv(&mut output, "extensions", list_or_none(&config.scan.extensions));
    for (name, rule) in [
        ("file_naming", &config.scan.file_naming),
        ("class_naming", &config.scan.class_naming),
        ("function_naming", &config.scan.function_naming),
    ] {
        push_kv(&mut output, name, rule.as_deref().unwrap_or("(none)"));
    }
    for (dir, subdirs) in &config.scan.directory_structure {
        push_kv(&mut output, &format!("{dir}/"), list_or_none(subdirs));
    }
    output.push('\n');

    output.push_str("Banned References\n");
    push_kv(&mut output, "enabled", config.banned.enabled);
    push_kv(&mut output, "word", &config.banned.word);
    push_kv(&mut output, "replacement", &config.banned.replacement);
    output.push('\n');

    output.push_str("Monitor\n");
    push_kv(&mut output, "poll_interval", format!("{}s", config.monitor.poll_interval_secs));
    push_kv(&mut output, "error_backoff", format!("{}s", config.monitor.error_backoff_secs));
    push_kv(&mut output, "stop_timeout", format!("{}s", config.monitor.stop_timeout_secs));
    push_kv(
        &mut output,
        "notifications",
        notification_label(config.monitor.notifications),
    );
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));
    output
}

pub fn render_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    payload["source_path"] = serde_json::Value::String(config_source_label(config_path));
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_output_groups_sections() {
        let config = ProjectConfig::default();
        let rendered = render_human(&config, None);

        assert!(rendered.contains("Pipeline"));
        assert!(rendered.contains("Pull Requests"));
        assert!(rendered.contains("Banned References"));
        assert!(rendered.contains("src/"));
        assert!(rendered.contains("core, utils, models"));
        assert!(rendered.contains("strategy"));
        assert!(rendered.contains("(defaults, no .intervene/config.toml found)"));
    }

    #[test]
    fn human_output_lists_fixer_commands() {
        let mut config = ProjectConfig::default();
        config
            .fixer
            .commands
            .insert("install_dependency".into(), "pip install {module_name}".into());
        let rendered = render_human(&config, Some(Path::new("/p/.intervene/config.toml")));
        assert!(rendered.contains("pip install {module_name}"));
        assert!(rendered.contains("/p/.intervene/config.toml"));
    }

    #[test]
    fn json_output_is_valid() {
        let config = ProjectConfig::default();
        let json = render_json(&config, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["pipeline"]["auto_apply"], false);
        assert_eq!(value["fixer"]["mode"], "simulate");
        assert_eq!(value["conflict"]["strategy"], "ours");
        assert_eq!(value["pull_request"]["reviewer"], "powerauto.ai");
        assert_eq!(value["monitor"]["notifications"], "desktop");
        assert_eq!(
            value["source_path"],
            "(defaults, no .intervene/config.toml found)"
        );
    }
}
