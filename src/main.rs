use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use intervene::api::{self, ApiService};
use intervene::cli::{Cli, Command};
use intervene::config::{self, ProjectConfig};
use intervene::git::{ForgeTokens, GitCli, PullRequest, Repository};
use intervene::intervention::InterventionEngine;
use intervene::intervention::engine::save_report;
use intervene::log::{ExecutionLog, LogEvent};
use intervene::monitor::{Lifecycle, Monitor};
use intervene::outcome::{load_outcomes, parse_outcomes};
use intervene::paths;
use intervene::scan::{BannedReferenceRemover, CodeScanner, render_markdown};
use intervene::shell_completion;

/// Project root implied by a discovered `.intervene/config.toml`, or `cwd`.
fn project_root(cwd: &Path, config_path: Option<&Path>) -> PathBuf {
    config_path
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf())
}

fn read_outcomes(path: &Path) -> Result<Vec<intervene::outcome::Outcome>> {
    if path.as_os_str() == "-" {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .context("failed to read outcomes from stdin")?;
        parse_outcomes(&input)
    } else {
        load_outcomes(path)
    }
}

fn journal_or_warn(path: &Path) -> Option<ExecutionLog> {
    match ExecutionLog::new(path) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(error = %e, "journal unavailable");
            None
        }
    }
}

fn cmd_process(
    config: &ProjectConfig,
    root: &Path,
    outcomes_path: &Path,
    apply: bool,
    report_dir: Option<PathBuf>,
    no_save: bool,
) -> Result<()> {
    let outcomes = read_outcomes(outcomes_path)?;
    let engine = InterventionEngine::from_config(config, root);
    let report = engine.process(&outcomes, apply || config.pipeline.auto_apply);

    let journal = journal_or_warn(&paths::pipeline_journal(root));
    if let Some(journal) = &journal {
        journal.log(LogEvent::PipelineCompleted {
            success: report.success,
            problems: report.counts.problems,
            fixes: report.counts.fixes,
            passed: report.counts.passed,
        })?;
    }

    println!("{}", report.message);
    println!(
        "  outcomes {}  problems {}  fixes {}  applied {}  passed {}/{}",
        report.counts.outcomes,
        report.counts.problems,
        report.counts.fixes,
        report.counts.applied,
        report.counts.passed,
        report.counts.validated,
    );
    for fix in &report.fixes {
        println!("  - [{}] {}: {}", fix.kind, fix.problem_id, fix.description);
    }

    if no_save {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let dir = report_dir.unwrap_or_else(|| config.report_dir(root));
        let path = save_report(&report, &dir)?;
        if let Some(journal) = &journal {
            journal.log(LogEvent::ReportSaved {
                path: path.display().to_string(),
            })?;
        }
        println!("report: {}", path.display());
    }

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_watch(config: ProjectConfig, repo: &Path) -> Result<()> {
    let mut monitor = Monitor::for_repository(repo, config)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::Relaxed);
    })
    .ok();

    monitor.start()?;
    println!(
        "\x1b[36m[intervene]\x1b[0m watching {} (Ctrl-C to stop)",
        monitor.root().display()
    );
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    if monitor.stop() == Lifecycle::StopTimedOut {
        warn!("monitor thread detached");
    }
    let path = monitor.save_events(&paths::events_dir(monitor.root()))?;
    println!(
        "\x1b[36m[intervene]\x1b[0m {} event(s) saved to {}",
        monitor.events().len(),
        path.display()
    );
    Ok(())
}

fn cmd_clean(config: &ProjectConfig, path: &Path, commit: bool) -> Result<()> {
    let remover = BannedReferenceRemover::from_config(config)?;
    let summary = remover.scan_and_replace(path);
    println!(
        "scanned {} file(s), replaced {} reference(s) in {} file(s)",
        summary.files_scanned, summary.references_replaced, summary.files_modified
    );
    for file in &summary.modified_files {
        println!("  {}", file.display());
    }
    if commit && summary.files_modified > 0 {
        let repo = GitCli::discover(path, config.git.command_timeout())?;
        repo.auto_commit(&format!(
            "banned-reference cleanup: {} references [intervention]",
            summary.references_replaced
        ))?;
        println!("committed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let quiet = matches!(
        &cli.command,
        Command::Config { .. } | Command::Completions { .. } | Command::Serve
    );

    let filter = match cli.verbose {
        0 if quiet => "intervene=warn",
        0 => "intervene=info",
        1 => "intervene=debug",
        _ => "intervene=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;

    if !quiet || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .intervene/config.toml found, using defaults"),
        }
    }
    let root = project_root(&cwd, config_path.as_deref());

    match cli.command {
        Command::Process {
            outcomes,
            apply,
            report_dir,
            no_save,
        } => cmd_process(&config, &root, &outcomes, apply, report_dir, no_save)?,
        Command::Watch { repo } => cmd_watch(config, repo.as_deref().unwrap_or(&cwd))?,
        Command::Scan { path, json } => {
            let path = path.unwrap_or_else(|| root.clone());
            let issues = CodeScanner::from_config(&config)?.scan(&path);
            if json {
                println!("{}", serde_json::to_string_pretty(&issues)?);
            } else {
                print!("{}", render_markdown(&issues));
            }
        }
        Command::Clean { path, commit } => {
            cmd_clean(&config, path.as_deref().unwrap_or(&root), commit)?
        }
        Command::Pr {
            title,
            body,
            reviewer,
            base,
        } => {
            let repo = GitCli::discover(&cwd, config.git.command_timeout())?
                .with_tokens(ForgeTokens::from_env());
            let request = PullRequest {
                title,
                body,
                reviewer: reviewer.unwrap_or_else(|| config.pull_request.reviewer.clone()),
                base_branch: base.unwrap_or_else(|| config.pull_request.base_branch.clone()),
            };
            println!("{}", repo.create_pull_request(&request)?);
        }
        Command::Analyze { path } => {
            let analysis = api::analyze_repository(path.as_deref().unwrap_or(&cwd), &config)?;
            let payload = serde_json::json!({
                "git_status": analysis.git_status,
                "code_issues": analysis.code_issues,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Serve => {
            let monitor = Monitor::for_repository(&cwd, config)?;
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| ProjectConfig::default_path(monitor.root()));
            let mut service = ApiService::new(monitor, config_file);
            api::serve(&mut service, io::stdin().lock(), io::stdout().lock())?;
        }
        Command::Config { json } => {
            if json {
                println!("{}", config::render::render_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", config::render::render_human(&config, config_path.as_deref()));
            }
        }
        Command::Completions { shell } => shell_completion::print(shell)?,
    }

    Ok(())
}
