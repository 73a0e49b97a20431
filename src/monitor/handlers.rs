//! Per-kind event handlers.
//!
//! [`process`] moves an event to IN_PROGRESS, dispatches on its kind and
//! leaves it either back in PENDING (waiting) or in a terminal state. A
//! handler error marks the event FAILED with the error text in
//! `resolution_details.error`.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::event::{
    EventDetails, InterventionEvent, InterventionStatus, InterventionType, TransitionError,
};
use crate::config::ProjectConfig;
use crate::git::{PullRequest, Repository};
use crate::notify::Notifier;
use crate::scan::{BannedReferenceRemover, render_markdown};

const DEFAULT_PR_TITLE: &str = "Automated pull request [intervention]";
const DEFAULT_PR_BODY: &str = "This pull request was opened automatically by intervene.";

/// Collaborators a handler may use.
pub struct HandlerContext<'a> {
    pub repo: &'a dyn Repository,
    pub notifier: &'a dyn Notifier,
    pub config: &'a ProjectConfig,
    pub remover: &'a BannedReferenceRemover,
}

pub fn process(
    event: &mut InterventionEvent,
    ctx: &HandlerContext<'_>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    info!(event = %event.event_id, kind = %event.intervention_type, "processing event");
    event.transition(InterventionStatus::InProgress, now)?;

    let outcome = match event.details.intervention_type() {
        InterventionType::GitCheckinReminder => handle_reminder(event, ctx, now),
        InterventionType::MergeConflict => handle_conflict(event, ctx, now),
        InterventionType::CodeStructureIssue => handle_code_issues(event, ctx, now),
        InterventionType::BannedReference => handle_banned(event, ctx, now),
        InterventionType::PrReview => handle_pr_review(event, ctx, now),
        InterventionType::Unknown => {
            warn!(event = %event.event_id, "unknown intervention type");
            finish(event, InterventionStatus::Failed, json!({"error": "unknown intervention type"}), now)
        }
    };

    if let Err(e) = outcome {
        warn!(event = %event.event_id, error = %e, "event handling failed");
        event.resolution_details = Some(json!({ "error": format!("{e:#}") }));
        if event.status == InterventionStatus::InProgress {
            event.transition(InterventionStatus::Failed, now)?;
        }
    }
    Ok(())
}

fn finish(
    event: &mut InterventionEvent,
    status: InterventionStatus,
    resolution: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<()> {
    event.resolution_details = Some(resolution);
    event.transition(status, now)?;
    Ok(())
}

fn park(event: &mut InterventionEvent, now: DateTime<Utc>) -> Result<()> {
    event.transition(InterventionStatus::Pending, now)?;
    Ok(())
}

/// First visit notifies and sets the auto-commit deadline. Later visits commit
/// once the deadline has passed and changes are still present.
fn handle_reminder(
    event: &mut InterventionEvent,
    ctx: &HandlerContext<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    let EventDetails::GitCheckinReminder {
        last_commit_time,
        uncommitted_files,
        auto_checkin_timeout_mins,
        auto_checkin_deadline,
    } = &mut event.details
    else {
        return Ok(());
    };

    if !event.user_notified {
        let deadline = ChronoDuration::from_std(Duration::from_secs(
            auto_checkin_timeout_mins.saturating_mul(60),
        ))
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .context("auto-commit deadline is out of range")?;
        let last = last_commit_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        ctx.notifier.notify(
            &format!(
                "{} uncommitted file(s), last commit {last}",
                uncommitted_files.len()
            ),
            &format!(
                "Commit within {auto_checkin_timeout_mins} minutes or the changes will be committed automatically"
            ),
        );
        *auto_checkin_deadline = Some(deadline);
        event.user_notified = true;
        return park(event, now);
    }

    match *auto_checkin_deadline {
        Some(deadline) if now >= deadline => {}
        _ => return park(event, now),
    }

    let files = ctx.repo.uncommitted_changes()?;
    if files.is_empty() {
        return finish(
            event,
            InterventionStatus::Completed,
            json!({"action": "none", "reason": "no uncommitted changes"}),
            now,
        );
    }

    let message = format!("auto-commit: {} files [intervention]", files.len());
    match ctx.repo.auto_commit(&message) {
        Ok(()) => {
            ctx.notifier.notify(
                "Changes committed automatically",
                &format!("Committed {} file(s)", files.len()),
            );
            event.auto_resolved = true;
            finish(
                event,
                InterventionStatus::Completed,
                json!({
                    "action": "auto_commit",
                    "files_committed": files.len(),
                    "commit_message": message,
                    "commit_time": now.to_rfc3339(),
                }),
                now,
            )
        }
        Err(e) => finish(
            event,
            InterventionStatus::Failed,
            json!({"action": "auto_commit", "error": format!("{e:#}")}),
            now,
        ),
    }
}

fn handle_conflict(
    event: &mut InterventionEvent,
    ctx: &HandlerContext<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    let EventDetails::MergeConflict {
        conflict_files,
        strategy,
    } = &event.details
    else {
        return Ok(());
    };
    let (conflict_files, strategy) = (conflict_files.clone(), *strategy);

    if !ctx.config.conflict.auto_resolve {
        if !event.user_notified {
            ctx.notifier.notify(
                &format!("Merge conflict in {} file(s)", conflict_files.len()),
                "Resolve the conflicts manually",
            );
            event.user_notified = true;
            return park(event, now);
        }
        if !ctx.repo.has_merge_conflicts()? {
            return finish(
                event,
                InterventionStatus::Completed,
                json!({"action": "none", "reason": "conflicts resolved manually"}),
                now,
            );
        }
        return park(event, now);
    }

    let mut resolved = Vec::new();
    let mut failed = Vec::new();
    for file in &conflict_files {
        match ctx.repo.resolve_conflict(file, strategy) {
            Ok(()) => resolved.push(file.clone()),
            Err(e) => {
                warn!(file = %file, error = %e, "conflict resolution failed");
                failed.push(json!({"file": file, "error": format!("{e:#}")}));
            }
        }
    }

    if !resolved.is_empty() {
        ctx.notifier.notify(
            &format!(
                "Resolved merge conflicts in {}/{} file(s)",
                resolved.len(),
                conflict_files.len()
            ),
            &format!("Strategy: {strategy}"),
        );
        event.user_notified = true;
    }
    if !failed.is_empty() {
        ctx.notifier.notify(
            &format!("{} conflict(s) could not be resolved", failed.len()),
            "Resolve these conflicts manually",
        );
    }

    let status = if failed.is_empty() {
        event.auto_resolved = true;
        InterventionStatus::Completed
    } else {
        InterventionStatus::Failed
    };
    finish(
        event,
        status,
        json!({
            "action": "auto_resolve",
            "strategy": strategy.to_string(),
            "resolved_files": resolved,
            "failed_files": failed,
            "resolution_time": now.to_rfc3339(),
        }),
        now,
    )
}

fn handle_code_issues(
    event: &mut InterventionEvent,
    ctx: &HandlerContext<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    let EventDetails::CodeStructureIssue {
        issues,
        issue_types,
    } = &event.details
    else {
        return Ok(());
    };
    let types: Vec<&str> = issue_types.iter().map(|t| t.title()).collect();
    ctx.notifier.notify(
        &format!("{} code issue(s) found", issues.len()),
        &format!("Issue types: {}", types.join(", ")),
    );
    let report = render_markdown(issues);
    event.user_notified = true;
    finish(
        event,
        InterventionStatus::Completed,
        json!({"action": "report", "report": report, "report_time": now.to_rfc3339()}),
        now,
    )
}

fn handle_banned(
    event: &mut InterventionEvent,
    ctx: &HandlerContext<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    if !ctx.config.banned.enabled {
        return finish(
            event,
            InterventionStatus::Ignored,
            json!({"reason": "banned reference removal disabled"}),
            now,
        );
    }

    let summary = ctx.remover.scan_and_replace(&event.repository_path);
    let replacement = &ctx.config.banned.replacement;
    let mut resolution = json!({
        "action": "auto_replace",
        "replacement": replacement,
        "result": summary,
        "replacement_time": now.to_rfc3339(),
    });

    if summary.files_modified == 0 {
        resolution["message"] = json!("nothing to replace");
        return finish(event, InterventionStatus::Completed, resolution, now);
    }

    ctx.notifier.notify(
        &format!(
            "Replaced {} banned reference(s) in {} file(s)",
            summary.references_replaced, summary.files_modified
        ),
        &format!("Replaced with: {replacement}"),
    );
    event.user_notified = true;
    event.auto_resolved = true;

    let message = format!(
        "banned-reference cleanup: {} references [intervention]",
        summary.references_replaced
    );
    resolution["commit"] = match ctx.repo.auto_commit(&message) {
        Ok(()) => json!({"success": true, "commit_time": now.to_rfc3339()}),
        Err(e) => json!({"success": false, "error": format!("{e:#}")}),
    };
    finish(event, InterventionStatus::Completed, resolution, now)
}

fn handle_pr_review(
    event: &mut InterventionEvent,
    ctx: &HandlerContext<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    if !ctx.config.pull_request.auto_review {
        return finish(
            event,
            InterventionStatus::Ignored,
            json!({"reason": "pull request automation disabled"}),
            now,
        );
    }
    let EventDetails::PrReview { title, description } = &event.details else {
        return Ok(());
    };
    let request = PullRequest {
        title: title.clone().unwrap_or_else(|| DEFAULT_PR_TITLE.to_string()),
        body: description
            .clone()
            .unwrap_or_else(|| DEFAULT_PR_BODY.to_string()),
        reviewer: ctx.config.pull_request.reviewer.clone(),
        base_branch: ctx.config.pull_request.base_branch.clone(),
    };

    match ctx.repo.create_pull_request(&request) {
        Ok(url) => {
            ctx.notifier.notify(
                "Pull request opened",
                &format!("Reviewer: {}\n{url}", request.reviewer),
            );
            event.user_notified = true;
            event.auto_resolved = true;
            finish(
                event,
                InterventionStatus::Completed,
                json!({
                    "action": "create_pr",
                    "pr_url": url,
                    "reviewer": request.reviewer,
                    "creation_time": now.to_rfc3339(),
                }),
                now,
            )
        }
        Err(e) => finish(
            event,
            InterventionStatus::Failed,
            json!({"action": "create_pr", "error": format!("{e:#}")}),
            now,
        ),
    }
}
