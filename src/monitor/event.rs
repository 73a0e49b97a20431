//! Intervention events and their state machine.
//!
//! ```text
//! PENDING ──► IN_PROGRESS ──► COMPLETED
//!    ▲             │    ├───► FAILED
//!    └─────────────┘    └───► IGNORED
//! ```
//!
//! A handler may park an event back in PENDING (waiting for a deadline or
//! the user); it is revisited on the next monitor iteration.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::git::ConflictStrategy;
use crate::scan::{IssueType, ScanIssue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    GitCheckinReminder,
    MergeConflict,
    CodeStructureIssue,
    BannedReference,
    PrReview,
    Unknown,
}

impl InterventionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InterventionType::GitCheckinReminder => "git_checkin_reminder",
            InterventionType::MergeConflict => "merge_conflict",
            InterventionType::CodeStructureIssue => "code_structure_issue",
            InterventionType::BannedReference => "banned_reference",
            InterventionType::PrReview => "pr_review",
            InterventionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InterventionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Ignored,
}

impl InterventionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InterventionStatus::Pending => "pending",
            InterventionStatus::InProgress => "in_progress",
            InterventionStatus::Completed => "completed",
            InterventionStatus::Failed => "failed",
            InterventionStatus::Ignored => "ignored",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InterventionStatus::Completed | InterventionStatus::Failed | InterventionStatus::Ignored
        )
    }

    pub fn can_transition_to(self, to: InterventionStatus) -> bool {
        use InterventionStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Pending)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Ignored)
        )
    }
}

impl fmt::Display for InterventionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("event {event_id}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub event_id: String,
    pub from: InterventionStatus,
    pub to: InterventionStatus,
}

/// Kind-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    GitCheckinReminder {
        last_commit_time: Option<DateTime<Utc>>,
        uncommitted_files: Vec<String>,
        auto_checkin_timeout_mins: u64,
        #[serde(default)]
        auto_checkin_deadline: Option<DateTime<Utc>>,
    },
    MergeConflict {
        conflict_files: Vec<String>,
        strategy: ConflictStrategy,
    },
    CodeStructureIssue {
        issues: Vec<ScanIssue>,
        issue_types: Vec<IssueType>,
    },
    BannedReference {
        issues: Vec<ScanIssue>,
        replacement: String,
    },
    PrReview {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl EventDetails {
    pub fn intervention_type(&self) -> InterventionType {
        match self {
            EventDetails::GitCheckinReminder { .. } => InterventionType::GitCheckinReminder,
            EventDetails::MergeConflict { .. } => InterventionType::MergeConflict,
            EventDetails::CodeStructureIssue { .. } => InterventionType::CodeStructureIssue,
            EventDetails::BannedReference { .. } => InterventionType::BannedReference,
            EventDetails::PrReview { .. } => InterventionType::PrReview,
            EventDetails::Unknown => InterventionType::Unknown,
        }
    }

    /// One-line description for logs and journals.
    pub fn summary(&self) -> String {
        match self {
            EventDetails::GitCheckinReminder {
                uncommitted_files, ..
            } => format!("{} uncommitted file(s)", uncommitted_files.len()),
            EventDetails::MergeConflict { conflict_files, .. } => {
                format!("{} conflicted file(s)", conflict_files.len())
            }
            EventDetails::CodeStructureIssue { issues, .. } => {
                format!("{} code issue(s)", issues.len())
            }
            EventDetails::BannedReference { issues, .. } => {
                format!("{} banned reference(s)", issues.len())
            }
            EventDetails::PrReview { title, .. } => {
                format!("pull request: {}", title.as_deref().unwrap_or("(default title)"))
            }
            EventDetails::Unknown => "unrecognised event payload".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InterventionEvent {
    pub event_id: String,
    pub intervention_type: InterventionType,
    pub status: InterventionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub details: EventDetails,
    pub repository_path: PathBuf,
    #[serde(default)]
    pub user_notified: bool,
    #[serde(default)]
    pub auto_resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_details: Option<Value>,
}

impl InterventionEvent {
    pub fn new(details: EventDetails, repository_path: &Path, now: DateTime<Utc>) -> Self {
        let intervention_type = details.intervention_type();
        let short = Uuid::new_v4().simple().to_string();
        Self {
            event_id: format!("{}_{}", intervention_type, &short[..12]),
            intervention_type,
            status: InterventionStatus::Pending,
            created_at: now,
            updated_at: now,
            details,
            repository_path: repository_path.to_path_buf(),
            user_notified: false,
            auto_resolved: false,
            resolution_details: None,
        }
    }

    pub fn transition(
        &mut self,
        to: InterventionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                event_id: self.event_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            InterventionStatus::Pending | InterventionStatus::InProgress
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const ALL: [InterventionStatus; 5] = [
        InterventionStatus::Pending,
        InterventionStatus::InProgress,
        InterventionStatus::Completed,
        InterventionStatus::Failed,
        InterventionStatus::Ignored,
    ];

    fn reminder() -> InterventionEvent {
        InterventionEvent::new(
            EventDetails::GitCheckinReminder {
                last_commit_time: None,
                uncommitted_files: vec!["a.rs".to_string()],
                auto_checkin_timeout_mins: 10,
                auto_checkin_deadline: None,
            },
            Path::new("/repo"),
            Utc::now(),
        )
    }

    #[test]
    fn new_event_is_pending_with_typed_id() {
        let event = reminder();
        assert_eq!(event.status, InterventionStatus::Pending);
        assert_eq!(event.intervention_type, InterventionType::GitCheckinReminder);
        assert!(event.event_id.starts_with("git_checkin_reminder_"));
        assert!(event.is_open());
    }

    #[test]
    fn legal_lifecycle() {
        let mut event = reminder();
        let now = Utc::now();
        event.transition(InterventionStatus::InProgress, now).unwrap();
        event.transition(InterventionStatus::Pending, now).unwrap();
        event.transition(InterventionStatus::InProgress, now).unwrap();
        event.transition(InterventionStatus::Completed, now).unwrap();
        assert!(!event.is_open());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut event = reminder();
        let now = Utc::now();
        event.transition(InterventionStatus::InProgress, now).unwrap();
        event.transition(InterventionStatus::Failed, now).unwrap();
        let err = event.transition(InterventionStatus::InProgress, now).unwrap_err();
        assert_eq!(err.from, InterventionStatus::Failed);
        assert_eq!(event.status, InterventionStatus::Failed);
    }

    #[test]
    fn pending_cannot_skip_in_progress() {
        let mut event = reminder();
        assert!(event.transition(InterventionStatus::Completed, Utc::now()).is_err());
    }

    #[test]
    fn event_serializes_with_kind_tag() {
        let event = reminder();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["intervention_type"], "git_checkin_reminder");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["details"]["kind"], "git_checkin_reminder");
        assert!(value.get("resolution_details").is_none());

        let back: InterventionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn unknown_detail_kind_decodes_as_unknown() {
        let details: EventDetails =
            serde_json::from_value(json!({"kind": "pr_reviewer_setting"})).unwrap();
        assert_eq!(details, EventDetails::Unknown);
        assert_eq!(details.intervention_type(), InterventionType::Unknown);
    }

    proptest! {
        #[test]
        fn terminal_states_have_no_exits(
            from in prop::sample::select(ALL.to_vec()),
            to in prop::sample::select(ALL.to_vec()),
        ) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
            if from.can_transition_to(to) {
                prop_assert!(from != to);
            }
        }
    }
}
