//! Repository monitor: a background polling loop that turns repository
//! signals into intervention events and drives them to completion.
//!
//! Each iteration of the loop ([`RepoWatcher::tick`]):
//!
//! 1. runs the git-status check when the reminder interval has elapsed,
//! 2. runs the code scan when the scan interval has elapsed,
//! 3. checks for merge conflicts,
//! 4. drains the event channel, processing each new event,
//! 5. revisits events parked in PENDING.
//!
//! [`Monitor`] owns the thread. Start and stop are idempotent; stop waits a
//! bounded time for the loop to observe the cancellation flag.

pub mod event;
pub mod handlers;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use event::{
    EventDetails, InterventionEvent, InterventionStatus, InterventionType, TransitionError,
};

use crate::config::ProjectConfig;
use crate::git::{ForgeTokens, GitCli, Repository};
use crate::log::{ExecutionLog, LogEvent};
use crate::notify::{self, Notifier};
use crate::paths;
use crate::scan::{BannedReferenceRemover, CodeScanner, IssueType};
use handlers::HandlerContext;

/// Sleep granularity of the loop; bounds how long a stop request goes unseen.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub const EVENTS_SCHEMA_VERSION: u32 = 1;

/// Event history shared between the loop and its callers.
#[derive(Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<InterventionEvent>>>,
}

impl EventLog {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<InterventionEvent>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: InterventionEvent) {
        self.lock().push(event);
    }

    /// Replace the stored event with the same id.
    pub fn update(&self, event: InterventionEvent) {
        let mut events = self.lock();
        if let Some(slot) = events.iter_mut().find(|e| e.event_id == event.event_id) {
            *slot = event;
        }
    }

    pub fn snapshot(&self) -> Vec<InterventionEvent> {
        self.lock().clone()
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<InterventionEvent> {
        let events = self.lock();
        events[events.len().saturating_sub(limit)..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn pending(&self) -> Vec<InterventionEvent> {
        self.lock()
            .iter()
            .filter(|e| e.status == InterventionStatus::Pending)
            .cloned()
            .collect()
    }

    fn has_open(&self, kind: InterventionType) -> bool {
        self.lock()
            .iter()
            .any(|e| e.intervention_type == kind && e.is_open())
    }

    /// A conflict event for exactly these files that is still pending or
    /// failed suppresses a new one.
    fn has_blocking_conflict(&self, files: &[String]) -> bool {
        let wanted: HashSet<&String> = files.iter().collect();
        self.lock().iter().any(|e| {
            let blocking = matches!(
                e.status,
                InterventionStatus::Pending
                    | InterventionStatus::InProgress
                    | InterventionStatus::Failed
            );
            match &e.details {
                EventDetails::MergeConflict { conflict_files, .. } if blocking => {
                    conflict_files.iter().collect::<HashSet<_>>() == wanted
                }
                _ => false,
            }
        })
    }
}

/// Owns the collaborators and timers of one monitored repository. Moved into
/// the monitor thread while running and handed back on stop.
pub struct RepoWatcher {
    repo: Box<dyn Repository>,
    notifier: Box<dyn Notifier>,
    scanner: CodeScanner,
    remover: BannedReferenceRemover,
    config: ProjectConfig,
    root: PathBuf,
    events: EventLog,
    tx: Sender<InterventionEvent>,
    rx: Receiver<InterventionEvent>,
    journal: Option<ExecutionLog>,
    last_git_check: Option<DateTime<Utc>>,
    last_scan: Option<DateTime<Utc>>,
}

impl RepoWatcher {
    pub fn new(
        repo: Box<dyn Repository>,
        notifier: Box<dyn Notifier>,
        config: ProjectConfig,
    ) -> Result<Self> {
        config.validate()?;
        let root = repo.repo_root().context("failed to resolve repository root")?;
        let scanner = CodeScanner::from_config(&config)?;
        let remover = BannedReferenceRemover::from_config(&config)?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            repo,
            notifier,
            scanner,
            remover,
            config,
            root,
            events: EventLog::default(),
            tx,
            rx,
            journal: None,
            last_git_check: None,
            last_scan: None,
        })
    }

    pub fn with_journal(mut self, journal: ExecutionLog) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub fn sender(&self) -> Sender<InterventionEvent> {
        self.tx.clone()
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Swap in a new config and rebuild the scanner and remover from it. The
    /// repository handle and notifier are kept. On error nothing changes.
    pub fn reconfigure(&mut self, config: ProjectConfig) -> Result<()> {
        config.validate()?;
        let scanner = CodeScanner::from_config(&config)?;
        let remover = BannedReferenceRemover::from_config(&config)?;
        self.scanner = scanner;
        self.remover = remover;
        self.config = config;
        debug!("watcher reconfigured");
        Ok(())
    }

    fn journal(&self, event: LogEvent) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.log(event) {
                warn!(error = %e, "failed to write monitor journal");
            }
        }
    }

    /// One loop iteration at time `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let reminder_every = interval(self.config.git.reminder_interval(), "check-in reminder")?;
        if is_due(self.last_git_check, reminder_every, now) {
            self.check_git_status(now)?;
            self.last_git_check = Some(now);
        }

        let scan_every = interval(self.config.scan.interval(), "scan")?;
        if is_due(self.last_scan, scan_every, now) {
            self.scan_code(now)?;
            self.last_scan = Some(now);
        }

        self.check_merge_conflicts(now)?;
        self.process_events(now);
        Ok(())
    }

    fn enqueue(&self, event: InterventionEvent) -> Result<()> {
        info!(event = %event.event_id, "{}", event.details.summary());
        self.tx.send(event).context("event queue closed")
    }

    fn check_git_status(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(last_commit) = self.repo.last_commit_time()? else {
            debug!("no commits yet, skipping check-in reminder");
            return Ok(());
        };
        let changes = self.repo.uncommitted_changes()?;
        if changes.is_empty() {
            return Ok(());
        }
        let reminder_every = interval(self.config.git.reminder_interval(), "check-in reminder")?;
        if now - last_commit < reminder_every {
            return Ok(());
        }
        if self.events.has_open(InterventionType::GitCheckinReminder) {
            debug!("check-in reminder already open");
            return Ok(());
        }
        self.enqueue(InterventionEvent::new(
            EventDetails::GitCheckinReminder {
                last_commit_time: Some(last_commit),
                uncommitted_files: changes,
                auto_checkin_timeout_mins: self.config.git.auto_checkin_timeout_mins,
                auto_checkin_deadline: None,
            },
            &self.root,
            now,
        ))
    }

    fn check_merge_conflicts(&self, now: DateTime<Utc>) -> Result<()> {
        let files = self.repo.conflict_files()?;
        if files.is_empty() || self.events.has_blocking_conflict(&files) {
            return Ok(());
        }
        self.enqueue(InterventionEvent::new(
            EventDetails::MergeConflict {
                conflict_files: files,
                strategy: self.config.conflict.strategy,
            },
            &self.root,
            now,
        ))
    }

    fn scan_code(&self, now: DateTime<Utc>) -> Result<()> {
        let issues = self.scanner.scan(&self.root);
        if issues.is_empty() {
            return Ok(());
        }
        let banned: Vec<_> = issues
            .iter()
            .filter(|i| i.issue_type == IssueType::BannedReference)
            .cloned()
            .collect();
        let mut issue_types: Vec<IssueType> = issues.iter().map(|i| i.issue_type).collect();
        issue_types.sort();
        issue_types.dedup();

        self.enqueue(InterventionEvent::new(
            EventDetails::CodeStructureIssue {
                issues,
                issue_types,
            },
            &self.root,
            now,
        ))?;

        if !banned.is_empty() && self.config.banned.enabled {
            self.enqueue(InterventionEvent::new(
                EventDetails::BannedReference {
                    issues: banned,
                    replacement: self.config.banned.replacement.clone(),
                },
                &self.root,
                now,
            ))?;
        }
        Ok(())
    }

    /// Process newly queued events, then revisit parked ones.
    fn process_events(&mut self, now: DateTime<Utc>) {
        let fresh: Vec<InterventionEvent> = self.rx.try_iter().collect();
        let fresh_ids: HashSet<String> = fresh.iter().map(|e| e.event_id.clone()).collect();

        for mut event in fresh {
            self.journal(LogEvent::EventCreated {
                id: event.event_id.clone(),
                kind: event.intervention_type.to_string(),
                message: event.details.summary(),
            });
            self.run_handler(&mut event, now);
            self.events.push(event);
        }

        for mut event in self.events.pending() {
            if fresh_ids.contains(&event.event_id) {
                continue;
            }
            self.run_handler(&mut event, now);
            self.events.update(event);
        }
    }

    fn run_handler(&self, event: &mut InterventionEvent, now: DateTime<Utc>) {
        let before = event.status;
        let ctx = HandlerContext {
            repo: self.repo.as_ref(),
            notifier: self.notifier.as_ref(),
            config: &self.config,
            remover: &self.remover,
        };
        if let Err(e) = handlers::process(event, &ctx, now) {
            warn!(error = %e, "event not processed");
            return;
        }
        if event.status != before {
            info!(event = %event.event_id, status = %event.status, "event updated");
            self.journal(LogEvent::EventUpdated {
                id: event.event_id.clone(),
                kind: event.intervention_type.to_string(),
                status: event.status.to_string(),
            });
        }
    }
}

fn interval(every: Duration, name: &str) -> Result<ChronoDuration> {
    ChronoDuration::from_std(every).with_context(|| format!("{name} interval is out of range"))
}

fn is_due(last: Option<DateTime<Utc>>, every: ChronoDuration, now: DateTime<Utc>) -> bool {
    last.is_none_or(|t| now - t >= every)
}

/// Outcome of a start or stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
    /// The loop did not exit in time; its thread was detached.
    StopTimedOut,
}

enum MonitorState {
    Idle(Box<RepoWatcher>),
    Running {
        stop: Arc<AtomicBool>,
        handle: JoinHandle<Box<RepoWatcher>>,
    },
    /// The watcher was lost to a detached or panicked thread.
    Detached,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub repository: PathBuf,
    pub total_events: usize,
    pub open_events: usize,
    pub poll_interval_secs: u64,
    pub checkin_reminder_interval_mins: u64,
    pub scan_interval_mins: u64,
    pub conflict_auto_resolve: bool,
    pub banned_reference_removal: bool,
    pub pr_auto_review: bool,
    /// A config update is waiting for the running loop to stop.
    pub restart_pending: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SavedEvents {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub repository: PathBuf,
    pub events: Vec<InterventionEvent>,
}

pub struct Monitor {
    state: MonitorState,
    events: EventLog,
    sender: Sender<InterventionEvent>,
    root: PathBuf,
    /// Config of the watcher as it will next run.
    config: ProjectConfig,
    pending_config: Option<ProjectConfig>,
}

impl Monitor {
    pub fn new(watcher: RepoWatcher) -> Self {
        Self {
            events: watcher.events(),
            sender: watcher.sender(),
            root: watcher.root().to_path_buf(),
            config: watcher.config.clone(),
            pending_config: None,
            state: MonitorState::Idle(Box::new(watcher)),
        }
    }

    /// Monitor the git repository containing `path` with the configured
    /// notifier, the project journal and forge tokens from the environment.
    pub fn for_repository(path: &Path, config: ProjectConfig) -> Result<Self> {
        Self::for_repository_with_tokens(path, config, ForgeTokens::from_env())
    }

    pub fn for_repository_with_tokens(
        path: &Path,
        config: ProjectConfig,
        tokens: ForgeTokens,
    ) -> Result<Self> {
        let repo = open_repository(path, &config, tokens)?;
        let journal = ExecutionLog::new(&paths::monitor_journal(repo.work_dir()))?;
        let notifier = notify::for_mode(config.monitor.notifications);
        let watcher = RepoWatcher::new(Box::new(repo), notifier, config)?.with_journal(journal);
        Ok(Self::new(watcher))
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, MonitorState::Running { .. })
    }

    /// Replace the monitor's config. An idle watcher takes it at once and
    /// `Ok(true)` is returned; a running loop keeps its current settings until
    /// it is stopped, after which the next start uses `config`.
    pub fn reconfigure(&mut self, config: ProjectConfig) -> Result<bool> {
        match &mut self.state {
            MonitorState::Idle(watcher) => {
                watcher.reconfigure(config.clone())?;
                self.config = config;
                self.pending_config = None;
                Ok(true)
            }
            MonitorState::Running { .. } => {
                config.validate()?;
                info!("config update deferred until the monitor is restarted");
                self.pending_config = Some(config);
                Ok(false)
            }
            MonitorState::Detached => {
                config.validate()?;
                self.config = config;
                Ok(true)
            }
        }
    }

    pub fn start(&mut self) -> Result<Lifecycle> {
        let watcher = match std::mem::replace(&mut self.state, MonitorState::Detached) {
            MonitorState::Idle(watcher) => watcher,
            running @ MonitorState::Running { .. } => {
                self.state = running;
                warn!("monitor already running");
                return Ok(Lifecycle::AlreadyRunning);
            }
            MonitorState::Detached => bail!("monitor thread was detached and cannot be restarted"),
        };

        watcher.journal(LogEvent::MonitorStarted {
            repo: self.root.display().to_string(),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let poll = Duration::from_secs(self.config.monitor.poll_interval_secs);
        let backoff = Duration::from_secs(self.config.monitor.error_backoff_secs);
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("intervene-monitor".to_string())
            .spawn(move || run_loop(watcher, &stop_flag, poll, backoff))
            .context("failed to spawn monitor thread")?;

        info!(repo = %self.root.display(), "monitor started");
        self.state = MonitorState::Running { stop, handle };
        Ok(Lifecycle::Started)
    }

    pub fn stop(&mut self) -> Lifecycle {
        let (stop, handle) = match std::mem::replace(&mut self.state, MonitorState::Detached) {
            MonitorState::Running { stop, handle } => (stop, handle),
            other => {
                self.state = other;
                warn!("monitor not running");
                return Lifecycle::NotRunning;
            }
        };

        stop.store(true, Ordering::Relaxed);
        let deadline =
            Instant::now().checked_add(Duration::from_secs(self.config.monitor.stop_timeout_secs));
        while !handle.is_finished() && deadline.is_none_or(|d| Instant::now() < d) {
            thread::sleep(SLEEP_SLICE);
        }
        if !handle.is_finished() {
            warn!("monitor thread did not stop in time, detaching");
            return Lifecycle::StopTimedOut;
        }

        match handle.join() {
            Ok(mut watcher) => {
                watcher.journal(LogEvent::MonitorStopped {
                    reason: "stop requested".to_string(),
                });
                if let Some(config) = self.pending_config.take() {
                    match watcher.reconfigure(config.clone()) {
                        Ok(()) => self.config = config,
                        Err(e) => warn!(error = %format!("{e:#}"), "deferred config update dropped"),
                    }
                }
                self.state = MonitorState::Idle(watcher);
                info!("monitor stopped");
            }
            Err(_) => warn!("monitor thread panicked"),
        }
        Lifecycle::Stopped
    }

    /// Queue a pull request event; it is handled on the next loop iteration.
    pub fn request_pull_request(
        &self,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<String> {
        let event = InterventionEvent::new(
            EventDetails::PrReview { title, description },
            &self.root,
            Utc::now(),
        );
        let id = event.event_id.clone();
        self.sender.send(event).context("event queue closed")?;
        Ok(id)
    }

    pub fn events(&self) -> Vec<InterventionEvent> {
        self.events.snapshot()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<InterventionEvent> {
        self.events.recent(limit)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn status(&self) -> MonitorStatus {
        let events = self.events.snapshot();
        MonitorStatus {
            running: self.is_running(),
            repository: self.root.clone(),
            total_events: events.len(),
            open_events: events.iter().filter(|e| e.is_open()).count(),
            poll_interval_secs: self.config.monitor.poll_interval_secs,
            checkin_reminder_interval_mins: self.config.git.checkin_reminder_interval_mins,
            scan_interval_mins: self.config.scan.interval_mins,
            conflict_auto_resolve: self.config.conflict.auto_resolve,
            banned_reference_removal: self.config.banned.enabled,
            pr_auto_review: self.config.pull_request.auto_review,
            restart_pending: self.pending_config.is_some(),
        }
    }

    /// Write the event history to `dir/intervention_events_<timestamp>.json`.
    pub fn save_events(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let stem = format!(
            "intervention_events_{}",
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = paths::unique_file(dir, &stem, "json");
        let saved = SavedEvents {
            schema_version: EVENTS_SCHEMA_VERSION,
            saved_at: Utc::now(),
            repository: self.root.clone(),
            events: self.events.snapshot(),
        };
        let json = serde_json::to_string_pretty(&saved).context("failed to serialize events")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), events = saved.events.len(), "events saved");
        Ok(path)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

/// Open the repository containing `path`, carrying `tokens` for forge API calls.
fn open_repository(path: &Path, config: &ProjectConfig, tokens: ForgeTokens) -> Result<GitCli> {
    Ok(GitCli::discover(path, config.git.command_timeout())?.with_tokens(tokens))
}

fn run_loop(
    mut watcher: Box<RepoWatcher>,
    stop: &AtomicBool,
    poll: Duration,
    backoff: Duration,
) -> Box<RepoWatcher> {
    while !stop.load(Ordering::Relaxed) {
        let wait = match watcher.tick(Utc::now()) {
            Ok(()) => poll,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "monitor iteration failed, backing off");
                watcher.journal(LogEvent::CheckFailed {
                    error: format!("{e:#}"),
                });
                backoff
            }
        };
        sleep_unless_stopped(stop, wait);
    }
    watcher
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now().checked_add(total);
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        let slice = match deadline {
            Some(deadline) if now >= deadline => return,
            Some(deadline) => SLEEP_SLICE.min(deadline - now),
            None => SLEEP_SLICE,
        };
        thread::sleep(slice);
    }
}
