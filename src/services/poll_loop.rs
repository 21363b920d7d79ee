//! Background poll loop.
//!
//! One cycle:
//! - queries open changes for every configured project
//! - diffs the result against the seen-state store
//! - fetches details of new/updated changes concurrently
//! - evaluates each change and posts approvals for eligible ones
//! - commits processed changes and reports cycle counters
//!
//! Cycles run strictly one after another inside a single task, so a slow
//! cycle delays the next tick instead of overlapping with it.

use crate::error::AppError;
use crate::models::{sort_recent_first, ChangeDetail, ChangeSummary, EligibilityVerdict};
use crate::services::detail_loader;
use crate::services::eligibility::EligibilityEvaluator;
use crate::services::review_service::ReviewService;
use crate::services::seen_state::SeenStateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Poll loop configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Time between cycle starts.
    pub interval: Duration,

    /// Username the bot reviews as.
    pub self_identity: String,

    /// Username of the CI account; empty disables the Verified check.
    pub ci_identity: String,

    /// Change query, without project restriction.
    pub query: String,

    /// Projects to query; empty means one unrestricted query.
    pub projects: Vec<String>,

    /// Message posted with an approval.
    pub approval_message: String,

    /// Print every fetched change, not only the ones approved.
    pub verbose: bool,
}

/// Where the loop currently is within a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Querying,
    Diffing,
    Fetching,
    Evaluating,
    Reporting,
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Changes returned by the queries.
    pub seen: usize,

    /// Changes that were new or had a new timestamp.
    pub updated: usize,

    /// Changes that disappeared since the last cycle.
    pub deleted: usize,

    /// Detail fetches that failed.
    pub fetch_failed: usize,

    /// Changes found eligible for approval.
    pub ready: usize,

    /// Approvals successfully posted.
    pub approved: usize,

    /// Approvals that failed to post.
    pub post_failed: usize,

    /// Wall time of the cycle in milliseconds.
    pub duration_ms: u64,
}

/// Status shared with [`PollHandle`] holders.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStatus {
    /// Cycles started, including aborted ones.
    pub cycles_run: u64,

    /// Report of the last completed cycle.
    pub last_report: Option<CycleReport>,

    /// Error that aborted the last cycle, cleared on success.
    pub last_error: Option<String>,

    /// When the last cycle finished.
    pub last_cycle_at: Option<DateTime<Utc>>,

    /// Phase of the cycle in progress, `idle` between cycles.
    pub phase: CyclePhase,
}

/// Commands that can be sent to the poll loop.
#[derive(Debug)]
pub enum PollCommand {
    /// Run a cycle now, after any cycle in progress.
    TriggerCycle,

    /// Stop the loop once the current cycle is done.
    Stop,
}

/// Lightweight handle for controlling the background poll loop.
#[derive(Clone)]
pub struct PollHandle {
    command_tx: mpsc::Sender<PollCommand>,
    status: Arc<RwLock<PollStatus>>,
}

impl PollHandle {
    /// Request an extra cycle.
    pub async fn trigger_cycle(&self) -> Result<(), AppError> {
        self.command_tx
            .send(PollCommand::TriggerCycle)
            .await
            .map_err(|_| AppError::internal("Poll loop not running"))
    }

    /// Ask the loop to stop.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.command_tx
            .send(PollCommand::Stop)
            .await
            .map_err(|_| AppError::internal("Poll loop not running"))
    }

    /// Snapshot of the loop status.
    pub async fn status(&self) -> PollStatus {
        self.status.read().await.clone()
    }
}

/// The poll loop and its owned state.
pub struct PollLoop<S> {
    service: S,
    store: SeenStateStore,
    evaluator: EligibilityEvaluator,
    config: PollConfig,
    phase: CyclePhase,
    status: Arc<RwLock<PollStatus>>,
}

impl<S: ReviewService> PollLoop<S> {
    /// Create a loop with an empty seen-state store.
    pub fn new(service: S, config: PollConfig) -> Self {
        let evaluator = EligibilityEvaluator::new(
            config.self_identity.clone(),
            config.ci_identity.clone(),
            config.approval_message.clone(),
        );
        Self {
            service,
            store: SeenStateStore::new(),
            evaluator,
            config,
            phase: CyclePhase::Idle,
            status: Arc::new(RwLock::new(PollStatus::default())),
        }
    }

    pub fn store(&self) -> &SeenStateStore {
        &self.store
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    async fn set_phase(&mut self, phase: CyclePhase) {
        self.phase = phase;
        self.status.write().await.phase = phase;
    }

    /// Run every project query; any failure discards the whole result.
    async fn query_all(&self) -> Result<Vec<ChangeSummary>, AppError> {
        if self.config.projects.is_empty() {
            return self.service.query_changes(&self.config.query, None).await;
        }

        let mut all = Vec::new();
        for project in &self.config.projects {
            let list = self
                .service
                .query_changes(&self.config.query, Some(project))
                .await
                .map_err(|e| {
                    log::error!("[poll] Query for project {} failed: {}", project, e);
                    e
                })?;
            log::debug!("[poll] Project {} has {} change(s)", project, list.len());
            all.extend(list);
        }
        Ok(all)
    }

    /// Run one full cycle.
    ///
    /// Returns an error only when querying fails; the store is then left
    /// untouched. Per-change failures are counted in the report instead.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, AppError> {
        let start = Instant::now();
        let mut report = CycleReport::default();

        self.set_phase(CyclePhase::Querying).await;
        let summaries = match self.query_all().await {
            Ok(s) => s,
            Err(e) => {
                self.set_phase(CyclePhase::Idle).await;
                return Err(e);
            }
        };
        report.seen = summaries.len();
        log::info!("[poll] Total {} change(s)", summaries.len());

        self.set_phase(CyclePhase::Diffing).await;
        let diff = self.store.diff(&summaries);
        for id in &diff.deleted_since {
            log::info!("[poll] Change {} was deleted", id);
            self.store.remove(id);
        }
        for summary in summaries.iter().filter(|s| diff.new_or_updated.contains(&s.id)) {
            if self.store.get(&summary.id).is_none() {
                log::info!("[poll] New change {} - {}", summary.id, summary.subject);
            } else {
                log::info!("[poll] Change {} updated at {}", summary.id, summary.updated);
            }
        }
        report.updated = diff.new_or_updated.len();
        report.deleted = diff.deleted_since.len();
        log::info!("[poll] Updated: {}, Deleted: {}", report.updated, report.deleted);

        if !diff.new_or_updated.is_empty() {
            self.set_phase(CyclePhase::Fetching).await;
            let results = detail_loader::load_all(&self.service, &diff.new_or_updated).await;
            let (mut details, failed) = detail_loader::partition(results);
            report.fetch_failed = failed.len();

            self.set_phase(CyclePhase::Evaluating).await;
            sort_recent_first(&mut details);
            for detail in &details {
                self.process_change(detail, &mut report).await;
            }
        }

        self.set_phase(CyclePhase::Reporting).await;
        report.duration_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "[poll] Seen: {}, Updated: {}, Deleted: {}, Ready: {}, Approved: {}, Failed: {}",
            report.seen,
            report.updated,
            report.deleted,
            report.ready,
            report.approved,
            report.fetch_failed + report.post_failed
        );

        self.set_phase(CyclePhase::Idle).await;
        Ok(report)
    }

    /// Evaluate one change, post if eligible, and commit when done.
    async fn process_change(&mut self, detail: &ChangeDetail, report: &mut CycleReport) {
        let verdict = self.evaluator.evaluate(detail);

        if self.config.verbose {
            log_change(detail, &verdict);
        }

        let Some(approval) = verdict.approval.as_ref().filter(|_| verdict.eligible) else {
            if let Some(reason) = verdict.reason() {
                log::debug!("[poll] SKIP {}: {}", detail.id, reason);
            }
            self.store.commit(&detail.id, &detail.updated);
            return;
        };

        report.ready += 1;
        if !self.config.verbose {
            log_change(detail, &verdict);
        }

        log::info!("[poll] ALL OK {}: {}", detail.id, approval.message);
        let posted = self
            .service
            .post_review(&detail.id, &approval.message, approval.mark)
            .await;
        match posted {
            Ok(reply) => {
                match reply.code_review {
                    Some(mark) => log::info!("[poll] Posted review on {}: {:+}", detail.id, mark),
                    None => log::info!("[poll] Posted review on {}", detail.id),
                }
                report.approved += 1;
                self.store.commit(&detail.id, &detail.updated);
            }
            Err(e) => {
                log::warn!("[poll] Post failed for {}: {}", detail.id, e);
                report.post_failed += 1;
            }
        }
    }

    async fn record_cycle(&self, result: &Result<CycleReport, AppError>) {
        let mut status = self.status.write().await;
        status.cycles_run += 1;
        status.last_cycle_at = Some(Utc::now());
        match result {
            Ok(report) => {
                status.last_report = Some(report.clone());
                status.last_error = None;
            }
            Err(e) => status.last_error = Some(e.to_string()),
        }
    }

    async fn run_and_record(&mut self) {
        let result = self.run_cycle().await;
        if let Err(e) = &result {
            log::error!("[poll] Cycle aborted: {}", e);
        }
        self.record_cycle(&result).await;
    }

    /// Run cycles until a [`PollCommand::Stop`] arrives.
    ///
    /// The first tick fires immediately, so a cycle runs at startup. Once
    /// every [`PollHandle`] is dropped the loop keeps polling on its own.
    pub async fn run(mut self, mut commands: mpsc::Receiver<PollCommand>) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    log::debug!("[poll] Tick");
                    self.run_and_record().await;
                }
                cmd = commands.recv(), if commands_open => {
                    match cmd {
                        Some(PollCommand::TriggerCycle) => {
                            log::info!("[poll] Manual cycle triggered");
                            self.run_and_record().await;
                        }
                        Some(PollCommand::Stop) => {
                            log::info!("[poll] Poll loop stopping");
                            break;
                        }
                        None => {
                            log::debug!("[poll] All handles dropped, polling on timer only");
                            commands_open = false;
                        }
                    }
                }
            }
        }
        log::info!("[poll] Poll loop stopped");
    }
}

impl<S: ReviewService + 'static> PollLoop<S> {
    /// Spawn the loop on the runtime and return a handle to it.
    pub fn start_background(self) -> (PollHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<PollCommand>(16);
        let handle = PollHandle {
            command_tx: tx,
            status: self.status.clone(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }
}

/// Print a change and its votes.
fn log_change(detail: &ChangeDetail, verdict: &EligibilityVerdict) {
    log::info!("Change ID: {}", detail.id);
    log::info!("  Project: {}", detail.project);
    log::info!("  Branch: {}", detail.branch);
    log::info!("  Owner: {}", detail.owner);
    log::info!("  Subject: {}", detail.subject);
    log::info!("  Updated: {}", detail.updated_short());
    if let Some(verified) = verdict.verified {
        log::info!("  Verified: {}", verified);
    }
    for vote in &detail.labels.code_review.all {
        log::info!("  Review: {} : {}", vote.reviewer, vote.value);
    }
}
