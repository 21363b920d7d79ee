//! Poll cycle tests.
//!
//! These tests drive the poll loop against an in-memory Gerrit that behaves
//! like the real server: posting a review records the vote and bumps the
//! change's `updated` timestamp.
//!
//! Scenarios:
//! 1. Eligible changes are approved, others are only remembered
//! 2. Unchanged changes are not fetched again
//! 3. Failed fetches and failed posts are retried on the next cycle
//! 4. A failing project query aborts the cycle without touching state
//! 5. Changes that leave the query result are forgotten
//! 6. The background loop never runs two cycles at once
//! 7. The background loop only ends on an explicit stop

use async_trait::async_trait;
use gerrit_autoreview::error::AppError;
use gerrit_autoreview::models::{
    ChangeDetail, ChangeSummary, LabelState, ReviewLabelSet, ReviewVote,
};
use gerrit_autoreview::services::poll_loop::CyclePhase;
use gerrit_autoreview::services::{PollConfig, PollLoop, ReviewReply, ReviewService};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BOT: &str = "bot";
const CI: &str = "jenkins";

#[derive(Default)]
struct FakeState {
    changes: BTreeMap<String, ChangeDetail>,
    failing_fetch: HashSet<String>,
    failing_post: HashSet<String>,
    failing_project: Option<String>,
    queries: Vec<Option<String>>,
    fetches: Vec<String>,
    posts: Vec<(String, i32)>,
    clock: u32,
    fetch_delay: Option<Duration>,
    bump_on_query: bool,
    fetches_in_flight: usize,
    peak_fetches: usize,
    overlap_detected: bool,
}

#[derive(Clone, Default)]
struct FakeGerrit {
    state: Arc<Mutex<FakeState>>,
}

fn timestamp(n: u32) -> String {
    format!("2024-01-01 {:02}:{:02}:00.000000000", n / 60, n % 60)
}

impl FakeGerrit {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn add(&self, mut detail: ChangeDetail) {
        let mut state = self.state();
        state.clock += 1;
        detail.updated = timestamp(state.clock);
        state.changes.insert(detail.id.clone(), detail);
    }

    fn remove(&self, id: &str) {
        self.state().changes.remove(id);
    }

    fn fetches(&self) -> Vec<String> {
        self.state().fetches.clone()
    }

    fn posts(&self) -> Vec<(String, i32)> {
        self.state().posts.clone()
    }
}

#[async_trait]
impl ReviewService for FakeGerrit {
    async fn query_changes(
        &self,
        _query: &str,
        project: Option<&str>,
    ) -> Result<Vec<ChangeSummary>, AppError> {
        let mut state = self.state();
        if state.fetches_in_flight > 0 {
            state.overlap_detected = true;
        }
        state.queries.push(project.map(String::from));
        if project.is_some() && state.failing_project.as_deref() == project {
            return Err(AppError::network("connection refused"));
        }
        if state.bump_on_query {
            state.clock += 1;
            let now = timestamp(state.clock);
            for change in state.changes.values_mut() {
                change.updated = now.clone();
            }
        }

        Ok(state
            .changes
            .values()
            .filter(|c| project.map_or(true, |p| c.project == p))
            .map(|c| ChangeSummary {
                id: c.id.clone(),
                project: c.project.clone(),
                branch: c.branch.clone(),
                subject: c.subject.clone(),
                updated: c.updated.clone(),
                mergeable: c.mergeable,
                owner: c.owner.clone(),
            })
            .collect())
    }

    async fn fetch_detail(&self, id: &str) -> Result<ChangeDetail, AppError> {
        let delay = {
            let mut state = self.state();
            state.fetches.push(id.to_string());
            state.fetches_in_flight += 1;
            state.peak_fetches = state.peak_fetches.max(state.fetches_in_flight);
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.fetches_in_flight -= 1;
        if state.failing_fetch.contains(id) {
            return Err(AppError::gerrit_api_full("boom", 500, format!("/a/changes/{}", id)));
        }
        state
            .changes
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("Change", id))
    }

    async fn post_review(
        &self,
        id: &str,
        _message: &str,
        mark: i32,
    ) -> Result<ReviewReply, AppError> {
        let mut state = self.state();
        if state.failing_post.contains(id) {
            return Err(AppError::gerrit_api_full("conflict", 409, "/review"));
        }
        state.posts.push((id.to_string(), mark));
        state.clock += 1;
        let now = timestamp(state.clock);
        let change = state
            .changes
            .get_mut(id)
            .ok_or_else(|| AppError::not_found_with_id("Change", id))?;
        for vote in change.labels.code_review.all.iter_mut() {
            if vote.reviewer == BOT {
                vote.value = mark;
            }
        }
        change.updated = now;
        Ok(ReviewReply {
            code_review: Some(mark),
        })
    }
}

fn votes(list: &[(&str, i32)]) -> LabelState {
    LabelState {
        all: list.iter().map(|(r, v)| ReviewVote::new(*r, *v)).collect(),
        default_value: 0,
    }
}

fn change(id: &str, project: &str, reviews: &[(&str, i32)]) -> ChangeDetail {
    ChangeDetail {
        id: id.to_string(),
        project: project.to_string(),
        branch: "master".to_string(),
        subject: format!("Change {}", id),
        updated: String::new(),
        owner: "alice".to_string(),
        mergeable: true,
        labels: ReviewLabelSet {
            verified: votes(&[(CI, 1)]),
            code_review: votes(reviews),
        },
    }
}

fn config(projects: &[&str]) -> PollConfig {
    PollConfig {
        interval: Duration::from_secs(60),
        self_identity: BOT.to_string(),
        ci_identity: CI.to_string(),
        query: "is:reviewer status:open -owner:self".to_string(),
        projects: projects.iter().map(|p| p.to_string()).collect(),
        approval_message: "auto-approve".to_string(),
        verbose: false,
    }
}

#[tokio::test]
async fn test_first_cycle_approves_only_eligible_changes() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("good", "core", &[(BOT, 1), ("bob", 1)]));
    gerrit.add(change("negative", "core", &[(BOT, 1), ("bob", -1)]));

    let mut poll = PollLoop::new(gerrit.clone(), config(&["core"]));
    let report = poll.run_cycle().await.unwrap();

    assert_eq!(report.seen, 2);
    assert_eq!(report.updated, 2);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.ready, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(gerrit.posts(), vec![("good".to_string(), 2)]);

    // Both were processed, so both are remembered
    assert_eq!(poll.store().len(), 2);
    assert_eq!(poll.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_unchanged_changes_are_not_refetched() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("good", "core", &[(BOT, 1), ("bob", 1)]));
    gerrit.add(change("waiting", "core", &[(BOT, 1), ("bob", 0)]));

    let mut poll = PollLoop::new(gerrit.clone(), config(&["core"]));
    poll.run_cycle().await.unwrap();
    gerrit.state().fetches.clear();

    // Approving "good" bumped its timestamp; "waiting" is untouched
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.approved, 0);
    assert_eq!(gerrit.fetches(), vec!["good".to_string()]);

    // Nothing moved since, so nothing is fetched
    gerrit.state().fetches.clear();
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.updated, 0);
    assert!(gerrit.fetches().is_empty());
    assert_eq!(gerrit.posts().len(), 1);
}

#[tokio::test]
async fn test_fetch_failure_is_retried_next_cycle() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("flaky", "core", &[(BOT, 1), ("bob", 2)]));
    gerrit.add(change("steady", "core", &[(BOT, 1), ("bob", 0)]));
    gerrit.state().failing_fetch.insert("flaky".to_string());

    let mut poll = PollLoop::new(gerrit.clone(), config(&["core"]));
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.fetch_failed, 1);
    assert_eq!(report.approved, 0);
    assert_eq!(poll.store().get("flaky"), None);
    assert!(poll.store().get("steady").is_some());

    gerrit.state().failing_fetch.clear();
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(gerrit.posts(), vec![("flaky".to_string(), 2)]);
}

#[tokio::test]
async fn test_post_failure_is_not_committed() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("good", "core", &[(BOT, 1), ("bob", 1)]));
    gerrit.add(change("also-good", "core", &[(BOT, 1), ("carol", 1)]));
    gerrit.state().failing_post.insert("good".to_string());

    let mut poll = PollLoop::new(gerrit.clone(), config(&["core"]));
    let report = poll.run_cycle().await.unwrap();

    // One failed post does not stop the other change
    assert_eq!(report.ready, 2);
    assert_eq!(report.post_failed, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(poll.store().get("good"), None);

    gerrit.state().failing_post.clear();
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.approved, 1);
    assert!(gerrit.posts().contains(&("good".to_string(), 2)));
}

#[tokio::test]
async fn test_query_failure_aborts_cycle_without_touching_state() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));
    gerrit.add(change("b", "tools", &[(BOT, 1), ("bob", 0)]));

    let mut poll = PollLoop::new(gerrit.clone(), config(&["core", "tools"]));
    poll.run_cycle().await.unwrap();
    assert_eq!(poll.store().len(), 2);

    gerrit.state().failing_project = Some("tools".to_string());
    gerrit.add(change("c", "core", &[(BOT, 1), ("bob", 1)]));
    gerrit.state().fetches.clear();

    let err = poll.run_cycle().await.unwrap_err();
    assert!(matches!(err, AppError::Network { .. }));

    // "b" was not treated as deleted and "c" was not acted on
    assert_eq!(poll.store().len(), 2);
    assert!(poll.store().get("b").is_some());
    assert!(gerrit.fetches().is_empty());
    assert!(gerrit.posts().is_empty());
}

#[tokio::test]
async fn test_deleted_changes_are_forgotten() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));
    gerrit.add(change("b", "core", &[(BOT, 1), ("bob", 0)]));

    let mut poll = PollLoop::new(gerrit.clone(), config(&["core"]));
    poll.run_cycle().await.unwrap();

    gerrit.remove("a");
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.updated, 0);
    assert_eq!(poll.store().get("a"), None);
    assert!(poll.store().get("b").is_some());
}

#[tokio::test]
async fn test_projects_are_queried_separately() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));
    gerrit.add(change("b", "tools", &[(BOT, 1), ("bob", 0)]));
    gerrit.add(change("c", "docs", &[(BOT, 1), ("bob", 0)]));

    let mut poll = PollLoop::new(gerrit.clone(), config(&["core", "tools"]));
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.seen, 2);
    assert_eq!(
        gerrit.state().queries,
        vec![Some("core".to_string()), Some("tools".to_string())]
    );
}

#[tokio::test]
async fn test_no_projects_runs_one_unfiltered_query() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));
    gerrit.add(change("b", "tools", &[(BOT, 1), ("bob", 0)]));

    let mut poll = PollLoop::new(gerrit.clone(), config(&[]));
    let report = poll.run_cycle().await.unwrap();
    assert_eq!(report.seen, 2);
    assert_eq!(gerrit.state().queries, vec![None]);
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_never_overlaps_cycles() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));
    gerrit.add(change("b", "core", &[(BOT, 1), ("bob", 0)]));
    {
        let mut state = gerrit.state();
        // Every cycle sees new timestamps and fetching outlasts the interval
        state.bump_on_query = true;
        state.fetch_delay = Some(Duration::from_millis(50));
    }

    let mut cfg = config(&["core"]);
    cfg.interval = Duration::from_millis(10);
    let (handle, task) = PollLoop::new(gerrit.clone(), cfg).start_background();

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await.unwrap();
    task.await.unwrap();

    let queries = gerrit.state().queries.len();
    let state = gerrit.state();
    assert!(!state.overlap_detected, "a query ran while fetches were in flight");
    assert_eq!(state.peak_fetches, 2);
    assert!(queries >= 2, "expected several cycles, got {}", queries);
}

#[tokio::test(start_paused = true)]
async fn test_handle_triggers_extra_cycle() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));

    let mut cfg = config(&["core"]);
    cfg.interval = Duration::from_secs(3600);
    let (handle, task) = PollLoop::new(gerrit.clone(), cfg).start_background();

    // The first tick fires immediately
    while handle.status().await.cycles_run < 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    handle.trigger_cycle().await.unwrap();
    handle.stop().await.unwrap();
    task.await.unwrap();

    let status = handle.status().await;
    assert_eq!(status.cycles_run, 2);
    assert!(status.last_error.is_none());
    let report = status.last_report.unwrap();
    assert_eq!(report.seen, 1);
    assert_eq!(report.updated, 0);

    // The loop is gone, so commands fail
    assert!(handle.trigger_cycle().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_loop_keeps_polling_after_handles_dropped() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));

    let mut cfg = config(&["core"]);
    cfg.interval = Duration::from_millis(10);
    let (handle, task) = PollLoop::new(gerrit.clone(), cfg).start_background();
    drop(handle);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished(), "loop ended without a stop command");
    let queries = gerrit.state().queries.len();
    assert!(queries >= 2, "expected timer-driven cycles, got {}", queries);

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_phase_during_cycle() {
    let gerrit = FakeGerrit::default();
    gerrit.add(change("a", "core", &[(BOT, 1), ("bob", 0)]));
    gerrit.state().fetch_delay = Some(Duration::from_millis(50));

    let mut cfg = config(&["core"]);
    cfg.interval = Duration::from_secs(3600);
    let (handle, task) = PollLoop::new(gerrit.clone(), cfg).start_background();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.status().await.phase, CyclePhase::Fetching);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = handle.status().await;
    assert_eq!(status.phase, CyclePhase::Idle);
    assert_eq!(status.cycles_run, 1);

    handle.stop().await.unwrap();
    task.await.unwrap();
}
