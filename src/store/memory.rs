use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::schema::{Job, JobRequest, JobStatus};
use crate::store::{HistoryUpdate, HistoryWatch, JobUpdate, JobWatch, RecordStore, StoreError};

/// Finishes each created job after a delay, standing in for the backend
/// worker when running without real credentials. Odds and delays mirror the
/// hosted worker's behavior closely enough for a demo.
#[derive(Debug, Clone, Copy)]
pub struct AutoWorker {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub fail_percent: u8,
}

impl Default for AutoWorker {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(4),
            fail_percent: 20,
        }
    }
}

#[derive(Default)]
struct State {
    // per owner, in creation order
    jobs: HashMap<String, Vec<Job>>,
    job_watchers: HashMap<(String, String), Vec<mpsc::UnboundedSender<JobUpdate>>>,
    history_watchers: HashMap<String, Vec<mpsc::UnboundedSender<HistoryUpdate>>>,
}

impl State {
    fn find_job(&self, owner_id: &str, job_id: &str) -> Option<&Job> {
        self.jobs
            .get(owner_id)
            .and_then(|jobs| jobs.iter().find(|job| job.id == job_id))
    }

    fn history_snapshot(&self, owner_id: &str) -> Vec<Job> {
        let mut jobs = self.jobs.get(owner_id).cloned().unwrap_or_default();
        jobs.reverse(); // newest first
        jobs
    }

    fn push_job_update(&mut self, owner_id: &str, job_id: &str, update: JobUpdate) {
        if let Some(senders) = self
            .job_watchers
            .get_mut(&(owner_id.to_string(), job_id.to_string()))
        {
            senders.retain(|tx| tx.send(update.clone()).is_ok());
        }
    }

    fn push_history(&mut self, owner_id: &str) {
        let snapshot = self.history_snapshot(owner_id);
        if let Some(senders) = self.history_watchers.get_mut(owner_id) {
            senders.retain(|tx| tx.send(HistoryUpdate::Snapshot(snapshot.clone())).is_ok());
        }
    }

    fn notify(&mut self, owner_id: &str, job_id: &str) {
        if let Some(job) = self.find_job(owner_id, job_id).cloned() {
            self.push_job_update(owner_id, job_id, JobUpdate::Snapshot(job));
        }
        self.push_history(owner_id);
    }
}

/// In-process [`RecordStore`]. Doubles as the test fake (tests drive the
/// worker-side mutations by hand) and as the demo backend when constructed
/// with an [`AutoWorker`].
#[derive(Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    auto_worker: Option<AutoWorker>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_worker(worker: AutoWorker) -> Self {
        Self {
            state: Arc::default(),
            auto_worker: Some(worker),
        }
    }

    /// Worker-side: marks a processing job done with its result URL.
    pub fn complete_job(&self, owner_id: &str, job_id: &str, logo_url: &str) {
        Self::finish(&self.state, owner_id, job_id, JobStatus::Done, Some(logo_url), None);
    }

    /// Worker-side: marks a processing job failed.
    pub fn fail_job(&self, owner_id: &str, job_id: &str, error_message: &str) {
        Self::finish(
            &self.state,
            owner_id,
            job_id,
            JobStatus::Failed,
            None,
            Some(error_message),
        );
    }

    /// Deletes the record and tells subscribers it is gone.
    pub fn remove_job(&self, owner_id: &str, job_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(jobs) = state.jobs.get_mut(owner_id) {
            jobs.retain(|job| job.id != job_id);
        }
        state.push_job_update(owner_id, job_id, JobUpdate::Missing);
        state.push_history(owner_id);
    }

    /// Breaks every listener on the given record, as a dying connection would.
    pub fn fail_watchers(&self, owner_id: &str, job_id: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.push_job_update(owner_id, job_id, JobUpdate::Lost(reason.to_string()));
    }

    /// Breaks the owner's history listeners.
    pub fn fail_history_watchers(&self, owner_id: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(senders) = state.history_watchers.get_mut(owner_id) {
            senders.retain(|tx| tx.send(HistoryUpdate::Lost(reason.to_string())).is_ok());
        }
    }

    /// Re-delivers the current snapshot unchanged. Lets tests exercise the
    /// at-least-once contract (duplicate pushes must be no-ops downstream).
    pub fn renotify_job(&self, owner_id: &str, job_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.find_job(owner_id, job_id).cloned() {
            state.push_job_update(owner_id, job_id, JobUpdate::Snapshot(job));
        }
    }

    pub fn job_count(&self, owner_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.jobs.get(owner_id).map_or(0, Vec::len)
    }

    fn finish(
        state: &Arc<Mutex<State>>,
        owner_id: &str,
        job_id: &str,
        status: JobStatus,
        logo_url: Option<&str>,
        error_message: Option<&str>,
    ) {
        let mut state = state.lock().unwrap();
        let Some(jobs) = state.jobs.get_mut(owner_id) else {
            return;
        };
        let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
            return;
        };
        if job.status.is_terminal() {
            // status is monotonic; the worker never rewrites a terminal job
            return;
        }
        job.status = status;
        job.logo_url = logo_url.map(str::to_string);
        job.error_message = error_message.map(str::to_string);
        job.completed_at = Some(chrono::Utc::now());
        state.notify(owner_id, job_id);
    }

    fn spawn_worker(&self, owner_id: String, job_id: String, prompt: String, worker: AutoWorker) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let span = worker
                .max_delay
                .saturating_sub(worker.min_delay)
                .as_millis()
                .max(1) as u64;
            let delay = worker.min_delay + Duration::from_millis(clock_nanos() % span);
            tokio::time::sleep(delay).await;

            // re-sampled after the sleep so the failure roll is independent
            // of the delay draw
            if clock_nanos() % 100 < u64::from(worker.fail_percent) {
                tracing::info!(job_id = %job_id, "demo worker: failing job");
                Self::finish(
                    &state,
                    &owner_id,
                    &job_id,
                    JobStatus::Failed,
                    None,
                    Some("Randomized failure test"),
                );
            } else {
                let url = format!(
                    "https://placehold.co/512x512?text={}",
                    prompt.split_whitespace().next().unwrap_or("logo")
                );
                tracing::info!(job_id = %job_id, url = %url, "demo worker: completing job");
                Self::finish(&state, &owner_id, &job_id, JobStatus::Done, Some(&url), None);
            }
        });
    }
}

fn clock_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

#[async_trait::async_trait]
impl RecordStore for InMemoryStore {
    async fn create_job(&self, owner_id: &str, request: &JobRequest) -> Result<Job, StoreError> {
        let job = Job {
            id: uuid::Uuid::new_v4().as_simple().to_string(),
            owner_id: owner_id.to_string(),
            prompt: request.prompt.clone(),
            style: request.style,
            status: JobStatus::Processing,
            logo_url: None,
            error_message: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        };

        {
            let mut state = self.state.lock().unwrap();
            state
                .jobs
                .entry(owner_id.to_string())
                .or_default()
                .push(job.clone());
            state.push_history(owner_id);
        }

        if let Some(worker) = self.auto_worker {
            self.spawn_worker(
                owner_id.to_string(),
                job.id.clone(),
                job.prompt.clone(),
                worker,
            );
        }

        Ok(job)
    }

    async fn fetch_job(&self, owner_id: &str, job_id: &str) -> Result<Option<Job>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.find_job(owner_id, job_id).cloned())
    }

    async fn watch_job(&self, owner_id: &str, job_id: &str) -> Result<JobWatch, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        let initial = match state.find_job(owner_id, job_id) {
            Some(job) => JobUpdate::Snapshot(job.clone()),
            None => JobUpdate::Missing,
        };
        let _ = tx.send(initial);
        state
            .job_watchers
            .entry((owner_id.to_string(), job_id.to_string()))
            .or_default()
            .push(tx);
        Ok(JobWatch::new(rx))
    }

    async fn watch_history(&self, owner_id: &str) -> Result<HistoryWatch, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        let _ = tx.send(HistoryUpdate::Snapshot(state.history_snapshot(owner_id)));
        state
            .history_watchers
            .entry(owner_id.to_string())
            .or_default()
            .push(tx);
        Ok(HistoryWatch::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogoStyle;

    fn request() -> JobRequest {
        JobRequest::new("A blue lion logo", LogoStyle::Monogram)
    }

    #[tokio::test]
    async fn create_assigns_id_and_processing_status() {
        let store = InMemoryStore::new();
        let job = store.create_job("owner", &request()).await.unwrap();
        assert!(!job.id.is_empty());
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.logo_url.is_none());

        let fetched = store.fetch_job("owner", &job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
    }

    #[tokio::test]
    async fn watch_delivers_initial_snapshot_then_updates() {
        let store = InMemoryStore::new();
        let job = store.create_job("owner", &request()).await.unwrap();
        let mut watch = store.watch_job("owner", &job.id).await.unwrap();

        match watch.next().await.unwrap() {
            JobUpdate::Snapshot(snapshot) => assert_eq!(snapshot.status, JobStatus::Processing),
            other => panic!("expected initial snapshot, got {other:?}"),
        }

        store.complete_job("owner", &job.id, "https://x/y.png");
        match watch.next().await.unwrap() {
            JobUpdate::Snapshot(snapshot) => {
                assert_eq!(snapshot.status, JobStatus::Done);
                assert_eq!(snapshot.logo_url.as_deref(), Some("https://x/y.png"));
                assert!(snapshot.completed_at.is_some());
            }
            other => panic!("expected done snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watch_on_unknown_record_reports_missing() {
        let store = InMemoryStore::new();
        let mut watch = store.watch_job("owner", "nope").await.unwrap();
        assert_eq!(watch.next().await.unwrap(), JobUpdate::Missing);
    }

    #[tokio::test]
    async fn remove_pushes_missing_to_subscribers() {
        let store = InMemoryStore::new();
        let job = store.create_job("owner", &request()).await.unwrap();
        let mut watch = store.watch_job("owner", &job.id).await.unwrap();
        let _ = watch.next().await; // initial

        store.remove_job("owner", &job.id);
        assert_eq!(watch.next().await.unwrap(), JobUpdate::Missing);
        assert!(store.fetch_job("owner", &job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_status_is_never_rewritten() {
        let store = InMemoryStore::new();
        let job = store.create_job("owner", &request()).await.unwrap();
        store.complete_job("owner", &job.id, "https://x/y.png");
        store.fail_job("owner", &job.id, "too late");

        let fetched = store.fetch_job("owner", &job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Done);
        assert_eq!(fetched.logo_url.as_deref(), Some("https://x/y.png"));
    }

    #[tokio::test]
    async fn history_snapshots_are_newest_first_and_replacing() {
        let store = InMemoryStore::new();
        let first = store.create_job("owner", &request()).await.unwrap();
        let mut watch = store.watch_history("owner").await.unwrap();

        match watch.next().await.unwrap() {
            HistoryUpdate::Snapshot(jobs) => {
                assert_eq!(jobs.len(), 1);
                assert_eq!(jobs[0].id, first.id);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        let second = store.create_job("owner", &request()).await.unwrap();
        match watch.next().await.unwrap() {
            HistoryUpdate::Snapshot(jobs) => {
                assert_eq!(jobs.len(), 2);
                assert_eq!(jobs[0].id, second.id, "newest job leads the snapshot");
                assert_eq!(jobs[1].id, first.id);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_is_scoped_to_the_owner() {
        let store = InMemoryStore::new();
        store.create_job("alice", &request()).await.unwrap();
        let mut watch = store.watch_history("bob").await.unwrap();
        match watch.next().await.unwrap() {
            HistoryUpdate::Snapshot(jobs) => assert!(jobs.is_empty()),
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stopped_watch_receives_nothing_further() {
        let store = InMemoryStore::new();
        let job = store.create_job("owner", &request()).await.unwrap();
        let mut watch = store.watch_job("owner", &job.id).await.unwrap();
        let _ = watch.next().await; // initial
        watch.stop();

        store.complete_job("owner", &job.id, "https://x/y.png");
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn auto_worker_finishes_the_job() {
        let store = InMemoryStore::with_auto_worker(AutoWorker {
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            fail_percent: 0,
        });
        let job = store.create_job("owner", &request()).await.unwrap();
        let mut watch = store.watch_job("owner", &job.id).await.unwrap();
        let _ = watch.next().await; // initial

        match tokio::time::timeout(Duration::from_secs(2), watch.next())
            .await
            .expect("worker should finish well within the timeout")
            .unwrap()
        {
            JobUpdate::Snapshot(snapshot) => {
                assert_eq!(snapshot.status, JobStatus::Done);
                assert!(snapshot.logo_url.is_some());
            }
            other => panic!("expected done snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auto_worker_failure_odds_apply_at_any_delay() {
        let store = InMemoryStore::with_auto_worker(AutoWorker {
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            fail_percent: 100,
        });
        let job = store.create_job("owner", &request()).await.unwrap();
        let mut watch = store.watch_job("owner", &job.id).await.unwrap();
        let _ = watch.next().await; // initial

        match tokio::time::timeout(Duration::from_secs(2), watch.next())
            .await
            .expect("worker should finish well within the timeout")
            .unwrap()
        {
            JobUpdate::Snapshot(snapshot) => {
                assert_eq!(snapshot.status, JobStatus::Failed);
                assert!(snapshot.error_message.is_some());
                assert!(snapshot.logo_url.is_none());
            }
            other => panic!("expected failed snapshot, got {other:?}"),
        }
    }
}
