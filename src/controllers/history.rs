use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::schema::Job;
use crate::store::{HistoryUpdate, RecordStore, StoreError};

/// What the history screen renders: the owner's jobs newest-first, plus an
/// error flag when the listener broke. The list is kept stale on error
/// rather than cleared, and is never retried automatically -- the caller may
/// call [`JobHistory::start`] again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryView {
    pub jobs: Vec<Job>,
    pub error: Option<String>,
    /// False until the first snapshot lands (distinguishes "loading" from
    /// "no history yet").
    pub loaded: bool,
}

/// Keeps a live local copy of the owner's job collection. Every push from
/// the store is a full ordered snapshot that replaces the list wholesale; no
/// diffing happens here.
pub struct JobHistory {
    store: Arc<dyn RecordStore>,
    view: Arc<watch::Sender<HistoryView>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl JobHistory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            view: Arc::new(watch::Sender::new(HistoryView::default())),
            pump: Mutex::new(None),
        }
    }

    pub fn view(&self) -> HistoryView {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<HistoryView> {
        self.view.subscribe()
    }

    /// Starts (or restarts) listening for the owner's jobs. A previous
    /// subscription, if any, is released first.
    pub async fn start(&self, owner_id: &str) -> Result<(), StoreError> {
        let mut history_watch = self.store.watch_history(owner_id).await?;
        let view = Arc::clone(&self.view);
        let owner = owner_id.to_string();

        // abort the old pump before the new one exists, so two pumps never
        // write to the view at once
        let mut pump = self.pump.lock().unwrap();
        if let Some(previous) = pump.take() {
            previous.abort();
        }
        *pump = Some(tokio::spawn(async move {
            loop {
                match history_watch.next().await {
                    Some(HistoryUpdate::Snapshot(jobs)) => {
                        view.send_modify(|v| {
                            v.jobs = jobs;
                            v.error = None;
                            v.loaded = true;
                        });
                    }
                    Some(HistoryUpdate::Lost(reason)) => {
                        tracing::warn!(owner_id = %owner, %reason, "history listener failed");
                        view.send_modify(|v| v.error = Some(reason));
                        break;
                    }
                    None => break,
                }
            }
        }));
        Ok(())
    }

    /// Releases the subscription; safe to call when none is active.
    pub fn stop(&self) {
        if let Some(task) = self.pump.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for JobHistory {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{JobRequest, JobStatus, LogoStyle};
    use crate::store::InMemoryStore;
    use std::time::Duration;

    const OWNER: &str = "owner-1";

    fn request(prompt: &str) -> JobRequest {
        JobRequest::new(prompt, LogoStyle::Abstract)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<HistoryView>,
        pred: impl Fn(&HistoryView) -> bool,
    ) -> HistoryView {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if pred(&view) {
                        return (*view).clone();
                    }
                }
                rx.changed().await.expect("view sender dropped");
            }
        })
        .await
        .expect("timed out waiting for history view")
    }

    #[tokio::test]
    async fn loads_existing_jobs_newest_first() {
        let store = Arc::new(InMemoryStore::new());
        let first = store.create_job(OWNER, &request("first")).await.unwrap();
        let second = store.create_job(OWNER, &request("second")).await.unwrap();

        let feed = JobHistory::new(Arc::clone(&store) as Arc<dyn RecordStore>);
        let mut rx = feed.watch_view();
        feed.start(OWNER).await.unwrap();

        let view = wait_for(&mut rx, |v| v.loaded).await;
        assert_eq!(view.jobs.len(), 2);
        assert_eq!(view.jobs[0].id, second.id);
        assert_eq!(view.jobs[1].id, first.id);
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn new_jobs_and_status_changes_replace_the_list() {
        let store = Arc::new(InMemoryStore::new());
        let feed = JobHistory::new(Arc::clone(&store) as Arc<dyn RecordStore>);
        let mut rx = feed.watch_view();
        feed.start(OWNER).await.unwrap();
        wait_for(&mut rx, |v| v.loaded).await;

        let job = store.create_job(OWNER, &request("logo")).await.unwrap();
        let view = wait_for(&mut rx, |v| v.jobs.len() == 1).await;
        assert_eq!(view.jobs[0].status, JobStatus::Processing);

        store.complete_job(OWNER, &job.id, "https://x/y.png");
        let view = wait_for(&mut rx, |v| {
            v.jobs.first().is_some_and(|j| j.status == JobStatus::Done)
        })
        .await;
        assert_eq!(view.jobs[0].logo_url.as_deref(), Some("https://x/y.png"));
    }

    #[tokio::test]
    async fn listener_error_sets_the_flag_and_keeps_the_list_stale() {
        let store = Arc::new(InMemoryStore::new());
        store.create_job(OWNER, &request("logo")).await.unwrap();

        let feed = JobHistory::new(Arc::clone(&store) as Arc<dyn RecordStore>);
        let mut rx = feed.watch_view();
        feed.start(OWNER).await.unwrap();
        wait_for(&mut rx, |v| v.loaded).await;

        store.fail_history_watchers(OWNER, "connection reset");
        let view = wait_for(&mut rx, |v| v.error.is_some()).await;
        assert_eq!(view.error.as_deref(), Some("connection reset"));
        assert_eq!(view.jobs.len(), 1, "stale list survives the error");

        // not retried automatically; an explicit restart recovers
        store.create_job(OWNER, &request("another")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(feed.view().jobs.len(), 1);

        feed.start(OWNER).await.unwrap();
        let view = wait_for(&mut rx, |v| v.jobs.len() == 2).await;
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn rapid_restarts_leave_exactly_one_live_pump() {
        let store = Arc::new(InMemoryStore::new());
        store.create_job(OWNER, &request("logo")).await.unwrap();

        let feed = JobHistory::new(Arc::clone(&store) as Arc<dyn RecordStore>);
        let mut rx = feed.watch_view();
        for _ in 0..5 {
            feed.start(OWNER).await.unwrap();
        }
        wait_for(&mut rx, |v| v.loaded).await;

        // one stop kills the survivor; a leftover pump would still write
        feed.stop();
        store.create_job(OWNER, &request("another")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(feed.view().jobs.len(), 1);
    }

    #[tokio::test]
    async fn stop_releases_the_subscription_and_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let feed = JobHistory::new(Arc::clone(&store) as Arc<dyn RecordStore>);
        feed.stop(); // nothing active: no-op

        let mut rx = feed.watch_view();
        feed.start(OWNER).await.unwrap();
        wait_for(&mut rx, |v| v.loaded).await;
        feed.stop();

        store.create_job(OWNER, &request("logo")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(feed.view().jobs.is_empty());
        feed.stop();
    }
}
