pub mod firestore;
pub mod memory;

pub use firestore::*;
pub use memory::*;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::schema::{Job, JobRequest};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode store document: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Request(err.to_string())
    }
}

/// One push from a document subscription. The initial snapshot arrives on
/// the same channel as every later change; delivery is at-least-once and in
/// store order, so consumers must treat repeats as no-ops.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Snapshot(Job),
    /// The subscribed record no longer exists.
    Missing,
    /// The listener itself broke; no further updates will arrive.
    Lost(String),
}

/// One push from a collection subscription: the full ordered snapshot of the
/// owner's jobs (newest first), replacing whatever the consumer held before.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryUpdate {
    Snapshot(Vec<Job>),
    Lost(String),
}

/// Live subscription to a single job record. Dropping the watch (or calling
/// [`JobWatch::stop`]) cancels interest; the record itself is untouched.
#[derive(Debug)]
pub struct JobWatch {
    rx: mpsc::UnboundedReceiver<JobUpdate>,
    producer: Option<JoinHandle<()>>,
}

impl JobWatch {
    pub fn new(rx: mpsc::UnboundedReceiver<JobUpdate>) -> Self {
        Self { rx, producer: None }
    }

    pub fn with_producer(rx: mpsc::UnboundedReceiver<JobUpdate>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer: Some(task),
        }
    }

    /// Next push, or `None` once the store side has hung up.
    pub async fn next(&mut self) -> Option<JobUpdate> {
        self.rx.recv().await
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.producer.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        if let Some(task) = self.producer.take() {
            task.abort();
        }
    }
}

/// Live subscription to an owner's job collection.
#[derive(Debug)]
pub struct HistoryWatch {
    rx: mpsc::UnboundedReceiver<HistoryUpdate>,
    producer: Option<JoinHandle<()>>,
}

impl HistoryWatch {
    pub fn new(rx: mpsc::UnboundedReceiver<HistoryUpdate>) -> Self {
        Self { rx, producer: None }
    }

    pub fn with_producer(
        rx: mpsc::UnboundedReceiver<HistoryUpdate>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            producer: Some(task),
        }
    }

    pub async fn next(&mut self) -> Option<HistoryUpdate> {
        self.rx.recv().await
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.producer.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for HistoryWatch {
    fn drop(&mut self) {
        if let Some(task) = self.producer.take() {
            task.abort();
        }
    }
}

/// Document store holding job records keyed by `(owner_id, job_id)`.
///
/// The client only ever creates records and reads them back; status moves
/// are the backend worker's job. Subscriptions deliver the current document
/// immediately, then again on every remote change.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates exactly one record with `status = processing` and a creation
    /// timestamp, returning the stored job with its assigned id.
    async fn create_job(&self, owner_id: &str, request: &JobRequest) -> Result<Job, StoreError>;

    /// Point read; `Ok(None)` when the record does not exist.
    async fn fetch_job(&self, owner_id: &str, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Subscribes to one record. The initial snapshot (or [`JobUpdate::Missing`])
    /// is pushed through the returned watch before any later change.
    async fn watch_job(&self, owner_id: &str, job_id: &str) -> Result<JobWatch, StoreError>;

    /// Subscribes to the owner's collection ordered by creation time
    /// descending, full-snapshot semantics.
    async fn watch_history(&self, owner_id: &str) -> Result<HistoryWatch, StoreError>;
}
