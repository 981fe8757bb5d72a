use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::identity::IdentityProvider;
use crate::schema::{JobRequest, JobStatus};
use crate::store::{JobUpdate, JobWatch, RecordStore};

/// Why the current attempt ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No owner id could be resolved, so nothing was written.
    IdentityUnavailable,
    /// The record could not be created; no subscription was opened.
    WriteFailure,
    /// The live subscription broke mid-flight.
    ListenerFailure,
    /// The subscribed record no longer exists.
    RecordVanished,
    /// The backend worker reported the job as failed.
    GenerationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Observable state of the single in-flight generation attempt.
///
/// `Processing` starts with no job id (the transition happens before the
/// remote create resolves) and picks the id up once the store assigns one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GenerationPhase {
    #[default]
    Idle,
    Processing {
        job_id: Option<String>,
    },
    Done {
        job_id: String,
        logo_url: String,
    },
    Failed(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("a generation is already in progress or awaiting reset")]
    Busy,
    #[error("identity unavailable: {0}")]
    Identity(String),
    #[error("could not create job record: {0}")]
    Write(String),
    #[error("could not subscribe to job updates: {0}")]
    Subscribe(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("retry is only available after a failed attempt")]
    NotFailed,
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

#[derive(Default)]
struct Inner {
    /// Bumped on every submit/reset; updates carrying a stale epoch are
    /// discarded, so a late push for an abandoned attempt changes nothing.
    epoch: u64,
    last_request: Option<JobRequest>,
    pump: Option<JoinHandle<()>>,
}

impl Inner {
    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Owns the lifecycle of one generation request at a time: creates the
/// remote record, holds the single live subscription, and folds its pushes
/// into a [`GenerationPhase`] that the presentation layer observes through a
/// watch channel.
pub struct JobLifecycle {
    store: Arc<dyn RecordStore>,
    identity: Arc<dyn IdentityProvider>,
    phase: Arc<watch::Sender<GenerationPhase>>,
    inner: Arc<Mutex<Inner>>,
}

impl JobLifecycle {
    pub fn new(store: Arc<dyn RecordStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            phase: Arc::new(watch::Sender::new(GenerationPhase::Idle)),
            inner: Arc::default(),
        }
    }

    pub fn phase(&self) -> GenerationPhase {
        self.phase.borrow().clone()
    }

    /// Reactive view of the phase; the current value is readable immediately.
    pub fn watch_phase(&self) -> watch::Receiver<GenerationPhase> {
        self.phase.subscribe()
    }

    /// The finished design, iff the attempt is `Done`: `(job_id, logo_url)`.
    pub fn result(&self) -> Option<(String, String)> {
        match &*self.phase.borrow() {
            GenerationPhase::Done { job_id, logo_url } => {
                Some((job_id.clone(), logo_url.clone()))
            }
            _ => None,
        }
    }

    /// Starts a new attempt. Re-entrancy is gated synchronously, before any
    /// asynchronous work: a second call while `Processing` (or while an
    /// unviewed `Done` result is pending reset) gets `Busy` and creates
    /// nothing. From `Idle` or `Failed` the phase flips to `Processing`
    /// immediately, then exactly one record is created and subscribed to.
    pub async fn submit(&self, request: JobRequest) -> Result<String, SubmitError> {
        let epoch = {
            let mut inner = self.inner.lock().unwrap();
            match &*self.phase.borrow() {
                GenerationPhase::Processing { .. } | GenerationPhase::Done { .. } => {
                    return Err(SubmitError::Busy);
                }
                GenerationPhase::Idle | GenerationPhase::Failed(_) => {}
            }
            inner.stop_pump();
            inner.epoch += 1;
            inner.last_request = Some(request.clone());
            self.phase
                .send_replace(GenerationPhase::Processing { job_id: None });
            inner.epoch
        };

        let owner_id = match self.identity.owner_id().await {
            Ok(owner_id) => owner_id,
            Err(e) => {
                self.fail(epoch, FailureKind::IdentityUnavailable, e.to_string());
                return Err(SubmitError::Identity(e.to_string()));
            }
        };

        let job = match self.store.create_job(&owner_id, &request).await {
            Ok(job) => job,
            Err(e) => {
                self.fail(epoch, FailureKind::WriteFailure, e.to_string());
                return Err(SubmitError::Write(e.to_string()));
            }
        };
        tracing::info!(job_id = %job.id, style = %request.style, "generation job submitted");

        let job_watch = match self.store.watch_job(&owner_id, &job.id).await {
            Ok(job_watch) => job_watch,
            Err(e) => {
                self.fail(epoch, FailureKind::ListenerFailure, e.to_string());
                return Err(SubmitError::Subscribe(e.to_string()));
            }
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            // reset() won the race; drop the watch without ever observing it
            return Ok(job.id);
        }
        self.phase.send_replace(GenerationPhase::Processing {
            job_id: Some(job.id.clone()),
        });
        inner.pump = Some(tokio::spawn(Self::pump(
            job_watch,
            epoch,
            Arc::clone(&self.inner),
            Arc::clone(&self.phase),
        )));
        Ok(job.id)
    }

    /// Replays the last request after a failure. The failed record is left
    /// behind in history; a fresh record is always created.
    pub async fn retry(&self) -> Result<String, RetryError> {
        let request = {
            let inner = self.inner.lock().unwrap();
            if !matches!(&*self.phase.borrow(), GenerationPhase::Failed(_)) {
                return Err(RetryError::NotFailed);
            }
            inner.last_request.clone().ok_or(RetryError::NotFailed)?
        };
        tracing::info!("retrying failed generation");
        Ok(self.submit(request).await?)
    }

    /// Forcibly returns to `Idle` from any state, dropping the job
    /// reference, the cached result, and any live subscription. Called when
    /// the session is re-entered so the next submission starts clean.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        inner.last_request = None;
        inner.stop_pump();
        self.phase.send_replace(GenerationPhase::Idle);
    }

    fn fail(&self, epoch: u64, kind: FailureKind, message: String) {
        let inner = self.inner.lock().unwrap();
        if inner.epoch != epoch {
            return;
        }
        tracing::warn!(kind = ?kind, %message, "generation attempt failed");
        self.phase
            .send_replace(GenerationPhase::Failed(Failure::new(kind, message)));
    }

    /// Folds subscription pushes into the phase. Non-terminal snapshots are
    /// no-ops; the first terminal outcome is applied once and interest in
    /// the record ends there, so duplicate or late deliveries never run.
    async fn pump(
        mut job_watch: JobWatch,
        epoch: u64,
        inner: Arc<Mutex<Inner>>,
        phase: Arc<watch::Sender<GenerationPhase>>,
    ) {
        loop {
            let outcome = match job_watch.next().await {
                Some(JobUpdate::Snapshot(job)) => match job.status {
                    JobStatus::Processing => continue,
                    JobStatus::Done => match job.logo_url.filter(|url| !url.is_empty()) {
                        Some(logo_url) => GenerationPhase::Done {
                            job_id: job.id,
                            logo_url,
                        },
                        None => GenerationPhase::Failed(Failure::new(
                            FailureKind::GenerationFailed,
                            "job finished without a result",
                        )),
                    },
                    JobStatus::Failed => GenerationPhase::Failed(Failure::new(
                        FailureKind::GenerationFailed,
                        job.error_message
                            .unwrap_or_else(|| "generation failed".to_string()),
                    )),
                },
                Some(JobUpdate::Missing) => GenerationPhase::Failed(Failure::new(
                    FailureKind::RecordVanished,
                    "job record no longer exists",
                )),
                Some(JobUpdate::Lost(reason)) => {
                    GenerationPhase::Failed(Failure::new(FailureKind::ListenerFailure, reason))
                }
                None => GenerationPhase::Failed(Failure::new(
                    FailureKind::ListenerFailure,
                    "job update stream closed",
                )),
            };

            {
                let mut inner = inner.lock().unwrap();
                if inner.epoch == epoch {
                    tracing::info!(outcome = ?outcome, "generation attempt finished");
                    phase.send_replace(outcome);
                    inner.pump = None;
                }
            }
            job_watch.stop();
            break;
        }
    }
}

impl Drop for JobLifecycle {
    fn drop(&mut self) {
        // a dangling listener outliving its controller is a leak
        if let Ok(mut inner) = self.inner.lock() {
            inner.stop_pump();
        }
    }
}
