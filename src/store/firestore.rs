use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::identity::FirebaseSession;
use crate::schema::{Job, JobRequest, JobStatus, LogoStyle};
use crate::store::{HistoryUpdate, HistoryWatch, JobUpdate, JobWatch, RecordStore, StoreError};

const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const HISTORY_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Application namespace inside the `artifacts` root collection.
    pub app_id: String,
    /// How often watches re-read the backing document.
    pub poll_interval: Duration,
}

impl FirestoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let project_id = std::env::var("HEXA_FIREBASE_PROJECT_ID")
            .map_err(|_| anyhow::anyhow!("HEXA_FIREBASE_PROJECT_ID not set"))?;
        let app_id =
            std::env::var("HEXA_APP_ID").unwrap_or_else(|_| "default-hexa-app".to_string());
        let poll_ms: u64 = std::env::var("HEXA_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        Ok(Self {
            project_id,
            app_id,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

/// [`RecordStore`] backed by the Firestore REST API. Job records live under
/// `artifacts/{app_id}/users/{owner_id}/jobs`. Watches re-read the document
/// on an interval and push only actual changes through the channel, so
/// consumers see the same push contract as a native listener.
pub struct FirestoreStore {
    client: reqwest::Client,
    config: FirestoreConfig,
    session: Arc<FirebaseSession>,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig, session: Arc<FirebaseSession>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            config,
            session,
        }
    }

    fn jobs_url(&self, owner_id: &str) -> String {
        jobs_url(&self.config.project_id, &self.config.app_id, owner_id)
    }

    fn doc_url(&self, owner_id: &str, job_id: &str) -> String {
        format!("{}/{}", self.jobs_url(owner_id), job_id)
    }

    async fn bearer(&self) -> Result<String, StoreError> {
        self.session
            .id_token()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RecordStore for FirestoreStore {
    async fn create_job(&self, owner_id: &str, request: &JobRequest) -> Result<Job, StoreError> {
        let token = self.bearer().await?;
        let created_at = Utc::now();
        let body = json!({ "fields": encode_fields(owner_id, request, created_at) });

        let response = self
            .client
            .post(self.jobs_url(owner_id))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let doc: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let job = decode_job(&doc, owner_id)?;
        tracing::info!(job_id = %job.id, owner_id = %owner_id, "job record created");
        Ok(job)
    }

    async fn fetch_job(&self, owner_id: &str, job_id: &str) -> Result<Option<Job>, StoreError> {
        let token = self.bearer().await?;
        match fetch_document(&self.client, &self.doc_url(owner_id, job_id), &token).await? {
            Some(doc) => Ok(Some(decode_job(&doc, owner_id)?)),
            None => Ok(None),
        }
    }

    async fn watch_job(&self, owner_id: &str, job_id: &str) -> Result<JobWatch, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let session = Arc::clone(&self.session);
        let url = self.doc_url(owner_id, job_id);
        let owner = owner_id.to_string();
        let id = job_id.to_string();
        let interval = self.config.poll_interval;

        let task = tokio::spawn(async move {
            let mut last: Option<Job> = None;
            let mut first = true;
            loop {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                first = false;

                let token = match session.id_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        let _ = tx.send(JobUpdate::Lost(e.to_string()));
                        break;
                    }
                };

                match fetch_document(&client, &url, &token).await {
                    Ok(Some(doc)) => match decode_job(&doc, &owner) {
                        Ok(job) => {
                            let terminal = job.status.is_terminal();
                            if last.as_ref() != Some(&job) {
                                last = Some(job.clone());
                                if tx.send(JobUpdate::Snapshot(job)).is_err() {
                                    break;
                                }
                            }
                            if terminal {
                                // status is monotonic; nothing more will change
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(JobUpdate::Lost(e.to_string()));
                            break;
                        }
                    },
                    Ok(None) => {
                        tracing::warn!(job_id = %id, "watched job record vanished");
                        let _ = tx.send(JobUpdate::Missing);
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(JobUpdate::Lost(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(JobWatch::with_producer(rx, task))
    }

    async fn watch_history(&self, owner_id: &str) -> Result<HistoryWatch, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let session = Arc::clone(&self.session);
        let url = self.jobs_url(owner_id);
        let owner = owner_id.to_string();
        let interval = self.config.poll_interval;

        let task = tokio::spawn(async move {
            let mut last: Option<Vec<Job>> = None;
            let mut first = true;
            loop {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                first = false;

                let token = match session.id_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        let _ = tx.send(HistoryUpdate::Lost(e.to_string()));
                        break;
                    }
                };

                match list_documents(&client, &url, &token).await {
                    Ok(docs) => {
                        let mut jobs = Vec::with_capacity(docs.len());
                        let mut decode_error = None;
                        for doc in &docs {
                            match decode_job(doc, &owner) {
                                Ok(job) => jobs.push(job),
                                Err(e) => {
                                    decode_error = Some(e);
                                    break;
                                }
                            }
                        }
                        if let Some(e) = decode_error {
                            let _ = tx.send(HistoryUpdate::Lost(e.to_string()));
                            break;
                        }
                        if last.as_ref() != Some(&jobs) {
                            last = Some(jobs.clone());
                            if tx.send(HistoryUpdate::Snapshot(jobs)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(HistoryUpdate::Lost(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(HistoryWatch::with_producer(rx, task))
    }
}

fn jobs_url(project_id: &str, app_id: &str, owner_id: &str) -> String {
    format!(
        "{FIRESTORE_BASE}/projects/{project_id}/databases/(default)/documents/artifacts/{app_id}/users/{owner_id}/jobs"
    )
}

async fn fetch_document(
    client: &reqwest::Client,
    url: &str,
    token: &str,
) -> Result<Option<Value>, StoreError> {
    let response = client.get(url).bearer_auth(token).send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let doc = response
        .json()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(Some(doc))
}

/// Lists the whole collection, following `nextPageToken` so snapshots are
/// never truncated to the first page.
async fn list_documents(
    client: &reqwest::Client,
    url: &str,
    token: &str,
) -> Result<Vec<Value>, StoreError> {
    let mut docs = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let mut request = client
            .get(url)
            .query(&[("orderBy", "createdAt desc"), ("pageSize", HISTORY_PAGE_SIZE)])
            .bearer_auth(token);
        if let Some(page_token) = &page_token {
            request = request.query(&[("pageToken", page_token.as_str())]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        docs.extend(page_documents(&body));
        match next_page_token(&body) {
            Some(token) => page_token = Some(token),
            None => return Ok(docs),
        }
    }
}

fn page_documents(body: &Value) -> Vec<Value> {
    body.get("documents")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn next_page_token(body: &Value) -> Option<String> {
    body.get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn encode_fields(owner_id: &str, request: &JobRequest, created_at: DateTime<Utc>) -> Value {
    json!({
        "ownerId": string_value(owner_id),
        "prompt": string_value(&request.prompt),
        "style": string_value(request.style.as_str()),
        "status": string_value(JobStatus::Processing.as_str()),
        "createdAt": timestamp_value(created_at),
    })
}

fn decode_job(doc: &Value, owner_id: &str) -> Result<Job, StoreError> {
    let id = doc
        .get("name")
        .and_then(Value::as_str)
        .and_then(|name| name.rsplit('/').next())
        .ok_or_else(|| StoreError::Decode("document has no name".to_string()))?
        .to_string();
    let fields = doc
        .get("fields")
        .ok_or_else(|| StoreError::Decode("document has no fields".to_string()))?;

    let status = match field_str(fields, "status") {
        Some(s) => match s.as_str() {
            "processing" => JobStatus::Processing,
            "done" => JobStatus::Done,
            "failed" => JobStatus::Failed,
            other => return Err(StoreError::Decode(format!("unknown status: {other}"))),
        },
        None => return Err(StoreError::Decode("document has no status".to_string())),
    };

    // unknown/absent style degrades to the sentinel, never an error
    let style = field_str(fields, "style")
        .and_then(|s| s.parse::<LogoStyle>().ok())
        .unwrap_or_default();

    let created_at = field_time(fields, "createdAt")
        .ok_or_else(|| StoreError::Decode("document has no createdAt".to_string()))?;

    Ok(Job {
        id,
        owner_id: field_str(fields, "ownerId").unwrap_or_else(|| owner_id.to_string()),
        prompt: field_str(fields, "prompt").unwrap_or_default(),
        style,
        status,
        logo_url: field_str(fields, "logoUrl").filter(|url| !url.is_empty()),
        error_message: field_str(fields, "error_message"),
        created_at,
        completed_at: field_time(fields, "completedAt"),
    })
}

fn string_value(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn timestamp_value(t: DateTime<Utc>) -> Value {
    json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::Micros, true) })
}

fn field_str(fields: &Value, name: &str) -> Option<String> {
    fields
        .get(name)?
        .get("stringValue")?
        .as_str()
        .map(str::to_string)
}

fn field_time(fields: &Value, name: &str) -> Option<DateTime<Utc>> {
    let raw = fields.get(name)?.get("timestampValue")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> Value {
        json!({
            "name": "projects/p/databases/(default)/documents/artifacts/app/users/u1/jobs/job-42",
            "fields": {
                "ownerId": { "stringValue": "u1" },
                "prompt": { "stringValue": "A blue lion logo" },
                "style": { "stringValue": "monogram" },
                "status": { "stringValue": "done" },
                "logoUrl": { "stringValue": "https://x/y.png" },
                "createdAt": { "timestampValue": "2026-08-01T10:00:00.000000Z" },
                "completedAt": { "timestampValue": "2026-08-01T10:02:00.000000Z" }
            },
            "createTime": "2026-08-01T10:00:00.000001Z",
            "updateTime": "2026-08-01T10:02:00.000001Z"
        })
    }

    #[test]
    fn builds_the_nested_collection_path() {
        assert_eq!(
            jobs_url("p", "default-hexa-app", "u1"),
            "https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents/artifacts/default-hexa-app/users/u1/jobs"
        );
    }

    #[test]
    fn decodes_a_full_document() {
        let job = decode_job(&sample_doc(), "fallback").unwrap();
        assert_eq!(job.id, "job-42");
        assert_eq!(job.owner_id, "u1");
        assert_eq!(job.style, LogoStyle::Monogram);
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.logo_url.as_deref(), Some("https://x/y.png"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn unknown_style_degrades_to_sentinel() {
        let mut doc = sample_doc();
        doc["fields"]["style"] = json!({ "stringValue": "brutalist" });
        let job = decode_job(&doc, "u1").unwrap();
        assert_eq!(job.style, LogoStyle::None);
    }

    #[test]
    fn empty_logo_url_reads_as_absent() {
        let mut doc = sample_doc();
        doc["fields"]["logoUrl"] = json!({ "stringValue": "" });
        doc["fields"]["status"] = json!({ "stringValue": "processing" });
        let job = decode_job(&doc, "u1").unwrap();
        assert!(job.logo_url.is_none());
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let mut doc = sample_doc();
        doc["fields"]["status"] = json!({ "stringValue": "paused" });
        assert!(matches!(
            decode_job(&doc, "u1"),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn paged_listing_concatenates_until_the_token_runs_out() {
        let page_one = json!({ "documents": [sample_doc()], "nextPageToken": "tok-1" });
        let page_two = json!({ "documents": [sample_doc(), sample_doc()] });

        let mut docs = page_documents(&page_one);
        assert_eq!(next_page_token(&page_one).as_deref(), Some("tok-1"));
        docs.extend(page_documents(&page_two));
        assert!(next_page_token(&page_two).is_none());
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn empty_page_token_ends_the_listing() {
        // Firestore omits the field on the last page; an empty string means
        // the same thing
        let body = json!({ "nextPageToken": "" });
        assert!(next_page_token(&body).is_none());
        assert!(page_documents(&body).is_empty());
    }

    #[test]
    fn encodes_create_fields_with_processing_status() {
        let request = JobRequest::new("X", LogoStyle::Vintage);
        let created_at = Utc::now();
        let fields = encode_fields("u1", &request, created_at);
        assert_eq!(fields["status"]["stringValue"], "processing");
        assert_eq!(fields["style"]["stringValue"], "vintage");
        assert_eq!(fields["ownerId"]["stringValue"], "u1");
        assert!(fields["createdAt"]["timestampValue"].is_string());
    }

    #[test]
    fn encode_decode_round_trip_preserves_the_record() {
        let request = JobRequest::new("A mascot dragon", LogoStyle::Mascot);
        let created_at = "2026-08-01T10:00:00.000000Z"
            .parse::<DateTime<Utc>>()
            .unwrap();
        let doc = json!({
            "name": "projects/p/databases/(default)/documents/a/b/c/d/jobs/new-id",
            "fields": encode_fields("u1", &request, created_at),
        });
        let job = decode_job(&doc, "u1").unwrap();
        assert_eq!(job.id, "new-id");
        assert_eq!(job.prompt, "A mascot dragon");
        assert_eq!(job.style, LogoStyle::Mascot);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.created_at, created_at);
        assert!(job.logo_url.is_none());
    }
}
