//! Firestore adapter over the v1 REST API.
//!
//! Documents live at `projects/{p}/databases/(default)/documents/users/{uid}/expenses/{id}`.
//! Batch deletes go through `documents:commit`, which applies all writes
//! atomically. Live updates are produced by polling the collection: the
//! first snapshot is pushed immediately, later ones only when the result
//! set differs from the last one pushed. Every local write bumps a counter
//! the poller watches, so this client sees its own echo without waiting a
//! full interval, even when the write lands while a poll is in flight.
//!
//! A 401 gets one retry with a renewed id token before it is reported.

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{Category, ExpenseFields, ExpenseRecord, RecordId};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::{DocumentStore, SnapshotFeed, expenses_path};
use crate::error::StoreError;
use crate::identity::TokenSource;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Override for the emulator, e.g. `http://localhost:8080/v1`
    pub base_url: String,
    pub poll_interval: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `projects/{p}/databases/(default)/documents`
    fn documents_root(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }
}

#[derive(Clone)]
pub struct FirestoreStore {
    http: Client,
    config: FirestoreConfig,
    tokens: Arc<dyn TokenSource>,
    writes: Arc<watch::Sender<u64>>,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: Client::new(),
            config,
            tokens,
            writes: Arc::new(watch::Sender::new(0)),
        }
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    fn collection_url(&self, user_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url,
            self.config.documents_root(),
            expenses_path(user_id)
        )
    }

    fn document_name(&self, user_id: &str, id: &RecordId) -> String {
        format!(
            "{}/{}/{}",
            self.config.documents_root(),
            expenses_path(user_id),
            id
        )
    }

    fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        let token = self.tokens.id_token().ok_or(StoreError::Unauthenticated)?;
        Ok(req.bearer_auth(token))
    }

    /// Send with the current id token. On 401 the token is renewed once and
    /// the request rebuilt and resent.
    async fn send<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let resp = self.authorized(build())?.send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        info!("id token rejected; renewing");
        let token = self.tokens.renew().await.map_err(|e| {
            warn!("could not renew id token: {e}");
            StoreError::Unauthenticated
        })?;
        Ok(build().bearer_auth(token).send().await?)
    }

    fn note_write(&self) {
        self.writes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Fetch the whole collection, following pagination
    async fn list(&self, user_id: &str) -> Result<Vec<ExpenseRecord>, StoreError> {
        let url = self.collection_url(user_id);
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let resp = self
                .send(|| {
                    let req = self
                        .http
                        .get(&url)
                        .query(&[("pageSize", PAGE_SIZE.to_string())]);
                    match &page_token {
                        Some(t) => req.query(&[("pageToken", t)]),
                        None => req,
                    }
                })
                .await?;
            let page: ListResponse = check(resp).await?.json().await?;

            records.extend(page.documents.into_iter().filter_map(decode_document));
            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn poll_loop(
        self,
        user_id: String,
        mut last: Vec<ExpenseRecord>,
        mut writes: watch::Receiver<u64>,
        tx: mpsc::UnboundedSender<Result<Vec<ExpenseRecord>, StoreError>>,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately; the initial snapshot was already sent
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
                changed = writes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            match self.list(&user_id).await {
                Ok(records) => {
                    if records != last {
                        debug!("collection of {user_id} changed: {} records", records.len());
                        if tx.send(Ok(records.clone())).is_err() {
                            break;
                        }
                        last = records;
                    }
                }
                Err(e) => {
                    warn!("polling {user_id} failed, closing listener: {e}");
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
        debug!("listener for {user_id} stopped");
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn create(&self, user_id: &str, fields: ExpenseFields) -> Result<RecordId, StoreError> {
        let body = Document::from_fields(&fields);
        let url = self.collection_url(user_id);
        let resp = self.send(|| self.http.post(&url).json(&body)).await?;
        let created: Document = check(resp).await?.json().await?;

        let id = created
            .name
            .as_deref()
            .and_then(|n| n.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(RecordId::new)
            .ok_or_else(|| StoreError::Decode("created document has no name".into()))?;

        info!("created {id} for {user_id}");
        self.note_write();
        Ok(id)
    }

    async fn delete(&self, user_id: &str, id: &RecordId) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.collection_url(user_id), id);
        let resp = self.send(|| self.http.delete(&url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("{id} already absent for {user_id}");
            return Ok(());
        }
        check(resp).await?;
        self.note_write();
        Ok(())
    }

    async fn delete_batch(&self, user_id: &str, ids: &[RecordId]) -> Result<(), StoreError> {
        let body = CommitRequest {
            writes: ids
                .iter()
                .map(|id| Write {
                    delete: self.document_name(user_id, id),
                })
                .collect(),
        };
        let url = format!(
            "{}/{}:commit",
            self.config.base_url,
            self.config.documents_root()
        );
        let resp = self.send(|| self.http.post(&url).json(&body)).await?;
        check(resp).await?;

        info!("committed batch delete of {} documents for {user_id}", ids.len());
        self.note_write();
        Ok(())
    }

    async fn listen(&self, user_id: &str) -> Result<SnapshotFeed, StoreError> {
        // subscribe first so a write racing the initial list still re-polls
        let writes = self.writes.subscribe();
        let first = self.list(user_id).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(first.clone()));

        tokio::spawn(
            self.clone()
                .poll_loop(user_id.to_string(), first, writes, tx),
        );
        Ok(rx)
    }
}

/// Map a non-success response to `StoreError`, extracting Firestore's message
async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(StoreError::Unauthenticated);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error.message)
        .unwrap_or(text);
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommitRequest {
    writes: Vec<Write>,
}

#[derive(Debug, Serialize)]
struct Write {
    delete: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

/// Typed Firestore value. Only the kinds an expense uses are modelled;
/// anything else deserializes to all-`None`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    /// Number, or "NaN" / "Infinity" strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    double_value: Option<Json>,
    /// int64 encoded as a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    integer_value: Option<String>,
}

impl Value {
    fn string(s: impl Into<String>) -> Self {
        Self {
            string_value: Some(s.into()),
            ..Self::default()
        }
    }

    fn double(n: f64) -> Self {
        Self {
            double_value: Some(Json::from(n)),
            ..Self::default()
        }
    }

    fn as_str(&self) -> Option<&str> {
        self.string_value.as_deref()
    }

    fn as_number(&self) -> Option<f64> {
        if let Some(i) = &self.integer_value {
            return i.parse::<i64>().ok().map(|i| i as f64);
        }
        match self.double_value.as_ref()? {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }
}

impl Document {
    fn from_fields(fields: &ExpenseFields) -> Self {
        let mut map = HashMap::new();
        map.insert("name".to_string(), Value::string(&fields.name));
        map.insert("amount".to_string(), Value::double(fields.amount));
        map.insert("category".to_string(), Value::string(fields.category.as_str()));
        map.insert(
            "date".to_string(),
            Value::string(fields.date.format("%Y-%m-%d").to_string()),
        );
        Self {
            name: None,
            fields: map,
        }
    }
}

/// Turn a listed document into a record. Documents missing a required field
/// are skipped with a warning; an unknown category is read as Others.
fn decode_document(doc: Document) -> Option<ExpenseRecord> {
    let Some(id) = doc
        .name
        .as_deref()
        .and_then(|n| n.rsplit('/').next())
        .filter(|id| !id.is_empty())
    else {
        warn!("skipping document without a name");
        return None;
    };
    let id = RecordId::new(id);

    let field = |key: &str| doc.fields.get(key);

    let Some(name) = field("name").and_then(Value::as_str) else {
        warn!("skipping {id}: no name field");
        return None;
    };
    let Some(amount) = field("amount")
        .and_then(Value::as_number)
        .filter(|a| a.is_finite())
    else {
        warn!("skipping {id}: amount is not a finite number");
        return None;
    };
    let Some(date) = field("date")
        .and_then(Value::as_str)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    else {
        warn!("skipping {id}: date is not YYYY-MM-DD");
        return None;
    };
    let category = match field("category").and_then(Value::as_str) {
        Some(c) => c.parse::<Category>().unwrap_or_else(|_| {
            warn!("{id} has unknown category {c:?}; reading it as Others");
            Category::Others
        }),
        None => Category::default(),
    };

    Some(ExpenseRecord {
        id,
        name: name.to_string(),
        amount,
        category,
        date,
    })
}
