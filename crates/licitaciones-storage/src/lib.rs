//! Tender persistence backends + HTTP fetch utilities for the licitaciones ingest.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use licitaciones_core::NormalizedTender;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

mod postgres;
mod postgrest;

pub use postgres::PgTenderStore;
pub use postgrest::PostgrestTenderStore;

pub const CRATE_NAME: &str = "licitaciones-storage";

/// Table holding one row per `codigo_externo`.
pub const TENDERS_TABLE: &str = "licitaciones";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

impl HttpClientConfig {
    pub fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.timeout);

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build().context("building reqwest client")
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("undecodable response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("api error {code}: {message}")]
    Api { code: String, message: String },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest embeds the full URL, query string (and credentials) included.
        Self::Request(err.without_url())
    }
}

/// Single-shot JSON fetcher. No retries: a failed request is returned as-is.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: config.build_client()?,
        })
    }

    pub async fn fetch_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_fetch", url);
        async move {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            let final_url = redacted_url(resp.url());

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?;
            debug!(status = status.as_u16(), bytes = body.len(), "fetched response");
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: final_url,
                source,
            })
        }
        .instrument(span)
        .await
    }
}

fn redacted_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("store responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable store response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no stored tender with codigo_externo {0:?}")]
    Missing(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.without_url())
    }
}

impl StoreError {
    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        Self::Status {
            status: status.as_u16(),
            body,
        }
    }
}

/// Table-like collection of tenders keyed by `external_code`.
///
/// Callers upsert by pairing [`TenderStore::find_id`] with either
/// [`TenderStore::insert`] or [`TenderStore::update`]; implementations must
/// give read-after-write consistency for a single caller.
#[async_trait]
pub trait TenderStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Row identity of the tender stored under `external_code`, if any.
    async fn find_id(&self, external_code: &str) -> Result<Option<String>, StoreError>;

    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError>;

    /// Overwrites every column except identity of the row keyed by
    /// `tender.external_code`.
    async fn update(&self, tender: &NormalizedTender) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredTender {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tender: NormalizedTender,
}

/// Process-local store keyed the same way as the `licitaciones` table.
#[derive(Debug, Default)]
pub struct MemoryTenderStore {
    rows: Mutex<BTreeMap<String, StoredTender>>,
}

impl MemoryTenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    pub async fn get(&self, external_code: &str) -> Option<StoredTender> {
        self.rows.lock().await.get(external_code).cloned()
    }

    /// Rows ordered by `external_code`.
    pub async fn snapshot(&self) -> Vec<StoredTender> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl TenderStore for MemoryTenderStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_id(&self, external_code: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .rows
            .lock()
            .await
            .get(external_code)
            .map(|row| row.id.to_string()))
    }

    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&tender.external_code) {
            return Err(StoreError::from_status(
                StatusCode::CONFLICT,
                format!("duplicate codigo_externo {:?}", tender.external_code),
            ));
        }
        rows.insert(
            tender.external_code.clone(),
            StoredTender {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                tender: tender.clone(),
            },
        );
        Ok(())
    }

    async fn update(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(&tender.external_code)
            .ok_or_else(|| StoreError::Missing(tender.external_code.clone()))?;
        row.tender = tender.clone();
        row.updated_at = Utc::now();
        Ok(())
    }
}
