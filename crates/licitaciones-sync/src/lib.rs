//! Page-by-page tender sync: fetch, normalize, upsert by `codigo_externo`.

use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use licitaciones_adapters::{normalize_at, ChileCompraSource, TenderSource};
use licitaciones_core::NormalizedTender;
use licitaciones_storage::{FetchError, PgTenderStore, PostgrestTenderStore, StoreError, TenderStore};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod config;
mod report;

pub use config::{ConfigError, IngestConfig, StoreBackend};
pub use report::write_run_report;

pub const CRATE_NAME: &str = "licitaciones-sync";

/// Days covered by the default date window, ending today.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// What to do when a single record's store read or write fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Stop the run and report the failing record. Earlier writes stay.
    #[default]
    Abort,
    /// Log the failure, count the record as skipped and keep going.
    SkipAndLog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub start_page: u32,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub all_pages: bool,
}

impl SyncRequest {
    /// First page only, for the `DEFAULT_WINDOW_DAYS` days up to `today`.
    pub fn for_window_ending(today: NaiveDate) -> Self {
        Self {
            start_page: 1,
            date_from: today - Duration::days(DEFAULT_WINDOW_DAYS),
            date_to: today,
            all_pages: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl AddAssign for SyncCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageReport {
    pub page: u32,
    pub records: usize,
    pub total_pages: u32,
    /// `PaginaActual` as echoed by the API.
    pub reported_page: Option<u32>,
    /// `CantidadRegistros`: matching tenders across all pages.
    pub reported_records: Option<u64>,
    #[serde(flatten)]
    pub counts: SyncCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub source_id: String,
    pub store_backend: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub pages: Vec<PageReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Select,
    Insert,
    Update,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Aborted run. `counts` holds what was committed before the failure; those
/// writes are not rolled back.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching page {page} failed: {source}")]
    Fetch {
        page: u32,
        counts: SyncCounts,
        #[source]
        source: FetchError,
    },
    #[error("store {operation} for codigo_externo {external_code:?} failed: {source}")]
    Store {
        page: u32,
        external_code: String,
        operation: StoreOperation,
        counts: SyncCounts,
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    pub fn counts(&self) -> SyncCounts {
        match self {
            Self::Fetch { counts, .. } | Self::Store { counts, .. } => *counts,
        }
    }
}

pub struct SyncEngine {
    source: Arc<dyn TenderSource>,
    store: Arc<dyn TenderStore>,
    store_failure_policy: StoreFailurePolicy,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn TenderSource>, store: Arc<dyn TenderStore>) -> Self {
        Self {
            source,
            store,
            store_failure_policy: StoreFailurePolicy::default(),
        }
    }

    /// Wires the ChileCompra source and the store backend named by the config.
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let http = config.http_client_config();
        let source = ChileCompraSource::new(&config.api_url, config.api_key.clone(), http.clone())?;
        let store: Arc<dyn TenderStore> = match config.store_backend {
            StoreBackend::Postgrest => Arc::new(PostgrestTenderStore::new(&config.store_url, &config.store_key, &http)?),
            StoreBackend::Postgres => Arc::new(PgTenderStore::connect_lazy(
                &config.store_url,
                &config.store_key,
                config.http_timeout,
            )?),
        };
        Ok(Self::new(Arc::new(source), store))
    }

    pub fn with_store_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.store_failure_policy = policy;
        self
    }

    pub fn store_failure_policy(&self) -> StoreFailurePolicy {
        self.store_failure_policy
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Walks pages from `request.start_page`, strictly sequentially: each
    /// page is fully written before the next one is requested, and records
    /// are upserted in listing order so repeated codes see earlier writes.
    pub async fn run(&self, request: &SyncRequest) -> Result<SyncSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut page = request.start_page;
        let mut counts = SyncCounts::default();
        let mut pages = Vec::new();

        info!(
            %run_id,
            source_id = self.source.source_id(),
            store = self.store_backend(),
            date_from = %request.date_from,
            date_to = %request.date_to,
            start_page = request.start_page,
            all_pages = request.all_pages,
            "starting tender sync"
        );

        loop {
            let response = self
                .source
                .fetch_page(page, Some(request.date_from), Some(request.date_to))
                .await
                .map_err(|source| SyncError::Fetch { page, counts, source })?;

            if response.listing.is_empty() {
                info!(page, "no more tenders to process");
                break;
            }
            info!(page, records = response.listing.len(), total_pages = response.total_pages, "processing page");

            let fallback_now = Utc::now();
            let mut page_counts = SyncCounts::default();
            for raw in &response.listing {
                let tender = normalize_at(raw, fallback_now);
                match self.upsert(&tender).await {
                    Ok(UpsertOutcome::Inserted) => page_counts.inserted += 1,
                    Ok(UpsertOutcome::Updated) => page_counts.updated += 1,
                    Err((operation, source)) => match self.store_failure_policy {
                        StoreFailurePolicy::Abort => {
                            counts += page_counts;
                            return Err(SyncError::Store {
                                page,
                                external_code: tender.external_code,
                                operation,
                                counts,
                                source,
                            });
                        }
                        StoreFailurePolicy::SkipAndLog => {
                            warn!(
                                page,
                                external_code = %tender.external_code,
                                %operation,
                                error = %source,
                                "store failure; skipping record"
                            );
                            page_counts.skipped += 1;
                        }
                    },
                }
            }

            counts += page_counts;
            pages.push(PageReport {
                page,
                records: response.listing.len(),
                total_pages: response.total_pages,
                reported_page: response.current_page,
                reported_records: response.record_count,
                counts: page_counts,
            });
            info!(
                page,
                records = response.listing.len(),
                inserted_total = counts.inserted,
                updated_total = counts.updated,
                skipped_total = counts.skipped,
                "page processed"
            );

            if !request.all_pages || page >= response.total_pages {
                break;
            }
            page += 1;
        }

        Ok(SyncSummary {
            run_id,
            source_id: self.source.source_id().to_string(),
            store_backend: self.store_backend().to_string(),
            started_at,
            finished_at: Utc::now(),
            date_from: request.date_from,
            date_to: request.date_to,
            inserted: counts.inserted,
            updated: counts.updated,
            skipped: counts.skipped,
            pages,
        })
    }

    /// One read plus one write against the store.
    async fn upsert(&self, tender: &NormalizedTender) -> Result<UpsertOutcome, (StoreOperation, StoreError)> {
        let existing = self
            .store
            .find_id(&tender.external_code)
            .await
            .map_err(|err| (StoreOperation::Select, err))?;

        match existing {
            Some(id) => {
                self.store
                    .update(tender)
                    .await
                    .map_err(|err| (StoreOperation::Update, err))?;
                debug!(external_code = %tender.external_code, %id, "updated tender");
                Ok(UpsertOutcome::Updated)
            }
            None => {
                self.store
                    .insert(tender)
                    .await
                    .map_err(|err| (StoreOperation::Insert, err))?;
                debug!(external_code = %tender.external_code, "inserted tender");
                Ok(UpsertOutcome::Inserted)
            }
        }
    }
}
