use anyhow::Context;
use async_trait::async_trait;
use licitaciones_core::NormalizedTender;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value as JsonValue;
use tracing::{debug, info_span, Instrument};

use crate::{HttpClientConfig, StoreError, TenderStore, TENDERS_TABLE};

/// `licitaciones` table behind a PostgREST endpoint (Supabase REST API),
/// authenticated with a service-role key.
#[derive(Debug, Clone)]
pub struct PostgrestTenderStore {
    client: reqwest::Client,
    table_url: String,
}

impl PostgrestTenderStore {
    pub fn new(base_url: &str, service_key: &str, http: &HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut api_key = HeaderValue::from_str(service_key).context("store key is not a valid header value")?;
        api_key.set_sensitive(true);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {service_key}"))
            .context("store key is not a valid header value")?;
        bearer.set_sensitive(true);
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = reqwest::Client::builder()
            .timeout(http.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &http.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building PostgREST client")?;

        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), TENDERS_TABLE),
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }
}

fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::from_status(status, body))
}

fn id_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl TenderStore for PostgrestTenderStore {
    fn backend(&self) -> &'static str {
        "postgrest"
    }

    async fn find_id(&self, external_code: &str) -> Result<Option<String>, StoreError> {
        let span = info_span!("store_select", external_code);
        async move {
            let resp = self
                .client
                .get(&self.table_url)
                .query(&[("select", "id".to_string()), ("codigo_externo", eq_filter(external_code))])
                .send()
                .await?;
            let resp = ensure_success(resp).await?;
            let rows: Vec<JsonValue> = serde_json::from_slice(&resp.bytes().await?)?;
            debug!(rows = rows.len(), "selected by codigo_externo");
            Ok(rows.first().and_then(|row| row.get("id")).and_then(id_to_string))
        }
        .instrument(span)
        .await
    }

    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(tender)
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn update(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        let resp = self
            .client
            .patch(&self.table_url)
            .query(&[("codigo_externo", eq_filter(&tender.external_code))])
            .header("Prefer", "return=minimal")
            .json(tender)
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }
}
