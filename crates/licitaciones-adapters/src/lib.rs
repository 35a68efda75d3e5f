//! ChileCompra source adapter: wire types, page fetching and record normalization.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use licitaciones_storage::{FetchError, HttpClientConfig, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info_span, Instrument};

mod normalize;

pub use normalize::{normalize, normalize_at, parse_closing_date};

pub const CRATE_NAME: &str = "licitaciones-adapters";

pub const DEFAULT_API_URL: &str = "https://api.mercadopublico.cl";

/// Path of the paginated tender listing under the API root.
pub const LISTING_PATH: &str = "/licitaciones/v1/Licitaciones.svc";

/// Query-string date format for `fechaDesde` / `fechaHasta`.
pub const QUERY_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBuyer {
    pub organization_name: Option<String>,
}

/// One element of `Listado`, as loosely typed as the API serves it.
///
/// Built from arbitrary JSON without failing: fields that are missing, null
/// or of an unexpected type read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "JsonValue")]
pub struct RawTenderRecord {
    pub external_code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub closing_date: Option<String>,
    pub buyer: Option<RawBuyer>,
    pub estimated_amount: Option<f64>,
    pub status_code: Option<i64>,
    pub link: Option<String>,
}

impl From<JsonValue> for RawTenderRecord {
    fn from(value: JsonValue) -> Self {
        let buyer = value
            .get("Comprador")
            .filter(|v| v.is_object())
            .map(|comprador| RawBuyer {
                organization_name: json_str(comprador, &["NombreOrganismo"]).map(ToString::to_string),
            });
        Self {
            external_code: json_string(&value, &["CodigoExterno"]),
            name: json_str(&value, &["Nombre"]).map(ToString::to_string),
            description: json_str(&value, &["Descripcion"]).map(ToString::to_string),
            closing_date: json_str(&value, &["FechaCierre"]).map(ToString::to_string),
            buyer,
            estimated_amount: json_f64(&value, &["MontoEstimado"]),
            status_code: json_i64(&value, &["CodigoEstado"]),
            link: json_str(&value, &["Link"]).map(ToString::to_string),
        }
    }
}

/// Decoded body of one listing page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "JsonValue")]
pub struct PageResponse {
    pub listing: Vec<RawTenderRecord>,
    /// `TotalPaginas`; 1 when the API omits it.
    pub total_pages: u32,
    pub current_page: Option<u32>,
    pub record_count: Option<u64>,
}

impl TryFrom<JsonValue> for PageResponse {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        if !value.is_object() {
            return Err(format!("expected a JSON object, got {}", json_kind(&value)));
        }
        let listing = match value.get("Listado") {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items.iter().cloned().map(RawTenderRecord::from).collect(),
            Some(other) => return Err(format!("Listado must be an array, got {}", json_kind(other))),
        };
        Ok(Self {
            listing,
            total_pages: json_u32(&value, &["TotalPaginas"]).unwrap_or(1),
            current_page: json_u32(&value, &["PaginaActual"]),
            record_count: json_i64(&value, &["CantidadRegistros"]).and_then(|n| u64::try_from(n).ok()),
        })
    }
}

/// A paginated tender listing.
#[async_trait]
pub trait TenderSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_page(
        &self,
        page: u32,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<PageResponse, FetchError>;
}

/// Mercado Público `Licitaciones.svc` listing.
#[derive(Clone)]
pub struct ChileCompraSource {
    http: HttpFetcher,
    endpoint: String,
    ticket: String,
}

impl fmt::Debug for ChileCompraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChileCompraSource")
            .field("endpoint", &self.endpoint)
            .field("ticket", &"<redacted>")
            .finish()
    }
}

impl ChileCompraSource {
    pub fn new(base_url: &str, ticket: impl Into<String>, http: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(http)?,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), LISTING_PATH),
            ticket: ticket.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn query_for(
        &self,
        page: u32,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![("ticket", self.ticket.clone()), ("pagina", page.to_string())];
        if let Some(from) = date_from {
            query.push(("fechaDesde", from.format(QUERY_DATE_FORMAT).to_string()));
        }
        if let Some(to) = date_to {
            query.push(("fechaHasta", to.format(QUERY_DATE_FORMAT).to_string()));
        }
        query
    }
}

#[async_trait]
impl TenderSource for ChileCompraSource {
    fn source_id(&self) -> &'static str {
        "chilecompra"
    }

    async fn fetch_page(
        &self,
        page: u32,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<PageResponse, FetchError> {
        let span = info_span!("fetch_page", source_id = self.source_id(), page);
        async move {
            let query = self.query_for(page, date_from, date_to);
            let value = self.http.fetch_json(&self.endpoint, &query).await?;
            if let Some(err) = api_error(&value) {
                return Err(err);
            }
            serde_json::from_value(value).map_err(|source| FetchError::Decode {
                url: self.endpoint.clone(),
                source,
            })
        }
        .instrument(span)
        .await
    }
}

/// ChileCompra reports some failures (bad ticket, rate limiting) as a
/// successful response carrying `Codigo` + `Mensaje` instead of a listing.
fn api_error(value: &JsonValue) -> Option<FetchError> {
    let code = value.get("Codigo").filter(|v| !v.is_null())?;
    let message = json_str(value, &["Mensaje"])?;
    let code = match code {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(FetchError::Api {
        code,
        message: message.to_string(),
    })
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// Like `json_str`, but also accepts numeric identifiers.
fn json_string(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_u32(value: &JsonValue, path: &[&str]) -> Option<u32> {
    json_i64(value, path).and_then(|n| u32::try_from(n).ok())
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_record_reads_every_chilecompra_field() {
        let raw = RawTenderRecord::from(json!({
            "CodigoExterno": "1509-5-L124",
            "Nombre": "Adquisición de insumos",
            "Descripcion": "Guantes",
            "FechaCierre": "2024-06-01T15:00:00",
            "Comprador": { "NombreOrganismo": "Hospital Regional" },
            "MontoEstimado": 2500000,
            "CodigoEstado": 5,
            "Link": "https://www.mercadopublico.cl/ficha?code=1509-5-L124"
        }));
        assert_eq!(raw.external_code.as_deref(), Some("1509-5-L124"));
        assert_eq!(raw.name.as_deref(), Some("Adquisición de insumos"));
        assert_eq!(raw.description.as_deref(), Some("Guantes"));
        assert_eq!(raw.closing_date.as_deref(), Some("2024-06-01T15:00:00"));
        assert_eq!(
            raw.buyer.and_then(|b| b.organization_name).as_deref(),
            Some("Hospital Regional")
        );
        assert_eq!(raw.estimated_amount, Some(2_500_000.0));
        assert_eq!(raw.status_code, Some(5));
        assert!(raw.link.is_some());
    }

    #[test]
    fn raw_record_tolerates_nulls_and_wrong_types() {
        let raw = RawTenderRecord::from(json!({
            "CodigoExterno": 4455,
            "Nombre": null,
            "FechaCierre": 20240601,
            "Comprador": null,
            "MontoEstimado": "1500.5",
            "CodigoEstado": "2",
            "Link": ["not", "a", "link"]
        }));
        assert_eq!(raw.external_code.as_deref(), Some("4455"));
        assert_eq!(raw.name, None);
        assert_eq!(raw.closing_date, None);
        assert_eq!(raw.buyer, None);
        assert_eq!(raw.estimated_amount, Some(1500.5));
        assert_eq!(raw.status_code, Some(2));
        assert_eq!(raw.link, None);

        assert_eq!(RawTenderRecord::from(json!("garbage")), RawTenderRecord::default());
    }

    #[test]
    fn page_response_defaults_total_pages_and_listing() {
        let page: PageResponse = serde_json::from_value(json!({})).unwrap();
        assert!(page.listing.is_empty());
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.current_page, None);

        let page: PageResponse = serde_json::from_value(json!({
            "Listado": [{ "CodigoExterno": "A" }, { "CodigoExterno": "B" }],
            "TotalPaginas": 4,
            "PaginaActual": 2,
            "CantidadRegistros": 350
        }))
        .unwrap();
        assert_eq!(page.listing.len(), 2);
        assert_eq!(page.total_pages, 4);
        assert_eq!(page.current_page, Some(2));
        assert_eq!(page.record_count, Some(350));
    }

    #[test]
    fn page_response_rejects_non_object_bodies() {
        let err = serde_json::from_value::<PageResponse>(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("expected a JSON object"));

        let err = serde_json::from_value::<PageResponse>(json!({ "Listado": "nope" })).unwrap_err();
        assert!(err.to_string().contains("Listado must be an array"));
    }

    #[test]
    fn api_error_envelope_is_detected() {
        let err = api_error(&json!({
            "Codigo": 10500,
            "Mensaje": "Lo sentimos. Hemos detectado que existen peticiones simultáneas."
        }))
        .expect("envelope");
        match err {
            FetchError::Api { code, message } => {
                assert_eq!(code, "10500");
                assert!(message.starts_with("Lo sentimos"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(api_error(&json!({ "Listado": [], "TotalPaginas": 1 })).is_none());
    }

    #[test]
    fn query_includes_ticket_page_and_optional_dates() {
        let source = ChileCompraSource::new("https://api.example.test/", "T-1", HttpClientConfig::default()).unwrap();
        assert_eq!(source.endpoint(), "https://api.example.test/licitaciones/v1/Licitaciones.svc");

        let q = source.query_for(2, None, None);
        assert_eq!(q, vec![("ticket", "T-1".to_string()), ("pagina", "2".to_string())]);

        let from = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 2, 4).unwrap();
        let q = source.query_for(1, Some(from), Some(to));
        assert!(q.contains(&("fechaDesde", "2024-01-05".to_string())));
        assert!(q.contains(&("fechaHasta", "2024-02-04".to_string())));
    }

    #[test]
    fn debug_output_hides_ticket() {
        let source = ChileCompraSource::new(DEFAULT_API_URL, "SECRET-TICKET", HttpClientConfig::default()).unwrap();
        assert!(!format!("{source:?}").contains("SECRET-TICKET"));
    }
}
