//! Canonical tender model and status mapping for the licitaciones ingest.

use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize, Serializer};

pub const CRATE_NAME: &str = "licitaciones-core";

/// Stored in `organismo` when the buyer organization is missing or blank.
pub const ORGANIZATION_NOT_SPECIFIED: &str = "No especificado";

/// Canonical tender status, persisted with the Spanish labels used by the
/// `licitaciones` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TenderStatus {
    #[serde(rename = "activa")]
    Active,
    #[serde(rename = "cerrada")]
    Closed,
    #[serde(rename = "desierta")]
    Void,
    #[serde(rename = "adjudicada")]
    Awarded,
    #[serde(rename = "revocada")]
    Revoked,
    #[default]
    #[serde(rename = "desconocido")]
    Unknown,
}

impl TenderStatus {
    /// Maps a ChileCompra `CodigoEstado`. Codes outside 1..=5 are `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Active,
            2 => Self::Closed,
            3 => Self::Void,
            4 => Self::Awarded,
            5 => Self::Revoked,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "activa",
            Self::Closed => "cerrada",
            Self::Void => "desierta",
            Self::Awarded => "adjudicada",
            Self::Revoked => "revocada",
            Self::Unknown => "desconocido",
        }
    }
}

impl fmt::Display for TenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical row written to the store. `external_code` is the upsert key;
/// every other field is overwritten on each sync that sees the code again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTender {
    #[serde(rename = "codigo_externo")]
    pub external_code: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "fecha_cierre", serialize_with = "serialize_closing_date")]
    pub closing_date: DateTime<FixedOffset>,
    #[serde(rename = "organismo")]
    pub organization: String,
    #[serde(rename = "monto_estimado")]
    pub estimated_amount: Option<f64>,
    #[serde(rename = "estado")]
    pub status: TenderStatus,
    #[serde(rename = "link_oficial")]
    pub official_link: Option<String>,
}

/// RFC 3339 with a numeric offset: UTC is written `+00:00`, never `Z`.
fn serialize_closing_date<S: Serializer>(value: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, false))
}
