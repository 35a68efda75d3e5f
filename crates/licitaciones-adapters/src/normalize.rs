use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use licitaciones_core::{NormalizedTender, TenderStatus, ORGANIZATION_NOT_SPECIFIED};
use tracing::debug;

use crate::RawTenderRecord;

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Normalizes against the wall clock. See [`normalize_at`].
pub fn normalize(raw: &RawTenderRecord) -> NormalizedTender {
    normalize_at(raw, Utc::now())
}

/// Maps one listing record onto the canonical schema. Never fails: absent or
/// malformed fields degrade to defaults, and a missing or unparseable closing
/// date becomes `now`. That fallback makes repeated syncs of such a record
/// store a different `fecha_cierre` each run.
pub fn normalize_at(raw: &RawTenderRecord, now: DateTime<Utc>) -> NormalizedTender {
    let external_code = raw.external_code.clone().unwrap_or_default();

    let closing_date = match raw.closing_date.as_deref().map(|text| (text, parse_closing_date(text))) {
        Some((_, Some(parsed))) => parsed,
        Some((text, None)) => {
            debug!(external_code = %external_code, closing_date = text, "unparseable FechaCierre; using current time");
            now.fixed_offset()
        }
        None => {
            debug!(external_code = %external_code, "missing FechaCierre; using current time");
            now.fixed_offset()
        }
    };

    let organization = raw
        .buyer
        .as_ref()
        .and_then(|buyer| buyer.organization_name.as_deref())
        .filter(|name| !name.is_empty())
        .unwrap_or(ORGANIZATION_NOT_SPECIFIED)
        .to_string();

    NormalizedTender {
        name: raw.name.clone().unwrap_or_default(),
        description: raw.description.clone(),
        closing_date,
        organization,
        estimated_amount: raw.estimated_amount,
        status: TenderStatus::from_code(raw.status_code.unwrap_or(0)),
        official_link: raw.link.clone(),
        external_code,
    }
}

/// ISO-8601 parse of `FechaCierre`. A trailing `Z` means `+00:00`; values
/// without an offset (the API's usual shape) and bare dates are taken as UTC.
pub fn parse_closing_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let text = match text.strip_suffix(['Z', 'z']) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => text.to_string(),
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(parsed);
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&text, format) {
            return Some(parsed);
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    let naive = match text.split_once(['T', ' ']) {
        Some((date, hour)) => parse_date_and_hour(date, hour),
        None => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0)),
    }?;
    Some(Utc.from_utc_datetime(&naive).fixed_offset())
}

/// `YYYY-MM-DDTHH`: chrono's format parser insists on minutes.
fn parse_date_and_hour(date: &str, hour: &str) -> Option<NaiveDateTime> {
    if hour.len() != 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(hour.parse().ok()?, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawBuyer;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn end_to_end_example_record() {
        let raw = RawTenderRecord::from(json!({
            "CodigoExterno": "123-1",
            "Nombre": "Compra X",
            "FechaCierre": "2024-06-01T00:00:00Z",
            "Comprador": { "NombreOrganismo": "Municipalidad" },
            "CodigoEstado": 1
        }));
        let tender = normalize_at(&raw, fixed_now());

        assert_eq!(tender.external_code, "123-1");
        assert_eq!(tender.name, "Compra X");
        assert_eq!(tender.closing_date.to_rfc3339(), "2024-06-01T00:00:00+00:00");
        assert_eq!(tender.organization, "Municipalidad");
        assert_eq!(tender.status, TenderStatus::Active);
        assert_eq!(tender.description, None);
        assert_eq!(tender.estimated_amount, None);
        assert_eq!(tender.official_link, None);
    }

    #[test]
    fn empty_record_degrades_to_defaults() {
        let before = Utc::now();
        let tender = normalize(&RawTenderRecord::default());
        let after = Utc::now();

        assert_eq!(tender.external_code, "");
        assert_eq!(tender.name, "");
        assert_eq!(tender.organization, "No especificado");
        assert_eq!(tender.status, TenderStatus::Unknown);
        assert_eq!(tender.description, None);
        assert_eq!(tender.estimated_amount, None);
        assert_eq!(tender.official_link, None);
        let closing = tender.closing_date.with_timezone(&Utc);
        assert!(closing >= before && closing <= after);
    }

    #[test]
    fn unparseable_closing_date_falls_back_to_now() {
        let raw = RawTenderRecord {
            closing_date: Some("pronto".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize_at(&raw, fixed_now()).closing_date, fixed_now().fixed_offset());
    }

    #[test]
    fn missing_or_empty_organization_uses_sentinel() {
        for name in [None, Some("")] {
            let raw = RawTenderRecord {
                buyer: Some(RawBuyer {
                    organization_name: name.map(ToString::to_string),
                }),
                ..Default::default()
            };
            assert_eq!(normalize_at(&raw, fixed_now()).organization, ORGANIZATION_NOT_SPECIFIED);
        }
        assert_eq!(
            normalize_at(&RawTenderRecord::default(), fixed_now()).organization,
            ORGANIZATION_NOT_SPECIFIED
        );
    }

    #[test]
    fn whitespace_organization_is_kept_verbatim() {
        let raw = RawTenderRecord::from(json!({ "Comprador": { "NombreOrganismo": "   " } }));
        assert_eq!(normalize_at(&raw, fixed_now()).organization, "   ");
    }

    #[test]
    fn passthrough_fields_are_kept_verbatim() {
        let raw = RawTenderRecord {
            external_code: Some("77-9-LE24".to_string()),
            description: Some("  texto libre  ".to_string()),
            estimated_amount: Some(0.0),
            status_code: Some(4),
            link: Some("http://x".to_string()),
            ..Default::default()
        };
        let tender = normalize_at(&raw, fixed_now());
        assert_eq!(tender.description.as_deref(), Some("  texto libre  "));
        assert_eq!(tender.estimated_amount, Some(0.0));
        assert_eq!(tender.status, TenderStatus::Awarded);
        assert_eq!(tender.official_link.as_deref(), Some("http://x"));
    }

    #[test]
    fn closing_date_shapes() {
        let cases = [
            ("2024-06-01T00:00:00Z", "2024-06-01T00:00:00+00:00"),
            ("2024-06-01T15:30:00-04:00", "2024-06-01T15:30:00-04:00"),
            ("2024-06-01T15:30:00.250+00:00", "2024-06-01T15:30:00.250+00:00"),
            ("2024-06-01T15:30:00", "2024-06-01T15:30:00+00:00"),
            ("2024-06-01 15:30:00", "2024-06-01T15:30:00+00:00"),
            ("2024-06-01T15:30", "2024-06-01T15:30:00+00:00"),
            ("2024-06-01 15:30", "2024-06-01T15:30:00+00:00"),
            ("2024-06-01T00", "2024-06-01T00:00:00+00:00"),
            ("2024-06-01T15", "2024-06-01T15:00:00+00:00"),
            ("2024-06-01", "2024-06-01T00:00:00+00:00"),
        ];
        for (input, expected) in cases {
            let parsed = parse_closing_date(input).unwrap_or_else(|| panic!("{input} should parse"));
            assert_eq!(parsed.to_rfc3339(), expected, "input {input}");
        }
    }

    #[test]
    fn closing_date_rejects_garbage() {
        for input in ["", "   ", "01/06/2024", "2024-13-01", "mañana", "Z", "2024-06-01T24", "2024-06-01T1", "2024-06-01Tx"] {
            assert!(parse_closing_date(input).is_none(), "input {input:?}");
        }
    }
}
