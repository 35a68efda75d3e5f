use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use licitaciones_core::NormalizedTender;
use reqwest::Url;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};

use crate::{StoreError, TenderStore};

/// Direct connection to the Postgres database holding `licitaciones`.
#[derive(Debug, Clone)]
pub struct PgTenderStore {
    pool: PgPool,
}

impl PgTenderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a lazily-connecting pool. `password` is only applied when the
    /// URL does not already carry one.
    pub fn connect_lazy(database_url: &str, password: &str, acquire_timeout: Duration) -> anyhow::Result<Self> {
        let mut options = PgConnectOptions::from_str(database_url).context("parsing postgres store URL")?;
        if !url_has_password(database_url) {
            options = options.password(password);
        }
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options);
        Ok(Self { pool })
    }
}

fn url_has_password(database_url: &str) -> bool {
    Url::parse(database_url)
        .map(|url| url.password().is_some_and(|p| !p.is_empty()))
        .unwrap_or(false)
}

#[async_trait]
impl TenderStore for PgTenderStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn find_id(&self, external_code: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id::text AS id
              FROM licitaciones
             WHERE codigo_externo = $1
             LIMIT 1
            "#,
        )
        .bind(external_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<String, _>("id")?),
            None => None,
        })
    }

    async fn insert(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO licitaciones
                   (codigo_externo, nombre, descripcion, fecha_cierre, organismo,
                    monto_estimado, estado, link_oficial)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&tender.external_code)
        .bind(&tender.name)
        .bind(&tender.description)
        .bind(tender.closing_date.with_timezone(&Utc))
        .bind(&tender.organization)
        .bind(tender.estimated_amount)
        .bind(tender.status.as_str())
        .bind(&tender.official_link)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, tender: &NormalizedTender) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE licitaciones
               SET nombre = $2,
                   descripcion = $3,
                   fecha_cierre = $4,
                   organismo = $5,
                   monto_estimado = $6,
                   estado = $7,
                   link_oficial = $8
             WHERE codigo_externo = $1
            "#,
        )
        .bind(&tender.external_code)
        .bind(&tender.name)
        .bind(&tender.description)
        .bind(tender.closing_date.with_timezone(&Utc))
        .bind(&tender.organization)
        .bind(tender.estimated_amount)
        .bind(tender.status.as_str())
        .bind(&tender.official_link)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(tender.external_code.clone()));
        }
        Ok(())
    }
}
