use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use licitaciones_sync::{write_run_report, IngestConfig, StoreFailurePolicy, SyncEngine, SyncRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ingest-licitaciones")]
#[command(about = "Sync ChileCompra tenders into the licitaciones table")]
struct Cli {
    /// First listing page to fetch (1-based).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pagina: u32,

    /// Start of the date window, YYYY-MM-DD. Defaults to 30 days before today.
    #[arg(long)]
    fecha_desde: Option<NaiveDate>,

    /// End of the date window, YYYY-MM-DD. Defaults to today.
    #[arg(long)]
    fecha_hasta: Option<NaiveDate>,

    /// Keep fetching until TotalPaginas or an empty page.
    #[arg(long)]
    todas_las_paginas: bool,

    /// Skip records the store rejects instead of aborting the run.
    #[arg(long)]
    omitir_errores_store: bool,

    /// Write <DIR>/<run_id>/sync_summary.json after a successful run.
    #[arg(long, value_name = "DIR")]
    reporte: Option<PathBuf>,
}

impl Cli {
    fn sync_request(&self, today: NaiveDate) -> SyncRequest {
        let defaults = SyncRequest::for_window_ending(today);
        SyncRequest {
            start_page: self.pagina,
            date_from: self.fecha_desde.unwrap_or(defaults.date_from),
            date_to: self.fecha_hasta.unwrap_or(defaults.date_to),
            all_pages: self.todas_las_paginas,
        }
    }

    fn store_failure_policy(&self) -> StoreFailurePolicy {
        if self.omitir_errores_store {
            StoreFailurePolicy::SkipAndLog
        } else {
            StoreFailurePolicy::Abort
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let request = cli.sync_request(Local::now().date_naive());
    println!(
        "ingesting licitaciones from {} to {} (page {}{})",
        request.date_from,
        request.date_to,
        request.start_page,
        if request.all_pages { ", all pages" } else { "" }
    );

    let config = IngestConfig::from_env().context("loading configuration")?;
    info!(api_url = %config.api_url, store = ?config.store_backend, "configuration loaded");

    let engine = SyncEngine::from_config(&config)?.with_store_failure_policy(cli.store_failure_policy());
    let summary = match engine.run(&request).await {
        Ok(summary) => summary,
        Err(err) => {
            let counts = err.counts();
            eprintln!(
                "sync aborted after inserted={} updated={} skipped={}",
                counts.inserted, counts.updated, counts.skipped
            );
            return Err(err.into());
        }
    };

    println!(
        "sync complete: run_id={} pages={} inserted={} updated={} skipped={}",
        summary.run_id,
        summary.pages.len(),
        summary.inserted,
        summary.updated,
        summary.skipped
    );

    if let Some(dir) = &cli.reporte {
        let path = write_run_report(dir, &summary).await?;
        println!("report written to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_cover_last_thirty_days_first_page() {
        let cli = Cli::try_parse_from(["ingest-licitaciones"]).unwrap();
        let request = cli.sync_request(today());
        assert_eq!(request.start_page, 1);
        assert_eq!(request.date_from, NaiveDate::from_ymd_opt(2024, 5, 16).unwrap());
        assert_eq!(request.date_to, today());
        assert!(!request.all_pages);
        assert_eq!(cli.store_failure_policy(), StoreFailurePolicy::Abort);
        assert!(cli.reporte.is_none());
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "ingest-licitaciones",
            "--pagina",
            "3",
            "--fecha-desde",
            "2024-01-01",
            "--fecha-hasta",
            "2024-01-31",
            "--todas-las-paginas",
            "--omitir-errores-store",
            "--reporte",
            "reports",
        ])
        .unwrap();
        let request = cli.sync_request(today());
        assert_eq!(request.start_page, 3);
        assert_eq!(request.date_from, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(request.date_to, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert!(request.all_pages);
        assert_eq!(cli.store_failure_policy(), StoreFailurePolicy::SkipAndLog);
        assert_eq!(cli.reporte, Some(PathBuf::from("reports")));
    }

    #[test]
    fn page_zero_and_malformed_dates_are_rejected() {
        assert!(Cli::try_parse_from(["ingest-licitaciones", "--pagina", "0"]).is_err());
        assert!(Cli::try_parse_from(["ingest-licitaciones", "--fecha-desde", "01/06/2024"]).is_err());
    }
}
