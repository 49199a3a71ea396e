//! Case Sync CLI
//!
//! Reconciles an offline client's batch file against the case store.
//!
//! Usage:
//!   cargo run --bin case_sync -- sync \
//!     --actor 0190f5d2-8a4e-7c3b-9d1e-2f6a7b8c9d0e \
//!     --role INDIVIDUAL \
//!     --file batch.json \
//!     --timeline
//!
//! With `--features database` and `DATABASE_URL` set the Postgres store is
//! used; otherwise cases live only for the duration of the run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use case_sync::{
    CaseConfig, CaseError, CaseService, CaseStore, MemoryCaseStore, Principal, Role, SyncBatch,
    SyncOutcome, Timeline,
};

#[derive(Parser, Debug)]
#[command(name = "case_sync")]
#[command(about = "Case lifecycle and offline-sync tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a JSON sync batch
    Sync {
        /// Acting principal id
        #[arg(long, env = "CASE_ACTOR_ID")]
        actor: Uuid,

        /// Acting principal role (INDIVIDUAL, ORGANIZATION, MANAGER, ADMIN)
        #[arg(long, value_parser = parse_role)]
        role: Role,

        /// Batch file: {"items": [...], "force_submit": bool}
        #[arg(long, short = 'f')]
        file: PathBuf,

        /// Force-submit every reconciled draft
        #[arg(long)]
        submit: bool,

        /// Also print the timeline of every mapped case
        #[arg(long)]
        timeline: bool,
    },
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.to_ascii_uppercase()
        .parse::<Role>()
        .map_err(|e| e.to_string())
}

#[derive(Serialize)]
struct SyncReport {
    #[serde(flatten)]
    outcome: SyncOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    timelines: Vec<CaseTimeline>,
}

#[derive(Serialize)]
struct CaseTimeline {
    case_id: Uuid,
    events: Timeline,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "case_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = CaseConfig::from_env();
    let service = CaseService::new(open_store().await?, config);

    match cli.command {
        Command::Sync {
            actor,
            role,
            file,
            submit,
            timeline,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut batch: SyncBatch = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;
            batch.force_submit |= submit;

            let principal = Principal::new(actor, role);
            let outcome = service
                .sync_cases(&principal, batch)
                .await
                .map_err(report_case_error)?;

            let mut timelines = Vec::new();
            if timeline {
                for case_id in outcome.mapping.values().copied() {
                    let events = service.get_timeline(&principal, case_id).await?;
                    timelines.push(CaseTimeline { case_id, events });
                }
            }

            let report = SyncReport { outcome, timelines };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Print field-level detail before handing the error to anyhow
fn report_case_error(err: CaseError) -> anyhow::Error {
    for field_error in err.field_errors() {
        eprintln!("  {field_error}");
    }
    anyhow::Error::new(err)
}

#[cfg(feature = "database")]
async fn open_store() -> Result<Arc<dyn CaseStore>> {
    use case_sync::store_postgres::PgCaseStore;
    use case_sync::DatabaseConfig;

    if let Some(db_config) = DatabaseConfig::from_env() {
        let store = PgCaseStore::connect(&db_config).await?;
        store.ensure_schema().await?;
        return Ok(Arc::new(store));
    }

    info!("DATABASE_URL not set, using in-process store");
    Ok(Arc::new(MemoryCaseStore::new()))
}

#[cfg(not(feature = "database"))]
async fn open_store() -> Result<Arc<dyn CaseStore>> {
    info!("Built without the database feature, using in-process store");
    Ok(Arc::new(MemoryCaseStore::new()))
}
