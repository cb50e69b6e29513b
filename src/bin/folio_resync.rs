//! folio-resync: re-send stored content to the downstream stores
//!
//! Runs a represent-downstream sweep over every document (or a subset) and
//! waits for the delivery queue to drain. Use it after a content store has
//! been rebuilt or after deliveries were dead-lettered.
//!
//! ## Configuration
//! - `--config` / FOLIO_CONFIG: YAML configuration file
//! - FOLIO__DOWNSTREAM__LIVE_STORE_URL, FOLIO__DOWNSTREAM__DRAFT_STORE_URL: target stores
//! - FOLIO_LOG: log filter (default: info)

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use uuid::Uuid;

use folio::commands::Publisher;
use folio::config::Config;
use folio::downstream::{DownstreamTargets, Target, WorkerPool};
use folio::storage::{init_storage, DocumentFilter};
use folio::utils::bootstrap::init_tracing;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    Draft,
    Live,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Draft => Target::Draft,
            TargetArg::Live => Target::Live,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "folio-resync")]
#[command(about = "Re-send stored content to the downstream content stores")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long)]
    config: Option<String>,

    /// Only documents with an edition of this document type (repeatable)
    #[arg(long = "document-type")]
    document_types: Vec<String>,

    /// Only these stores (default: both)
    #[arg(long = "target", value_enum)]
    targets: Vec<TargetArg>,

    /// Only these content ids
    content_ids: Vec<Uuid>,
}

impl Cli {
    fn filter(&self) -> DocumentFilter {
        DocumentFilter {
            content_ids: (!self.content_ids.is_empty()).then(|| self.content_ids.clone()),
            document_types: (!self.document_types.is_empty()).then(|| self.document_types.clone()),
        }
    }

    fn targets(&self) -> Vec<Target> {
        if self.targets.is_empty() {
            Target::ALL.to_vec()
        } else {
            self.targets.iter().copied().map(Target::from).collect()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let store = init_storage(&config.storage)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;

    let targets = DownstreamTargets::from_config(&config.downstream)?;
    if targets.draft.is_none() && targets.live.is_none() {
        warn!("No downstream store configured; events will be logged but nothing sent");
    }

    let pool = Arc::new(WorkerPool::start(targets, &config.downstream));
    let publisher = Publisher::new(store, pool.clone(), &config);

    let result = publisher
        .represent_downstream(&cli.filter(), &cli.targets(), Some("folio-resync".to_string()))
        .await;
    pool.drain().await;

    let dead_letters = pool.dead_letters().await;
    for letter in &dead_letters {
        error!(
            content_id = ?letter.failure.content_id,
            target_store = %letter.failure.target,
            payload_version = ?letter.failure.payload_version,
            attempts = letter.attempts,
            reason = %letter.failure.reason,
            "Delivery dead-lettered"
        );
    }

    let report = result?;
    info!(
        documents = report.documents,
        jobs = report.jobs,
        dead_letters = dead_letters.len(),
        "Resync complete"
    );

    if dead_letters.is_empty() {
        Ok(())
    } else {
        Err(format!("{} deliveries failed", dead_letters.len()).into())
    }
}
