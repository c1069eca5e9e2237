use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use spendsplit::config::load_config;
use spendsplit::error::ConfigError;
use spendsplit::secrets::resolve_api_key;
use spendsplit::{
    logging, CategorizationService, Database, HttpGenerationClient, JobStatus, ServiceSettings,
};

const DEFAULT_CONFIG_PATH: &str = "spendsplit.json";
const OUTCOME_POLL: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match run(config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet.
            eprintln!("spendsplit-worker: {}", e);
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: PathBuf) -> spendsplit::Result<()> {
    let config = load_config(&config_path)?;
    logging::init(&config.logging)?;

    info!(
        "Starting spendsplit-worker v{} with config {}",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
        message: "database_path is not set and no home directory was found".to_string(),
    })?;
    let db = Database::open(&db_path)?;

    let generation = &config.generation;
    let api_key = resolve_api_key(generation)?;
    if api_key.is_none() {
        warn!("No API key configured; calling {} unauthenticated", generation.endpoint);
    }
    let client = HttpGenerationClient::new(generation, api_key)?;

    let service =
        CategorizationService::start(db, Arc::new(client), ServiceSettings::from_config(&config))?;
    let recovery = service.recover()?;
    info!(
        "Recovery: {} interrupted job(s) failed, {} pending job(s) re-enqueued",
        recovery.failed_stale, recovery.requeued
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    while running.load(Ordering::SeqCst) {
        let Some(outcome) = service.recv_outcome_timeout(OUTCOME_POLL) else {
            continue;
        };
        match outcome.status {
            JobStatus::Completed => info!(
                "Job {} completed: {} line item(s) after {} attempt(s)",
                outcome.job_id, outcome.line_items, outcome.attempts
            ),
            JobStatus::Failed => warn!(
                "Job {} failed after {} attempt(s): {}",
                outcome.job_id,
                outcome.attempts,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            status => match outcome.error.as_deref() {
                Some(error) => warn!(
                    "Job {} left {} for the next recovery: {}",
                    outcome.job_id, status, error
                ),
                None => info!("Job {} skipped ({})", outcome.job_id, status),
            },
        }
    }

    info!("Shutdown requested");
    service.shutdown();
    Ok(())
}
