use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use busbridge::config::{BridgeConfig, CliConfig, ConfigError, LogLevel};
use busbridge::intake::JournalOutcomeStore;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "🚌 busbridge";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match CliConfig::from_args() {
        Ok(cli) => cli,
        Err(e) => {
            init_tracing(LogLevel::Info);
            error!("{} invalid arguments: {e}", APP_NAME);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cli.log_level);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} configuration rejected: {e}", APP_NAME);
            ExitCode::FAILURE
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_new(level.directive()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run(cli: &CliConfig) -> Result<(), ConfigError> {
    let config =
        BridgeConfig::load(&cli.config_file_location, cli.routes_file_location.as_deref()).await?;

    let committed = match &config.intake.outcome_journal {
        Some(path) => {
            let journal = JournalOutcomeStore::open(path)
                .await
                .map_err(|e| ConfigError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            Some(journal.committed_count())
        }
        None => {
            warn!("no outcome journal configured; committed outcomes would not survive a restart");
            None
        }
    };

    info!(
        capacity = config.pool.capacity,
        acquire_timeout = ?config.pool.acquire_timeout,
        principals = config.principals.len(),
        routes = config.routes.len(),
        committed = ?committed,
        backend_dispatch = config.service_credentials().is_some(),
        "{} configuration ok",
        APP_NAME
    );

    for query in &cli.resolve {
        match config
            .routes
            .resolve(&query.category, &query.subtype, &query.recipient)
        {
            Some(target) => info!(
                category = %query.category,
                subtype = %query.subtype,
                recipient = %query.recipient,
                "routes to {target}"
            ),
            None => warn!(
                category = %query.category,
                subtype = %query.subtype,
                recipient = %query.recipient,
                "no route"
            ),
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
