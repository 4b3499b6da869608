use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use aprsdb::config::Config;
use aprsdb::decoder::AprsDecoder;
use aprsdb::envelope_processor::EnvelopeProcessor;
use aprsdb::ingest::{IngestSummary, run_ingest};
use aprsdb::memory_store::MemoryStore;
use aprsdb::pg_store::{PgStore, run_migrations};
use aprsdb::receiver_station::ReceiverStation;
use aprsdb::sessions::start_session;
use aprsdb::store::Store;
use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::connect_pool;

pub struct IngestOptions {
    /// Read from this file instead of stdin.
    pub input: Option<PathBuf>,
    /// Use the in-memory store instead of the database.
    pub dry_run: bool,
}

type LineSource = Box<dyn BufRead + Send>;

pub async fn handle_ingest(config: Config, options: IngestOptions) -> Result<()> {
    if let Some(port) = config.metrics.port {
        aprsdb::metrics::start_metrics_exporter(port)?;
    }
    // Zero the counters so they are exported before the first packet
    aprsdb::metrics::initialize_ingest_metrics();

    let reader: LineSource = match &options.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    // The loop owns one connection and blocks on input; it runs on its own
    // thread so Ctrl-C can end the process while a read is pending.
    let (done_tx, done_rx) = oneshot::channel();
    if options.dry_run {
        info!("Dry run: packets are kept in memory only");
        spawn_loop(MemoryStore::new(), config, reader, done_tx)?;
    } else {
        let pool = connect_pool(&config)?;
        let applied = run_migrations(&pool).context("Failed to run database migrations")?;
        info!("Database migrations complete ({} applied)", applied);
        let store = PgStore::connect(&pool).context("Unable to get a database connection")?;
        spawn_loop(store, config, reader, done_tx)?;
    }

    tokio::select! {
        result = done_rx => {
            let summary = result.context("Ingest loop exited without a result")??;
            info!("Processed {} packets", summary.total());
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; an uncommitted packet is rolled back");
            Ok(())
        }
    }
}

fn spawn_loop<S>(
    store: S,
    config: Config,
    reader: LineSource,
    done: oneshot::Sender<Result<IngestSummary>>,
) -> Result<()>
where
    S: Store + Send + 'static,
{
    std::thread::Builder::new()
        .name("ingest".to_string())
        .spawn(move || {
            let result = ingest_with(store, &config, reader);
            // The receiver is gone only if the process is already shutting down
            let _ = done.send(result);
        })
        .context("Failed to start ingest thread")?;
    Ok(())
}

fn ingest_with<S: Store>(mut store: S, config: &Config, reader: LineSource) -> Result<IngestSummary> {
    let session_id = start_session(&mut store, Utc::now()).context("Failed to record session start")?;

    let mut receiver = ReceiverStation::from_config(config);
    let location_id = receiver
        .register(&mut store)
        .context("Failed to register the receiving station")?;
    info!(
        "Receiving station {} registered at location {}",
        receiver.callsign(),
        location_id
    );

    let processor = EnvelopeProcessor::new(AprsDecoder, session_id);
    let (summary, _) = run_ingest(&mut store, &processor, &mut receiver, reader).context("Failed to read input")?;
    Ok(summary)
}
