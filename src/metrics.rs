use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Initialize all ingestion metrics to zero so they are exported before
/// the first event. Must run after the recorder is installed.
pub fn initialize_ingest_metrics() {
    // Packet outcomes
    metrics::counter!("aprsdb.packets.stored").absolute(0);
    metrics::counter!("aprsdb.packets.rejected").absolute(0);
    metrics::counter!("aprsdb.packets.undecodable").absolute(0);
    metrics::counter!("aprsdb.packets.subpacket_rejected").absolute(0);
    metrics::counter!("aprsdb.packets.failed").absolute(0);

    // Registries
    metrics::counter!("aprsdb.digipeaters.inserted").absolute(0);
    metrics::counter!("aprsdb.digipeaters.updated").absolute(0);
    metrics::counter!("aprsdb.digipeaters.ignored").absolute(0);
    metrics::counter!("aprsdb.locations.created").absolute(0);
    metrics::counter!("aprsdb.routes.created").absolute(0);
    metrics::counter!("aprsdb.path_hops.recorded").absolute(0);

    // Receiver station
    metrics::counter!("aprsdb.receiver.position_refreshed").absolute(0);
    metrics::counter!("aprsdb.receiver.position_failed").absolute(0);
}

/// Install the Prometheus recorder with its scrape endpoint on `port`.
/// Needs a running tokio runtime.
pub fn start_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics exporter on {}", addr))?;
    info!("Serving metrics on http://{}/metrics", addr);
    Ok(())
}
