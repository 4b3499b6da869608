//! The ingestion loop: one framed line at a time, each run to completion.

use std::io::BufRead;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::decoder::PacketDecoder;
use crate::envelope_processor::{EnvelopeProcessor, PacketOutcome};
use crate::framing::{self, Frame};
use crate::receiver_station::ReceiverStation;
use crate::store::Store;

/// Per-run tally of packet outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub stored: u64,
    pub rejected: u64,
    pub undecodable: u64,
    pub subpacket_rejected: u64,
    pub failed: u64,
}

impl IngestSummary {
    fn record(&mut self, outcome: PacketOutcome) {
        match outcome {
            PacketOutcome::Stored(_) => self.stored += 1,
            PacketOutcome::Rejected => self.rejected += 1,
            PacketOutcome::Undecodable => self.undecodable += 1,
            PacketOutcome::SubpacketRejected => self.subpacket_rejected += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.stored + self.rejected + self.undecodable + self.subpacket_rejected + self.failed
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfInput,
    QuitToken,
}

/// Feed every line of `reader` through the processor until a quit token or
/// end of input. Per-packet failures are logged and counted; only a read
/// error ends the loop early.
pub fn run_ingest<S, D, R>(
    store: &mut S,
    processor: &EnvelopeProcessor<D>,
    receiver: &mut ReceiverStation,
    mut reader: R,
) -> std::io::Result<(IngestSummary, StopReason)>
where
    S: Store,
    D: PacketDecoder,
    R: BufRead,
{
    let mut summary = IngestSummary::default();
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break StopReason::EndOfInput;
        }
        let line = String::from_utf8_lossy(&buf);
        if framing::is_quit(&line) {
            break StopReason::QuitToken;
        }

        let frame = framing::parse_line(&line);
        if frame.packet.is_empty() {
            continue;
        }

        receiver.refresh_if_due(store, Instant::now());
        ingest_frame(store, processor, receiver, &frame, &mut summary);
    };

    info!(
        "Ingestion stopped ({:?}): {} stored, {} rejected, {} undecodable, {} sub-packet rejections, {} failed",
        reason,
        summary.stored,
        summary.rejected,
        summary.undecodable,
        summary.subpacket_rejected,
        summary.failed
    );
    Ok((summary, reason))
}

fn ingest_frame<S: Store, D: PacketDecoder>(
    store: &mut S,
    processor: &EnvelopeProcessor<D>,
    receiver: &ReceiverStation,
    frame: &Frame,
    summary: &mut IngestSummary,
) {
    let span = info_span!("packet", channel = ?frame.channel, session = processor.session_id());
    let _guard = span.enter();

    let received_at = frame.received_at_or(Utc::now());
    match processor.process(store, receiver, &frame.packet, received_at) {
        Ok(outcome) => {
            if outcome.packet_id().is_none() {
                info!("Packet not stored (result {}): {}", outcome.code(), frame.packet);
            }
            summary.record(outcome);
        }
        Err(e) => {
            warn!("Packet rolled back: {} ({})", e, frame.packet);
            summary.failed += 1;
        }
    }
}
