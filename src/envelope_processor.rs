//! Per-packet state machine: decode, normalise, persist, resolve.
//!
//! A top-level packet and every sub-packet it carries share one store
//! transaction. Any error unwinds all of it.

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::decoder::{DecodedPacket, PacketDecoder};
use crate::digipeater_repo::{DigipeaterRegistry, Observation};
use crate::digipeaters::is_relay_symbol;
use crate::error::{DecodeError, ProcessError, Stage, StoreError};
use crate::formats::{FormatTable, PacketFormat};
use crate::locations_repo::LocationRegistry;
use crate::normalizer::{NormalizedPacket, canonical_format, normalize};
use crate::path_resolver::PathResolver;
use crate::receiver_station::ReceiverStation;
use crate::store::{FieldValue, LocationId, NewEnvelope, NewIngestError, PacketId, SessionId, Store};

/// Final result of one packet. Everything but `Stored` is a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Stored(PacketId),
    /// The embedded packet of a third-party packet failed; nothing was kept.
    SubpacketRejected,
    /// The decoder could not salvage anything.
    Undecodable,
    /// The store refused the envelope; a diagnostic row was written instead.
    Rejected,
}

impl PacketOutcome {
    /// Numeric result code: the packet id, or a negative sentinel.
    pub fn code(&self) -> i64 {
        match self {
            PacketOutcome::Stored(id) => *id,
            PacketOutcome::SubpacketRejected => -4,
            PacketOutcome::Undecodable => -5,
            PacketOutcome::Rejected => -7,
        }
    }

    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            PacketOutcome::Stored(id) => Some(*id),
            _ => None,
        }
    }
}

/// Outcome of one (possibly nested) pass, before sentinel mapping.
enum Processed {
    Stored { packet_id: PacketId, format: PacketFormat },
    Undecodable,
    Rejected,
}

struct PacketContext<'a> {
    received_at: DateTime<Utc>,
    receiver: &'a ReceiverStation,
}

pub struct EnvelopeProcessor<D: PacketDecoder> {
    decoder: D,
    session_id: SessionId,
}

impl<D: PacketDecoder> EnvelopeProcessor<D> {
    pub fn new(decoder: D, session_id: SessionId) -> Self {
        Self { decoder, session_id }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Process one raw packet in its own transaction.
    ///
    /// Decode and validation failures come back as sentinel outcomes; any
    /// other failure rolls the packet back and is returned as an error.
    pub fn process<S: Store>(
        &self,
        store: &mut S,
        receiver: &ReceiverStation,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<PacketOutcome, ProcessError> {
        let ctx = PacketContext { received_at, receiver };

        match store.transaction(|tx| self.process_raw(tx, &ctx, raw, false)) {
            Ok(Processed::Stored { packet_id, format }) => {
                debug!("Stored {} packet {}", format, packet_id);
                metrics::counter!("aprsdb.packets.stored").increment(1);
                Ok(PacketOutcome::Stored(packet_id))
            }
            Ok(Processed::Undecodable) => {
                metrics::counter!("aprsdb.packets.undecodable").increment(1);
                Ok(PacketOutcome::Undecodable)
            }
            Ok(Processed::Rejected) => {
                metrics::counter!("aprsdb.packets.rejected").increment(1);
                Ok(PacketOutcome::Rejected)
            }
            Err(ProcessError::SubpacketRejected { src }) => {
                info!("Discarded third-party packet from {}: embedded packet rejected", src);
                metrics::counter!("aprsdb.packets.subpacket_rejected").increment(1);
                self.record_ingest_error(store, &ctx, raw, format!("embedded packet of {} was rejected", src));
                Ok(PacketOutcome::SubpacketRejected)
            }
            Err(e) => {
                metrics::counter!("aprsdb.packets.failed").increment(1);
                Err(e)
            }
        }
    }

    /// Best-effort diagnostic row outside the rolled-back transaction.
    fn record_ingest_error<S: Store>(&self, store: &mut S, ctx: &PacketContext<'_>, raw: &str, message: String) {
        let error = NewIngestError {
            received_at: ctx.received_at,
            session_id: self.session_id,
            raw: raw.to_string(),
            message,
        };
        if let Err(e) = store.transaction(|tx| tx.insert_ingest_error(&error)) {
            warn!("Unable to record ingest error: {}", e);
        }
    }

    fn decode(&self, raw: &str) -> Result<(DecodedPacket, Option<String>), DecodeError> {
        match self.decoder.decode(raw) {
            Ok(packet) => Ok((packet, None)),
            Err(DecodeError::Partial { mut salvaged, reason }) => {
                trace!("Partial decode ({}): {}", reason, raw);
                salvaged.insert("format", serde_json::json!("parse-error"));
                Ok((*salvaged, Some(reason)))
            }
            Err(DecodeError::UnknownFormat { mut salvaged }) => {
                trace!("Unknown format: {}", raw);
                salvaged.insert("format", serde_json::json!("unknown"));
                Ok((*salvaged, None))
            }
            Err(fatal) => Err(fatal),
        }
    }

    fn process_raw<S: Store>(
        &self,
        tx: &mut S,
        ctx: &PacketContext<'_>,
        raw: &str,
        is_subpacket: bool,
    ) -> Result<Processed, ProcessError> {
        let (decoded, parse_error) = match self.decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                info!("{} ({:?})", e, raw);
                return Ok(Processed::Undecodable);
            }
        };

        let mut packet = normalize(decoded).map_err(|e| e.at(Stage::Normalizing))?;

        let envelope = NewEnvelope {
            src: packet.src.clone(),
            dest: packet.dest.clone(),
            format: packet.format.to_string(),
            received_at: ctx.received_at,
            session_id: self.session_id,
            is_subpacket,
            receiver_location_id: ctx.receiver.location_id(),
            raw: Some(raw.to_string()),
            parse_error,
        };
        let packet_id = match tx.transaction(|s| s.insert_envelope(&envelope)) {
            Ok(id) => id,
            Err(StoreError::Validation(message)) => {
                info!("Envelope from {} rejected: {}", packet.src, message);
                tx.insert_ingest_error(&NewIngestError {
                    received_at: ctx.received_at,
                    session_id: self.session_id,
                    raw: raw.to_string(),
                    message,
                })
                .map_err(|e| ProcessError::from(e).at(Stage::PersistingEnvelope))?;
                return Ok(Processed::Rejected);
            }
            Err(e) => return Err(ProcessError::from(e).at(Stage::PersistingEnvelope)),
        };

        self.resolve_auxiliary(tx, ctx, packet_id, &mut packet)
            .map_err(|e| e.at(Stage::ResolvingAuxiliary))?;

        if let Some(table) = FormatTable::for_format(&packet.format) {
            tx.insert_format_row(&table.row(packet_id, &packet.fields))
                .map_err(|e| ProcessError::from(e).at(Stage::PersistingFormatData))?;
        } else {
            trace!("No format table for {}", packet.format);
        }

        if !is_subpacket {
            PathResolver::new(ctx.receiver.callsign())
                .resolve(tx, packet_id, &packet.src, &packet.path)
                .map_err(|e| ProcessError::from(e).at(Stage::ResolvingPath))?;
        }

        Ok(Processed::Stored {
            packet_id,
            format: packet.format,
        })
    }

    /// Locations, relay stations, embedded packets, weather and map entries.
    fn resolve_auxiliary<S: Store>(
        &self,
        tx: &mut S,
        ctx: &PacketContext<'_>,
        packet_id: PacketId,
        packet: &mut NormalizedPacket,
    ) -> Result<(), ProcessError> {
        let location_id = match packet.coordinates() {
            Some(coordinates) => Some(LocationRegistry::resolve(tx, coordinates)?),
            None => None,
        };

        if let Some(symbol) = packet.symbol() {
            self.observe_station(tx, packet, symbol, location_id)?;
        }

        if packet.format == PacketFormat::ThirdParty {
            DigipeaterRegistry::ensure_known(tx, &packet.src)?;
            let embedded = packet
                .subpacket
                .take()
                .ok_or(ProcessError::MissingField("subpacket"))?;
            match self.process_raw(tx, ctx, &embedded, true)? {
                Processed::Stored {
                    packet_id: sub_id,
                    format,
                } => {
                    trace!("Third-party packet {} carries {} packet {}", packet_id, format, sub_id);
                    packet
                        .fields
                        .insert("subpacket_id".to_string(), FieldValue::Integer(sub_id));
                    packet.fields.insert(
                        "subpacket_type".to_string(),
                        FieldValue::Text(canonical_format(format.as_str())),
                    );
                }
                Processed::Undecodable | Processed::Rejected => {
                    return Err(ProcessError::SubpacketRejected {
                        src: packet.src.clone(),
                    });
                }
            }
        }

        if packet.has_wx && packet.format != PacketFormat::Weather {
            tx.insert_format_row(&FormatTable::Weather.row(packet_id, &packet.fields))?;
        }

        if let Some(location_id) = location_id {
            packet
                .fields
                .insert("lid".to_string(), FieldValue::Integer(location_id));
            tx.insert_format_row(&FormatTable::MapEntry.row(packet_id, &packet.fields))?;
        }

        Ok(())
    }

    /// Relay symbols always count as a sighting; a known relay's own
    /// position reports count too, objects and items never do. A sighting
    /// without a resolved location fails the packet.
    fn observe_station<S: Store>(
        &self,
        tx: &mut S,
        packet: &NormalizedPacket,
        symbol: &str,
        location_id: Option<LocationId>,
    ) -> Result<(), ProcessError> {
        let relay = is_relay_symbol(symbol);
        let known_relay = !relay
            && !packet.format.describes_other_station()
            && DigipeaterRegistry::is_known(tx, &packet.src)?;
        if !relay && !known_relay {
            return Ok(());
        }

        let outcome = DigipeaterRegistry::observe(
            tx,
            Observation {
                callsign: &packet.src,
                symbol: Some(symbol),
                symbol_table: packet.symbol_table(),
                location_id,
            },
        )?;
        trace!("Observed {}: {:?}", packet.src, outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::AprsDecoder;
    use crate::locations::Coordinates;
    use crate::memory_store::MemoryStore;
    use chrono::TimeZone;

    struct Harness {
        store: MemoryStore,
        receiver: ReceiverStation,
        processor: EnvelopeProcessor<AprsDecoder>,
    }

    fn harness() -> Harness {
        let mut store = MemoryStore::new();
        let session = store.create_session(now()).unwrap();
        let mut receiver = ReceiverStation::new("R0RX", "&", "/", Coordinates::new(40.0, -105.0));
        receiver.register(&mut store).unwrap();
        Harness {
            store,
            receiver,
            processor: EnvelopeProcessor::new(AprsDecoder, session),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 1, 12, 0, 0).unwrap()
    }

    impl Harness {
        fn process(&mut self, raw: &str) -> Result<PacketOutcome, ProcessError> {
            self.processor.process(&mut self.store, &self.receiver, raw, now())
        }
    }

    #[test]
    fn sentinel_codes() {
        assert_eq!(PacketOutcome::Stored(12).code(), 12);
        assert_eq!(PacketOutcome::SubpacketRejected.code(), -4);
        assert_eq!(PacketOutcome::Undecodable.code(), -5);
        assert_eq!(PacketOutcome::Rejected.code(), -7);
    }

    #[test]
    fn status_packet_is_stored_with_its_format_row() {
        let mut h = harness();

        let pid = h.process("K0ABC>APRS:>Net tonight").unwrap().packet_id().unwrap();

        let stored = h.store.envelope(pid).unwrap();
        assert_eq!(stored.envelope.format, "status");
        assert_eq!(stored.envelope.receiver_location_id, h.receiver.location_id());
        let rows = h.store.format_rows(FormatTable::Status);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("status"), Some(&FieldValue::Text("Net tonight".to_string())));
    }

    #[test]
    fn header_without_body_separator_is_undecodable() {
        let mut h = harness();

        assert_eq!(h.process("garbage").unwrap(), PacketOutcome::Undecodable);
        assert!(h.store.envelopes().is_empty());
    }

    #[test]
    fn partial_decode_keeps_the_envelope() {
        let mut h = harness();

        let pid = h.process("K0ABC>APRS:!99XX.00N/00000.00W#").unwrap().packet_id().unwrap();

        let stored = h.store.envelope(pid).unwrap();
        assert_eq!(stored.envelope.format, "parse_error");
        assert!(stored.envelope.parse_error.is_some());
        assert!(h.store.locations().len() == 1);
    }

    #[test]
    fn unknown_format_is_tagged() {
        let mut h = harness();

        let pid = h.process("K0ABC>APRS:$GPGGA,whatever").unwrap().packet_id().unwrap();

        assert_eq!(h.store.envelope(pid).unwrap().envelope.format, "unknown");
    }

    #[test]
    fn position_creates_location_and_map_entry() {
        let mut h = harness();

        let pid = h
            .process("K0ABC>APRS:!4903.50N/07201.75W>088/036")
            .unwrap()
            .packet_id()
            .unwrap();

        assert_eq!(h.store.locations().len(), 2);
        let entries = h.store.format_rows(FormatTable::MapEntry);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].packet_id(), Some(pid));
        assert!(entries[0].get("lid").is_some());
        assert_eq!(h.store.format_rows(FormatTable::Uncompressed).len(), 1);
        // ordinary stations are not relays
        assert!(h.store.digipeater("K0ABC").is_none());
    }

    #[test]
    fn positional_weather_writes_weather_row() {
        let mut h = harness();

        h.process("K0WX>APRS:!4903.50N/07201.75W_220/004g005t077r000p000P000h50b09900")
            .unwrap();

        let weather = h.store.format_rows(FormatTable::Weather);
        assert_eq!(weather.len(), 1);
        assert_eq!(weather[0].get("humidity"), Some(&FieldValue::Integer(50)));
    }

    #[test]
    fn known_relay_position_is_observed_but_its_objects_are_not() {
        let mut h = harness();
        h.process("W0DIG>APRS:!4000.00N/10500.00W#").unwrap();

        h.process("W0DIG>APRS:;LEADER   *092345z4903.50N/07201.75W>").unwrap();
        assert_eq!(h.store.digipeater("W0DIG").unwrap().symbol.as_deref(), Some("#"));
        assert_eq!(h.store.digipeater_update_count(), 0);
    }

    /// Decoder that reports a relay symbol but no coordinates.
    struct SymbolWithoutPosition;

    impl PacketDecoder for SymbolWithoutPosition {
        fn decode(&self, _raw: &str) -> Result<DecodedPacket, DecodeError> {
            let fields = serde_json::json!({
                "from": "K0RLY",
                "to": "APRS",
                "path": ["WIDE1-1"],
                "format": "uncompressed",
                "symbol": "#",
                "symbol_table": "/",
            });
            Ok(DecodedPacket::from_fields(fields.as_object().cloned().unwrap_or_default()))
        }
    }

    #[test]
    fn relay_sighting_without_position_fails_the_packet() {
        let mut h = harness();
        let processor = EnvelopeProcessor::new(SymbolWithoutPosition, h.processor.session_id());

        let err = processor
            .process(&mut h.store, &h.receiver, "K0RLY>APRS,WIDE1-1:!", now())
            .unwrap_err();

        assert!(
            err.to_string().contains("missing required field `location`"),
            "unexpected error: {}",
            err
        );
        assert!(h.store.envelopes().is_empty());
        assert!(h.store.digipeater("K0RLY").is_none());
        assert!(h.store.format_rows(FormatTable::Uncompressed).is_empty());
    }

    #[test]
    fn envelope_validation_failure_writes_diagnostic() {
        let mut h = harness();

        let outcome = h.process("AVERYLONGCALLSIGN1>APRS:>hi").unwrap();

        assert_eq!(outcome, PacketOutcome::Rejected);
        assert!(h.store.envelopes().is_empty());
        assert_eq!(h.store.ingest_errors().len(), 1);
    }

    #[test]
    fn format_write_failure_rolls_everything_back() {
        let mut h = harness();
        let locations = h.store.locations().len();
        h.store.fail_writes_to("map_entry");

        let err = h.process("K0ABC>APRS,N0RLY*:!4903.50N/07201.75W#").unwrap_err();

        assert!(matches!(
            err,
            ProcessError::Stage {
                stage: Stage::ResolvingAuxiliary,
                ..
            }
        ));
        assert!(h.store.envelopes().is_empty());
        assert_eq!(h.store.locations().len(), locations);
        assert!(h.store.digipeater("K0ABC").is_none());
        assert!(h.store.path_hops().is_empty());
    }

    #[test]
    fn third_party_links_the_embedded_packet() {
        let mut h = harness();

        let pid = h
            .process("GATE>APRS,WIDE2-1:}INNER>APRS,TCPIP,GATE*:>hello")
            .unwrap()
            .packet_id()
            .unwrap();

        assert_eq!(h.store.envelopes().len(), 2);
        let rows = h.store.format_rows(FormatTable::ThirdParty);
        assert_eq!(rows.len(), 1);
        let sub_id = rows[0].get("subpacket_id").and_then(FieldValue::as_i64).unwrap();
        assert!(h.store.envelope(sub_id).unwrap().envelope.is_subpacket);
        assert_eq!(rows[0].get("subpacket_type"), Some(&FieldValue::Text("status".to_string())));
        assert!(h.store.digipeater("GATE").is_some());
        // only the outer packet gets a path
        assert!(h.store.path_hops().iter().all(|hop| hop.packet_id == pid));
    }

    #[test]
    fn rejected_subpacket_rolls_back_the_outer_packet() {
        let mut h = harness();

        let outcome = h.process("GATE>APRS:}garbage").unwrap();

        assert_eq!(outcome, PacketOutcome::SubpacketRejected);
        assert!(h.store.envelopes().is_empty());
        assert!(h.store.digipeater("GATE").is_none());
        assert_eq!(h.store.ingest_errors().len(), 1);
    }
}
