//! APRSDB - records a stream of APRS packets, and the relay topology they
//! reveal, into PostgreSQL/PostGIS.
//!
//! Each received line is framed, decoded, normalised and persisted by the
//! [`EnvelopeProcessor`] inside a single store transaction, so a packet is
//! either fully recorded or leaves no trace.

pub mod config;
pub mod decoder;
pub mod digipeater_repo;
pub mod digipeaters;
pub mod envelope_processor;
pub mod error;
pub mod formats;
pub mod framing;
pub mod gps;
pub mod ingest;
pub mod locations;
pub mod locations_repo;
pub mod log_format;
pub mod memory_store;
pub mod metrics;
pub mod normalizer;
pub mod path_resolver;
pub mod pg_store;
pub mod postgis_functions;
pub mod receiver_station;
pub mod route_graph;
pub mod schema;
pub mod sessions;
pub mod store;

pub use decoder::{AprsDecoder, DecodedPacket, PacketDecoder};
pub use envelope_processor::{EnvelopeProcessor, PacketOutcome};
pub use error::{DecodeError, ProcessError, RegistryError, StoreError};
pub use memory_store::MemoryStore;
pub use pg_store::{PgPool, PgStore};
pub use receiver_station::ReceiverStation;
pub use store::Store;
