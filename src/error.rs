//! Error taxonomy for packet ingestion.
//!
//! Failures inside a single packet are contained to that packet's
//! transaction. Only [`StoreError::Connection`] raised during startup is
//! fatal for the whole process.

use std::fmt;

use thiserror::Error;

use crate::decoder::DecodedPacket;

/// Failure reported by the decoder collaborator.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The header decoded but the body did not; the header fields survive.
    #[error("partial parse ({reason})")]
    Partial {
        salvaged: Box<DecodedPacket>,
        reason: String,
    },

    /// The body uses a data type the decoder does not understand.
    #[error("unknown packet format")]
    UnknownFormat { salvaged: Box<DecodedPacket> },

    /// Nothing could be salvaged.
    #[error("undecodable packet: {0}")]
    Fatal(String),
}

/// Failure reported by the persistent store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store rejected a value (wrong type, out of range, too long).
    #[error("value rejected by store: {0}")]
    Validation(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Failure inside one of the registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("observation is missing required field `{0}`")]
    MissingField(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Processing step of a single packet, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decoding,
    Normalizing,
    PersistingEnvelope,
    ResolvingAuxiliary,
    PersistingFormatData,
    ResolvingPath,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Decoding => "decoding",
            Stage::Normalizing => "normalizing",
            Stage::PersistingEnvelope => "persisting envelope",
            Stage::ResolvingAuxiliary => "resolving auxiliary records",
            Stage::PersistingFormatData => "persisting format data",
            Stage::ResolvingPath => "resolving path",
        };
        f.write_str(name)
    }
}

/// Failure that aborts the current packet and rolls back its transaction.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("packet is missing required field `{0}`")]
    MissingField(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A third-party packet's embedded packet failed; the enclosing packet
    /// must be rolled back with it.
    #[error("embedded packet of third-party packet from {src} was rejected")]
    SubpacketRejected { src: String },

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ProcessError>,
    },
}

impl ProcessError {
    /// Label this error with the stage it happened in, unless it already is.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            ProcessError::Stage { .. } | ProcessError::SubpacketRejected { .. } => self,
            other => ProcessError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}
