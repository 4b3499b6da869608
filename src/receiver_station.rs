//! The local receiving station: the final hop of every path.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::digipeater_repo::{DigipeaterRegistry, Observation};
use crate::error::RegistryError;
use crate::gps::{GpsdSource, PositionSource};
use crate::locations::Coordinates;
use crate::locations_repo::LocationRegistry;
use crate::store::{LocationId, Store};

/// Minimum time between two reads of the live position source.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// In-memory state of the receiving station, registered in the digipeater
/// and location registries like any other relay.
pub struct ReceiverStation {
    callsign: String,
    symbol: String,
    symbol_table: String,
    coordinates: Coordinates,
    location_id: Option<LocationId>,
    position_source: Option<Box<dyn PositionSource + Send>>,
    refresh_interval: Duration,
    last_refresh: Option<Instant>,
}

impl ReceiverStation {
    pub fn new(
        callsign: impl Into<String>,
        symbol: impl Into<String>,
        symbol_table: impl Into<String>,
        coordinates: Coordinates,
    ) -> Self {
        Self {
            callsign: callsign.into(),
            symbol: symbol.into(),
            symbol_table: symbol_table.into(),
            coordinates,
            location_id: None,
            position_source: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            last_refresh: None,
        }
    }

    /// Station from `[receiver]`, following gpsd when `[gps] enabled`.
    pub fn from_config(config: &Config) -> Self {
        let rx = &config.receiver;
        let station = Self::new(&rx.callsign, &rx.symbol, &rx.symbol_table, config.receiver_coordinates());
        if !config.gps.enabled {
            return station;
        }
        let source = GpsdSource::new(&config.gps.address, config.gps.timeout());
        station.with_position_source(Box::new(source), config.gps.refresh_interval())
    }

    /// Follow a live position source, read at most once per `refresh_interval`.
    pub fn with_position_source(mut self, source: Box<dyn PositionSource + Send>, refresh_interval: Duration) -> Self {
        self.position_source = Some(source);
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    /// Location id cached by the last successful registration.
    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    /// Record the station at its current coordinates and cache the location id.
    /// Runs in its own transaction.
    pub fn register<S: Store>(&mut self, store: &mut S) -> Result<LocationId, RegistryError> {
        let coordinates = self.coordinates;
        let location_id = store.transaction(|tx| -> Result<LocationId, RegistryError> {
            let location_id = LocationRegistry::resolve(tx, coordinates)?;
            let outcome = DigipeaterRegistry::observe(
                tx,
                Observation {
                    callsign: &self.callsign,
                    symbol: Some(&self.symbol),
                    symbol_table: Some(&self.symbol_table),
                    location_id: Some(location_id),
                },
            )?;
            debug!("Receiver {} registration: {:?}", self.callsign, outcome);
            Ok(location_id)
        })?;

        self.location_id = Some(location_id);
        self.last_refresh = Some(Instant::now());
        Ok(location_id)
    }

    /// Re-read the live position if one is configured and the interval has
    /// passed. Failures are logged and the cached position is kept.
    /// Returns `true` when the station was re-registered.
    pub fn refresh_if_due<S: Store>(&mut self, store: &mut S, now: Instant) -> bool {
        if self.position_source.is_none() {
            return false;
        }
        if let Some(last) = self.last_refresh {
            if now.saturating_duration_since(last) < self.refresh_interval {
                return false;
            }
        }
        self.last_refresh = Some(now);

        let reading = match self.position_source.as_mut() {
            Some(source) => source.current_position(),
            None => return false,
        };
        let coordinates = match reading {
            Ok(coordinates) => coordinates,
            Err(e) => {
                warn!("Unable to read receiver position, keeping last known: {}", e);
                metrics::counter!("aprsdb.receiver.position_failed").increment(1);
                return false;
            }
        };

        let previous = (self.coordinates, self.location_id);
        self.coordinates = coordinates;
        match self.register(store) {
            Ok(location_id) => {
                if Some(location_id) != previous.1 {
                    info!(
                        "Receiver {} moved to ({}, {})",
                        self.callsign,
                        coordinates.latitude(),
                        coordinates.longitude()
                    );
                }
                self.last_refresh = Some(now);
                metrics::counter!("aprsdb.receiver.position_refreshed").increment(1);
                true
            }
            Err(e) => {
                warn!("Unable to record receiver position: {}", e);
                (self.coordinates, self.location_id) = previous;
                metrics::counter!("aprsdb.receiver.position_failed").increment(1);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::GpsError;
    use crate::memory_store::MemoryStore;
    use std::sync::{Arc, Mutex};

    /// Replays scripted readings and counts queries.
    struct Scripted {
        readings: Vec<Result<Coordinates, GpsError>>,
        queries: Arc<Mutex<usize>>,
    }

    impl PositionSource for Scripted {
        fn current_position(&mut self) -> Result<Coordinates, GpsError> {
            *self.queries.lock().unwrap() += 1;
            if self.readings.is_empty() {
                return Err(GpsError::NoFix);
            }
            self.readings.remove(0)
        }
    }

    fn station() -> ReceiverStation {
        ReceiverStation::new("R0RX", "&", "/", Coordinates::new(40.0, -105.0))
    }

    fn scripted(readings: Vec<Result<Coordinates, GpsError>>) -> (Box<Scripted>, Arc<Mutex<usize>>) {
        let queries = Arc::new(Mutex::new(0));
        (
            Box::new(Scripted {
                readings,
                queries: queries.clone(),
            }),
            queries,
        )
    }

    #[test]
    fn registration_records_station_and_location() {
        let mut store = MemoryStore::new();
        let mut rx = station();

        let lid = rx.register(&mut store).unwrap();

        assert_eq!(rx.location_id(), Some(lid));
        let digi = store.digipeater("R0RX").unwrap();
        assert_eq!(digi.symbol.as_deref(), Some("&"));
        assert_eq!(digi.location_id, Some(lid));
    }

    #[test]
    fn refresh_waits_for_the_interval() {
        let mut store = MemoryStore::new();
        let (source, queries) = scripted(vec![Ok(Coordinates::new(41.0, -106.0))]);
        let mut rx = station().with_position_source(source, Duration::from_secs(30));
        rx.register(&mut store).unwrap();

        assert!(!rx.refresh_if_due(&mut store, Instant::now() + Duration::from_secs(5)));
        assert_eq!(*queries.lock().unwrap(), 0);

        assert!(rx.refresh_if_due(&mut store, Instant::now() + Duration::from_secs(31)));
        assert_eq!(rx.coordinates(), Coordinates::new(41.0, -106.0));
        assert_eq!(store.locations().len(), 2);
        assert_eq!(store.digipeater("R0RX").unwrap().location_id, rx.location_id());
    }

    #[test]
    fn source_failure_keeps_cached_position() {
        let mut store = MemoryStore::new();
        let (source, _) = scripted(vec![Err(GpsError::NoFix)]);
        let mut rx = station().with_position_source(source, Duration::from_secs(30));
        let lid = rx.register(&mut store).unwrap();

        assert!(!rx.refresh_if_due(&mut store, Instant::now() + Duration::from_secs(31)));

        assert_eq!(rx.coordinates(), Coordinates::new(40.0, -105.0));
        assert_eq!(rx.location_id(), Some(lid));
    }

    #[test]
    fn failed_attempt_still_waits_for_the_next_interval() {
        let mut store = MemoryStore::new();
        let (source, queries) = scripted(vec![Err(GpsError::NoFix), Ok(Coordinates::new(41.0, -106.0))]);
        let mut rx = station().with_position_source(source, Duration::from_secs(30));
        rx.register(&mut store).unwrap();
        let start = Instant::now();

        rx.refresh_if_due(&mut store, start + Duration::from_secs(31));
        rx.refresh_if_due(&mut store, start + Duration::from_secs(32));

        assert_eq!(*queries.lock().unwrap(), 1);
    }

    #[test]
    fn configured_station_starts_at_configured_position() {
        let config: Config = toml::from_str(
            "[receiver]\ncallsign = \"R0RX\"\nsymbol = \"&\"\nsymbol_table = \"/\"\nlatitude = 40.0\nlongitude = -105.0\n",
        )
        .unwrap();

        let rx = ReceiverStation::from_config(&config);

        assert_eq!(rx.callsign(), "R0RX");
        assert_eq!(rx.coordinates(), Coordinates::new(40.0, -105.0));
        assert_eq!(rx.location_id(), None);
    }

    #[test]
    fn without_source_nothing_is_refreshed() {
        let mut store = MemoryStore::new();
        let mut rx = station();
        rx.register(&mut store).unwrap();

        assert!(!rx.refresh_if_due(&mut store, Instant::now() + Duration::from_secs(600)));
    }
}
