use tracing::{debug, trace};

use crate::digipeaters::{DigipeaterUpdate, NewDigipeater};
use crate::error::RegistryError;
use crate::store::{LocationId, Store};

/// One sighting of a relay station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation<'a> {
    pub callsign: &'a str,
    pub symbol: Option<&'a str>,
    pub symbol_table: Option<&'a str>,
    pub location_id: Option<LocationId>,
}

/// What an observation did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// The stored symbol is the generic relay symbol and the sighting disagrees.
    Ignored,
}

/// Registry of relay stations, one record per callsign.
pub struct DigipeaterRegistry;

impl DigipeaterRegistry {
    /// Reconcile an observation with the stored record.
    ///
    /// All four fields are required; a partial observation fails with
    /// [`RegistryError::MissingField`] before touching the store.
    pub fn observe<S: Store>(store: &mut S, observation: Observation<'_>) -> Result<ObserveOutcome, RegistryError> {
        let callsign = Some(observation.callsign)
            .filter(|c| !c.is_empty())
            .ok_or(RegistryError::MissingField("callsign"))?;
        let symbol = observation.symbol.ok_or(RegistryError::MissingField("symbol"))?;
        let symbol_table = observation
            .symbol_table
            .ok_or(RegistryError::MissingField("symbol_table"))?;
        let location_id = observation
            .location_id
            .ok_or(RegistryError::MissingField("location"))?;

        let Some(existing) = store.find_digipeater(callsign)? else {
            let new_digipeater = NewDigipeater {
                callsign: callsign.to_string(),
                symbol: Some(symbol.to_string()),
                symbol_table: Some(symbol_table.to_string()),
                location_id: Some(location_id),
            };
            if store.insert_digipeater(&new_digipeater)?.is_some() {
                debug!("New digipeater {} ({}{})", callsign, symbol_table, symbol);
                metrics::counter!("aprsdb.digipeaters.inserted").increment(1);
                return Ok(ObserveOutcome::Inserted);
            }
            // Lost a race with another writer; reconcile against its row.
            return Self::observe(store, observation);
        };

        if existing.has_generic_symbol() && existing.symbol.as_deref() != Some(symbol) {
            trace!(
                "Ignoring symbol {} for generic relay {}",
                symbol, callsign
            );
            metrics::counter!("aprsdb.digipeaters.ignored").increment(1);
            return Ok(ObserveOutcome::Ignored);
        }

        let update = DigipeaterUpdate {
            symbol: symbol.to_string(),
            symbol_table: symbol_table.to_string(),
            location_id,
        };
        if !existing.differs_from(&update) {
            return Ok(ObserveOutcome::Unchanged);
        }

        store.update_digipeater(existing.id, &update)?;
        debug!(
            "Updated digipeater {}: symbol {}{} at location {}",
            callsign, symbol_table, symbol, location_id
        );
        metrics::counter!("aprsdb.digipeaters.updated").increment(1);
        Ok(ObserveOutcome::Updated)
    }

    /// Make sure a callsign seen only as a path element has a record.
    /// Returns `true` if a bare record was created. Existing records are left alone.
    pub fn ensure_known<S: Store>(store: &mut S, callsign: &str) -> Result<bool, RegistryError> {
        if callsign.is_empty() {
            return Err(RegistryError::MissingField("callsign"));
        }
        if store.find_digipeater(callsign)?.is_some() {
            return Ok(false);
        }
        let created = store.insert_digipeater(&NewDigipeater::bare(callsign))?.is_some();
        if created {
            debug!("New path-only digipeater {}", callsign);
            metrics::counter!("aprsdb.digipeaters.inserted").increment(1);
        }
        Ok(created)
    }

    pub fn is_known<S: Store>(store: &mut S, callsign: &str) -> Result<bool, RegistryError> {
        Ok(store.find_digipeater(callsign)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn sighting<'a>(symbol: &'a str, table: &'a str, location_id: LocationId) -> Observation<'a> {
        Observation {
            callsign: "W0DIG-1",
            symbol: Some(symbol),
            symbol_table: Some(table),
            location_id: Some(location_id),
        }
    }

    #[test]
    fn first_observation_inserts() {
        let mut store = MemoryStore::new();

        let outcome = DigipeaterRegistry::observe(&mut store, sighting("&", "/", 1)).unwrap();

        assert_eq!(outcome, ObserveOutcome::Inserted);
        let digi = store.digipeater("W0DIG-1").unwrap();
        assert_eq!(digi.symbol.as_deref(), Some("&"));
        assert_eq!(digi.location_id, Some(1));
    }

    #[test]
    fn generic_relay_symbol_is_sticky() {
        let mut store = MemoryStore::new();
        DigipeaterRegistry::observe(&mut store, sighting("#", "/", 1)).unwrap();

        let outcome = DigipeaterRegistry::observe(&mut store, sighting("&", "/", 2)).unwrap();

        assert_eq!(outcome, ObserveOutcome::Ignored);
        let digi = store.digipeater("W0DIG-1").unwrap();
        assert_eq!(digi.symbol.as_deref(), Some("#"));
        // the whole update is skipped, location included
        assert_eq!(digi.location_id, Some(1));
        assert_eq!(store.digipeater_update_count(), 0);
    }

    #[test]
    fn generic_relay_still_follows_same_symbol_moves() {
        let mut store = MemoryStore::new();
        DigipeaterRegistry::observe(&mut store, sighting("#", "/", 1)).unwrap();

        let outcome = DigipeaterRegistry::observe(&mut store, sighting("#", "S", 2)).unwrap();

        assert_eq!(outcome, ObserveOutcome::Updated);
        let digi = store.digipeater("W0DIG-1").unwrap();
        assert_eq!(digi.symbol_table.as_deref(), Some("S"));
        assert_eq!(digi.location_id, Some(2));
    }

    #[test]
    fn non_generic_symbol_is_replaced() {
        let mut store = MemoryStore::new();
        DigipeaterRegistry::observe(&mut store, sighting("&", "/", 1)).unwrap();

        let outcome = DigipeaterRegistry::observe(&mut store, sighting("#", "/", 1)).unwrap();

        assert_eq!(outcome, ObserveOutcome::Updated);
        assert_eq!(store.digipeater("W0DIG-1").unwrap().symbol.as_deref(), Some("#"));
    }

    #[test]
    fn identical_observation_issues_no_update() {
        let mut store = MemoryStore::new();
        DigipeaterRegistry::observe(&mut store, sighting("#", "/", 1)).unwrap();

        let outcome = DigipeaterRegistry::observe(&mut store, sighting("#", "/", 1)).unwrap();

        assert_eq!(outcome, ObserveOutcome::Unchanged);
        assert_eq!(store.digipeater_update_count(), 0);
    }

    #[test]
    fn bare_record_is_completed_by_first_full_sighting() {
        let mut store = MemoryStore::new();
        DigipeaterRegistry::ensure_known(&mut store, "W0DIG-1").unwrap();

        let outcome = DigipeaterRegistry::observe(&mut store, sighting("#", "/", 3)).unwrap();

        assert_eq!(outcome, ObserveOutcome::Updated);
        assert_eq!(store.digipeater("W0DIG-1").unwrap().location_id, Some(3));
    }

    #[test]
    fn missing_field_fails_without_mutation() {
        let mut store = MemoryStore::new();
        let observation = Observation {
            callsign: "W0DIG-1",
            symbol: Some("#"),
            symbol_table: Some("/"),
            location_id: None,
        };

        let err = DigipeaterRegistry::observe(&mut store, observation).unwrap_err();

        assert!(matches!(err, RegistryError::MissingField("location")));
        assert!(store.digipeaters().is_empty());
    }

    #[test]
    fn ensure_known_never_overwrites() {
        let mut store = MemoryStore::new();
        DigipeaterRegistry::observe(&mut store, sighting("&", "/", 1)).unwrap();

        let created = DigipeaterRegistry::ensure_known(&mut store, "W0DIG-1").unwrap();

        assert!(!created);
        let digi = store.digipeater("W0DIG-1").unwrap();
        assert_eq!(digi.symbol.as_deref(), Some("&"));
        assert_eq!(digi.location_id, Some(1));
    }

    #[test]
    fn ensure_known_creates_bare_record() {
        let mut store = MemoryStore::new();

        assert!(DigipeaterRegistry::ensure_known(&mut store, "K0RLY").unwrap());
        assert!(DigipeaterRegistry::is_known(&mut store, "K0RLY").unwrap());
        let digi = store.digipeater("K0RLY").unwrap();
        assert_eq!(digi.symbol, None);
        assert_eq!(digi.location_id, None);
    }
}
