use tracing::{debug, trace};

use crate::error::StoreError;
use crate::locations::Coordinates;
use crate::store::{LocationId, Store};

/// Deduplicating registry of geographic points.
///
/// Locations are append-only: once a coordinate pair has an id it keeps it.
pub struct LocationRegistry;

impl LocationRegistry {
    /// Return the id of the location at `coordinates`, creating it if needed.
    ///
    /// The insert tolerates a concurrent writer creating the same point
    /// first: a conflicting insert falls back to fetching the existing row.
    pub fn resolve<S: Store>(store: &mut S, coordinates: Coordinates) -> Result<LocationId, StoreError> {
        if let Some(id) = store.find_location(coordinates)? {
            trace!("Location {:?} already known as {}", coordinates, id);
            return Ok(id);
        }

        if let Some(id) = store.insert_location(coordinates)? {
            debug!(
                "Created location {} at ({}, {})",
                id,
                coordinates.latitude(),
                coordinates.longitude()
            );
            metrics::counter!("aprsdb.locations.created").increment(1);
            return Ok(id);
        }

        store.find_location(coordinates)?.ok_or_else(|| {
            StoreError::NotFound(format!(
                "location ({}, {}) conflicted on insert but cannot be fetched",
                coordinates.latitude(),
                coordinates.longitude()
            ))
        })
    }
}
