use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::store::{DigipeaterId, LocationId};

/// Symbol of a generic, non-unique relay. Many unrelated stations share it,
/// so a single sighting with another symbol is not trusted to replace it.
pub const GENERIC_RELAY_SYMBOL: &str = "#";

/// Gateway symbol. Together with [`GENERIC_RELAY_SYMBOL`] marks a relay station.
pub const GATEWAY_SYMBOL: &str = "&";

pub fn is_relay_symbol(symbol: &str) -> bool {
    symbol == GENERIC_RELAY_SYMBOL || symbol == GATEWAY_SYMBOL
}

/// Stored relay station.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::digipeaters)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Digipeater {
    #[diesel(column_name = digipeater_id)]
    pub id: DigipeaterId,
    pub callsign: String,
    pub symbol: Option<String>,
    pub symbol_table: Option<String>,
    pub location_id: Option<LocationId>,
}

/// Insert model. Stations first seen as a path element only have a callsign.
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::digipeaters)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewDigipeater {
    pub callsign: String,
    pub symbol: Option<String>,
    pub symbol_table: Option<String>,
    pub location_id: Option<LocationId>,
}

impl NewDigipeater {
    pub fn bare(callsign: &str) -> Self {
        Self {
            callsign: callsign.to_string(),
            symbol: None,
            symbol_table: None,
            location_id: None,
        }
    }
}

/// Symbol, table and location always change together.
#[derive(Debug, Clone, PartialEq, AsChangeset)]
#[diesel(table_name = crate::schema::digipeaters)]
pub struct DigipeaterUpdate {
    pub symbol: String,
    pub symbol_table: String,
    pub location_id: LocationId,
}

impl Digipeater {
    /// Whether applying `update` would change anything.
    pub fn differs_from(&self, update: &DigipeaterUpdate) -> bool {
        self.location_id != Some(update.location_id)
            || self.symbol.as_deref() != Some(update.symbol.as_str())
            || self.symbol_table.as_deref() != Some(update.symbol_table.as_str())
    }

    pub fn has_generic_symbol(&self) -> bool {
        self.symbol.as_deref() == Some(GENERIC_RELAY_SYMBOL)
    }
}
