//! Turns a packet's raw relay path into hops over the route graph.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::digipeater_repo::DigipeaterRegistry;
use crate::error::RegistryError;
use crate::route_graph::RouteGraph;
use crate::store::{PacketId, PathHop, Store};

/// Decoder token meaning "no path entry".
pub const PATH_PLACEHOLDER: &str = "NULL";

/// Generic flood-routing aliases (WIDEn-N and friends). They name a routing
/// rule, not a station, so they carry no topology.
static FLOOD_ALIAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(WIDE|TRACE|RELAY)\d*(-\d{1,2})?$").expect("valid flood alias regex"));

/// Strip routing metadata from a decoded path: "has repeated" asterisks,
/// flood aliases, placeholders and empty tokens. Order is preserved.
pub fn clean_path(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|token| token.trim().trim_end_matches('*'))
        .filter(|token| !token.is_empty() && *token != PATH_PLACEHOLDER)
        .filter(|token| !FLOOD_ALIAS.is_match(token))
        .map(str::to_string)
        .collect()
}

pub struct PathResolver<'a> {
    receiver_callsign: &'a str,
}

impl<'a> PathResolver<'a> {
    pub fn new(receiver_callsign: &'a str) -> Self {
        Self { receiver_callsign }
    }

    /// Record the hops of `packet_id`, ending at the receiving station.
    ///
    /// A source that is itself a known digipeater becomes hop 0; otherwise
    /// numbering starts at 1 with the first relay. Must run inside the
    /// packet's transaction so a failure leaves no partial path.
    pub fn resolve<S: Store>(
        &self,
        store: &mut S,
        packet_id: PacketId,
        src: &str,
        raw_path: &[String],
    ) -> Result<Vec<PathHop>, RegistryError> {
        let mut stations = clean_path(raw_path);

        let digi_sourced = DigipeaterRegistry::is_known(store, src)?;
        if digi_sourced {
            stations.insert(0, src.to_string());
        }

        if stations.is_empty() {
            trace!("Packet {} from {} has no relay path", packet_id, src);
            return Ok(Vec::new());
        }

        for callsign in &stations {
            DigipeaterRegistry::ensure_known(store, callsign)?;
        }

        stations.push(self.receiver_callsign.to_string());

        let first_hop = if digi_sourced { 0 } else { 1 };
        let mut hops = Vec::with_capacity(stations.len() - 1);
        for (offset, pair) in stations.windows(2).enumerate() {
            let route_id = RouteGraph::edge_id(store, &pair[0], &pair[1])?;
            let hop = first_hop + offset as i32;
            RouteGraph::record_hop(store, packet_id, hop, route_id)?;
            hops.push(PathHop {
                packet_id,
                hop,
                route_id,
            });
        }

        trace!(
            "Packet {} path {} ({} hops)",
            packet_id,
            stations.join(" -> "),
            hops.len()
        );
        Ok(hops)
    }
}
