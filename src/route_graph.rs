//! Directed station-to-station edges shared by every packet that used them.

use diesel::prelude::*;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{PacketId, PathHop, RouteId, Store};

/// Stored directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::routes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Route {
    #[diesel(column_name = route_id)]
    pub id: RouteId,
    pub src: String,
    pub dest: String,
}

pub struct RouteGraph;

impl RouteGraph {
    /// Id of the `src` → `dest` edge, created on first use.
    pub fn edge_id<S: Store>(store: &mut S, src: &str, dest: &str) -> Result<RouteId, StoreError> {
        if let Some(id) = store.find_route(src, dest)? {
            return Ok(id);
        }
        if let Some(id) = store.insert_route(src, dest)? {
            debug!("New route {} {} -> {}", id, src, dest);
            metrics::counter!("aprsdb.routes.created").increment(1);
            return Ok(id);
        }
        store
            .find_route(src, dest)?
            .ok_or_else(|| StoreError::NotFound(format!("route {} -> {}", src, dest)))
    }

    /// Append one hop of a packet's path. Hops are never updated or removed.
    pub fn record_hop<S: Store>(
        store: &mut S,
        packet_id: PacketId,
        hop: i32,
        route_id: RouteId,
    ) -> Result<(), StoreError> {
        store.insert_path_hop(&PathHop {
            packet_id,
            hop,
            route_id,
        })?;
        metrics::counter!("aprsdb.path_hops.recorded").increment(1);
        Ok(())
    }
}
