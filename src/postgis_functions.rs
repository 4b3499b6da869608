//! PostGIS functions used by the location queries.

use diesel::define_sql_function;

define_sql_function! {
    /// Creates a Point geometry from X (longitude) and Y (latitude).
    #[sql_name = "ST_MakePoint"]
    fn st_make_point(
        x: diesel::sql_types::Double,
        y: diesel::sql_types::Double
    ) -> postgis_diesel::sql_types::Geometry;
}

define_sql_function! {
    /// Sets the spatial reference system of a geometry.
    #[sql_name = "ST_SetSRID"]
    fn st_set_srid(
        geom: postgis_diesel::sql_types::Geometry,
        srid: diesel::sql_types::Integer
    ) -> postgis_diesel::sql_types::Geometry;
}
