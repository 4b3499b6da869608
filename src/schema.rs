// Diesel table definitions for the tables the query builder touches.
// Format-specific tables are written through `sql_query` from the static
// column lists in `formats` and are not declared here.

diesel::table! {
    use diesel::sql_types::*;
    use postgis_diesel::sql_types::Geometry;

    locations (location_id) {
        location_id -> Int8,
        latitude -> Float8,
        longitude -> Float8,
        geom -> Geometry,
    }
}

diesel::table! {
    digipeaters (digipeater_id) {
        digipeater_id -> Int8,
        #[max_length = 16]
        callsign -> Varchar,
        #[max_length = 1]
        symbol -> Nullable<Varchar>,
        #[max_length = 1]
        symbol_table -> Nullable<Varchar>,
        location_id -> Nullable<Int8>,
    }
}

diesel::table! {
    routes (route_id) {
        route_id -> Int8,
        #[max_length = 16]
        src -> Varchar,
        #[max_length = 16]
        dest -> Varchar,
    }
}

diesel::table! {
    path_hops (pid, hop) {
        pid -> Int8,
        hop -> Int4,
        route_id -> Int8,
    }
}

diesel::table! {
    sessions (session_id) {
        session_id -> Int8,
        started_at -> Timestamptz,
        offset_seconds -> Float8,
    }
}

diesel::table! {
    packets (pid) {
        pid -> Int8,
        #[max_length = 16]
        src -> Varchar,
        #[max_length = 16]
        dest -> Varchar,
        #[max_length = 32]
        format -> Varchar,
        rxtime -> Timestamptz,
        rxsession -> Int8,
        is_subpacket -> Bool,
        rx_location_id -> Nullable<Int8>,
        raw -> Nullable<Text>,
        parse_error -> Nullable<Text>,
    }
}

diesel::table! {
    ingest_errors (error_id) {
        error_id -> Int8,
        rxtime -> Timestamptz,
        rxsession -> Int8,
        raw -> Text,
        message -> Text,
    }
}

diesel::joinable!(digipeaters -> locations (location_id));
diesel::joinable!(packets -> sessions (rxsession));
diesel::joinable!(packets -> locations (rx_location_id));
diesel::joinable!(path_hops -> packets (pid));
diesel::joinable!(path_hops -> routes (route_id));
diesel::joinable!(ingest_errors -> sessions (rxsession));

diesel::allow_tables_to_appear_in_same_query!(
    digipeaters,
    ingest_errors,
    locations,
    packets,
    path_hops,
    routes,
    sessions,
);
