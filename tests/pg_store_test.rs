//! PostgreSQL-backed store tests. Each test gets its own database and is
//! skipped when TEST_DATABASE_URL is not set.
mod common;

use aprsdb::decoder::AprsDecoder;
use aprsdb::digipeater_repo::{DigipeaterRegistry, Observation, ObserveOutcome};
use aprsdb::envelope_processor::{EnvelopeProcessor, PacketOutcome};
use aprsdb::error::StoreError;
use aprsdb::locations::Coordinates;
use aprsdb::locations_repo::LocationRegistry;
use aprsdb::pg_store::PgStore;
use aprsdb::receiver_station::ReceiverStation;
use aprsdb::route_graph::RouteGraph;
use aprsdb::schema::sessions;
use aprsdb::sessions::{SessionClock, start_session};
use aprsdb::store::{NewEnvelope, Store};
use chrono::{Duration, TimeZone, Utc};
use common::TestDatabase;
use diesel::prelude::*;
use serial_test::serial;

#[derive(QueryableByName)]
struct RowCount {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    n: i64,
}

fn count(db: &TestDatabase, table: &str) -> i64 {
    let mut conn = db.pool().get().expect("connection");
    diesel::sql_query(format!("SELECT COUNT(*) AS n FROM {}", table))
        .get_result::<RowCount>(&mut conn)
        .expect("count")
        .n
}

fn envelope(src: &str, session_id: i64) -> NewEnvelope {
    NewEnvelope {
        src: src.to_string(),
        dest: "APRS".to_string(),
        format: "status".to_string(),
        received_at: Utc::now(),
        session_id,
        is_subpacket: false,
        receiver_location_id: None,
        raw: None,
        parse_error: None,
    }
}

#[test]
#[serial]
fn locations_are_deduplicated() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();

    let a = LocationRegistry::resolve(&mut store, Coordinates::new(40.0, -105.0)).unwrap();
    let b = LocationRegistry::resolve(&mut store, Coordinates::new(40.0, -105.0)).unwrap();
    let c = LocationRegistry::resolve(&mut store, Coordinates::new(40.0001, -105.0)).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(count(&db, "locations"), 2);
    // direct insert of an existing point reports the conflict
    assert_eq!(store.insert_location(Coordinates::new(40.0, -105.0)).unwrap(), None);
}

#[test]
#[serial]
fn digipeater_is_inserted_then_updated() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();
    let home = LocationRegistry::resolve(&mut store, Coordinates::new(40.0, -105.0)).unwrap();
    let moved = LocationRegistry::resolve(&mut store, Coordinates::new(41.0, -105.0)).unwrap();
    let sighting = |location_id| Observation {
        callsign: "N0CALL",
        symbol: Some("#"),
        symbol_table: Some("/"),
        location_id: Some(location_id),
    };

    assert_eq!(DigipeaterRegistry::observe(&mut store, sighting(home)).unwrap(), ObserveOutcome::Inserted);
    assert_eq!(DigipeaterRegistry::observe(&mut store, sighting(home)).unwrap(), ObserveOutcome::Unchanged);
    assert_eq!(DigipeaterRegistry::observe(&mut store, sighting(moved)).unwrap(), ObserveOutcome::Updated);

    let stored = store.find_digipeater("N0CALL").unwrap().unwrap();
    assert_eq!(stored.location_id, Some(moved));
    assert_eq!(stored.symbol.as_deref(), Some("#"));
    assert_eq!(count(&db, "digipeaters"), 1);
}

#[test]
#[serial]
fn path_only_digipeater_is_registered_once() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();

    assert!(DigipeaterRegistry::ensure_known(&mut store, "K0RLY").unwrap());
    assert!(!DigipeaterRegistry::ensure_known(&mut store, "K0RLY").unwrap());
    assert!(DigipeaterRegistry::is_known(&mut store, "K0RLY").unwrap());

    let stored = store.find_digipeater("K0RLY").unwrap().unwrap();
    assert_eq!(stored.symbol, None);
    assert_eq!(stored.location_id, None);
}

#[test]
#[serial]
fn route_edges_are_reused() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();

    let first = RouteGraph::edge_id(&mut store, "K0RLY", "R0RX").unwrap();
    let again = RouteGraph::edge_id(&mut store, "K0RLY", "R0RX").unwrap();
    let reverse = RouteGraph::edge_id(&mut store, "R0RX", "K0RLY").unwrap();

    assert_eq!(first, again);
    assert_ne!(first, reverse);
    assert_eq!(store.insert_route("K0RLY", "R0RX").unwrap(), None);
}

#[test]
#[serial]
fn overlong_callsign_is_a_validation_error() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();
    let session = start_session(&mut store, Utc::now()).unwrap();

    let err = store.insert_envelope(&envelope("ABCDEFGHIJKLMNOPQ", session)).unwrap_err();

    assert!(matches!(err, StoreError::Validation(_)), "unexpected error {:?}", err);
}

#[test]
#[serial]
fn inner_failure_rolls_back_to_savepoint() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();
    let session = start_session(&mut store, Utc::now()).unwrap();

    let outer: Result<(), StoreError> = store.transaction(|tx| {
        tx.insert_envelope(&envelope("K0ABC", session))?;
        let inner: Result<i64, StoreError> = tx.transaction(|s| s.insert_envelope(&envelope("ABCDEFGHIJKLMNOPQ", session)));
        assert!(inner.is_err());
        // the outer transaction is still usable after the savepoint rollback
        tx.insert_envelope(&envelope("K0DEF", session))?;
        Ok(())
    });

    outer.unwrap();
    assert_eq!(count(&db, "packets"), 2);
}

#[test]
#[serial]
fn outer_failure_discards_everything() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();
    let session = start_session(&mut store, Utc::now()).unwrap();

    let result: Result<(), StoreError> = store.transaction(|tx| {
        tx.insert_envelope(&envelope("K0ABC", session))?;
        tx.transaction(|s| s.insert_route("K0ABC", "R0RX").map(|_| ()))?;
        Err(StoreError::Query("abandon".to_string()))
    });

    assert!(result.is_err());
    assert_eq!(count(&db, "packets"), 0);
    assert_eq!(store.find_route("K0ABC", "R0RX").unwrap(), None);
}

#[test]
#[serial]
fn packets_flow_through_to_postgres() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();
    let session = start_session(&mut store, Utc::now()).unwrap();
    let mut receiver = ReceiverStation::from_config(&common::test_config());
    receiver.register(&mut store).unwrap();
    let processor = EnvelopeProcessor::new(AprsDecoder, session);

    let beacon = processor
        .process(&mut store, &receiver, "N0CALL>APRS,WIDE1-1:!4000.00N/10500.00W#relay", Utc::now())
        .unwrap();
    let third_party = processor
        .process(&mut store, &receiver, "GATE>APRS:}INNER>APRS,TCPIP,GATE*:>hello", Utc::now())
        .unwrap();
    let garbage = processor
        .process(&mut store, &receiver, "GATE2>APRS:}garbage", Utc::now())
        .unwrap();

    assert!(matches!(beacon, PacketOutcome::Stored(_)));
    assert!(matches!(third_party, PacketOutcome::Stored(_)));
    assert_eq!(garbage, PacketOutcome::SubpacketRejected);
    assert_eq!(count(&db, "packets"), 3);
    assert_eq!(count(&db, "ingest_errors"), 1);
    assert!(store.find_digipeater("GATE2").unwrap().is_none());
    assert!(count(&db, "path_hops") >= 1);
}

#[test]
#[serial]
fn session_offset_is_stored() {
    let Some(db) = TestDatabase::new().expect("Failed to create test database") else {
        return;
    };
    let mut store = PgStore::connect(&db.pool()).unwrap();
    let started = Utc.with_ymd_and_hms(2018, 3, 15, 12, 0, 0).unwrap();
    let session = start_session(&mut store, started).unwrap();

    assert!(SessionClock::calibrate(&mut store, session, started + Duration::seconds(42)));
    assert!(!SessionClock::calibrate(&mut store, session + 1000, started));

    let mut conn = db.pool().get().unwrap();
    let offset: f64 = sessions::table
        .find(session)
        .select(sessions::offset_seconds)
        .first(&mut conn)
        .unwrap();
    assert_eq!(offset, 42.0);
}
