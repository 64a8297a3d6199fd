//! Cursor round-trips through the stream cache and the engine


use std::collections::BTreeMap;

use docql_core::config::EngineConfig;
use docql_core::datum::Datum;
use docql_core::error::Error;
use docql_core::id::CursorToken;
use docql_core::signal::Interruptor;
use docql_env::Env;
use docql_exec::{ErrorClass, Response, ResponseKind, StreamCache};
use docql_operators::{DatumStream, Func, Table, Value};
use test_data_gen::{config_with_chunk, fixture};

fn twelve_documents() -> (Env, DatumStream) {
    let mut env = Env::detached(Interruptor::new());
    let refs = (0..12i64)
        .map(|i| {
            env.alloc_datum(&Datum::object([("n", Datum::from(i))]))
                .unwrap()
        })
        .collect();
    (env, DatumStream::from_refs(refs))
}

#[test]
fn test_twelve_documents_in_chunks_of_five() {
    let mut cache = StreamCache::new(&config_with_chunk(5));
    let token = CursorToken::new(42);
    let (env, stream) = twelve_documents();
    cache.insert(token, env, stream).unwrap();
    let intr = Interruptor::new();

    let responses: Vec<Response> = (0..3).map(|_| cache.serve(token, &intr).unwrap()).collect();
    let sizes: Vec<usize> = responses.iter().map(|r| r.data.len()).collect();
    let kinds: Vec<ResponseKind> = responses.iter().map(|r| r.kind).collect();
    assert_eq!(sizes, vec![5, 5, 2]);
    assert_eq!(
        kinds,
        vec![ResponseKind::Partial, ResponseKind::Partial, ResponseKind::Success]
    );

    let all: Vec<Datum> = responses.into_iter().flat_map(|r| r.data).collect();
    let expected: Vec<Datum> = (0..12i64)
        .map(|i| Datum::object([("n", Datum::from(i))]))
        .collect();
    assert_eq!(all, expected);

    match cache.serve(token, &intr) {
        Err(Error::UnknownCursor(42)) => {}
        other => panic!("expected unknown cursor, got {other:?}"),
    }
}

#[test]
fn test_default_chunk_size_tracks_build_profile() {
    let expected = if cfg!(debug_assertions) { 5 } else { 1000 };
    assert_eq!(EngineConfig::default().max_chunk_size, expected);
}

#[test]
fn test_engine_serves_filtered_scan_across_requests() {
    let fx = fixture(40, config_with_chunk(5));
    let mut engine = fx.engine();
    let intr = Interruptor::new();
    let token = CursorToken::new(9);

    let mut response = engine.start(token, BTreeMap::new(), &intr, |env| {
        let table = Table::open(env, fx.db, "people")?;
        let team = Func::field_eq(env, "team", Datum::from("red"))?;
        Ok(Value::Sequence(table.as_datum_stream(env)?.filter(team)))
    });

    let mut ids = Vec::new();
    let mut round_trips = 0;
    loop {
        round_trips += 1;
        assert_ne!(response.kind, ResponseKind::Error, "{:?}", response.error);
        assert!(response.data.len() <= 5);
        for row in &response.data {
            ids.push(row.get_field("id").unwrap().as_int().unwrap());
        }
        if response.is_final() {
            break;
        }
        assert_eq!(response.data.len(), 5);
        response = engine.continue_query(token, &intr);
    }
    let expected: Vec<i64> = (0..40).filter(|i| i % 3 == 0).collect();
    assert_eq!(ids, expected);
    assert_eq!(round_trips, 3);
    assert!(engine.open_cursors().is_empty());
}

#[test]
fn test_interrupting_a_cursor_closes_it() {
    let fx = fixture(30, config_with_chunk(5));
    let mut engine = fx.engine();
    let token = CursorToken::new(11);
    let first = engine.start(token, BTreeMap::new(), &Interruptor::new(), |env| {
        Ok(Value::Table(Table::open(env, fx.db, "people")?))
    });
    assert_eq!(first.kind, ResponseKind::Partial);

    let intr = Interruptor::new();
    intr.pulse();
    let r = engine.continue_query(token, &intr);
    assert_eq!(r.kind, ResponseKind::Error);
    let info = r.error.unwrap();
    assert_eq!(info.class, ErrorClass::Interrupted);
    assert_eq!(info.message, "Query interrupted.");
    assert!(engine.open_cursors().is_empty());
}

#[test]
fn test_storage_outage_mid_cursor_is_an_error_response() {
    let mut config = config_with_chunk(5);
    config.scan_batch_size = 4;
    let fx = fixture(30, config);
    let mut engine = fx.engine();
    let token = CursorToken::new(12);
    let first = engine.start(token, BTreeMap::new(), &Interruptor::new(), |env| {
        Ok(Value::Table(Table::open(env, fx.db, "people")?))
    });
    assert_eq!(first.kind, ResponseKind::Partial);

    fx.store.set_unavailable(true);
    let r = engine.continue_query(token, &Interruptor::new());
    assert_eq!(r.kind, ResponseKind::Error);
    assert_eq!(r.error.unwrap().class, ErrorClass::Unavailable);
    assert!(engine.open_cursors().is_empty());
}

#[test]
fn test_several_cursors_are_independent() {
    let fx = fixture(12, config_with_chunk(5));
    let mut engine = fx.engine();
    let intr = Interruptor::new();
    let (a, b) = (CursorToken::new(1), CursorToken::new(2));
    for t in [a, b] {
        let r = engine.start(t, BTreeMap::new(), &intr, |env| {
            Ok(Value::Table(Table::open(env, fx.db, "people")?))
        });
        assert_eq!(r.kind, ResponseKind::Partial);
    }
    assert_eq!(engine.open_cursors(), vec![a, b]);

    let reused = engine.start(a, BTreeMap::new(), &intr, |env| {
        Ok(Value::Table(Table::open(env, fx.db, "people")?))
    });
    assert_eq!(reused.kind, ResponseKind::Error);
    assert_eq!(reused.error.unwrap().class, ErrorClass::Internal);

    assert_eq!(engine.stop(a).kind, ResponseKind::Success);
    assert_eq!(engine.continue_query(b, &intr).data.len(), 5);
    assert_eq!(engine.continue_query(b, &intr).kind, ResponseKind::Success);
    assert!(engine.open_cursors().is_empty());
}
