//! Stream composition, batching and lazy/eager equivalence


use std::sync::{Arc, Mutex};

use docql_core::datum::Datum;
use docql_core::error::Result;
use docql_core::signal::Interruptor;
use docql_env::{DatumRef, Env, Node};
use docql_operators::stream::compare_refs;
use docql_operators::{DatumStream, Func, Table};
use test_data_gen::{config_with_chunk, fixture, people};

fn numbers(env: &mut Env, n: i64) -> Vec<DatumRef> {
    (0..n)
        .map(|i| env.alloc_datum(&Datum::from(i)).unwrap())
        .collect()
}

fn drain(env: &mut Env, mut s: DatumStream) -> Vec<Datum> {
    s.next_batch(env, 0)
        .unwrap()
        .into_iter()
        .map(|r| env.to_datum(r).unwrap())
        .collect()
}

fn add(env: &mut Env) -> Func {
    Func::binary(env, |env, a, b| {
        let sum = env.to_datum(a)?.as_num()? + env.to_datum(b)?.as_num()?;
        env.alloc(Node::Num(sum))
    })
    .unwrap()
}

fn older_than(env: &mut Env, age: f64) -> Func {
    Func::unary(env, move |env, row| {
        let a = env.to_datum(row)?.get_field("age")?.as_num()?;
        env.alloc(Node::Bool(a > age))
    })
    .unwrap()
}

#[test]
fn test_batches_cover_the_stream_then_report_empty() {
    for k in [0usize, 1, 4, 5, 6, 23] {
        for b in [1usize, 2, 5, 7] {
            let mut env = Env::detached(Interruptor::new());
            let refs = numbers(&mut env, k as i64);
            let mut s = DatumStream::from_refs(refs);

            let mut seen = Vec::new();
            let mut non_empty = 0;
            loop {
                let batch = s.next_batch(&mut env, b).unwrap();
                if batch.is_empty() {
                    break;
                }
                assert!(batch.len() <= b);
                non_empty += 1;
                for r in batch {
                    seen.push(env.to_datum(r).unwrap());
                }
            }
            assert_eq!(non_empty, k.div_ceil(b), "k={k} b={b}");
            assert_eq!(seen, (0..k).map(Datum::from).collect::<Vec<_>>());
            assert!(s.next_batch(&mut env, b).unwrap().is_empty());
        }
    }
}

#[test]
fn test_concatmap_drains_each_substream_before_the_next_call() {
    let mut env = Env::detached(Interruptor::new());
    let a = env.alloc_datum(&Datum::from("a")).unwrap();
    let b = env.alloc_datum(&Datum::from("b")).unwrap();
    let calls: Arc<Mutex<Vec<String>>> = Arc::default();

    let log = Arc::clone(&calls);
    let f = Func::unary(&mut env, move |env, x| {
        let tag = env.to_datum(x)?.as_str()?.to_string();
        log.lock().unwrap().push(tag.clone());
        let out = if tag == "a" {
            Datum::from(vec![Datum::from(1i64), Datum::from(2i64)])
        } else {
            Datum::from(vec![Datum::from(3i64)])
        };
        env.alloc_datum(&out)
    })
    .unwrap();

    let mut s = DatumStream::from_refs(vec![a, b]).concatmap(f);
    let first = s.next(&mut env).unwrap().unwrap();
    assert_eq!(env.to_datum(first).unwrap(), Datum::from(1i64));
    let second = s.next(&mut env).unwrap().unwrap();
    assert_eq!(env.to_datum(second).unwrap(), Datum::from(2i64));
    assert_eq!(*calls.lock().unwrap(), vec!["a".to_string()]);

    let rest = drain(&mut env, s);
    assert_eq!(rest, vec![Datum::from(3i64)]);
    assert_eq!(*calls.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_union_slice_and_sort_compose() {
    let mut env = Env::detached(Interruptor::new());
    let low = numbers(&mut env, 3);
    let high: Vec<DatumRef> = (10..13)
        .map(|i| env.alloc_datum(&Datum::from(i as i64)).unwrap())
        .collect();
    let u = DatumStream::union(vec![DatumStream::from_refs(high), DatumStream::from_refs(low)]);
    let sorted = u.sort(&mut env, 100, compare_refs).unwrap();
    assert!(sorted.is_array());
    let sliced = sorted.slice(1, Some(4));
    assert_eq!(
        drain(&mut env, sliced),
        vec![Datum::from(1i64), Datum::from(2i64), Datum::from(10i64)]
    );
}

#[test]
fn test_sort_of_a_table_scan_is_not_an_array() {
    let fx = fixture(5, config_with_chunk(5));
    let mut env = fx.env();
    let table = Table::open(&env, fx.db, "people").unwrap();
    let scan = table.as_datum_stream(&mut env).unwrap();
    let mut sorted = scan
        .sort(&mut env, 10, |env, a, b| {
            let ka = env.to_datum(a)?.get_field("name")?.clone();
            let kb = env.to_datum(b)?.get_field("name")?.clone();
            Ok(kb.compare(&ka))
        })
        .unwrap();
    assert!(!sorted.is_array());
    assert!(sorted.as_array(&mut env).unwrap().is_none());
    let first = sorted.next(&mut env).unwrap().unwrap();
    assert_eq!(
        env.to_datum(first).unwrap().get_field("name").unwrap(),
        &Datum::from("Person4")
    );
}

#[test]
fn test_sort_ceiling_is_a_resource_limit() {
    let fx = fixture(20, config_with_chunk(5));
    let mut env = fx.env();
    let table = Table::open(&env, fx.db, "people").unwrap();
    let scan = table.as_datum_stream(&mut env).unwrap();
    let err = match scan.sort(&mut env, 10, compare_refs) {
        Ok(_) => panic!("sort over the ceiling succeeded"),
        Err(e) => e,
    };
    assert!(err.is_user_error());
    assert_eq!(err.to_string(), "Can only sort at most 10 elements.");
}

#[test]
fn test_zip_merges_join_rows() {
    let mut env = Env::detached(Interruptor::new());
    let row: Datum = serde_json::from_str(r#"{"left":{"id":1,"a":1},"right":{"b":2,"a":9}}"#).unwrap();
    let lonely: Datum = serde_json::from_str(r#"{"left":{"id":2}}"#).unwrap();
    let refs = vec![env.alloc_datum(&row).unwrap(), env.alloc_datum(&lonely).unwrap()];
    let out = drain(&mut env, DatumStream::from_refs(refs).zip());
    let expected: Vec<Datum> = vec![
        serde_json::from_str(r#"{"id":1,"a":9,"b":2}"#).unwrap(),
        serde_json::from_str(r#"{"id":2}"#).unwrap(),
    ];
    assert_eq!(out, expected);

    let bad = env.alloc_datum(&Datum::from(1i64)).unwrap();
    let mut z = DatumStream::from_refs(vec![bad]).zip();
    let err = z.next(&mut env).unwrap_err();
    assert_eq!(err.to_string(), "ZIP can only be called on the result of a join.");
}

/// Run `build` over a lazy table scan and over the same rows held in memory.
fn both_ways<F>(n: usize, build: F) -> (Datum, Datum)
where
    F: Fn(&mut Env, DatumStream) -> Result<DatumRef>,
{
    let fx = fixture(n, config_with_chunk(5));
    let mut env = fx.env();

    let table = Table::open(&env, fx.db, "people").unwrap();
    let lazy = table.as_datum_stream(&mut env).unwrap();
    assert!(lazy.is_lazy());
    let from_lazy = build(&mut env, lazy).unwrap();

    let rows: Vec<DatumRef> = people(n)
        .iter()
        .map(|d| env.alloc_datum(d).unwrap())
        .collect();
    let eager = DatumStream::from_refs(rows);
    let from_eager = build(&mut env, eager).unwrap();

    (env.to_datum(from_lazy).unwrap(), env.to_datum(from_eager).unwrap())
}

#[test]
fn test_lazy_and_eager_count_agree() {
    let (lazy, eager) = both_ways(100, |env, s| {
        let f = older_than(env, 40.0);
        s.filter(f).count(env)
    });
    assert_eq!(lazy, eager);
    assert_eq!(lazy, Datum::from(58i64));
}

#[test]
fn test_lazy_and_eager_reduce_agree() {
    let (lazy, eager) = both_ways(60, |env, s| {
        let ages = Func::get_field(env, "age")?;
        let sum = add(env);
        s.map(ages).reduce(env, None, sum)
    });
    assert_eq!(lazy, eager);
    let expected: usize = (0..60).map(|i| 20 + (i % 50)).sum();
    assert_eq!(lazy, Datum::from(expected));
}

#[test]
fn test_lazy_and_eager_grouped_map_reduce_agree() {
    let (lazy, eager) = both_ways(30, |env, s| {
        let zero = env.alloc_datum(&Datum::from(0i64))?;
        let group = Func::get_field(env, "team")?;
        let one = env.alloc_datum(&Datum::from(1i64))?;
        let map = Func::constant(env, one)?;
        let sum = add(env);
        s.group_map_reduce(env, group, map, Some(zero), sum)
    });
    assert_eq!(lazy, eager);
    let expected: Datum = serde_json::from_str(
        r#"[{"group":"blue","reduction":10},
            {"group":"green","reduction":10},
            {"group":"red","reduction":10}]"#,
    )
    .unwrap();
    assert_eq!(lazy, expected);
}

#[test]
fn test_lazy_and_eager_filter_map_agree() {
    let fx = fixture(25, config_with_chunk(5));
    let mut env = fx.env();
    let table = Table::open(&env, fx.db, "people").unwrap();

    let f = older_than(&mut env, 30.0);
    let names = Func::get_field(&mut env, "name").unwrap();
    let lazy = table.as_datum_stream(&mut env).unwrap().filter(f.clone()).map(names.clone());
    let from_lazy = drain(&mut env, lazy);

    let rows: Vec<DatumRef> = people(25)
        .iter()
        .map(|d| env.alloc_datum(d).unwrap())
        .collect();
    let eager = DatumStream::from_refs(rows).filter(f).map(names);
    let from_eager = drain(&mut env, eager);

    assert_eq!(from_lazy, from_eager);
    assert_eq!(from_lazy.len(), 14);
    assert_eq!(from_lazy[0], Datum::from("Person11"));
}

#[test]
fn test_reduce_over_empty_stream_without_base_fails() {
    let mut env = Env::detached(Interruptor::new());
    let sum = add(&mut env);
    let err = DatumStream::from_refs(Vec::new())
        .reduce(&mut env, None, sum)
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot reduce over an empty stream with no base.");
}

#[test]
fn test_interrupted_scan_stops() {
    let fx = fixture(50, config_with_chunk(5));
    let mut env = fx.env();
    let table = Table::open(&env, fx.db, "people").unwrap();
    let mut s = table.as_datum_stream(&mut env).unwrap();
    assert_eq!(s.next_batch(&mut env, 3).unwrap().len(), 3);

    let intr = Interruptor::new();
    intr.pulse();
    env.set_interruptor(intr);
    assert!(s.next(&mut env).unwrap_err().is_interrupted());
}

fn id_twice(env: &mut Env) -> Func {
    Func::unary(env, |env, row| {
        let id = env.to_datum(row)?.get_field("id")?.clone();
        env.alloc_datum(&Datum::from(vec![id.clone(), id]))
    })
    .unwrap()
}

fn plus(env: &mut Env, n: f64) -> Func {
    Func::unary(env, move |env, x| {
        let v = env.to_datum(x)?.as_num()?;
        env.alloc(Node::Num(v + n))
    })
    .unwrap()
}

#[test]
fn test_transform_added_mid_scan_applies_to_buffered_rows() {
    let fx = fixture(2, config_with_chunk(5));
    let mut env = fx.env();
    let table = Table::open(&env, fx.db, "people").unwrap();
    let twice = id_twice(&mut env);
    let mut s = table.as_datum_stream(&mut env).unwrap().concatmap(twice);
    let first = s.next(&mut env).unwrap().unwrap();
    assert_eq!(env.to_datum(first).unwrap(), Datum::from(0i64));

    // The second copy of row 0 is already buffered when the map arrives.
    let hundred = plus(&mut env, 100.0);
    let rest = drain(&mut env, s.map(hundred));
    assert_eq!(
        rest,
        vec![Datum::from(100i64), Datum::from(101i64), Datum::from(101i64)]
    );
}

#[test]
fn test_concatmap_added_mid_scan_matches_eager() {
    let fx = fixture(3, config_with_chunk(5));
    let mut env = fx.env();
    let table = Table::open(&env, fx.db, "people").unwrap();
    let twice = id_twice(&mut env);
    let pair = Func::unary(&mut env, |env, x| {
        let v = env.to_datum(x)?;
        env.alloc_datum(&Datum::from(vec![v.clone(), v]))
    })
    .unwrap();

    let mut lazy = table.as_datum_stream(&mut env).unwrap().concatmap(twice.clone());
    lazy.next(&mut env).unwrap();
    let from_lazy = drain(&mut env, lazy.concatmap(pair.clone()));

    let rows: Vec<DatumRef> = people(3)
        .iter()
        .map(|d| env.alloc_datum(d).unwrap())
        .collect();
    let mut eager = DatumStream::from_refs(rows).concatmap(twice);
    eager.next(&mut env).unwrap();
    let from_eager = drain(&mut env, eager.concatmap(pair));

    assert_eq!(from_lazy, from_eager);
    let expected: Vec<Datum> = [0i64, 0, 1, 1, 1, 1, 2, 2, 2, 2]
        .into_iter()
        .map(Datum::from)
        .collect();
    assert_eq!(from_lazy, expected);
}
