//! Environment scoping, checkpoints and collaborator calls


use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use docql_core::datum::Datum;
use docql_core::error::{Error, Result};
use docql_core::signal::Interruptor;
use docql_env::{Env, EnvCheckpoint, ExitPolicy, GcCheckpoint, Node};
use docql_io::metadata::{ClusterMetadata, MetadataView};
use docql_io::storage::{Read, ReadResponse};
use docql_io::MemoryStore;
use test_data_gen::{config_with_chunk, fixture};

fn detached() -> Env {
    Env::detached(Interruptor::new())
}

#[test]
fn test_discard_checkpoint_on_failure_restores_the_stack() {
    fn evaluate(env: &mut Env) -> Result<()> {
        let mut outer = EnvCheckpoint::new(env, ExitPolicy::Discard);
        for i in 0..10 {
            outer.alloc(Node::Num(i as f64))?;
        }
        let mut inner = EnvCheckpoint::new(&mut outer, ExitPolicy::Merge);
        inner.alloc(Node::Str("deep".into()))?;
        Err(Error::query("failed mid-scope"))
    }

    let mut env = detached();
    let survivor = env.alloc(Node::Bool(true)).unwrap();
    let depth = env.num_checkpoints();

    let err = evaluate(&mut env).unwrap_err();
    assert_eq!(err.to_string(), "failed mid-scope");
    assert_eq!(env.num_checkpoints(), depth);
    assert_eq!(env.live_values(), 1);
    assert!(env.is_owned(survivor));
}

#[test]
fn test_merge_checkpoint_hands_values_outward() {
    let mut env = detached();
    let r = {
        let mut cp = EnvCheckpoint::new(&mut env, ExitPolicy::Merge);
        assert_eq!(cp.policy(), ExitPolicy::Merge);
        cp.alloc_datum(&Datum::from(vec![Datum::from(1i64), Datum::from(2i64)]))
            .unwrap()
    };
    assert_eq!(env.num_checkpoints(), 0);
    assert_eq!(
        env.to_datum(r).unwrap(),
        Datum::from(vec![Datum::from(1i64), Datum::from(2i64)])
    );
}

#[test]
fn test_gc_keeps_bound_variables_alive() {
    let mut env = detached();
    let var = env.gensym(true).unwrap();
    let mut cp = EnvCheckpoint::new(&mut env, ExitPolicy::Merge);
    let bound = cp.alloc(Node::Str("bound".into())).unwrap();
    cp.push_var(var, bound);
    for _ in 0..20 {
        cp.alloc(Node::Null).unwrap();
    }
    let stats = cp.gc_roots(&[]).unwrap();
    assert_eq!(stats.moved, 1);
    assert_eq!(stats.freed, 20);
    assert_eq!(cp.top_var(var).unwrap(), bound);
    cp.pop_var(var).unwrap();
    drop(cp);
    assert_eq!(env.live_values(), 1);
}

#[test]
fn test_gc_checkpoint_over_a_long_loop() {
    let mut env = detached();
    let mut gc = GcCheckpoint::new(&mut env);
    let mut total = gc.alloc(Node::Num(0.0)).unwrap();
    for i in 0..500 {
        let prev = gc.node(total).unwrap().clone();
        let sum = match prev {
            Node::Num(n) => n + i as f64,
            _ => unreachable!(),
        };
        total = gc.alloc(Node::Num(sum)).unwrap();
        gc.maybe_gc(&[total]).unwrap();
    }
    gc.finalize(&[total]).unwrap();
    assert_eq!(env.num_checkpoints(), 0);
    assert_eq!(env.live_values(), 1);
    assert_eq!(env.to_datum(total).unwrap(), Datum::from(124_750i64));
}

#[test]
fn test_variable_shadowing_and_scopes() {
    let mut env = detached();
    let x = env.gensym(false).unwrap();
    assert!(!Env::var_allows_implicit(x));
    let one = env.alloc_datum(&Datum::from(1i64)).unwrap();
    let two = env.alloc_datum(&Datum::from(2i64)).unwrap();

    env.push_var(x, one);
    env.push_var(x, two);
    assert_eq!(env.top_var(x).unwrap(), two);
    env.pop_var(x).unwrap();
    assert_eq!(env.top_var(x).unwrap(), one);

    let scope = env.dump_scope().unwrap();
    env.pop_var(x).unwrap();
    assert!(env.top_var(x).unwrap_err().to_string().starts_with("Unrecognized variable"));

    env.push_scope(&scope).unwrap();
    assert_eq!(env.to_datum(env.top_var(x).unwrap()).unwrap(), Datum::from(1i64));
    env.pop_scope().unwrap();
    assert!(env.top_var(x).is_err());
    assert!(env.pop_scope().is_err());
}

#[test]
fn test_optargs_inherit_unless_overridden() {
    let mut env = detached();
    let mut global = BTreeMap::new();
    global.insert("db".to_string(), Datum::from("test"));
    global.insert("durability".to_string(), Datum::from("hard"));
    env.init_optargs(global).unwrap();
    assert!(env.init_optargs(BTreeMap::new()).is_err());

    assert!(env.add_optarg("db", Datum::from("other")));
    assert_eq!(env.get_optarg("db"), Some(&Datum::from("test")));
    assert!(!env.add_optarg("profile", Datum::from(false)));

    let mut local = BTreeMap::new();
    local.insert("durability".to_string(), Datum::from("soft"));
    let nested = env.scoped_optargs(&local);
    assert_eq!(nested["db"], Datum::from("test"));
    assert_eq!(nested["durability"], Datum::from("soft"));
    assert_eq!(env.all_optargs()["durability"], Datum::from("hard"));
}

#[test]
fn test_metadata_join_waits_for_propagation() {
    let view = MetadataView::deferred(ClusterMetadata::default());
    let env = Env::new(
        Arc::new(MemoryStore::new()),
        view.clone(),
        Interruptor::new(),
        config_with_chunk(5),
    )
    .unwrap();

    let mut update = ClusterMetadata::default();
    update.add_database("late");

    let publisher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        view.propagate().unwrap();
    });
    env.join_and_wait_to_propagate(&update).unwrap();
    publisher.join().unwrap();
    assert!(env.metadata().snapshot().unwrap().find_database("late").is_some());
}

#[test]
fn test_metadata_wait_is_interruptible() {
    let intr = Interruptor::new();
    let env = Env::new(
        Arc::new(MemoryStore::new()),
        MetadataView::deferred(ClusterMetadata::default()),
        intr.clone(),
        config_with_chunk(5),
    )
    .unwrap();
    let mut update = ClusterMetadata::default();
    update.add_database("never");

    let pulser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        intr.pulse();
    });
    let err = env.join_and_wait_to_propagate(&update).unwrap_err();
    pulser.join().unwrap();
    assert!(err.is_interrupted());
}

#[test]
fn test_storage_failures_surface_as_cannot_perform_query() {
    let fx = fixture(3, config_with_chunk(5));
    let env = fx.env();
    let table = fx
        .metadata
        .snapshot()
        .unwrap()
        .find_table(fx.db, "people")
        .map(|(id, _)| id)
        .unwrap();

    let read = Read::Point {
        table,
        key: Datum::from(1i64),
    };
    match env.read(&read).unwrap() {
        ReadResponse::Point(row) => assert_eq!(row.get_field("name").unwrap(), &Datum::from("Person1")),
        other => panic!("unexpected {other:?}"),
    }

    fx.store.set_unavailable(true);
    assert!(matches!(env.read(&read), Err(Error::CannotPerformQuery(_))));
}
