//! Performance benchmarks for the derived-state engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tributary::{
    memoize, Action, ActionImplementation, Callback, CreateStoreParams, Path, Store, Subscription,
    Value,
};

fn noop() -> Callback<Value> {
    Arc::new(|_| {})
}

/// A store with `field0..fieldN` counters and a SET_FIELD0 action.
fn wide_store(field_count: usize) -> Store {
    let mut initial = serde_json::Map::new();
    for i in 0..field_count {
        initial.insert(format!("field{}", i), json!(0));
    }
    let store = Store::new(Value::from(serde_json::Value::Object(initial)));

    let field0 = store.path(["field0"]);
    store
        .register(
            ActionImplementation::new("SET_FIELD0").with_reducer(move |state, action| {
                field0.set(
                    state,
                    action.payload.get("value").cloned().unwrap_or(Value::Null),
                )
            }),
        )
        .unwrap();
    store.create_store(CreateStoreParams::default()).unwrap();
    store
}

fn live_paths(store: &Store, field_count: usize) -> (Vec<Path>, Vec<Subscription>) {
    let paths: Vec<Path> = (0..field_count)
        .map(|i| store.path([format!("field{}", i)]))
        .collect();
    let subs = paths.iter().map(|p| p.subscribe(noop())).collect();
    (paths, subs)
}

/// Dispatch cost as the number of live paths grows.
fn bench_dispatch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");

    for path_count in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("live_paths", path_count),
            &path_count,
            |b, &count| {
                let store = wide_store(count);
                let (_paths, _subs) = live_paths(&store, count);
                let ticks = AtomicI64::new(0);

                b.iter(|| {
                    let value = ticks.fetch_add(1, Ordering::Relaxed);
                    store
                        .dispatch(Action::new(
                            "SET_FIELD0",
                            Value::from(json!({ "value": value })),
                        ))
                        .unwrap();
                    black_box(store.current_state())
                });
            },
        );
    }

    group.finish();
}

/// One state transition through a selector of growing fan-in.
fn bench_selector_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector_fan_in");

    for width in [2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::new("inputs", width), &width, |b, &width| {
            let store = wide_store(width);
            let (paths, _subs) = live_paths(&store, width);
            let selector = store.selector(
                paths.iter().map(|p| p.as_source()).collect(),
                |inputs| {
                    Ok(Value::Int(
                        inputs.iter().filter_map(Value::as_int).sum::<i64>(),
                    ))
                },
            );
            let _sub = selector.subscribe(noop());
            let ticks = AtomicI64::new(0);

            b.iter(|| {
                let value = ticks.fetch_add(1, Ordering::Relaxed);
                store
                    .dispatch(Action::new(
                        "SET_FIELD0",
                        Value::from(json!({ "value": value })),
                    ))
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Cache-hit lookups keyed by canonical argument encoding.
fn bench_memo_lookup(c: &mut Criterion) {
    let store = wide_store(1);
    let field0 = store.path(["field0"]);
    let memo = {
        let store = store.clone();
        memoize(move |args| {
            let factor = args[0].as_int().unwrap_or(1);
            store.selector(vec![field0.as_source()], move |inputs| {
                Ok(Value::Int(inputs[0].as_int().unwrap_or(0) * factor))
            })
        })
    };

    // Keep the entry alive so every call is a hit.
    let selector = memo.call(&[Value::from(json!({ "factor": 3 }))]);
    let _sub = selector.subscribe(noop());

    c.bench_function("memo_cache_hit", |b| {
        b.iter(|| black_box(memo.call(&[Value::from(json!({ "factor": 3 }))])));
    });
}

criterion_group!(
    benches,
    bench_dispatch_throughput,
    bench_selector_fan_in,
    bench_memo_lookup
);
criterion_main!(benches);
