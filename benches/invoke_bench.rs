use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use tasklink::{BrokerConfig, Connection, Diagnostics, MemoryBroker, Route, TaskOptions};
use tokio::runtime::Runtime;

fn connected(runtime: &Runtime, broker: &MemoryBroker) -> Connection {
    let conn = Connection::new("bench", Arc::new(broker.clone()))
        .with_diagnostics(Diagnostics::disabled())
        .with_runtime(runtime.handle().clone());
    let connecting = conn
        .connect(&BrokerConfig::default())
        .expect("Failed to start connect");
    assert!(broker.connect(), "memory session is not listening");
    runtime
        .block_on(connecting)
        .expect("Failed to connect memory broker");
    conn
}

fn bench_round_trip(c: &mut Criterion) {
    tasklink::setup_logging(Some(log::LevelFilter::Warn));
    let mut group = c.benchmark_group("invoke");
    let runtime = Runtime::new().expect("Failed to build runtime");

    for track_started in [false, true] {
        let broker = MemoryBroker::new();
        let conn = connected(&runtime, &broker);
        let options = TaskOptions::new().track_started(track_started);

        group.bench_with_input(
            BenchmarkId::new("call_and_succeed", track_started),
            &options,
            |b, options| {
                b.iter(|| {
                    let result = conn
                        .call("add", vec![json!(1), json!(2)], options.clone())
                        .into_result()
                        .expect("tracked call");
                    broker.last_task().expect("task").succeed(json!(3));
                    black_box(runtime.block_on(result)).expect("task result");
                    black_box(broker.take_sent());
                });
            },
        );
    }

    // fails synchronously through the completions, nothing is sent
    let disconnected = Connection::new("idle", Arc::new(MemoryBroker::new()))
        .with_diagnostics(Diagnostics::disabled());
    group.bench_function("call_not_connected", |b| {
        b.iter(|| {
            let dispatch = disconnected.call("add", vec![json!(1)], TaskOptions::new());
            black_box(dispatch.is_untracked());
        });
    });

    group.finish();
}

fn bench_routing(c: &mut Criterion) {
    let config = BrokerConfig::default()
        .with_route(
            "tasks.add",
            Route {
                queue: Some("math".to_owned()),
                ..Route::default()
            },
        )
        .with_route(
            "tasks.report",
            Route {
                routing_key: Some("reports.daily".to_owned()),
                ..Route::default()
            },
        );
    let explicit = Route {
        exchange: Some("priority".to_owned()),
        ..Route::default()
    };

    c.bench_function("route_for/configured", |b| {
        b.iter(|| black_box(config.route_for(black_box("tasks.add"), &Route::default())));
    });
    c.bench_function("route_for/explicit", |b| {
        b.iter(|| black_box(config.route_for(black_box("tasks.unknown"), &explicit)));
    });
}

criterion_group!(benches, bench_round_trip, bench_routing);
criterion_main!(benches);
