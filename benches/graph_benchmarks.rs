use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use samyama::graph::GraphStore;
use samyama::{dispatch, Config};

/// Benchmark node insertion throughput.
fn bench_node_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_insertion");

    for size in [100, 1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut store = GraphStore::new();
                for i in 0..size {
                    let id = store.create_node("Person");
                    store.set_node_property(id, "name", format!("Person{i}")).unwrap();
                    store.set_node_property(id, "age", (i % 100) as i64).unwrap();
                }
            });
        });
    }
    group.finish();
}

/// Benchmark tag scan performance.
fn bench_tag_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_scan");

    for size in [100, 1000, 10_000].iter() {
        let mut store = GraphStore::new();
        for i in 0..*size {
            let id = store.create_node("Person");
            store.set_node_property(id, "name", format!("Person{i}")).unwrap();
        }
        for i in 0..(*size / 2) {
            let id = store.create_node("Company");
            store.set_node_property(id, "name", format!("Company{i}")).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let nodes = store.nodes_by_tag(&"Person".into());
                black_box(nodes.len());
            });
        });
    }
    group.finish();
}

/// Benchmark outgoing-edge traversal latency along a chain.
fn bench_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("traversal");

    let mut store = GraphStore::new();
    let mut node_ids = Vec::new();
    for i in 0..100 {
        let id = store.create_node("Person");
        store.set_node_property(id, "name", format!("Person{i}")).unwrap();
        node_ids.push(id);
    }
    for i in 0..99 {
        store.create_edge(node_ids[i], node_ids[i + 1], "KNOWS").unwrap();
    }

    group.bench_function("1_hop", |b| {
        b.iter(|| {
            let edges = store.outgoing_edges(node_ids[0]);
            black_box(edges.len());
        });
    });

    group.bench_function("2_hop", |b| {
        b.iter(|| {
            let mut count = 0;
            for &e in store.outgoing_edges(node_ids[0]) {
                let edge = store.get_edge(e).unwrap();
                count += store.outgoing_edges(edge.target).len();
            }
            black_box(count);
        });
    });

    group.finish();
}

/// Benchmark end-to-end dispatch throughput for a small write-then-read batch,
/// the path every command actually takes in production (schema validation,
/// transaction, response construction).
fn bench_dispatch_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_batch");
    let config = Config::default();

    let batch = r#"[
        {"AddNode": {"_ref": 1, "tag": "Patient", "properties": {"name": "Jane", "age": 70}}},
        {"AddNode": {"_ref": 2, "tag": "Patient", "properties": {"name": "Arun", "age": 42}}},
        {"AddEdge": {"_ref": 3, "src": 1, "dst": 2, "tag": "ReferredBy"}},
        {"QueryNode": {"tag": "Patient", "constraints": {"age": [">=", 65]}, "results": {"list": ["name", "age"]}}}
    ]"#;

    group.bench_function("add_add_edge_query", |b| {
        b.iter(|| {
            let mut store = GraphStore::new();
            let (response, _blobs) = dispatch(&mut store, &config, batch, Vec::new());
            black_box(response.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_node_insertion,
    bench_tag_scan,
    bench_traversal,
    bench_dispatch_batch,
);
criterion_main!(benches);
