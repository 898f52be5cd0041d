//! A small standalone driver exercising the dispatcher end to end.
//!
//! The engine's actual entry point is [`samyama::dispatch`], called
//! in-process by a host embedding this crate; there is no network listener
//! here. This binary just runs one illustrative batch so the crate has
//! something runnable outside of its test suite.

use samyama::{dispatch, Config, GraphStore};

fn main() {
    let config = Config::from_env();
    config.init_tracing();

    println!("samyama-graph v{}", samyama::version());

    let mut store = GraphStore::new();
    let batch = r#"[
        {"AddNode": {"_ref": 1, "tag": "Patient", "properties": {"name": "Jane", "age": 70}}},
        {"AddNode": {"_ref": 2, "tag": "Patient", "properties": {"name": "Arun", "age": 42}}},
        {"AddEdge": {"_ref": 3, "src": 1, "dst": 2, "tag": "ReferredBy"}},
        {"QueryNode": {"tag": "Patient", "constraints": {"age": [">=", 65]}, "results": {"list": ["name", "age"]}}}
    ]"#;

    let (response_json, blobs) = dispatch(&mut store, &config, batch, Vec::new());
    println!("{response_json}");
    println!("nodes: {}, edges: {}, blobs returned: {}", store.node_count(), store.edge_count(), blobs.len());
}
