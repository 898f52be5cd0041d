//! An embedded, transactional property graph engine for visual data: nodes,
//! edges, and typed properties, with images, video, bounding boxes, and
//! descriptor sets as first-class node kinds and a deferred media operation
//! pipeline (local, remote, and user-defined) behind every blob.
//!
//! [`graph`] is the storage engine: nodes, edges, the property type, and the
//! reusable-iterator family, all behind a single reader-writer lock.
//! [`query`] compiles `Add`/`Query`/`Update` commands into one transaction
//! against it, with cross-command `_ref` bookkeeping and undo-log rollback.
//! [`media`] is the deferred operation DAG for images and video, driven by a
//! dual-queue event loop with bounded remote parallelism. [`index`] maintains
//! secondary property indices. [`persistence`] is the WAL-backed durability
//! layer for graph metadata and the content-addressed media store.
//! [`protocol`] is the JSON wire format and the command dispatcher that ties
//! all of the above into the crate's one entry point, [`protocol::dispatch`].

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod media;
pub mod persistence;
pub mod protocol;
pub mod query;
pub mod rwlock;

pub use config::Config;
pub use error::{CoreError, CoreResult, DispatchError, GraphError, MediaError, QueryError, StatusCode};
pub use graph::{Edge, EdgeId, EdgeType, GraphResult, GraphStore, Node, NodeId, PropertyMap, PropertyValue, Tag};
pub use protocol::{dispatch, Command, Dispatcher};
pub use query::QueryHandler;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }

    #[test]
    fn dispatch_is_reachable_at_the_crate_root() {
        let mut store = GraphStore::new();
        let config = Config::default();
        let (response_json, blobs) = dispatch(&mut store, &config, "[]", Vec::new());
        assert_eq!(response_json, "[]");
        assert!(blobs.is_empty());
    }
}
