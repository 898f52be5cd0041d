//! The wire protocol: a JSON command batch in, a JSON response batch (plus
//! any requested blobs) out.
//!
//! [`commands`] defines the JSON vocabulary, [`schema`] validates a batch's
//! structural shape before it is deserialized, [`constraints`] lowers the
//! wire `constraints` object into the query layer's predicate type,
//! [`response`] builds the per-command response envelope, and
//! [`dispatcher`] ties all of it together around the graph store.

pub mod commands;
pub mod constraints;
pub mod dispatcher;
pub mod response;
pub mod schema;

pub use commands::Command;
pub use dispatcher::{dispatch, Dispatcher};
pub use response::CommandResponseBody;
