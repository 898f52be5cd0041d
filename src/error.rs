//! Crate-wide error taxonomy.
//!
//! Every engine-level failure eventually collapses into a `StatusCode` plus a
//! human-readable `info` string, because that is the only thing that crosses
//! the wire back to a client (see the response shape in `dispatcher`). The
//! `thiserror` enums below exist so internal code keeps `?`-propagation and
//! structured context; `StatusCode::from(&CoreError)` is the single place
//! that degrades a typed error down to the five response codes.

use thiserror::Error;

/// The five-and-a-half-valued status a single command in a batch can carry.
///
/// `Exception` is not its own discriminant on the wire (it serializes as a
/// negative status like `Error`), but it is kept distinct here so callers can
/// tell "semantic rejection" apart from "the engine itself broke".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Empty,
    Exists,
    NotUnique,
    Error,
    Exception,
}

impl StatusCode {
    /// The integer that goes into the response's `status` field.
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Empty => 1,
            StatusCode::Exists => 2,
            StatusCode::NotUnique => 3,
            StatusCode::Error => -1,
            StatusCode::Exception => -1,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Success | StatusCode::Empty | StatusCode::Exists | StatusCode::NotUnique)
    }

    /// Whether this status, if produced inside a transaction, aborts the batch.
    pub fn aborts_batch(self) -> bool {
        matches!(self, StatusCode::Error | StatusCode::Exception)
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    NoSuchNode(u64),
    #[error("edge {0} does not exist")]
    NoSuchEdge(u64),
    #[error("property predicate on blob property is not allowed")]
    PropertyTypeInvalid,
    #[error("property type mismatch: expected {expected}, found {found}")]
    PropertyTypeMismatch { expected: &'static str, found: &'static str },
    #[error("reader-writer lock timed out after {0} attempts")]
    LockTimeout(u32),
    #[error("reader count saturated, cannot acquire read lock")]
    LockSaturated,
    #[error("write attempted against a read-only transaction")]
    WriteOnReadOnly,
    #[error("no transaction is open")]
    NoOpenTransaction,
    #[error("uniqueness declared across multiple independent sources is not supported")]
    UnsupportedCrossSourceUniqueness,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("_ref {0} is not bound in this batch")]
    UnboundRef(i64),
    #[error("_ref {0} was already declared in this batch")]
    RefReused(i64),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("query requires exactly one match but found {0}")]
    NotUnique(usize),
    #[error("AddEdge source or destination set is empty")]
    EmptyEndpointSet,
    #[error("sum/average over non-numeric property '{0}'")]
    NonNumericAggregate(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("operation {op} is not implemented for format {format}")]
    NotImplemented { op: &'static str, format: &'static str },
    #[error("remote operation failed (transient): {0}")]
    RemoteTransient(String),
    #[error("remote operation failed (persistent): {0}")]
    RemotePersistent(String),
    #[error("codec error decoding/encoding image: {0}")]
    Codec(String),
    #[error("tiled raw store error: {0}")]
    TiledStore(String),
    #[error("blob count mismatch: {needed} needed, {provided} provided")]
    BlobCountMismatch { needed: usize, provided: usize },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("schema validation failed: {0}")]
    SchemaInvalid(String),
    #[error("unrecognized command '{0}'")]
    UnknownCommand(String),
    #[error("constraint array for '{0}' must have length 2 or 4")]
    BadConstraintArity(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// The top-level error type threaded through the dispatcher.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl CoreError {
    /// Collapse a typed error to the wire status code.
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Graph(GraphError::LockTimeout(_))
            | CoreError::Graph(GraphError::LockSaturated)
            | CoreError::Graph(GraphError::PropertyTypeInvalid)
            | CoreError::Media(_) => StatusCode::Exception,
            CoreError::Query(QueryError::NotUnique(_)) => StatusCode::NotUnique,
            _ => StatusCode::Error,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
