//! The deferred operation DAG shared by the image and video pipelines.
//!
//! Operations are enqueued and only performed at a terminal request (store /
//! get_cvmat / get_raw_data / get_encoded_image). Each variant here is one
//! node of that DAG; `NotImplemented` combinations are caught eagerly by
//! [`Operation::precondition`] where the format is known up front, or
//! surfaced at execution time otherwise.

use crate::error::MediaError;
use crate::media::format::Format;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Resize { height: u32, width: u32 },
    Crop { x: u32, y: u32, width: u32, height: u32 },
    Threshold { value: f64 },
    /// `code`: 0 vertical, >0 horizontal, <0 both.
    Flip { code: i32 },
    Rotate { angle: f64, #[serde(default)] keep_size: bool },
    SyncRemoteOperation { url: String, #[serde(default)] options: Value },
    RemoteOperation { url: String, #[serde(default)] options: Value },
    UserOperation { #[serde(default)] options: Value },
}

impl Operation {
    /// Whether this operation kind hands off to the remote queue instead of
    /// running entirely on the local thread.
    pub fn is_remote(&self) -> bool {
        matches!(self, Operation::SyncRemoteOperation { .. } | Operation::RemoteOperation { .. })
    }

    /// Whether this operation blocks the calling thread for its remote round
    /// trip (`Sync`) versus being handed to the event loop's remote queue
    /// for out-of-band completion (`Async`/plain `RemoteOperation`).
    pub fn is_synchronous_remote(&self) -> bool {
        matches!(self, Operation::SyncRemoteOperation { .. })
    }

    /// Eager format-precondition check, for combinations detectable without
    /// running the operation (the tiled raw backend never supports flip or
    /// rotate, regardless of input).
    pub fn precondition(&self, format: Format) -> Result<(), MediaError> {
        if format.is_tiled() && matches!(self, Operation::Flip { .. } | Operation::Rotate { .. }) {
            return Err(MediaError::NotImplemented { op: self.op_name(), format: "tdb" });
        }
        Ok(())
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Resize { .. } => "resize",
            Operation::Crop { .. } => "crop",
            Operation::Threshold { .. } => "threshold",
            Operation::Flip { .. } => "flip",
            Operation::Rotate { .. } => "rotate",
            Operation::SyncRemoteOperation { .. } => "sync_remote",
            Operation::RemoteOperation { .. } => "remote",
            Operation::UserOperation { .. } => "user",
        }
    }
}

/// What advancing one step of the pending-operations queue produced.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    /// The operation ran to completion on the calling thread.
    LocalDone,
    /// The object was handed off to the remote queue; the caller must wait
    /// for the event loop to deliver it before consuming further state.
    HandedToRemote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_on_tiled_format_fails_its_precondition() {
        let op = Operation::Flip { code: 0 };
        assert!(op.precondition(Format::Tdb).is_err());
        assert!(op.precondition(Format::Png).is_ok());
    }

    #[test]
    fn remote_variants_are_classified_correctly() {
        let sync = Operation::SyncRemoteOperation { url: "http://x".into(), options: Value::Null };
        let async_ = Operation::RemoteOperation { url: "http://x".into(), options: Value::Null };
        assert!(sync.is_remote() && sync.is_synchronous_remote());
        assert!(async_.is_remote() && !async_.is_synchronous_remote());
        assert!(!Operation::Read.is_remote());
    }
}
