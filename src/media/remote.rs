//! The remote operation contract: a multipart HTTP POST carrying the
//! object's current bytes plus a JSON options blob, keyed by `?id=`.
//!
//! The event loop's worker threads are plain `std::thread` + `Mutex`/
//! `Condvar` (no async runtime per the design notes), so this uses
//! `reqwest`'s blocking client rather than its async one.

use crate::error::MediaError;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether a failed remote call should be retried once (`Transient`) or has
/// poisoned the operation outright (`Persistent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Persistent,
}

fn classify_status(status: reqwest::StatusCode) -> FailureKind {
    match status.as_u16() {
        502 | 503 | 504 => FailureKind::Transient,
        _ => FailureKind::Persistent,
    }
}

fn classify_transport_error(err: &reqwest::Error) -> FailureKind {
    if err.is_connect() || err.is_timeout() {
        FailureKind::Transient
    } else {
        FailureKind::Persistent
    }
}

/// Posts `imageData`/`jsonData` to `url?id=<id>` and returns the response
/// body bytes (the operated image/video payload) on success.
fn post_once(
    client: &reqwest::blocking::Client,
    url: &str,
    id: &str,
    data: &[u8],
    options: &Value,
) -> Result<Vec<u8>, (FailureKind, String)> {
    let form = reqwest::blocking::multipart::Form::new()
        .part("imageData", reqwest::blocking::multipart::Part::bytes(data.to_vec()))
        .text("jsonData", options.to_string());

    let response = client
        .post(url)
        .query(&[("id", id)])
        .multipart(form)
        .send()
        .map_err(|e| (classify_transport_error(&e), e.to_string()))?;

    if !response.status().is_success() {
        let kind = classify_status(response.status());
        return Err((kind, format!("remote operation returned {}", response.status())));
    }

    response.bytes().map(|b| b.to_vec()).map_err(|e| (FailureKind::Persistent, e.to_string()))
}

/// Runs the remote operation, retrying a transient failure exactly once; a
/// persistent failure (or a transient one that fails again) poisons the
/// operation and the caller must roll back to its pre-op snapshot.
pub fn execute_remote_operation(
    client: &reqwest::blocking::Client,
    url: &str,
    id: &str,
    data: &[u8],
    options: &Value,
) -> Result<Vec<u8>, MediaError> {
    match post_once(client, url, id, data, options) {
        Ok(bytes) => Ok(bytes),
        Err((FailureKind::Transient, reason)) => {
            warn!(id, reason, "remote operation failed transiently, retrying once");
            match post_once(client, url, id, data, options) {
                Ok(bytes) => Ok(bytes),
                Err((_, reason)) => Err(MediaError::RemotePersistent(reason)),
            }
        }
        Err((FailureKind::Persistent, reason)) => {
            debug!(id, reason, "remote operation failed persistently");
            Err(MediaError::RemotePersistent(reason))
        }
    }
}

/// Builds the blocking client the event loop shares across remote calls,
/// honoring an optional proxy from `Config`.
pub fn build_client(proxy: Option<&crate::config::HttpProxyConfig>) -> Result<reqwest::blocking::Client, MediaError> {
    let mut builder = reqwest::blocking::Client::builder().timeout(Duration::from_secs(30));
    if let Some(proxy_cfg) = proxy {
        let proxy_url = format!("{}://{}:{}", proxy_cfg.scheme, proxy_cfg.host, proxy_cfg.port);
        let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| MediaError::RemotePersistent(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| MediaError::RemotePersistent(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_classify_as_transient() {
        assert_eq!(classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE), FailureKind::Transient);
        assert_eq!(classify_status(reqwest::StatusCode::BAD_GATEWAY), FailureKind::Transient);
    }

    #[test]
    fn client_errors_classify_as_persistent() {
        assert_eq!(classify_status(reqwest::StatusCode::BAD_REQUEST), FailureKind::Persistent);
        assert_eq!(classify_status(reqwest::StatusCode::NOT_FOUND), FailureKind::Persistent);
    }

    #[test]
    fn client_builds_without_a_proxy() {
        assert!(build_client(None).is_ok());
    }
}
