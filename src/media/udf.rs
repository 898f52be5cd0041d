//! Local user-defined-operation stage: a request/reply exchange with a
//! process-local UDF server over a Unix domain socket, used for
//! `UserOperation` steps instead of the network-bound remote stage.

use crate::error::MediaError;
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::debug;

/// Sends the object's current bytes plus its operation options to a UDF
/// server listening on `socket_path`, and returns the transformed bytes.
///
/// Wire shape: a 4-byte big-endian length, the `jsonData` options as UTF-8,
/// then the raw object bytes — mirroring the remote HTTP stage's two-part
/// (`jsonData`, `imageData`) framing without the HTTP overhead.
pub fn run_user_operation(socket_path: &Path, data: &[u8], options: &Value) -> Result<Vec<u8>, MediaError> {
    let mut stream = UnixStream::connect(socket_path)
        .map_err(|e| MediaError::Codec(format!("UDF socket connect failed: {e}")))?;

    let options_bytes = options.to_string().into_bytes();
    stream
        .write_all(&(options_bytes.len() as u32).to_be_bytes())
        .and_then(|_| stream.write_all(&options_bytes))
        .and_then(|_| stream.write_all(&(data.len() as u32).to_be_bytes()))
        .and_then(|_| stream.write_all(data))
        .map_err(|e| MediaError::Codec(format!("UDF request write failed: {e}")))?;

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).map_err(|e| MediaError::Codec(format!("UDF response read failed: {e}")))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut response = vec![0u8; len];
    stream.read_exact(&mut response).map_err(|e| MediaError::Codec(format!("UDF response read failed: {e}")))?;

    debug!(bytes = response.len(), "UDF operation returned a response");
    Ok(response)
}
