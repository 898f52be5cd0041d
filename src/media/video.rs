//! Deferred video pipeline: the same queued-operation model as [`super::image`]
//! but windowed by (start, stop) and carried between steps as a temp file
//! path instead of an in-memory matrix, since video frames are decoded and
//! re-encoded by an external `ffmpeg` process rather than a Rust codec.

use crate::error::MediaError;
use crate::media::image::RemoteParams;
use crate::media::operation::{Operation, OperationOutcome};
use crate::media::remote::execute_remote_operation;
use crate::media::udf;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

/// A frame or time window; `None` on either side means "from the start" /
/// "through the end".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: Option<f64>,
    pub stop: Option<f64>,
}

impl Window {
    pub fn unbounded() -> Self {
        Window { start: None, stop: None }
    }
}

#[derive(Debug, Clone)]
pub struct VideoOperation {
    pub operation: Operation,
    pub window: Window,
}

/// A video object: its current working file on disk, an ordered queue of
/// windowed operations, a completion counter, a remote-op parameter bundle,
/// and the set of temp files created along the way so they can all be
/// unlinked together at batch end.
#[derive(Debug)]
pub struct Video {
    pub working_path: PathBuf,
    pending: VecDeque<VideoOperation>,
    completed: usize,
    pub remote_params: Option<RemoteParams>,
    temp_dir: PathBuf,
    temp_files: Vec<PathBuf>,
    /// Socket path for `UserOperation` steps; `None` means the batch never
    /// configured a UDF worker, so a `UserOperation` fails at execution.
    pub udf_socket: Option<PathBuf>,
}

impl Video {
    pub fn new(source_path: PathBuf, temp_dir: PathBuf) -> Self {
        Video {
            working_path: source_path,
            pending: VecDeque::new(),
            completed: 0,
            remote_params: None,
            temp_dir,
            temp_files: Vec::new(),
            udf_socket: None,
        }
    }

    pub fn with_udf_socket(mut self, socket: PathBuf) -> Self {
        self.udf_socket = Some(socket);
        self
    }

    pub fn enqueue(&mut self, operation: Operation, window: Window) {
        self.pending.push_back(VideoOperation { operation, window });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    fn next_temp_path(&mut self, suffix: &str) -> PathBuf {
        let name = format!("video-{}-{}.{}", std::process::id(), self.temp_files.len(), suffix);
        let path = self.temp_dir.join(name);
        self.temp_files.push(path.clone());
        path
    }

    pub fn execute_operation(&mut self) -> Result<OperationOutcome, MediaError> {
        let step = match self.pending.front() {
            Some(step) => step.clone(),
            None => return Ok(OperationOutcome::LocalDone),
        };

        if step.operation.is_remote() {
            if let Operation::SyncRemoteOperation { url, options } | Operation::RemoteOperation { url, options } =
                &step.operation
            {
                self.remote_params = Some(RemoteParams { url: url.clone(), options: options.clone() });
            }
            return Ok(OperationOutcome::HandedToRemote);
        }

        if let Operation::UserOperation { options } = &step.operation {
            self.run_user_operation(options)?;
            self.pending.pop_front();
            self.completed += 1;
            return Ok(OperationOutcome::LocalDone);
        }

        self.apply_local(&step)?;
        self.pending.pop_front();
        self.completed += 1;
        Ok(OperationOutcome::LocalDone)
    }

    /// Runs a `UserOperation` synchronously on the calling thread, handing
    /// the working file's current bytes to the UDF socket and writing the
    /// response back out as the new working file.
    fn run_user_operation(&mut self, options: &Value) -> Result<(), MediaError> {
        let socket_path = self
            .udf_socket
            .clone()
            .ok_or_else(|| MediaError::Codec("UserOperation requires a UDF socket to be configured".into()))?;
        let bytes = std::fs::read(&self.working_path).map_err(|e| MediaError::Codec(e.to_string()))?;
        let response = udf::run_user_operation(&socket_path, &bytes, options)?;
        let out_path = self.next_temp_path("mp4");
        std::fs::write(&out_path, &response).map_err(|e| MediaError::Codec(e.to_string()))?;
        self.working_path = out_path;
        Ok(())
    }

    pub fn complete_remote(&mut self, response_bytes: Vec<u8>) -> Result<(), MediaError> {
        let out_path = self.next_temp_path("mp4");
        std::fs::write(&out_path, &response_bytes).map_err(|e| MediaError::Codec(e.to_string()))?;
        self.working_path = out_path;
        self.pending.pop_front();
        self.completed += 1;
        self.remote_params = None;
        Ok(())
    }

    pub fn run_remote(&mut self, client: &reqwest::blocking::Client, id: &str) -> Result<(), MediaError> {
        let params = self.remote_params.clone().ok_or_else(|| {
            MediaError::Codec("run_remote called with no pending remote operation".into())
        })?;
        let bytes = std::fs::read(&self.working_path).map_err(|e| MediaError::Codec(e.to_string()))?;
        let response = execute_remote_operation(client, &params.url, id, &bytes, &params.options)?;
        self.complete_remote(response)
    }

    fn apply_local(&mut self, step: &VideoOperation) -> Result<(), MediaError> {
        let args = match &step.operation {
            Operation::Read | Operation::Write => return Ok(()),
            Operation::Resize { height, width } => vec!["-vf".into(), format!("scale={width}:{height}")],
            Operation::Crop { x, y, width, height } => {
                vec!["-vf".into(), format!("crop={width}:{height}:{x}:{y}")]
            }
            Operation::Threshold { value } => vec!["-vf".into(), format!("lutyuv=y=val*gte(val\\,{value})")],
            Operation::Flip { code } => {
                let filter = match code {
                    0 => "vflip",
                    c if *c > 0 => "hflip",
                    _ => "vflip,hflip",
                };
                vec!["-vf".into(), filter.into()]
            }
            Operation::Rotate { angle, .. } => {
                let radians = angle.to_radians();
                vec!["-vf".into(), format!("rotate={radians}")]
            }
            Operation::SyncRemoteOperation { .. } | Operation::RemoteOperation { .. } | Operation::UserOperation { .. } => {
                return Err(MediaError::Codec(
                    "remote/UDF ops are intercepted in execute_operation and never reach apply_local".into(),
                ));
            }
        };

        let out_path = self.next_temp_path("mp4");
        let mut command = Command::new("ffmpeg");
        command.arg("-y").arg("-i").arg(&self.working_path);
        if let Some(start) = step.window.start {
            command.arg("-ss").arg(start.to_string());
        }
        if let Some(stop) = step.window.stop {
            command.arg("-to").arg(stop.to_string());
        }
        command.args(&args).arg(&out_path);

        debug!(?command, "invoking ffmpeg for a local video operation");
        let status = command.status().map_err(|e| MediaError::Codec(format!("ffmpeg spawn failed: {e}")))?;
        if !status.success() {
            return Err(MediaError::Codec(format!("ffmpeg exited with {status}")));
        }
        self.working_path = out_path;
        Ok(())
    }

    /// Terminal request: returns the bytes at the current working path.
    pub fn encode(&self) -> Result<Vec<u8>, MediaError> {
        std::fs::read(&self.working_path).map_err(|e| MediaError::Codec(e.to_string()))
    }

    /// Unlinks every temp file this video produced; the source path is left
    /// untouched since it predates this object.
    pub fn cleanup(&mut self) {
        for path in self.temp_files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove video temp file");
                }
            }
        }
    }
}

impl Drop for Video {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cleanup_removes_all_generated_temp_files() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, b"fake video bytes").unwrap();

        let mut video = Video::new(source, dir.path().to_path_buf());
        let generated = video.next_temp_path("mp4");
        std::fs::write(&generated, b"intermediate").unwrap();
        video.working_path = generated.clone();

        video.cleanup();
        assert!(!generated.exists());
    }

    #[test]
    fn remote_operation_is_reported_as_handed_off() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, b"fake video bytes").unwrap();

        let mut video = Video::new(source, dir.path().to_path_buf());
        video.enqueue(
            Operation::RemoteOperation { url: "http://example.invalid/op".into(), options: Value::Null },
            Window::unbounded(),
        );
        let outcome = video.execute_operation().unwrap();
        assert_eq!(outcome, OperationOutcome::HandedToRemote);
        assert!(video.remote_params.is_some());
    }

    #[test]
    fn read_and_write_are_no_ops_that_still_advance_the_queue() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, b"fake video bytes").unwrap();

        let mut video = Video::new(source.clone(), dir.path().to_path_buf());
        video.enqueue(Operation::Read, Window::unbounded());
        video.execute_operation().unwrap();
        assert_eq!(video.completed_count(), 1);
        assert_eq!(video.working_path, source);
    }

    #[test]
    fn user_operation_without_a_configured_socket_is_an_error() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, b"fake video bytes").unwrap();

        let mut video = Video::new(source, dir.path().to_path_buf());
        video.enqueue(Operation::UserOperation { options: Value::Null }, Window::unbounded());
        assert!(video.execute_operation().is_err());
    }

    #[test]
    fn user_operation_runs_locally_against_a_udf_socket() {
        use std::io::{Read as _, Write as _};
        use std::os::unix::net::UnixListener;

        let dir = tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, b"fake video bytes").unwrap();

        let socket_path = dir.path().join("udf.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).unwrap();
            let options_len = u32::from_be_bytes(len_buf) as usize;
            let mut options_buf = vec![0u8; options_len];
            stream.read_exact(&mut options_buf).unwrap();
            stream.read_exact(&mut len_buf).unwrap();
            let data_len = u32::from_be_bytes(len_buf) as usize;
            let mut data_buf = vec![0u8; data_len];
            stream.read_exact(&mut data_buf).unwrap();

            let response = b"transformed video bytes".to_vec();
            stream.write_all(&(response.len() as u32).to_be_bytes()).unwrap();
            stream.write_all(&response).unwrap();
        });

        let mut video = Video::new(source, dir.path().to_path_buf()).with_udf_socket(socket_path);
        video.enqueue(Operation::UserOperation { options: Value::Null }, Window::unbounded());
        let outcome = video.execute_operation().unwrap();
        assert_eq!(outcome, OperationOutcome::LocalDone);
        assert_eq!(std::fs::read(&video.working_path).unwrap(), b"transformed video bytes");

        server.join().unwrap();
    }
}
