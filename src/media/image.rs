//! Deferred image pipeline: an ordered queue of operations over a single
//! image, backed either by an `image`-crate-decodable byte stream (JPG/PNG),
//! a raw binary dump (BIN), or the tiled raw store (TDB).

use crate::error::MediaError;
use crate::media::format::{Dimensions, Format, PixelType};
use crate::media::operation::{Operation, OperationOutcome};
use crate::media::remote::execute_remote_operation;
use crate::media::tiled_raw::TiledRaw;
use crate::media::udf;
use image::{DynamicImage, GenericImageView};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, Clone)]
enum ImageData {
    Encoded(DynamicImage),
    /// A raw binary dump carries no decodable structure; operations other
    /// than read/write fail the format boundary eagerly.
    Raw(Vec<u8>),
    Tiled(TiledRaw),
}

/// Parameters carried alongside a remote op so the event loop's remote
/// thread has everything it needs without re-deriving it from the queue.
#[derive(Debug, Clone)]
pub struct RemoteParams {
    pub url: String,
    pub options: Value,
}

/// A deferred image: dimensions, pixel type, format, an optional location
/// (on-disk path or remote object key), a pending-operation queue, a
/// completion counter, and an optional remote-op parameter bundle.
#[derive(Debug, Clone)]
pub struct Image {
    pub dimensions: Dimensions,
    pub pixel_type: PixelType,
    pub format: Format,
    pub location: Option<String>,
    pending: VecDeque<Operation>,
    completed: usize,
    pub remote_params: Option<RemoteParams>,
    /// Socket path for `UserOperation` steps; `None` means the batch never
    /// configured a UDF worker, so a `UserOperation` fails at execution.
    pub udf_socket: Option<PathBuf>,
    data: ImageData,
}

impl Image {
    pub fn decode(format: Format, bytes: &[u8]) -> Result<Self, MediaError> {
        let data = match format {
            Format::Tdb => return Err(MediaError::Codec("TDB images must be constructed via from_tiled".into())),
            Format::Bin => ImageData::Raw(bytes.to_vec()),
            Format::Jpg | Format::Png => {
                let img = image::load_from_memory(bytes).map_err(|e| MediaError::Codec(e.to_string()))?;
                ImageData::Encoded(img)
            }
        };
        let dimensions = match &data {
            ImageData::Encoded(img) => Dimensions::new(img.height(), img.width()),
            ImageData::Raw(_) => Dimensions::new(0, 0),
            ImageData::Tiled(_) => unreachable!(),
        };
        let pixel_type = match &data {
            ImageData::Encoded(img) => {
                if img.color().has_color() {
                    PixelType::rgb8()
                } else {
                    PixelType::gray8()
                }
            }
            _ => PixelType::rgb8(),
        };
        Ok(Image {
            dimensions,
            pixel_type,
            format,
            location: None,
            pending: VecDeque::new(),
            completed: 0,
            remote_params: None,
            udf_socket: None,
            data,
        })
    }

    pub fn from_tiled(tiled: TiledRaw) -> Self {
        let dimensions = tiled.dimensions;
        let pixel_type = PixelType { element: crate::media::format::ElementType::F32, channels: tiled.channels };
        Image {
            dimensions,
            pixel_type,
            format: Format::Tdb,
            location: None,
            pending: VecDeque::new(),
            completed: 0,
            remote_params: None,
            udf_socket: None,
            data: ImageData::Tiled(tiled),
        }
    }

    pub fn enqueue(&mut self, op: Operation) -> Result<(), MediaError> {
        op.precondition(self.format)?;
        self.pending.push_back(op);
        Ok(())
    }

    pub fn with_udf_socket(mut self, socket: PathBuf) -> Self {
        self.udf_socket = Some(socket);
        self
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    /// A shallow-copy-equivalent snapshot for remote-op rollback. Pixel data
    /// here is plain owned buffers rather than an `Arc`, so this is a real
    /// clone; the point (cheap rollback without re-decoding) still holds
    /// since the clone only happens once per remote hop, not per local step.
    pub fn snapshot(&self) -> Image {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: Image) {
        *self = snapshot;
    }

    /// Advances one pending operation. Local operations (resize/crop/
    /// threshold/flip/rotate/read/write) run to completion and return
    /// `LocalDone`; a remote variant is left at the front of the queue and
    /// reported as `HandedToRemote` so the event loop can move the object to
    /// its remote queue without losing the operation.
    pub fn execute_operation(&mut self) -> Result<OperationOutcome, MediaError> {
        let op = match self.pending.front() {
            Some(op) => op.clone(),
            None => return Ok(OperationOutcome::LocalDone),
        };

        if op.is_remote() {
            if let Operation::SyncRemoteOperation { url, options } | Operation::RemoteOperation { url, options } = &op
            {
                self.remote_params = Some(RemoteParams { url: url.clone(), options: options.clone() });
            }
            return Ok(OperationOutcome::HandedToRemote);
        }

        if let Operation::UserOperation { options } = &op {
            self.run_user_operation(options)?;
            self.pending.pop_front();
            self.completed += 1;
            return Ok(OperationOutcome::LocalDone);
        }

        self.apply_local(&op)?;
        self.pending.pop_front();
        self.completed += 1;
        Ok(OperationOutcome::LocalDone)
    }

    /// Runs a `UserOperation` synchronously on the calling (local) thread —
    /// unlike the HTTP remote variants, this never hops to the event loop's
    /// remote queue.
    fn run_user_operation(&mut self, options: &Value) -> Result<(), MediaError> {
        let socket_path = self
            .udf_socket
            .as_ref()
            .ok_or_else(|| MediaError::Codec("UserOperation requires a UDF socket to be configured".into()))?;
        let current_bytes = self.encode(self.format)?;
        let response = udf::run_user_operation(socket_path, &current_bytes, options)?;
        match self.format {
            Format::Jpg | Format::Png => {
                let img = image::load_from_memory(&response).map_err(|e| MediaError::Codec(e.to_string()))?;
                self.dimensions = Dimensions::new(img.height(), img.width());
                self.data = ImageData::Encoded(img);
            }
            Format::Bin => self.data = ImageData::Raw(response),
            Format::Tdb => return Err(MediaError::TiledStore("UDF operations unsupported on tiled raw".into())),
        }
        Ok(())
    }

    /// Called by the event loop's remote thread once the HTTP round trip
    /// completes, replacing the working bytes and dropping the op off the
    /// queue so local processing can resume.
    pub fn complete_remote(&mut self, response_bytes: Vec<u8>) -> Result<(), MediaError> {
        match self.format {
            Format::Jpg | Format::Png => {
                let img = image::load_from_memory(&response_bytes).map_err(|e| MediaError::Codec(e.to_string()))?;
                self.dimensions = Dimensions::new(img.height(), img.width());
                self.data = ImageData::Encoded(img);
            }
            Format::Bin => self.data = ImageData::Raw(response_bytes),
            Format::Tdb => return Err(MediaError::TiledStore("remote operations unsupported on tiled raw".into())),
        }
        self.pending.pop_front();
        self.completed += 1;
        self.remote_params = None;
        Ok(())
    }

    fn apply_local(&mut self, op: &Operation) -> Result<(), MediaError> {
        match &mut self.data {
            ImageData::Encoded(img) => Self::apply_encoded(img, op, &mut self.dimensions),
            ImageData::Raw(_) => match op {
                Operation::Read | Operation::Write => Ok(()),
                other => Err(MediaError::NotImplemented { op: other.op_name(), format: "bin" }),
            },
            ImageData::Tiled(tiled) => {
                let updated = Self::apply_tiled(tiled, op)?;
                self.dimensions = updated.dimensions;
                *tiled = updated;
                Ok(())
            }
        }
    }

    fn apply_encoded(img: &mut DynamicImage, op: &Operation, dims: &mut Dimensions) -> Result<(), MediaError> {
        match op {
            Operation::Read | Operation::Write => {}
            Operation::Resize { height, width } => {
                *img = img.resize_exact(*width, *height, image::imageops::FilterType::Triangle);
                *dims = Dimensions::new(*height, *width);
            }
            Operation::Crop { x, y, width, height } => {
                *img = img.crop_imm(*x, *y, *width, *height);
                *dims = Dimensions::new(*height, *width);
            }
            Operation::Threshold { value } => {
                let threshold = (*value).clamp(0.0, 255.0) as u8;
                let mut buf = img.to_rgba8();
                for pixel in buf.pixels_mut() {
                    for channel in pixel.0.iter_mut().take(3) {
                        if *channel <= threshold {
                            *channel = 0;
                        }
                    }
                }
                *img = DynamicImage::ImageRgba8(buf);
            }
            Operation::Flip { code } => {
                *img = match code {
                    0 => img.flipv(),
                    c if *c > 0 => img.fliph(),
                    _ => img.fliph().flipv(),
                };
            }
            Operation::Rotate { angle, .. } => {
                let normalized = ((*angle % 360.0) + 360.0) % 360.0;
                *img = if normalized == 90.0 {
                    img.rotate90()
                } else if normalized == 180.0 {
                    img.rotate180()
                } else if normalized == 270.0 {
                    img.rotate270()
                } else if normalized == 0.0 {
                    img.clone()
                } else {
                    return Err(MediaError::NotImplemented { op: "rotate", format: "arbitrary-angle" });
                };
                *dims = Dimensions::new(img.height(), img.width());
            }
            Operation::SyncRemoteOperation { .. } | Operation::RemoteOperation { .. } | Operation::UserOperation { .. } => {
                return Err(MediaError::Codec(
                    "remote/UDF ops are intercepted in execute_operation and never reach apply_local".into(),
                ));
            }
        }
        Ok(())
    }

    fn apply_tiled(tiled: &TiledRaw, op: &Operation) -> Result<TiledRaw, MediaError> {
        match op {
            Operation::Read | Operation::Write => Ok(tiled.clone()),
            Operation::Resize { height, width } => tiled.resize(Dimensions::new(*height, *width)),
            Operation::Threshold { value } => Ok(tiled.threshold(*value)),
            Operation::Flip { code } => tiled.flip(*code),
            Operation::Rotate { angle, keep_size } => tiled.rotate(*angle, *keep_size),
            Operation::Crop { .. } => Err(MediaError::NotImplemented { op: "crop", format: "tdb" }),
            _ => Err(MediaError::Codec("remote/UDF ops are not valid on tiled raw".into())),
        }
    }

    /// Runs the blocking remote round trip for the op currently parked at
    /// the front of the queue (see `execute_operation`'s `HandedToRemote`
    /// branch) and folds the response back in.
    pub fn run_remote(&mut self, client: &reqwest::blocking::Client, id: &str) -> Result<(), MediaError> {
        let params = self.remote_params.clone().ok_or_else(|| {
            MediaError::Codec("run_remote called with no pending remote operation".into())
        })?;
        let current_bytes = self.encode(self.format)?;
        let response = execute_remote_operation(client, &params.url, id, &current_bytes, &params.options)?;
        self.complete_remote(response)
    }

    /// Terminal request: encodes the current pixel data in the requested
    /// output format. Encoding a previously-tiled image defaults to PNG.
    pub fn encode(&self, format: Format) -> Result<Vec<u8>, MediaError> {
        match &self.data {
            ImageData::Raw(bytes) => Ok(bytes.clone()),
            ImageData::Encoded(img) => {
                let mut out = Vec::new();
                let codec_format = match format {
                    Format::Jpg => image::ImageFormat::Jpeg,
                    Format::Png | Format::Tdb => image::ImageFormat::Png,
                    Format::Bin => return Ok(img.to_rgba8().into_raw()),
                };
                img.write_to(&mut std::io::Cursor::new(&mut out), codec_format)
                    .map_err(|e| MediaError::Codec(e.to_string()))?;
                Ok(out)
            }
            ImageData::Tiled(tiled) => {
                let buf: image::RgbImage = image::ImageBuffer::from_fn(tiled.dimensions.width, tiled.dimensions.height, |x, y| {
                    let idx = (y as usize * tiled.dimensions.width as usize + x as usize) * tiled.channels as usize;
                    let r = tiled.samples.get(idx).copied().unwrap_or(0.0).clamp(0.0, 255.0) as u8;
                    let g = tiled.samples.get(idx + 1).copied().unwrap_or(r as f32).clamp(0.0, 255.0) as u8;
                    let b = tiled.samples.get(idx + 2).copied().unwrap_or(g as f32).clamp(0.0, 255.0) as u8;
                    image::Rgb([r, g, b])
                });
                let mut out = Vec::new();
                DynamicImage::ImageRgb8(buf)
                    .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
                    .map_err(|e| MediaError::Codec(e.to_string()))?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let buf = image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(buf)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn crop_then_encode_yields_requested_dimensions() {
        let mut image = Image::decode(Format::Png, &png_bytes(300, 300)).unwrap();
        image.enqueue(Operation::Crop { x: 0, y: 0, width: 150, height: 150 }).unwrap();
        while image.pending_count() > 0 {
            image.execute_operation().unwrap();
        }
        assert_eq!(image.dimensions, Dimensions::new(150, 150));
        let encoded = image.encode(Format::Png).unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (150, 150));
    }

    #[test]
    fn resize_then_encode_as_png() {
        let mut image = Image::decode(Format::Jpg, &{
            let mut out = Vec::new();
            DynamicImage::ImageRgb8(image::RgbImage::from_pixel(300, 300, image::Rgb([1, 2, 3])))
                .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
                .unwrap();
            out
        })
        .unwrap();
        image.enqueue(Operation::Resize { height: 100, width: 100 }).unwrap();
        while image.pending_count() > 0 {
            image.execute_operation().unwrap();
        }
        let encoded = image.encode(Format::Png).unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 100));
    }

    #[test]
    fn flip_on_tiled_image_is_rejected_at_enqueue() {
        let tiled = TiledRaw::new(Dimensions::new(2, 2), 1, vec![0.0, 1.0, 2.0, 3.0]);
        let mut image = Image::from_tiled(tiled);
        let result = image.enqueue(Operation::Flip { code: 0 });
        assert!(matches!(result, Err(MediaError::NotImplemented { .. })));
    }

    #[test]
    fn remote_operation_is_reported_as_handed_off() {
        let mut image = Image::decode(Format::Png, &png_bytes(10, 10)).unwrap();
        image
            .enqueue(Operation::RemoteOperation { url: "http://example.invalid/op".into(), options: Value::Null })
            .unwrap();
        let outcome = image.execute_operation().unwrap();
        assert_eq!(outcome, OperationOutcome::HandedToRemote);
        assert!(image.remote_params.is_some());
    }

    #[test]
    fn user_operation_without_a_configured_socket_is_an_error() {
        let mut image = Image::decode(Format::Png, &png_bytes(10, 10)).unwrap();
        image.enqueue(Operation::UserOperation { options: Value::Null }).unwrap();
        assert!(image.execute_operation().is_err());
    }

    #[test]
    fn user_operation_runs_locally_against_a_udf_socket() {
        use std::io::{Read as _, Write as _};
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("udf.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let echoed = png_bytes(20, 20);
        let server_bytes = echoed.clone();
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

            stream.write_all(&(server_bytes.len() as u32).to_be_bytes()).unwrap();
            stream.write_all(&server_bytes).unwrap();
        });

        let mut image = Image::decode(Format::Png, &png_bytes(10, 10)).unwrap().with_udf_socket(socket_path);
        image.enqueue(Operation::UserOperation { options: Value::Null }).unwrap();
        let outcome = image.execute_operation().unwrap();
        assert_eq!(outcome, OperationOutcome::LocalDone);
        assert_eq!(image.dimensions, Dimensions::new(20, 20));

        server.join().unwrap();
    }
}
