//! Deferred image/video pipeline: format and pixel-type boundaries, the
//! operation DAG shared by both entity kinds, the tiled raw backend, the
//! remote HTTP and local UDF execution stages, and the dual-queue event
//! loop that drives a batch of objects through them.

pub mod event_loop;
pub mod format;
pub mod image;
pub mod operation;
pub mod remote;
pub mod tiled_raw;
pub mod udf;
pub mod video;

pub use event_loop::{BatchResult, EventLoop, MediaObject};
pub use format::{Dimensions, ElementType, Format, PixelType};
pub use image::Image;
pub use operation::{Operation, OperationOutcome};
pub use tiled_raw::TiledRaw;
pub use video::{Video, VideoOperation, Window};
