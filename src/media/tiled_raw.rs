//! Tiled raw backend: pixel data stored as a flat array over the (height,
//! width) domain, channels carried as an attribute rather than interleaved
//! into the byte layout the way encoded codecs do.
//!
//! Only resize and threshold are implemented here; flip and rotate are
//! deliberately absent, per the format/codec boundary's `NotImplemented`
//! contract for this backend.

use crate::error::MediaError;
use crate::media::format::Dimensions;

#[derive(Debug, Clone, PartialEq)]
pub struct TiledRaw {
    pub dimensions: Dimensions,
    pub channels: u8,
    /// Row-major, channel-interleaved `f32` samples; `f32` regardless of the
    /// original element type keeps resize math exact without per-type code.
    pub samples: Vec<f32>,
}

impl TiledRaw {
    pub fn new(dimensions: Dimensions, channels: u8, samples: Vec<f32>) -> Self {
        debug_assert_eq!(samples.len(), dimensions.height as usize * dimensions.width as usize * channels as usize);
        TiledRaw { dimensions, channels, samples }
    }

    fn at(&self, y: u32, x: u32, c: u8) -> f32 {
        let idx = (y as usize * self.dimensions.width as usize + x as usize) * self.channels as usize + c as usize;
        self.samples[idx]
    }

    /// Bilinear resize directly on the tile grid.
    pub fn resize(&self, target: Dimensions) -> Result<TiledRaw, MediaError> {
        if target.height == 0 || target.width == 0 {
            return Err(MediaError::TiledStore("resize target dimensions must be non-zero".into()));
        }
        let (sh, sw) = (self.dimensions.height as f32, self.dimensions.width as f32);
        let (th, tw) = (target.height as f32, target.width as f32);
        let mut out = Vec::with_capacity(target.height as usize * target.width as usize * self.channels as usize);

        for ty in 0..target.height {
            let fy = if target.height == 1 { 0.0 } else { ty as f32 * (sh - 1.0).max(0.0) / (th - 1.0).max(1.0) };
            let y0 = fy.floor() as u32;
            let y1 = (y0 + 1).min(self.dimensions.height - 1);
            let wy = fy - y0 as f32;

            for tx in 0..target.width {
                let fx = if target.width == 1 { 0.0 } else { tx as f32 * (sw - 1.0).max(0.0) / (tw - 1.0).max(1.0) };
                let x0 = fx.floor() as u32;
                let x1 = (x0 + 1).min(self.dimensions.width - 1);
                let wx = fx - x0 as f32;

                for c in 0..self.channels {
                    let v00 = self.at(y0, x0, c);
                    let v01 = self.at(y0, x1, c);
                    let v10 = self.at(y1, x0, c);
                    let v11 = self.at(y1, x1, c);
                    let top = v00 * (1.0 - wx) + v01 * wx;
                    let bottom = v10 * (1.0 - wx) + v11 * wx;
                    out.push(top * (1.0 - wy) + bottom * wy);
                }
            }
        }
        Ok(TiledRaw::new(target, self.channels, out))
    }

    /// Pixels at or below `value` become 0, elementwise, across all channels.
    pub fn threshold(&self, value: f64) -> TiledRaw {
        let value = value as f32;
        let samples = self.samples.iter().map(|&s| if s <= value { 0.0 } else { s }).collect();
        TiledRaw::new(self.dimensions, self.channels, samples)
    }

    pub fn flip(&self, _code: i32) -> Result<TiledRaw, MediaError> {
        Err(MediaError::NotImplemented { op: "flip", format: "tdb" })
    }

    pub fn rotate(&self, _angle: f64, _keep_size: bool) -> Result<TiledRaw, MediaError> {
        Err(MediaError::NotImplemented { op: "rotate", format: "tdb" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_to_same_dimensions_is_identity() {
        let raw = TiledRaw::new(Dimensions::new(2, 2), 1, vec![0.0, 1.0, 2.0, 3.0]);
        let resized = raw.resize(Dimensions::new(2, 2)).unwrap();
        assert_eq!(resized.samples, raw.samples);
    }

    #[test]
    fn resize_upsamples_with_interpolated_values() {
        let raw = TiledRaw::new(Dimensions::new(2, 2), 1, vec![0.0, 10.0, 0.0, 10.0]);
        let resized = raw.resize(Dimensions::new(2, 3)).unwrap();
        assert_eq!(resized.dimensions, Dimensions::new(2, 3));
        assert_eq!(resized.at(0, 1, 0), 5.0);
    }

    #[test]
    fn threshold_zeroes_low_values() {
        let raw = TiledRaw::new(Dimensions::new(1, 3), 1, vec![1.0, 5.0, 10.0]);
        let out = raw.threshold(5.0);
        assert_eq!(out.samples, vec![0.0, 0.0, 10.0]);
    }

    #[test]
    fn flip_and_rotate_are_not_implemented() {
        let raw = TiledRaw::new(Dimensions::new(1, 1), 1, vec![1.0]);
        assert!(matches!(raw.flip(0), Err(MediaError::NotImplemented { .. })));
        assert!(matches!(raw.rotate(90.0, true), Err(MediaError::NotImplemented { .. })));
    }
}
