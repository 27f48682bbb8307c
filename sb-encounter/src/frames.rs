//! Visual observation provider.
//!
//! The render side hands over already-captured RGB24 frames; this module
//! crops, area-downsamples and converts them to a luminance buffer in `[0, 1]`
//! and keeps the latest one cached. Encounters only ever read the cache.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;
use sb_core::VisualSpec;
use thiserror::Error;

/// Rec. 709 luma weights.
pub const LUM_R: f32 = 0.2126;
pub const LUM_G: f32 = 0.7152;
pub const LUM_B: f32 = 0.0722;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("frame buffer is {got} bytes, expected {expected} for {width}x{height} RGB24")]
    BadBuffer {
        got: usize,
        expected: usize,
        width: usize,
        height: usize,
    },
    #[error("crop leaves an empty region from a {width}x{height} frame")]
    EmptyCrop { width: usize, height: usize },
    #[error("target size must be non-zero")]
    EmptyTarget,
}

/// Read side of a visual provider.
pub trait FrameSource: Send + Sync {
    /// `(width, height)` of every cached frame.
    fn dimensions(&self) -> (usize, usize);
    /// Latest processed frame (row-major, `width * height` values), if any.
    fn cached_frame(&self) -> Option<Arc<[f32]>>;
    fn clear_cache(&self);
}

#[derive(Debug)]
pub struct GrayscaleCapture {
    spec: VisualSpec,
    cache: Mutex<Option<Arc<[f32]>>>,
}

impl GrayscaleCapture {
    pub fn new(spec: VisualSpec) -> Self {
        Self {
            spec,
            cache: Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &VisualSpec {
        &self.spec
    }

    /// Process one RGB24 frame and replace the cached buffer with it.
    ///
    /// On error the previous cache is left untouched.
    pub fn capture_rgb(
        &self,
        rgb: &[u8],
        width: usize,
        height: usize,
    ) -> Result<Arc<[f32]>, CaptureError> {
        let gray: Arc<[f32]> = match grayscale_downsample(rgb, width, height, &self.spec) {
            Ok(v) => v.into(),
            Err(e) => {
                warn!("frame capture rejected: {e}");
                return Err(e);
            }
        };
        *self.lock() = Some(Arc::clone(&gray));
        Ok(gray)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<[f32]>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSource for GrayscaleCapture {
    fn dimensions(&self) -> (usize, usize) {
        (self.spec.width, self.spec.height)
    }

    fn cached_frame(&self) -> Option<Arc<[f32]>> {
        self.lock().clone()
    }

    fn clear_cache(&self) {
        *self.lock() = None;
    }
}

/// Crop, box-filter downsample and luminance-convert an RGB24 frame.
///
/// `rgb` is row-major with row 0 at the top; crop margins are in source
/// pixels. Output is `spec.width * spec.height` values in `[0, 1]`.
pub fn grayscale_downsample(
    rgb: &[u8],
    width: usize,
    height: usize,
    spec: &VisualSpec,
) -> Result<Vec<f32>, CaptureError> {
    let expected = width * height * 3;
    if rgb.len() != expected {
        return Err(CaptureError::BadBuffer {
            got: rgb.len(),
            expected,
            width,
            height,
        });
    }
    if spec.width == 0 || spec.height == 0 {
        return Err(CaptureError::EmptyTarget);
    }
    let cw = width.saturating_sub(spec.crop_left + spec.crop_right);
    let ch = height.saturating_sub(spec.crop_top + spec.crop_bottom);
    if cw == 0 || ch == 0 {
        return Err(CaptureError::EmptyCrop { width, height });
    }

    let mut out = Vec::with_capacity(spec.width * spec.height);
    for ty in 0..spec.height {
        let (y0, y1) = source_span(ty, spec.height, ch);
        for tx in 0..spec.width {
            let (x0, x1) = source_span(tx, spec.width, cw);
            let mut acc = 0.0f32;
            for sy in y0..y1 {
                let row = (spec.crop_top + sy) * width;
                for sx in x0..x1 {
                    let p = (row + spec.crop_left + sx) * 3;
                    acc += luminance(rgb[p], rgb[p + 1], rgb[p + 2]);
                }
            }
            let n = ((y1 - y0) * (x1 - x0)) as f32;
            out.push((acc / n).clamp(0.0, 1.0));
        }
    }
    Ok(out)
}

/// Source pixel range `[start, end)` covered by target index `t`.
/// Upsampling repeats source pixels; the range is never empty.
fn source_span(t: usize, target: usize, source: usize) -> (usize, usize) {
    let start = (t * source / target).min(source - 1);
    let end = ((t + 1) * source / target).clamp(start + 1, source);
    (start, end)
}

fn luminance(r: u8, g: u8, b: u8) -> f32 {
    (f32::from(r) * LUM_R + f32::from(g) * LUM_G + f32::from(b) * LUM_B) / 255.0
}
