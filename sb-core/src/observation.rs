//! Observation layout and normalization helpers.
//!
//! An observation is a fixed-length `[f32]` with every field in `[0, 1]`:
//! the vector part first, then (hybrid only) a row-major grayscale image.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Vector,
    Hybrid,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Vector => "vector",
            ObservationKind::Hybrid => "hybrid",
        }
    }
}

/// Shape of the observations produced by one encounter. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationLayout {
    pub vector_len: usize,
    /// `(width, height)` of the visual part, hybrid encounters only.
    pub visual: Option<(usize, usize)>,
}

impl ObservationLayout {
    pub fn vector(vector_len: usize) -> Self {
        Self {
            vector_len,
            visual: None,
        }
    }

    pub fn hybrid(vector_len: usize, width: usize, height: usize) -> Self {
        Self {
            vector_len,
            visual: Some((width, height)),
        }
    }

    pub fn kind(&self) -> ObservationKind {
        match self.visual {
            Some(_) => ObservationKind::Hybrid,
            None => ObservationKind::Vector,
        }
    }

    pub fn visual_len(&self) -> usize {
        self.visual.map(|(w, h)| w * h).unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        self.vector_len + self.visual_len()
    }

    pub fn visual_width(&self) -> usize {
        self.visual.map(|(w, _)| w).unwrap_or(0)
    }

    pub fn visual_height(&self) -> usize {
        self.visual.map(|(_, h)| h).unwrap_or(0)
    }
}

/// Immutable observation. Cloning shares the underlying buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    values: Arc<[f32]>,
}

impl Observation {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<f32> {
        self.values.get(idx).copied()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values.to_vec()
    }
}

impl From<Vec<f32>> for Observation {
    fn from(v: Vec<f32>) -> Self {
        Self::new(v)
    }
}

/// Linear scale of `v` from `[min, max]` into `[0, 1]`, clamped.
pub fn scale_unit(v: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span <= 0.0 || !v.is_finite() {
        return 0.0;
    }
    ((v - min) / span).clamp(0.0, 1.0)
}

/// Scale a signed quantity from `[-max_abs, max_abs]` into `[0, 1]`, clamped.
pub fn scale_symmetric(v: f32, max_abs: f32) -> f32 {
    scale_unit(v, -max_abs, max_abs)
}

/// Inverse of [`scale_unit`] (no clamping).
pub fn unscale_unit(u: f32, min: f32, max: f32) -> f32 {
    u * (max - min) + min
}

pub fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_unit_clamps_and_maps_linearly() {
        assert_eq!(scale_unit(38.0, 38.0, 65.0), 0.0);
        assert_eq!(scale_unit(65.0, 38.0, 65.0), 1.0);
        assert_eq!(scale_unit(10.0, 38.0, 65.0), 0.0);
        assert_eq!(scale_unit(100.0, 38.0, 65.0), 1.0);
        assert!((scale_unit(51.5, 38.0, 65.0) - 0.5).abs() < 1e-6);
        assert_eq!(scale_unit(f32::NAN, 0.0, 1.0), 0.0);
    }

    #[test]
    fn symmetric_scale_centers_zero() {
        assert!((scale_symmetric(0.0, 30.0) - 0.5).abs() < 1e-6);
        assert_eq!(scale_symmetric(-45.0, 30.0), 0.0);
        assert!((unscale_unit(scale_unit(44.0, 38.0, 65.0), 38.0, 65.0) - 44.0).abs() < 1e-4);
    }

    #[test]
    fn hybrid_layout_lengths() {
        let l = ObservationLayout::hybrid(17, 84, 84);
        assert_eq!(l.kind(), ObservationKind::Hybrid);
        assert_eq!(l.total_len(), 17 + 84 * 84);
        assert_eq!(ObservationLayout::vector(17).total_len(), 17);
        assert_eq!(ObservationLayout::vector(17).visual_width(), 0);
    }
}
