use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Grid edge used when nothing else is configured.
pub const DEFAULT_GRID_SIZE: u32 = 32;
/// Largest accepted grid edge. Anything bigger only costs time.
pub const MAX_GRID_SIZE: u32 = 1024;
/// Empirically tuned for a 32x32 grid on 0–255 channels.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 1500.0;
/// Score of a fully black grid against a fully white one.
pub const MAX_SCORE: f64 = 255.0 * 255.0;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum InvalidParameter {
    #[error("grid size must be between 1 and {MAX_GRID_SIZE}, got {0}")]
    GridSize(u32),
    #[error("match threshold must be finite and positive, got {0}")]
    Threshold(f64),
}

/// Edge length of the square grid both images are resampled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct GridSize(u32);

impl GridSize {
    pub fn new(edge: u32) -> Result<Self, InvalidParameter> {
        if edge == 0 || edge > MAX_GRID_SIZE {
            return Err(InvalidParameter::GridSize(edge));
        }
        Ok(Self(edge))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn pixel_count(self) -> usize {
        (self.0 as usize) * (self.0 as usize)
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self(DEFAULT_GRID_SIZE)
    }
}

impl TryFrom<u32> for GridSize {
    type Error = InvalidParameter;

    fn try_from(edge: u32) -> Result<Self, Self::Error> {
        Self::new(edge)
    }
}

impl From<GridSize> for u32 {
    fn from(size: GridSize) -> u32 {
        size.0
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{0}x{0}", self.0)
    }
}

/// Score below which two grids count as the same subject.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct MatchThreshold(f64);

impl MatchThreshold {
    pub fn new(value: f64) -> Result<Self, InvalidParameter> {
        if !value.is_finite() || value <= 0.0 {
            return Err(InvalidParameter::Threshold(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for MatchThreshold {
    fn default() -> Self {
        Self(DEFAULT_MATCH_THRESHOLD)
    }
}

impl TryFrom<f64> for MatchThreshold {
    type Error = InvalidParameter;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MatchThreshold> for f64 {
    fn from(threshold: MatchThreshold) -> f64 {
        threshold.0
    }
}

/// Mean squared per-channel difference between two grids.
///
/// Lower is more similar; `0.0` means pixel-identical after normalization,
/// [`MAX_SCORE`] means every sample differs by the full channel range.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimilarityScore(f64);

impl SimilarityScore {
    pub(crate) fn from_raw(value: f64) -> Self {
        debug_assert!(value >= 0.0, "MSE cannot be negative");
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for SimilarityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Fixed-size RGB pixel grid produced by the normalizer.
///
/// Alpha never reaches this type: it is dropped when the grid is built.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGrid {
    image: RgbImage,
}

impl NormalizedGrid {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn pixel_count(&self) -> usize {
        (self.width() as usize) * (self.height() as usize)
    }

    /// Interleaved R, G, B samples in row-major order.
    pub fn samples(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }
}

/// Why a comparison did not grant a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    /// One of the images could not be decoded.
    Decode,
    /// The grids differed in size.
    DimensionMismatch,
    /// Score was at or above the threshold.
    AboveThreshold,
    /// Unexpected internal failure (caught panic).
    Fault,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Denial::Decode => "image could not be decoded",
            Denial::DimensionMismatch => "normalized grids differ in size",
            Denial::AboveThreshold => "score above threshold",
            Denial::Fault => "internal fault during comparison",
        };
        f.write_str(s)
    }
}

/// Outcome of a fail-closed comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub matched: bool,
    /// Present whenever both grids were scored.
    pub score: Option<SimilarityScore>,
    /// Present whenever `matched` is false.
    pub denial: Option<Denial>,
}

impl Verdict {
    pub(crate) fn scored(score: SimilarityScore, threshold: MatchThreshold) -> Self {
        let matched = crate::comparator::decide(score, threshold);
        Self {
            matched,
            score: Some(score),
            denial: (!matched).then_some(Denial::AboveThreshold),
        }
    }

    pub(crate) fn denied(denial: Denial) -> Self {
        Self {
            matched: false,
            score: None,
            denial: Some(denial),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size_bounds() {
        assert!(GridSize::new(0).is_err());
        assert!(GridSize::new(MAX_GRID_SIZE + 1).is_err());
        assert_eq!(GridSize::new(8).unwrap().get(), 8);
        assert_eq!(GridSize::default().get(), 32);
        assert_eq!(GridSize::default().pixel_count(), 1024);
    }

    #[test]
    fn test_threshold_rejects_non_positive() {
        assert!(MatchThreshold::new(0.0).is_err());
        assert!(MatchThreshold::new(-1.0).is_err());
        assert!(MatchThreshold::new(f64::NAN).is_err());
        assert!(MatchThreshold::new(f64::INFINITY).is_err());
        assert_eq!(MatchThreshold::default().get(), 1500.0);
    }

    #[test]
    fn test_grid_size_deserialize_validates() {
        let ok: GridSize = serde_json::from_str("16").unwrap();
        assert_eq!(ok.get(), 16);
        assert!(serde_json::from_str::<GridSize>("0").is_err());
    }

    #[test]
    fn test_grid_drops_nothing_but_alpha() {
        let img = RgbImage::from_pixel(2, 3, image::Rgb([1, 2, 3]));
        let grid = NormalizedGrid::from_rgb(img);
        assert_eq!(grid.dimensions(), (2, 3));
        assert_eq!(grid.pixel_count(), 6);
        assert_eq!(grid.samples().len(), 18);
        assert_eq!(grid.pixel(1, 2), [1, 2, 3]);
    }

    #[test]
    fn test_verdict_scored_above_threshold() {
        let v = Verdict::scored(SimilarityScore::from_raw(2000.0), MatchThreshold::default());
        assert!(!v.matched);
        assert_eq!(v.denial, Some(Denial::AboveThreshold));

        let v = Verdict::scored(SimilarityScore::from_raw(10.0), MatchThreshold::default());
        assert!(v.matched);
        assert_eq!(v.denial, None);
    }
}
