//! Pixel-statistics comparison between two normalized grids.

use crate::types::{MatchThreshold, NormalizedGrid, SimilarityScore};
use thiserror::Error;

/// The two grids cannot be scored against each other.
///
/// Raised for differing dimensions and for empty grids. Callers treat it as
/// a non-match.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("grid dimensions differ: {}x{} vs {}x{}", left.0, left.1, right.0, right.1)]
pub struct DimensionMismatch {
    pub left: (u32, u32),
    pub right: (u32, u32),
}

/// Strategy for scoring a probe grid against a reference grid.
pub trait Comparator {
    fn score(
        &self,
        reference: &NormalizedGrid,
        probe: &NormalizedGrid,
    ) -> Result<SimilarityScore, DimensionMismatch>;
}

/// Mean squared error over the R, G and B samples of every pixel.
///
/// Accumulates in integers, so the result is exact and symmetric.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseComparator;

impl Comparator for MseComparator {
    fn score(
        &self,
        reference: &NormalizedGrid,
        probe: &NormalizedGrid,
    ) -> Result<SimilarityScore, DimensionMismatch> {
        let mismatch = DimensionMismatch {
            left: reference.dimensions(),
            right: probe.dimensions(),
        };
        if reference.dimensions() != probe.dimensions() || reference.pixel_count() == 0 {
            return Err(mismatch);
        }

        let sum: u64 = reference
            .samples()
            .iter()
            .zip(probe.samples())
            .map(|(&a, &b)| {
                let d = u64::from(a.abs_diff(b));
                d * d
            })
            .sum();

        let samples = (reference.pixel_count() * 3) as f64;
        Ok(SimilarityScore::from_raw(sum as f64 / samples))
    }
}

/// Score `reference` against `probe` with [`MseComparator`].
pub fn compare(
    reference: &NormalizedGrid,
    probe: &NormalizedGrid,
) -> Result<SimilarityScore, DimensionMismatch> {
    MseComparator.score(reference, probe)
}

/// Strictly below the threshold is a match.
pub fn decide(score: SimilarityScore, threshold: MatchThreshold) -> bool {
    score.value() < threshold.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_MATCH_THRESHOLD, MAX_SCORE};
    use image::{Rgb, RgbImage};

    fn grid(w: u32, h: u32, rgb: [u8; 3]) -> NormalizedGrid {
        NormalizedGrid::from_rgb(RgbImage::from_pixel(w, h, Rgb(rgb)))
    }

    fn gradient(w: u32, h: u32, seed: u8) -> NormalizedGrid {
        let mut img = RgbImage::new(w, h);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let v = (x as u8)
                .wrapping_mul(7)
                .wrapping_add((y as u8).wrapping_mul(13))
                .wrapping_add(seed);
            *px = Rgb([v, v.wrapping_add(40), 255 - v]);
        }
        NormalizedGrid::from_rgb(img)
    }

    #[test]
    fn test_identical_grids_score_zero() {
        let a = gradient(32, 32, 3);
        assert_eq!(compare(&a, &a.clone()).unwrap().value(), 0.0);
    }

    #[test]
    fn test_black_vs_white_is_max() {
        let black = grid(32, 32, [0, 0, 0]);
        let white = grid(32, 32, [255, 255, 255]);
        let score = compare(&black, &white).unwrap();
        assert_eq!(score.value(), MAX_SCORE);
        assert!(!decide(score, MatchThreshold::default()));
    }

    #[test]
    fn test_single_channel_difference() {
        // One channel off by 30 on every pixel: 900 / 3 = 300.
        let a = grid(4, 4, [100, 100, 100]);
        let b = grid(4, 4, [130, 100, 100]);
        assert!((compare(&a, &b).unwrap().value() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_is_symmetric() {
        let a = gradient(32, 32, 0);
        let b = gradient(32, 32, 91);
        assert_eq!(compare(&a, &b).unwrap(), compare(&b, &a).unwrap());
    }

    #[test]
    fn test_dimension_mismatch_is_reported() {
        let a = grid(32, 32, [0, 0, 0]);
        let b = grid(8, 8, [0, 0, 0]);
        let err = compare(&a, &b).unwrap_err();
        assert_eq!(err.left, (32, 32));
        assert_eq!(err.right, (8, 8));
    }

    #[test]
    fn test_empty_grid_is_not_scored() {
        let a = grid(0, 0, [0, 0, 0]);
        assert!(compare(&a, &a.clone()).is_err());
    }

    #[test]
    fn test_decide_is_strict() {
        let threshold = MatchThreshold::default();
        assert!(decide(SimilarityScore::from_raw(DEFAULT_MATCH_THRESHOLD - 0.01), threshold));
        assert!(!decide(SimilarityScore::from_raw(DEFAULT_MATCH_THRESHOLD), threshold));
        assert!(decide(SimilarityScore::from_raw(0.0), threshold));
    }
}
