//! Fail-closed orchestration: bytes in, verdict out.
//!
//! Nothing in here returns an error. Decode failures, size mismatches and
//! panics inside the pipeline all collapse into a denied [`Verdict`], so a
//! processing fault can never read as a successful verification.

use crate::comparator::compare;
use crate::normalizer::{Normalizer, ResizeFilter};
use crate::types::{Denial, GridSize, MatchThreshold, NormalizedGrid, Verdict};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};

/// Settings shared by both sides of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompareOptions {
    pub size: GridSize,
    pub filter: ResizeFilter,
    pub threshold: MatchThreshold,
}

impl CompareOptions {
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.size).with_filter(self.filter)
    }
}

/// Normalize both images, score them, and apply the threshold.
pub fn evaluate(reference: &[u8], probe: &[u8], opts: &CompareOptions) -> Verdict {
    guarded(|| {
        let reference = match opts.normalizer().normalize(reference) {
            Ok(grid) => grid,
            Err(e) => {
                tracing::warn!(error = %e, "reference image failed to normalize; denying");
                return Verdict::denied(Denial::Decode);
            }
        };
        score_probe(&reference, probe, opts)
    })
}

/// Like [`evaluate`], but against a reference grid that is already normalized.
pub fn evaluate_against(
    reference: &NormalizedGrid,
    probe: &[u8],
    opts: &CompareOptions,
) -> Verdict {
    guarded(|| score_probe(reference, probe, opts))
}

/// `true` only when the two images score below the threshold.
pub fn compare_faces(reference: &[u8], probe: &[u8], opts: &CompareOptions) -> bool {
    evaluate(reference, probe, opts).matched
}

fn score_probe(reference: &NormalizedGrid, probe: &[u8], opts: &CompareOptions) -> Verdict {
    let probe = match opts.normalizer().normalize(probe) {
        Ok(grid) => grid,
        Err(e) => {
            tracing::warn!(error = %e, "probe image failed to normalize; denying");
            return Verdict::denied(Denial::Decode);
        }
    };

    match compare(reference, &probe) {
        Ok(score) => {
            let verdict = Verdict::scored(score, opts.threshold);
            tracing::debug!(
                score = score.value(),
                threshold = opts.threshold.get(),
                matched = verdict.matched,
                "comparison scored"
            );
            verdict
        }
        Err(e) => {
            tracing::warn!(error = %e, "grid size mismatch; denying");
            Verdict::denied(Denial::DimensionMismatch)
        }
    }
}

fn guarded(f: impl FnOnce() -> Verdict) -> Verdict {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!("panic during comparison; denying");
        Verdict::denied(Denial::Fault)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{encode_jpeg, encode_png, solid};
    use crate::types::MAX_SCORE;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_identical_bytes_match_with_zero_score() {
        let bytes = encode_jpeg(&solid(100, 100, [128, 128, 128]));
        let v = evaluate(&bytes, &bytes.clone(), &CompareOptions::default());
        assert!(v.matched);
        assert_eq!(v.score.unwrap().value(), 0.0);
        assert_eq!(v.denial, None);
    }

    #[test]
    fn test_black_vs_white_denied_near_max() {
        let black = encode_jpeg(&solid(100, 100, [0, 0, 0]));
        let white = encode_jpeg(&solid(100, 100, [255, 255, 255]));
        let v = evaluate(&black, &white, &CompareOptions::default());
        assert!(!v.matched);
        assert!(v.score.unwrap().value() > MAX_SCORE * 0.95);
        assert_eq!(v.denial, Some(Denial::AboveThreshold));
    }

    #[test]
    fn test_slight_variation_matches() {
        let a = encode_png(&solid(120, 120, [120, 100, 90]));
        let b = encode_png(&solid(120, 120, [130, 105, 95]));
        assert!(compare_faces(&a, &b, &CompareOptions::default()));
    }

    #[test]
    fn test_reflexive_on_textured_image() {
        let mut img = RgbImage::new(64, 48);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x * 4) as u8, (y * 5) as u8, ((x ^ y) * 3) as u8]);
        }
        let bytes = encode_png(&img);
        assert!(compare_faces(&bytes, &bytes, &CompareOptions::default()));
    }

    #[test]
    fn test_corrupt_probe_is_denied() {
        let reference = encode_png(&solid(50, 50, [10, 10, 10]));
        let v = evaluate(&reference, b"\x89PNG garbage", &CompareOptions::default());
        assert!(!v.matched);
        assert_eq!(v.score, None);
        assert_eq!(v.denial, Some(Denial::Decode));
    }

    #[test]
    fn test_corrupt_reference_is_denied() {
        let probe = encode_png(&solid(50, 50, [10, 10, 10]));
        assert!(!compare_faces(&[], &probe, &CompareOptions::default()));
    }

    #[test]
    fn test_mismatched_reference_grid_is_denied() {
        let reference = NormalizedGrid::from_rgb(RgbImage::from_pixel(8, 8, Rgb([10, 10, 10])));
        let probe = encode_png(&solid(50, 50, [10, 10, 10]));
        let v = evaluate_against(&reference, &probe, &CompareOptions::default());
        assert!(!v.matched);
        assert_eq!(v.denial, Some(Denial::DimensionMismatch));
    }

    #[test]
    fn test_panic_is_denied() {
        let v = guarded(|| panic!("simulated fault"));
        assert!(!v.matched);
        assert_eq!(v.denial, Some(Denial::Fault));
    }

    #[test]
    fn test_threshold_is_respected() {
        let a = encode_png(&solid(32, 32, [100, 100, 100]));
        let b = encode_png(&solid(32, 32, [130, 100, 100]));
        // Score is exactly 300.
        let loose = CompareOptions {
            threshold: MatchThreshold::new(301.0).unwrap(),
            ..Default::default()
        };
        let tight = CompareOptions {
            threshold: MatchThreshold::new(300.0).unwrap(),
            ..Default::default()
        };
        assert!(compare_faces(&a, &b, &loose));
        assert!(!compare_faces(&a, &b, &tight));
    }
}
