//! likeness-core — Face image similarity engine.
//!
//! Decodes two photographs, resamples each to a small fixed RGB grid, and
//! scores them by mean squared per-channel difference. A score below the
//! configured threshold counts as the same subject.

pub mod comparator;
pub mod normalizer;
pub mod types;
pub mod verdict;

pub use comparator::{compare, decide, Comparator, DimensionMismatch, MseComparator};
pub use normalizer::{normalize, NormalizeError, Normalizer, ResizeFilter};
pub use types::{
    Denial, GridSize, InvalidParameter, MatchThreshold, NormalizedGrid, SimilarityScore, Verdict,
    DEFAULT_GRID_SIZE, DEFAULT_MATCH_THRESHOLD, MAX_SCORE,
};
pub use verdict::{compare_faces, evaluate, evaluate_against, CompareOptions};
