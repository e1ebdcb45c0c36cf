//! Image normalization — decode arbitrary encoded bytes and resample to a
//! fixed square RGB grid.
//!
//! Both sides of a comparison must go through the same [`Normalizer`]
//! settings, otherwise their grids are not comparable.

use crate::types::{GridSize, NormalizedGrid};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("image buffer is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Resampling filter used by the resize step. All variants are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl FromStr for ResizeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "triangle" | "bilinear" => Ok(Self::Triangle),
            "catmull_rom" | "catmullrom" | "bicubic" => Ok(Self::CatmullRom),
            "gaussian" => Ok(Self::Gaussian),
            "lanczos3" | "lanczos" => Ok(Self::Lanczos3),
            other => Err(format!("unknown resize filter: {other}")),
        }
    }
}

impl fmt::Display for ResizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nearest => "nearest",
            Self::Triangle => "triangle",
            Self::CatmullRom => "catmull_rom",
            Self::Gaussian => "gaussian",
            Self::Lanczos3 => "lanczos3",
        };
        f.write_str(s)
    }
}

/// Decodes and resamples images to a fixed grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Normalizer {
    pub size: GridSize,
    pub filter: ResizeFilter,
}

impl Normalizer {
    pub fn new(size: GridSize) -> Self {
        Self {
            size,
            filter: ResizeFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Decode `bytes`, resize to exactly `size`×`size`, and keep the RGB channels.
    ///
    /// Undecodable input is an error, never a blank grid.
    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedGrid, NormalizeError> {
        if bytes.is_empty() {
            return Err(NormalizeError::Empty);
        }

        let decoded = image::load_from_memory(bytes)?;
        let edge = self.size.get();
        let resized = decoded.resize_exact(edge, edge, self.filter.into());

        tracing::trace!(
            source_width = decoded.width(),
            source_height = decoded.height(),
            size = edge,
            filter = %self.filter,
            "normalized image"
        );

        Ok(NormalizedGrid::from_rgb(resized.to_rgb8()))
    }
}

/// Normalize with the default filter.
pub fn normalize(bytes: &[u8], size: GridSize) -> Result<NormalizedGrid, NormalizeError> {
    Normalizer::new(size).normalize(bytes)
}
