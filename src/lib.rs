//! Dominant color palettes for uploaded images.
//!
//! An image is decoded to RGB, optionally run through light preprocessing
//! ([`preprocess`]), then its pixel colors are clustered with k-means and each
//! cluster is summarized ([`extract`]). [`analyze`] wires the stages together
//! and shapes the result as one of the two response variants.

use std::str::FromStr;

use image::{GenericImageView, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod error;
pub mod extract;
pub mod preprocess;

#[cfg(feature = "server")]
pub mod config;
#[cfg(feature = "server")]
pub mod server;

pub use error::{PaletteError, Result};
pub use extract::{Cluster, ClusterSettings, ColorSamples, ColorSpace, extract_clusters, extract_palette};
pub use preprocess::{Adjustments, AutoEnhance, Preprocessing};

/// Which of the two response shapes to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Color, share and average location per cluster.
    #[default]
    Clusters,
    /// Bare list of hex colors.
    Palette,
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clusters" => Ok(Self::Clusters),
            "palette" => Ok(Self::Palette),
            other => Err(format!("unknown format `{other}`, expected `clusters` or `palette`")),
        }
    }
}

/// Everything a caller can ask for besides the image itself.
#[derive(Clone, Debug, PartialEq)]
pub struct PaletteRequest {
    /// Unvalidated; checked against the decoded pixel count.
    pub n_colors: i64,
    pub preprocessing: Preprocessing,
    pub format: ResponseFormat,
}

impl Default for PaletteRequest {
    fn default() -> Self {
        Self {
            n_colors: 5,
            preprocessing: Preprocessing::default(),
            format: ResponseFormat::default(),
        }
    }
}

/// One cluster as it goes over the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub hex: String,
    pub percentage: f64,
    pub avg_x: f64,
    pub avg_y: f64,
}

impl From<&Cluster> for ClusterSummary {
    fn from(cluster: &Cluster) -> Self {
        Self {
            hex: cluster.hex(),
            percentage: cluster.percentage,
            avg_x: cluster.avg_x,
            avg_y: cluster.avg_y,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaletteResponse {
    Clusters { clusters: Vec<ClusterSummary> },
    Palette { palette: Vec<String> },
}

/// Decode uploaded bytes into an RGB buffer, dropping any alpha channel.
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(PaletteError::EmptyImage);
    }
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(PaletteError::EmptyImage);
    }
    Ok(img.to_rgb8())
}

/// Decode, validate, preprocess and cluster one image.
///
/// `n_colors` is validated before any pixel-level work; `base` supplies every
/// clustering knob except the cluster count.
pub fn analyze(bytes: &[u8], request: &PaletteRequest, base: &ClusterSettings) -> Result<PaletteResponse> {
    let img = decode(bytes)?;
    let (w, h) = img.dimensions();
    let n_colors = extract::validate_color_count(request.n_colors, (w as usize) * (h as usize))?;

    let img = preprocess::apply(img, &request.preprocessing);
    let samples = ColorSamples::from_image(&img);
    let clusters = extract_clusters(&samples, &base.with_n_colors(n_colors))?;
    debug!(width = w, height = h, n_colors, clusters = clusters.len(), "palette extracted");

    Ok(match request.format {
        ResponseFormat::Clusters => PaletteResponse::Clusters {
            clusters: clusters.iter().map(ClusterSummary::from).collect(),
        },
        ResponseFormat::Palette => PaletteResponse::Palette {
            palette: clusters.iter().map(Cluster::hex).collect(),
        },
    })
}
