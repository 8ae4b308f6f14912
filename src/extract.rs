use std::panic::{self, AssertUnwindSafe};

use image::RgbImage;
use kmeans_colors::{Calculate, Kmeans, get_kmeans};
use palette::{IntoColor, Lab, Srgb};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PaletteError, Result};

/// `kmeans_colors` reports cluster membership as `u8`.
pub const MAX_COLORS: usize = 256;

/// Location reported for a cluster that ended up with no members.
const EMPTY_CLUSTER_LOCATION: (f64, f64) = (0.5, 0.5);

/// Space in which color distances are measured while clustering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    /// Plain Euclidean distance over sRGB channels scaled to 0..=1.
    #[default]
    Rgb,
    /// CIELAB, closer to perceived difference.
    Lab,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub n_colors: usize,
    pub max_iter: usize,
    pub converge: f32,
    /// Number of seeded restarts; the lowest-inertia run is kept.
    pub runs: usize,
    pub seed: u64,
    pub color_space: ColorSpace,
    /// Omit clusters with no members instead of reporting them at 0%.
    pub drop_empty: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            n_colors: 5,
            max_iter: 20,
            converge: 1e-4,
            runs: 3,
            seed: 42,
            color_space: ColorSpace::Rgb,
            drop_empty: false,
        }
    }
}

impl ClusterSettings {
    pub fn with_n_colors(&self, n_colors: usize) -> Self {
        Self {
            n_colors,
            ..self.clone()
        }
    }
}

// ------------------------------------------------------------
// Samples
// ------------------------------------------------------------

/// Row-major list of pixel colors together with the grid they came from.
#[derive(Clone, Debug)]
pub struct ColorSamples {
    width: usize,
    height: usize,
    pixels: Vec<[u8; 3]>,
}

impl ColorSamples {
    pub fn from_image(img: &RgbImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            pixels: img.pixels().map(|p| p.0).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[[u8; 3]] {
        &self.pixels
    }

    /// `(row, column)` of the sample at `index`.
    pub fn location(&self, index: usize) -> (usize, usize) {
        (index / self.width, index % self.width)
    }
}

// ------------------------------------------------------------
// Clusters
// ------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub color: [u8; 3],
    pub count: usize,
    /// Share of all samples, 0..=100.
    pub percentage: f64,
    /// Mean column of the members divided by the width.
    pub avg_x: f64,
    /// Mean row of the members divided by the height.
    pub avg_y: f64,
}

impl Cluster {
    pub fn hex(&self) -> String {
        let [r, g, b] = self.color;
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

/// Check a caller-supplied cluster count against the number of samples.
pub fn validate_color_count(requested: i64, samples: usize) -> Result<usize> {
    let max = samples.min(MAX_COLORS);
    usize::try_from(requested)
        .ok()
        .filter(|n| (1..=max).contains(n))
        .ok_or(PaletteError::InvalidColorCount { requested, max })
}

/// Cluster the samples and summarize every cluster, in cluster index order.
pub fn extract_clusters(samples: &ColorSamples, settings: &ClusterSettings) -> Result<Vec<Cluster>> {
    if samples.is_empty() {
        return Err(PaletteError::EmptyImage);
    }
    let n_colors = validate_color_count(settings.n_colors as i64, samples.len())?;

    let (indices, fallback) = match settings.color_space {
        ColorSpace::Rgb => {
            let buf: Vec<Srgb> = samples
                .pixels()
                .iter()
                .map(|&[r, g, b]| Srgb::new(r, g, b).into_format::<f32>())
                .collect();
            let kmeans = best_run(&buf, n_colors, settings, |a, b| {
                sq(a.red - b.red) + sq(a.green - b.green) + sq(a.blue - b.blue)
            })?;
            let fallback = kmeans
                .centroids
                .iter()
                .map(|c| {
                    [
                        channel(c.red * 255.0),
                        channel(c.green * 255.0),
                        channel(c.blue * 255.0),
                    ]
                })
                .collect::<Vec<_>>();
            (kmeans.indices, fallback)
        }
        ColorSpace::Lab => {
            let buf: Vec<Lab> = samples
                .pixels()
                .iter()
                .map(|&[r, g, b]| Srgb::new(r, g, b).into_format::<f32>().into_color())
                .collect();
            let kmeans = best_run(&buf, n_colors, settings, |a, b| {
                sq(a.l - b.l) + sq(a.a - b.a) + sq(a.b - b.b)
            })?;
            let fallback = kmeans
                .centroids
                .iter()
                .map(|&lab| {
                    let rgb: Srgb = lab.into_color();
                    [
                        channel(rgb.red * 255.0),
                        channel(rgb.green * 255.0),
                        channel(rgb.blue * 255.0),
                    ]
                })
                .collect::<Vec<_>>();
            (kmeans.indices, fallback)
        }
    };

    let first_sample = samples.pixels().first().copied().unwrap_or_default();
    let fallback = pad_fallback(fallback, n_colors, first_sample);
    Ok(summarize(samples, &indices, &fallback, settings.drop_empty))
}

/// k-means++ stops seeding once every distinct color has a centroid, so the
/// library can hand back fewer than `n_colors` centroids. Repeat the last one
/// (or `first_sample` if there is none) so every requested cluster is reported.
fn pad_fallback(mut fallback: Vec<[u8; 3]>, n_colors: usize, first_sample: [u8; 3]) -> Vec<[u8; 3]> {
    let filler = fallback.last().copied().unwrap_or(first_sample);
    if fallback.len() < n_colors {
        fallback.resize(n_colors, filler);
    }
    fallback
}

/// Simple variant: only the representative colors, as `#rrggbb`.
pub fn extract_palette(samples: &ColorSamples, settings: &ClusterSettings) -> Result<Vec<String>> {
    Ok(extract_clusters(samples, settings)?
        .iter()
        .map(Cluster::hex)
        .collect())
}

/// Run k-means `settings.runs` times with consecutive seeds and keep the run
/// with the lowest inertia. Ties keep the earlier run.
fn best_run<C>(
    buf: &[C],
    n_colors: usize,
    settings: &ClusterSettings,
    distance: impl Fn(&C, &C) -> f32,
) -> Result<Kmeans<C>>
where
    C: Calculate + Clone,
{
    let mut best: Option<(f32, Kmeans<C>)> = None;
    for run in 0..settings.runs.max(1) {
        let seed = settings.seed.wrapping_add(run as u64);
        let kmeans = panic::catch_unwind(AssertUnwindSafe(|| {
            get_kmeans(n_colors, settings.max_iter, settings.converge, false, buf, seed)
        }))
        .map_err(|e| PaletteError::Clustering(panic_message(&*e)))?;

        let inertia: f32 = buf
            .iter()
            .zip(&kmeans.indices)
            .map(|(sample, &idx)| distance(sample, &kmeans.centroids[idx as usize]))
            .sum();
        debug!(run, seed, inertia, "k-means run finished");

        if best.as_ref().is_none_or(|(score, _)| inertia < *score) {
            best = Some((inertia, kmeans));
        }
    }
    best.map(|(_, kmeans)| kmeans)
        .ok_or_else(|| PaletteError::Clustering("no k-means run completed".into()))
}

/// Per-cluster color, share and normalized location from the final
/// assignment. `fallback` supplies the color of clusters with no members.
fn summarize(samples: &ColorSamples, indices: &[u8], fallback: &[[u8; 3]], drop_empty: bool) -> Vec<Cluster> {
    #[derive(Default, Clone, Copy)]
    struct Acc {
        count: u64,
        rgb: [u64; 3],
        row: u64,
        col: u64,
    }

    let mut accs = vec![Acc::default(); fallback.len()];
    for (i, (&idx, px)) in indices.iter().zip(samples.pixels()).enumerate() {
        let Some(acc) = accs.get_mut(idx as usize) else {
            continue;
        };
        let (row, col) = samples.location(i);
        acc.count += 1;
        for (sum, &c) in acc.rgb.iter_mut().zip(px) {
            *sum += c as u64;
        }
        acc.row += row as u64;
        acc.col += col as u64;
    }

    let total = samples.len() as f64;
    accs.iter()
        .zip(fallback)
        .filter(|(acc, _)| !(drop_empty && acc.count == 0))
        .map(|(acc, &fallback)| {
            if acc.count == 0 {
                let (avg_x, avg_y) = EMPTY_CLUSTER_LOCATION;
                return Cluster {
                    color: fallback,
                    count: 0,
                    percentage: 0.0,
                    avg_x,
                    avg_y,
                };
            }
            // Integer division truncates, like the channel encoding expects.
            let color = acc.rgb.map(|sum| (sum / acc.count) as u8);
            let count = acc.count as f64;
            Cluster {
                color,
                count: acc.count as usize,
                percentage: count / total * 100.0,
                avg_x: acc.col as f64 / count / samples.width() as f64,
                avg_y: acc.row as f64 / count / samples.height() as f64,
            }
        })
        .collect()
}

#[inline(always)]
fn sq(v: f32) -> f32 {
    v * v
}

/// Truncate a 0..=255 float channel into a byte.
#[inline(always)]
fn channel(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "k-means panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn settings(n_colors: usize) -> ClusterSettings {
        ClusterSettings::default().with_n_colors(n_colors)
    }

    fn noisy(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = (x * 37 + y * 91) % 256;
            Rgb([v as u8, (255 - v) as u8, ((x * y) % 256) as u8])
        })
    }

    #[test]
    fn solid_black_image_yields_single_black_cluster() {
        let samples = ColorSamples::from_image(&RgbImage::new(10, 10));
        let clusters = extract_clusters(&samples, &settings(1)).unwrap();
        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert_eq!(c.hex(), "#000000");
        assert_eq!(c.count, 100);
        assert!((c.percentage - 100.0).abs() < 1e-9);
        // mean column 4.5 over a width of 10
        assert!((c.avg_x - 0.45).abs() < 1e-9);
        assert!((c.avg_y - 0.45).abs() < 1e-9);
    }

    #[test]
    fn two_pixels_split_into_two_clusters() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        let samples = ColorSamples::from_image(&img);

        for space in [ColorSpace::Rgb, ColorSpace::Lab] {
            let s = ClusterSettings {
                color_space: space,
                ..settings(2)
            };
            let clusters = extract_clusters(&samples, &s).unwrap();
            let mut hexes: Vec<_> = clusters.iter().map(Cluster::hex).collect();
            hexes.sort();
            assert_eq!(hexes, ["#00ff00", "#ff0000"]);
            assert!(clusters.iter().all(|c| (c.percentage - 50.0).abs() < 1e-9));

            let red = clusters.iter().find(|c| c.color == [255, 0, 0]).unwrap();
            assert_eq!((red.avg_x, red.avg_y), (0.0, 0.0));
            let green = clusters.iter().find(|c| c.color == [0, 255, 0]).unwrap();
            assert_eq!((green.avg_x, green.avg_y), (0.5, 0.0));
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let samples = ColorSamples::from_image(&noisy(24, 16));
        let first = extract_palette(&samples, &settings(5)).unwrap();
        let second = extract_palette(&samples, &settings(5)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|h| h.len() == 7 && h.starts_with('#')));
        assert!(first.iter().all(|h| h[1..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())));
    }

    #[test]
    fn shares_sum_to_one_hundred_and_locations_are_normalized() {
        let samples = ColorSamples::from_image(&noisy(31, 17));
        let clusters = extract_clusters(&samples, &settings(6)).unwrap();
        let total: f64 = clusters.iter().map(|c| c.percentage).sum();
        assert!((total - 100.0).abs() < 1e-6);
        assert_eq!(clusters.iter().map(|c| c.count).sum::<usize>(), samples.len());
        for c in &clusters {
            assert!((0.0..=1.0).contains(&c.avg_x));
            assert!((0.0..=1.0).contains(&c.avg_y));
        }
    }

    #[test]
    fn color_count_is_validated() {
        assert_eq!(validate_color_count(5, 100).unwrap(), 5);
        assert_eq!(validate_color_count(100, 100).unwrap(), 100);
        for bad in [0, -3, 101] {
            assert!(matches!(
                validate_color_count(bad, 100),
                Err(PaletteError::InvalidColorCount { max: 100, .. })
            ));
        }
        assert!(matches!(
            validate_color_count(300, 10_000),
            Err(PaletteError::InvalidColorCount { max: MAX_COLORS, .. })
        ));

        let samples = ColorSamples::from_image(&RgbImage::new(2, 2));
        assert!(matches!(
            extract_clusters(&samples, &settings(5)),
            Err(PaletteError::InvalidColorCount { requested: 5, max: 4 })
        ));
    }

    #[test]
    fn empty_clusters_fall_back_or_are_dropped() {
        let img = RgbImage::from_fn(3, 1, |x, _| Rgb([x as u8 * 10, 0, 0]));
        let samples = ColorSamples::from_image(&img);
        let indices = [0u8, 0, 2];
        let fallback = [[1, 2, 3], [40, 50, 60], [7, 8, 9]];

        let kept = summarize(&samples, &indices, &fallback, false);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].color, [5, 0, 0]);
        assert_eq!(kept[0].count, 2);
        assert_eq!(kept[1].hex(), "#28323c");
        assert_eq!(kept[1].percentage, 0.0);
        assert_eq!((kept[1].avg_x, kept[1].avg_y), (0.5, 0.5));
        assert_eq!(kept[2].color, [20, 0, 0]);

        let dropped = summarize(&samples, &indices, &fallback, true);
        assert_eq!(dropped.len(), 2);
        let total: f64 = dropped.iter().map(|c| c.percentage).sum();
        assert!(total <= 100.0 + 1e-9);
    }

    #[test]
    fn every_requested_cluster_is_reported() {
        let samples = ColorSamples::from_image(&RgbImage::new(10, 10));
        let clusters = extract_clusters(&samples, &settings(5)).unwrap();
        assert_eq!(clusters.len(), 5);
        let total: f64 = clusters.iter().map(|c| c.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
        let empty: Vec<_> = clusters.iter().filter(|c| c.count == 0).collect();
        assert_eq!(empty.len(), 4);
        assert!(empty.iter().all(|c| (c.avg_x, c.avg_y) == (0.5, 0.5) && c.percentage == 0.0));

        let dropped = ClusterSettings {
            drop_empty: true,
            ..settings(5)
        };
        let clusters = extract_clusters(&samples, &dropped).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].hex(), "#000000");
    }

    #[test]
    fn two_color_image_pads_to_requested_count() {
        let img = RgbImage::from_fn(10, 10, |x, _| if x < 5 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });
        let samples = ColorSamples::from_image(&img);
        for space in [ColorSpace::Rgb, ColorSpace::Lab] {
            let s = ClusterSettings {
                color_space: space,
                ..settings(5)
            };
            let clusters = extract_clusters(&samples, &s).unwrap();
            assert_eq!(clusters.len(), 5);
            let mut full: Vec<_> = clusters.iter().filter(|c| c.count > 0).map(Cluster::hex).collect();
            full.sort();
            assert_eq!(full, ["#0000ff", "#ff0000"]);
            assert!(
                clusters
                    .iter()
                    .filter(|c| c.count > 0)
                    .all(|c| (c.percentage - 50.0).abs() < 1e-9)
            );
        }
    }

    #[test]
    fn fallback_padding_repeats_last_centroid() {
        assert_eq!(pad_fallback(vec![[1, 2, 3]], 3, [9, 9, 9]), [[1, 2, 3]; 3]);
        assert_eq!(pad_fallback(Vec::new(), 2, [9, 9, 9]), [[9, 9, 9]; 2]);
        assert_eq!(pad_fallback(vec![[1, 1, 1], [2, 2, 2]], 2, [0, 0, 0]).len(), 2);
    }

    #[test]
    fn location_recovers_row_and_column() {
        let samples = ColorSamples::from_image(&RgbImage::new(4, 3));
        assert_eq!(samples.location(0), (0, 0));
        assert_eq!(samples.location(5), (1, 1));
        assert_eq!(samples.location(11), (2, 3));
    }
}
