// src/compute/kmeans.rs — Seeded k-means colour quantisation
//
// Centroids are fitted on a bounded pixel sample (k-means++ seeding, Lloyd
// iterations with early convergence), then every pixel is mapped to its
// nearest centroid. Same image + same params = same output.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::ComputeError;

type Point = [f32; 3];

#[derive(Debug, Clone)]
pub struct KMeansParams {
    pub max_iterations: usize,
    pub seed: u64,
    pub sample_limit: usize,
    /// Largest centroid shift (in normalised colour units) treated as converged.
    pub tolerance: f32,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            seed: 42,
            sample_limit: 10_000,
            tolerance: 1e-4,
        }
    }
}

/// Replace every pixel with the centroid of its cluster.
pub fn quantize(pixels: &RgbImage, k: usize, params: &KMeansParams) -> Result<RgbImage, ComputeError> {
    if k == 0 {
        return Err(ComputeError::Clustering {
            k,
            message: "k must be at least 1".into(),
        });
    }
    let points: Vec<Point> = pixels.pixels().map(normalise).collect();
    if points.is_empty() {
        return Err(ComputeError::Clustering {
            k,
            message: "image has no pixels".into(),
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed ^ k as u64);
    let sample = sample_points(&points, params.sample_limit.max(k), &mut rng);
    let centroids = fit(&sample, k, params, &mut rng);

    let mut out = RgbImage::new(pixels.width(), pixels.height());
    for (dst, point) in out.pixels_mut().zip(&points) {
        *dst = denormalise(&centroids[nearest(point, &centroids)]);
    }
    Ok(out)
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, ComputeError> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder.encode_image(img)?;
    }
    Ok(buf)
}

fn fit(points: &[Point], k: usize, params: &KMeansParams, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids = seed_plus_plus(points, k, rng);
    let mut labels = vec![0usize; points.len()];

    for _ in 0..params.max_iterations.max(1) {
        for (label, point) in labels.iter_mut().zip(points) {
            *label = nearest(point, &centroids);
        }

        let mut sums = vec![[0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (point, &label) in points.iter().zip(&labels) {
            counts[label] += 1;
            for c in 0..3 {
                sums[label][c] += f64::from(point[c]);
            }
        }

        let mut shift = 0f32;
        for (i, centroid) in centroids.iter_mut().enumerate() {
            // Empty clusters keep their previous centroid.
            if counts[i] == 0 {
                continue;
            }
            let n = counts[i] as f64;
            let updated = [
                (sums[i][0] / n) as f32,
                (sums[i][1] / n) as f32,
                (sums[i][2] / n) as f32,
            ];
            shift = shift.max(distance_sq(centroid, &updated).sqrt());
            *centroid = updated;
        }

        if shift < params.tolerance {
            break;
        }
    }

    centroids
}

fn seed_plus_plus(points: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    let mut min_dist: Vec<f64> = points
        .iter()
        .map(|p| f64::from(distance_sq(p, &centroids[0])))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_dist.iter().sum();
        let next = if total <= f64::EPSILON {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, d) in min_dist.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = points[next];
        for (d, p) in min_dist.iter_mut().zip(points) {
            *d = d.min(f64::from(distance_sq(p, &centroid)));
        }
        centroids.push(centroid);
    }

    centroids
}

fn sample_points(points: &[Point], limit: usize, rng: &mut StdRng) -> Vec<Point> {
    if points.len() <= limit {
        return points.to_vec();
    }
    rand::seq::index::sample(rng, points.len(), limit)
        .into_iter()
        .map(|i| points[i])
        .collect()
}

fn nearest(point: &Point, centroids: &[Point]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = distance_sq(point, c);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

fn distance_sq(a: &Point, b: &Point) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn normalise(px: &Rgb<u8>) -> Point {
    [
        f32::from(px[0]) / 255.0,
        f32::from(px[1]) / 255.0,
        f32::from(px[2]) / 255.0,
    ]
}

fn denormalise(p: &Point) -> Rgb<u8> {
    let channel = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([channel(p[0]), channel(p[1]), channel(p[2])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn two_tone(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                Rgb([250, 10, 10])
            } else {
                Rgb([10, 10, 250])
            }
        })
    }

    fn distinct_colours(img: &RgbImage) -> usize {
        img.pixels().map(|p| p.0).collect::<HashSet<_>>().len()
    }

    #[test]
    fn test_two_clusters_recover_two_colours() {
        let out = quantize(&two_tone(10, 10), 2, &KMeansParams::default()).unwrap();
        assert_eq!(distinct_colours(&out), 2);
        assert_eq!(out.get_pixel(0, 0), &Rgb([250, 10, 10]));
        assert_eq!(out.get_pixel(9, 9), &Rgb([10, 10, 250]));
    }

    #[test]
    fn test_at_most_k_colours() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 128]));
        for k in [2, 3, 5] {
            let out = quantize(&img, k, &KMeansParams::default()).unwrap();
            assert!(distinct_colours(&out) <= k);
            assert_eq!(out.dimensions(), img.dimensions());
        }
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let img = RgbImage::from_fn(12, 12, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 0]));
        let params = KMeansParams::default();
        let a = quantize(&img, 4, &params).unwrap();
        let b = quantize(&img, 4, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_more_clusters_than_colours() {
        let img = RgbImage::from_pixel(4, 4, Rgb([30, 60, 90]));
        let out = quantize(&img, 5, &KMeansParams::default()).unwrap();
        assert_eq!(distinct_colours(&out), 1);
    }

    #[test]
    fn test_sampling_still_maps_every_pixel() {
        let params = KMeansParams {
            sample_limit: 8,
            ..KMeansParams::default()
        };
        let out = quantize(&two_tone(40, 40), 2, &params).unwrap();
        assert_eq!(out.dimensions(), (40, 40));
        assert!(distinct_colours(&out) <= 2);
    }

    #[test]
    fn test_zero_k_rejected() {
        assert!(quantize(&two_tone(2, 2), 0, &KMeansParams::default()).is_err());
    }

    #[test]
    fn test_encode_jpeg_magic() {
        let bytes = encode_jpeg(&two_tone(8, 8), 85).unwrap();
        assert_eq!(&bytes[..3], &[0xFF, 0xD8, 0xFF]);
    }
}
