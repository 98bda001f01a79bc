//! Identity capture
//!
//! Turns a captured face image into a compact embedding: grayscale, center
//! crop, 64x64 downscale, then a normalized 256-bin local-binary-pattern
//! histogram. The embedding is deliberately lightweight so a kiosk-class
//! device can compute and compare it without an ML runtime.
//!
//! Quality gates reject captures whose embedding is degenerate (NaN/Inf,
//! near-zero norm, too sparse) or whose usable area is too small a share of
//! the frame. Valuable items get the strict thresholds.

use image::imageops::FilterType;
use image::GrayImage;
use std::time::Instant;

use reclaim_core::error::AppError;

const EMBEDDING_SIZE: usize = 256;
const PATCH_SIDE: u32 = 64;

// Strict thresholds (valuable items)
const STRICT_MIN_NORM: f32 = 1e-6;
const STRICT_MIN_NONZERO_RATIO: f32 = 0.015;
const STRICT_MIN_AREA_RATIO: f32 = 0.07;

// Lenient thresholds (non-valuable items)
const LENIENT_MIN_NORM: f32 = 1e-8;
const LENIENT_MIN_NONZERO_RATIO: f32 = 0.005;
const LENIENT_MIN_AREA_RATIO: f32 = 0.02;

/// Diagnostics returned to the caller alongside the stored embedding.
#[derive(Debug, Clone)]
pub struct CaptureMetrics {
    pub processing_ms: u128,
    /// Share of the frame covered by the analyzed crop.
    pub detection_area_ratio: f32,
    pub embedding_dim: usize,
    pub embedding_nonzero: usize,
    pub embedding_norm: f32,
    pub embedding_mean: f32,
    pub embedding_std: f32,
}

/// Decode a captured image and compute its embedding plus capture metrics.
pub fn compute_embedding(image_bytes: &[u8]) -> Result<(Vec<f32>, CaptureMetrics), AppError> {
    let started = Instant::now();

    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| AppError::InvalidInput(format!("Failed to decode capture image: {}", e)))?;
    let gray = decoded.to_luma8();
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(AppError::InvalidInput("Empty capture image".into()));
    }

    // Center square crop; without a detector this stands in for the face
    // region, and its share of the frame drives the framing gate.
    let side = width.min(height).max(1);
    let x0 = (width - side) / 2;
    let y0 = (height - side) / 2;
    let crop = image::imageops::crop_imm(&gray, x0, y0, side, side).to_image();
    let detection_area_ratio = (side as f32 * side as f32) / (width as f32 * height as f32);

    let patch = image::imageops::resize(&crop, PATCH_SIDE, PATCH_SIDE, FilterType::Triangle);
    let embedding = lbp_histogram(&patch);

    let nonzero = embedding.iter().filter(|v| **v != 0.0).count();
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    let mean = embedding.iter().sum::<f32>() / embedding.len() as f32;
    let variance = embedding
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f32>()
        / embedding.len() as f32;

    let metrics = CaptureMetrics {
        processing_ms: started.elapsed().as_millis(),
        detection_area_ratio,
        embedding_dim: embedding.len(),
        embedding_nonzero: nonzero,
        embedding_norm: norm,
        embedding_mean: mean,
        embedding_std: variance.sqrt(),
    };

    Ok((embedding, metrics))
}

/// Apply the quality gates to a computed embedding.
pub fn validate_quality(
    embedding: &[f32],
    metrics: &CaptureMetrics,
    strict: bool,
) -> Result<(), AppError> {
    if embedding.iter().any(|v| v.is_nan() || v.is_infinite()) {
        return Err(AppError::InvalidInput(
            "Embedding contains invalid values".into(),
        ));
    }

    let dim = embedding.len();
    let (min_norm, min_nonzero_ratio, min_area_ratio) = if strict {
        (STRICT_MIN_NORM, STRICT_MIN_NONZERO_RATIO, STRICT_MIN_AREA_RATIO)
    } else {
        (
            LENIENT_MIN_NORM,
            LENIENT_MIN_NONZERO_RATIO,
            LENIENT_MIN_AREA_RATIO,
        )
    };

    let min_nonzero = ((dim as f32 * min_nonzero_ratio) as usize).max(if strict { 4 } else { 2 });
    if metrics.embedding_norm <= min_norm || metrics.embedding_nonzero < min_nonzero {
        tracing::warn!(
            dim,
            nonzero = metrics.embedding_nonzero,
            norm = metrics.embedding_norm,
            strict,
            "rejecting low-quality embedding"
        );
        return Err(AppError::CaptureQualityTooLow {
            dim,
            nonzero: metrics.embedding_nonzero,
            norm: metrics.embedding_norm,
        });
    }

    if metrics.detection_area_ratio < min_area_ratio {
        tracing::warn!(
            area_ratio = metrics.detection_area_ratio,
            strict,
            "rejecting capture with small detection area"
        );
        return Err(AppError::FaceTooSmall {
            area_ratio: metrics.detection_area_ratio,
        });
    }

    Ok(())
}

/// Normalized 256-bin histogram of 8-neighbor LBP codes over the patch
/// interior.
fn lbp_histogram(patch: &GrayImage) -> Vec<f32> {
    let mut hist = vec![0.0f32; EMBEDDING_SIZE];
    let (w, h) = patch.dimensions();

    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let center = patch.get_pixel(x, y).0[0];
            let mut code = 0u8;
            let neighbors = [
                (x - 1, y - 1),
                (x, y - 1),
                (x + 1, y - 1),
                (x + 1, y),
                (x + 1, y + 1),
                (x, y + 1),
                (x - 1, y + 1),
                (x - 1, y),
            ];
            for (bit, (nx, ny)) in neighbors.iter().enumerate() {
                if patch.get_pixel(*nx, *ny).0[0] >= center {
                    code |= 1 << (7 - bit);
                }
            }
            hist[code as usize] += 1.0;
        }
    }

    let total: f32 = hist.iter().sum();
    if total > 0.0 {
        for v in hist.iter_mut() {
            *v /= total;
        }
    }
    hist
}
