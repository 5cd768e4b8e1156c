//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! Diagnostics are collected by
//! [`process_staged_with_diagnostics`], which drives the typestate
//! [`Pipeline`] and measures every advance. The library does no clock
//! access of its own: callers pass a [`Clock`], so tests can use a fake
//! and front ends use `std::time::Instant`.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::{LineEquation, Original, Quadrilateral, ScaleFactors};
use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{PipelineConfig, PipelineError, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Per-stage diagnostics, in execution order.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Stage name (e.g. `"binarize"`).
    pub stage: String,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes (0 for pre-decoded input).
        input_bytes: usize,
        /// Decoded image width in pixels.
        width: u32,
        /// Decoded image height in pixels.
        height: u32,
        /// Total pixel count (`width * height`).
        pixel_count: u64,
    },
    /// Downscale metrics.
    Downscale {
        /// Source width in pixels.
        original_width: u32,
        /// Source height in pixels.
        original_height: u32,
        /// Analysis width in pixels.
        width: u32,
        /// Analysis height in pixels.
        height: u32,
        /// Resampling filter name.
        filter: String,
        /// Analysis-to-original scale factors.
        scale: ScaleFactors,
    },
    /// Adaptive threshold metrics.
    Binarize {
        /// Threshold bias.
        bias: f64,
        /// Initial window radius.
        initial_radius: u32,
        /// Pixels classified as foreground.
        foreground_pixels: u64,
        /// Total pixel count for computing foreground density.
        total_pixels: u64,
    },
    /// Median filter metrics.
    Denoise {
        /// Radii applied, in order.
        radii: Vec<u32>,
        /// Foreground pixels after filtering.
        foreground_pixels: u64,
        /// Pixels whose value the filter changed.
        changed_pixels: usize,
    },
    /// Border detection metrics.
    BorderDetection {
        /// Gradient magnitude threshold.
        threshold: f32,
        /// Border points emitted.
        border_points: usize,
        /// Distinct border points.
        distinct_points: usize,
    },
    /// Line extraction metrics.
    LineExtraction {
        /// The accepted lines, strongest first.
        lines: Vec<LineEquation>,
    },
    /// Corner resolution metrics.
    CornerResolution {
        /// Ordered corners in the original image.
        quad: Quadrilateral<Original>,
    },
    /// Rectification metrics.
    Rectify {
        /// Output width in pixels.
        width: u32,
        /// Output height in pixels.
        height: u32,
    },
}

/// High-level summary for the entire run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Border points found in the analysis image.
    pub border_point_count: usize,
    /// Rectified output width in pixels.
    pub output_width: u32,
    /// Rectified output height in pixels.
    pub output_height: u32,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} -> {}x{}",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.output_width,
            self.summary.output_height,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for diag in &self.stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{:<24} {ms:>8.3}ms {pct:>9.1}%  {details}", diag.stage));
        }

        lines.push(String::new());
        lines.push(format!(
            "Border points: {}",
            self.summary.border_point_count
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
            ..
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Downscale {
            original_width,
            original_height,
            width,
            height,
            filter,
            scale,
        } => format!(
            "{original_width}x{original_height} -> {width}x{height} ({filter}, dx={:.3} dy={:.3})",
            scale.dx, scale.dy,
        ),
        StageMetrics::Binarize {
            bias,
            initial_radius,
            foreground_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixels > 0 {
                *foreground_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            format!("bias={bias:.2} r0={initial_radius} fg={foreground_pixels} ({density:.1}%)")
        }
        StageMetrics::Denoise {
            radii,
            foreground_pixels,
            changed_pixels,
        } => format!("radii={radii:?} fg={foreground_pixels} changed={changed_pixels}"),
        StageMetrics::BorderDetection {
            threshold,
            border_points,
            distinct_points,
        } => format!("threshold={threshold:.0} points={border_points} distinct={distinct_points}"),
        StageMetrics::LineExtraction { lines } => {
            let described: Vec<String> = lines
                .iter()
                .map(|l| format!("({:.0}°, {:.0})", l.angle, l.distance))
                .collect();
            described.join(" ")
        }
        StageMetrics::CornerResolution { quad } => {
            let described: Vec<String> = quad
                .corners()
                .iter()
                .map(|p| format!("({}, {})", p.x, p.y))
                .collect();
            described.join(" ")
        }
        StageMetrics::Rectify { width, height } => format!("{width}x{height}"),
    }
}

/// Run one advance and record its duration and the reached stage's
/// metrics.
fn measure<C: Clock, S: PipelineStage>(
    clock: &C,
    stages: &mut Vec<StageDiagnostics>,
    advance: impl FnOnce() -> Result<S, PipelineError>,
) -> Result<S, PipelineError> {
    let start = clock.now();
    let stage = advance()?;
    let duration = clock.elapsed(&start);
    tracing::trace!(stage = S::NAME, ?duration, "stage complete");
    stages.push(StageDiagnostics {
        stage: S::NAME.to_owned(),
        duration,
        metrics: stage.metrics(),
    });
    Ok(stage)
}

/// Run the full pipeline, returning every intermediate plus per-stage
/// diagnostics.
///
/// # Errors
///
/// Returns the first [`PipelineError`] any stage produces, including
/// [`PipelineError::InvalidConfig`] for an invalid `config`.
pub fn process_staged_with_diagnostics<C: Clock>(
    image_bytes: &[u8],
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    config.validate()?;
    let start = clock.now();
    let mut stages = Vec::with_capacity(crate::pipeline::STAGE_COUNT);

    let pending = Pipeline::new(image_bytes.to_vec(), config.clone());
    let decoded = measure(clock, &mut stages, || pending.decode())?;
    let downscaled = measure(clock, &mut stages, || Ok(decoded.downscale()))?;
    let binarized = measure(clock, &mut stages, || Ok(downscaled.binarize()))?;
    let denoised = measure(clock, &mut stages, || Ok(binarized.denoise()))?;
    let borders = measure(clock, &mut stages, || Ok(denoised.detect_borders()))?;
    let lines = measure(clock, &mut stages, || borders.extract_lines())?;
    let corners = measure(clock, &mut stages, || lines.resolve_corners())?;
    let rectified = measure(clock, &mut stages, || corners.rectify())?;

    let result = rectified.into_result();
    let diagnostics = PipelineDiagnostics {
        stages,
        total_duration: clock.elapsed(&start),
        summary: PipelineSummary {
            image_width: result.source_dimensions.width,
            image_height: result.source_dimensions.height,
            border_point_count: result.border_point_count,
            output_width: result.rectified.width(),
            output_height: result.rectified.height(),
        },
    };
    Ok((result, diagnostics))
}
