//! docflat: rectify a photographed document from the command line.
//!
//! Reads an image, runs the rectification pipeline and writes the flat,
//! cropped document. Optionally dumps the intermediate analysis images
//! and per-stage diagnostics for parameter tuning.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin docflat -- [OPTIONS] <INPUT>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use docflat_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use docflat_pipeline::{PipelineConfig, StagedResult};
use image::DynamicImage;

/// Flatten a photographed document into an axis-aligned, cropped image.
#[derive(Parser)]
#[command(name = "docflat", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Where to write the rectified document. Defaults to
    /// `<input stem>-flat.png` next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the intermediate analysis images.
    #[arg(long)]
    debug: bool,

    /// Directory for debug images.
    #[arg(long, default_value = "debug")]
    debug_dir: PathBuf,

    /// Width of the analysis image in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ANALYSIS_WIDTH, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    analysis_width: u32,

    /// Adaptive threshold bias (pixel * bias < local mean is foreground).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_THRESHOLD_BIAS)]
    bias: f64,

    /// Initial adaptive threshold window size (>= 1, rounded up to odd).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_WINDOW_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    window_size: u32,

    /// Window variance below which the threshold window grows.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_VARIANCE_THRESHOLD)]
    variance_threshold: f64,

    /// Minimum gradient magnitude for a border point.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_EDGE_STRENGTH_THRESHOLD)]
    edge_threshold: f32,

    /// Downscale filter (nearest, triangle, catmull-rom, gaussian, lanczos3).
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_FILTER)]
    filter: Filter,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Print per-stage timing diagnostics.
    #[arg(long)]
    diagnostics: bool,

    /// Print diagnostics as JSON instead of a human-readable report.
    #[arg(long, requires = "diagnostics")]
    json: bool,

    /// Log at debug level (`RUST_LOG` takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

/// Downscale resampling filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Nearest-neighbor (fastest, blocky).
    Nearest,
    /// Bilinear interpolation (fast, decent quality).
    Triangle,
    /// Bicubic Catmull-Rom (moderate, good quality).
    CatmullRom,
    /// Gaussian (moderate, smooth).
    Gaussian,
    /// Lanczos with 3 lobes (slowest, sharpest).
    Lanczos3,
}

/// Maps a [`docflat_pipeline::DownscaleFilter`] to the local CLI [`Filter`] enum.
const fn filter_from_pipeline(f: docflat_pipeline::DownscaleFilter) -> Filter {
    match f {
        docflat_pipeline::DownscaleFilter::Nearest => Filter::Nearest,
        docflat_pipeline::DownscaleFilter::Triangle => Filter::Triangle,
        docflat_pipeline::DownscaleFilter::CatmullRom => Filter::CatmullRom,
        docflat_pipeline::DownscaleFilter::Gaussian => Filter::Gaussian,
        docflat_pipeline::DownscaleFilter::Lanczos3 => Filter::Lanczos3,
    }
}

/// The CLI default filter, derived from
/// [`PipelineConfig::DEFAULT_DOWNSCALE_FILTER`] so the two cannot drift.
const CLI_DEFAULT_FILTER: Filter = filter_from_pipeline(PipelineConfig::DEFAULT_DOWNSCALE_FILTER);

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        analysis_width: cli.analysis_width,
        threshold_bias: cli.bias,
        window_size: cli.window_size,
        variance_threshold: cli.variance_threshold,
        edge_strength_threshold: cli.edge_threshold,
        downscale_filter: match cli.filter {
            Filter::Nearest => docflat_pipeline::DownscaleFilter::Nearest,
            Filter::Triangle => docflat_pipeline::DownscaleFilter::Triangle,
            Filter::CatmullRom => docflat_pipeline::DownscaleFilter::CatmullRom,
            Filter::Gaussian => docflat_pipeline::DownscaleFilter::Gaussian,
            Filter::Lanczos3 => docflat_pipeline::DownscaleFilter::Lanczos3,
        },
        ..PipelineConfig::default()
    })
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    input.with_file_name(format!("{stem}-flat.png"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.input.display());
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        path = %cli.input.display(),
        bytes = image_bytes.len(),
        "loaded input"
    );
    tracing::debug!(?config, "pipeline config");

    let outcome = if cli.diagnostics {
        docflat_pipeline::diagnostics::process_staged_with_diagnostics(
            &image_bytes,
            &config,
            &StdClock,
        )
        .map(|(staged, diagnostics)| (staged, Some(diagnostics)))
    } else {
        docflat_pipeline::process_staged(&image_bytes, &config).map(|staged| (staged, None))
    };

    let (staged, diagnostics) = match outcome {
        Ok(result) => result,
        Err(e) => {
            if e.is_invalid_input() {
                eprintln!("No document found: {e}");
            } else {
                eprintln!("Pipeline error: {e}");
            }
            return ExitCode::FAILURE;
        }
    };

    if let Some(diagnostics) = diagnostics
        && let Err(msg) = print_diagnostics(&diagnostics, cli.json)
    {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    if cli.debug {
        write_debug_images(&cli.debug_dir, &staged);
    }

    let output = cli.output.unwrap_or_else(|| default_output(&cli.input));
    let (width, height) = staged.rectified.dimensions();
    let corners = *staged.quad.corners();
    match save_rectified(staged.rectified, &output) {
        Ok(()) => {
            tracing::info!(
                path = %output.display(),
                width,
                height,
                ?corners,
                "rectified document written"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error writing {}: {e}", output.display());
            ExitCode::FAILURE
        }
    }
}

fn print_diagnostics(diagnostics: &PipelineDiagnostics, json: bool) -> Result<(), String> {
    if json {
        let json = serde_json::to_string_pretty(diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

/// JPEG has no alpha channel, so the RGBA output is flattened for it.
fn save_rectified(image: image::RgbaImage, path: &Path) -> image::ImageResult<()> {
    let image = DynamicImage::ImageRgba8(image);
    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
    if is_jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8()).save(path)
    } else {
        image.save(path)
    }
}

/// Write the analysis intermediates. Failures are logged and otherwise
/// ignored: debug output never changes the result.
fn write_debug_images(dir: &Path, staged: &StagedResult) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "cannot create debug directory");
        return;
    }

    let images = [
        ("binarized.png", &staged.binarized),
        ("denoised.png", &staged.denoised),
        ("borders.png", &staged.borders),
        ("lines.png", &staged.line_mask),
    ];
    for (name, image) in images {
        let path = dir.join(name);
        match image.save(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "debug image written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "debug image not written"),
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_pipeline_defaults() {
        let cli = Cli::parse_from(["docflat", "photo.jpg"]);
        let config = config_from_cli(&cli).unwrap_or_default();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::parse_from([
            "docflat",
            "photo.jpg",
            "--analysis-width",
            "500",
            "--config-json",
            r#"{"analysis_width": 400}"#,
        ]);
        let config = config_from_cli(&cli).unwrap_or_default();
        assert_eq!(config.analysis_width, 400);
    }

    #[test]
    fn bad_config_json_is_reported() {
        let cli = Cli::parse_from(["docflat", "photo.jpg", "--config-json", "{"]);
        assert!(config_from_cli(&cli).is_err());
    }

    #[test]
    fn even_window_size_is_accepted() {
        let cli = Cli::parse_from(["docflat", "photo.jpg", "--window-size", "24"]);
        let config = config_from_cli(&cli).unwrap_or_default();
        assert_eq!(config.window_size, 24);
        assert!(config.validate().is_ok());
        assert!(Cli::try_parse_from(["docflat", "photo.jpg", "--window-size", "0"]).is_err());
    }

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output(Path::new("/tmp/scans/receipt.jpg")),
            PathBuf::from("/tmp/scans/receipt-flat.png")
        );
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
