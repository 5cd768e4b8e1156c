//! Integration tests: a synthetic photo of a rotated, perspective-skewed
//! page run through the whole pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use docflat_pipeline::{Analysis, Pipeline, PipelineConfig, SubpixelPoint};
use image::{DynamicImage, Rgba, RgbaImage};
use nalgebra::{Matrix3, Vector3};

const SCENE_WIDTH: u32 = 1000;
const SCENE_HEIGHT: u32 = 800;
const PAGE_WIDTH: f64 = 600.0;
const PAGE_HEIGHT: f64 = 480.0;
const BACKGROUND: u8 = 180;
const PAGE: u8 = 255;

/// Homography taking page coordinates to scene coordinates: centre the
/// page, rotate it by 10 degrees, tilt it away from the camera and move
/// it to the middle of the scene.
fn page_to_scene() -> Matrix3<f64> {
    let centre = Matrix3::new(
        1.0,
        0.0,
        -PAGE_WIDTH / 2.0,
        0.0,
        1.0,
        -PAGE_HEIGHT / 2.0,
        0.0,
        0.0,
        1.0,
    );
    let (sin, cos) = 10.0_f64.to_radians().sin_cos();
    let rotate = Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0);
    let tilt = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 5e-5, 0.0, 1.0);
    let place = Matrix3::new(
        1.0,
        0.0,
        f64::from(SCENE_WIDTH) / 2.0,
        0.0,
        1.0,
        f64::from(SCENE_HEIGHT) / 2.0,
        0.0,
        0.0,
        1.0,
    );
    place * tilt * rotate * centre
}

fn scene() -> RgbaImage {
    let scene_to_page = page_to_scene().try_inverse().unwrap();
    RgbaImage::from_fn(SCENE_WIDTH, SCENE_HEIGHT, |x, y| {
        let p = scene_to_page * Vector3::new(f64::from(x), f64::from(y), 1.0);
        let (u, v) = (p.x / p.z, p.y / p.z);
        let on_page = (0.0..PAGE_WIDTH).contains(&u) && (0.0..PAGE_HEIGHT).contains(&v);
        let value = if on_page { PAGE } else { BACKGROUND };
        Rgba([value, value, value, 255])
    })
}

fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[test]
fn skewed_page_is_flattened() {
    let png = encode_png(&scene());
    let result = docflat_pipeline::rectify(&png, &PipelineConfig::default())
        .expect("pipeline should find the page");

    let (w, h) = result.image.dimensions();
    eprintln!("rectified {w}x{h}, quad {:?}", result.quad);

    let aspect = f64::from(w) / f64::from(h);
    let expected = PAGE_WIDTH / PAGE_HEIGHT;
    assert!(
        ((aspect - expected) / expected).abs() < 0.03,
        "aspect {aspect:.3} vs {expected:.3}"
    );

    // The central 80% of the output is page.
    let (x0, x1) = (w / 10, w - w / 10);
    let (y0, y1) = (h / 10, h - h / 10);
    let mut total = 0u32;
    let mut bright = 0u32;
    for y in y0..y1 {
        for x in x0..x1 {
            total += 1;
            if result.image.get_pixel(x, y).0[0] > 230 {
                bright += 1;
            }
        }
    }
    assert!(
        f64::from(bright) >= 0.95 * f64::from(total),
        "{bright} of {total} central pixels are page"
    );
}

#[test]
fn page_edges_are_axis_aligned() {
    let result =
        docflat_pipeline::rectify(&encode_png(&scene()), &PipelineConfig::default()).unwrap();
    let image = &result.image;
    let (w, h) = image.dimensions();

    // First page row in each column across the middle of the top edge.
    let first_bright_rows: Vec<u32> = (w / 5..w * 4 / 5)
        .map(|x| {
            (0..h / 2)
                .find(|&y| image.get_pixel(x, y).0[0] > 230)
                .unwrap_or(h / 2)
        })
        .collect();
    let min = first_bright_rows.iter().min().unwrap();
    let max = first_bright_rows.iter().max().unwrap();
    assert!(max - min <= w / 50, "top edge wanders from row {min} to {max}");
}

#[test]
fn pipeline_is_deterministic() {
    let png = encode_png(&scene());
    let config = PipelineConfig::default();
    let first = docflat_pipeline::rectify(&png, &config).unwrap();
    let second = docflat_pipeline::rectify(&png, &config).unwrap();
    assert_eq!(first.quad, second.quad);
    assert_eq!(encode_png(&first.image), encode_png(&second.image));
}

fn analysis_corners(image: &DynamicImage) -> ([SubpixelPoint<Analysis>; 4], f64, f64) {
    let resolved = Pipeline::from_image(image, PipelineConfig::default())
        .unwrap()
        .downscale();
    let scale = resolved.scale();
    let resolved = resolved
        .binarize()
        .denoise()
        .detect_borders()
        .extract_lines()
        .unwrap()
        .resolve_corners()
        .unwrap();
    (*resolved.analysis_corners(), scale.dx, scale.dy)
}

#[test]
fn corners_survive_scale_round_trip() {
    let full = DynamicImage::ImageRgba8(scene());
    let width = PipelineConfig::DEFAULT_ANALYSIS_WIDTH;
    let height = SCENE_HEIGHT * width / SCENE_WIDTH;
    let prescaled = full.resize_exact(width, height, image::imageops::FilterType::Triangle);

    let (from_full, dx, dy) = analysis_corners(&full);
    let (from_prescaled, pdx, pdy) = analysis_corners(&prescaled);
    assert!((pdx - 1.0).abs() < f64::EPSILON && (pdy - 1.0).abs() < f64::EPSILON);

    for corner in from_full {
        // Scale to the original, then back down by the same factors.
        let x = (corner.x * dx).round() / dx;
        let y = (corner.y * dy).round() / dy;
        let nearest = from_prescaled
            .iter()
            .map(|p| (p.x - x).hypot(p.y - y))
            .fold(f64::INFINITY, f64::min);
        assert!(
            nearest <= std::f64::consts::SQRT_2,
            "corner {corner:?} has no match within 1px"
        );
    }
}
