use std::io::Cursor;

use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageEncoder, ImageFormat, Rgba, RgbaImage};

use crate::images::{ImageError, OutputFormat, OutputLimits, TransformSpec};

const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_WEBP_QUALITY: u8 = 80;
const DEFAULT_AVIF_QUALITY: u8 = 80;
const AVIF_SPEED: u8 = 6;

/// Byte-in/byte-out image transformation.
///
/// The derivative cache and the ingestion pipeline only see this trait, so
/// either can be driven by a stand-in codec in tests.
pub trait Transformer: Send + Sync + 'static {
    fn transform(&self, source: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, ImageError>;
}

/// Codec backed by the `image` crate, with WebP going through libwebp.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec {
    limits: OutputLimits,
}

impl ImageCodec {
    pub fn new(limits: OutputLimits) -> Self {
        Self { limits }
    }
}

impl Transformer for ImageCodec {
    /// Decode, transform and re-encode. Without an explicit format the
    /// source's own container is kept.
    fn transform(&self, source: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, ImageError> {
        let format = match spec.format.as_deref() {
            Some(token) => OutputFormat::from_token(token)?,
            None => sniff_format(source)?,
        };

        // Size the output from the header alone, before any pixels are allocated
        if spec.width.is_some() || spec.height.is_some() || spec.rotate.is_some() {
            let (width, height) = output_dimensions(source_dimensions(source)?, spec);
            self.limits.check(width, height)?;
        }

        let img = image::load_from_memory(source)
            .map_err(|e| ImageError::DecodeError(format!("Failed to load image: {}", e)))?;

        let img = apply_transformations(img, spec);

        encode_image(img, format, spec.quality)
    }
}

fn sniff_format(source: &[u8]) -> Result<OutputFormat, ImageError> {
    let guessed = image::guess_format(source)
        .map_err(|e| ImageError::DecodeError(format!("Unrecognized image data: {}", e)))?;
    let token = guessed
        .extensions_str()
        .first()
        .copied()
        .unwrap_or_default();
    OutputFormat::from_token(token)
}

fn source_dimensions(source: &[u8]) -> Result<(u32, u32), ImageError> {
    image::io::Reader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(|e| ImageError::DecodeError(format!("Unrecognized image data: {}", e)))?
        .into_dimensions()
        .map_err(|e| ImageError::DecodeError(format!("Failed to read image header: {}", e)))
}

/// Final canvas size for `spec` applied to an image of `current` size.
fn output_dimensions(current: (u32, u32), spec: &TransformSpec) -> (u32, u32) {
    let (width, height) = target_dimensions(current, spec.width, spec.height).unwrap_or(current);
    match spec.rotate.map(|degrees| degrees.rem_euclid(360)) {
        None | Some(0) | Some(180) => (width, height),
        Some(90) | Some(270) => (height, width),
        Some(degrees) => rotated_canvas(width as f64, height as f64, degrees),
    }
}

fn apply_transformations(mut img: DynamicImage, spec: &TransformSpec) -> DynamicImage {
    if spec.width.is_some() || spec.height.is_some() {
        img = resize_image(img, spec.width, spec.height);
    }
    if let Some(degrees) = spec.rotate {
        img = rotate_image(img, degrees);
    }
    img
}

pub(crate) fn target_dimensions(
    current: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
) -> Option<(u32, u32)> {
    let (current_width, current_height) = current;
    match (width, height) {
        (Some(w), Some(h)) => Some((w, h)),
        (Some(w), None) => {
            let aspect_ratio = current_height as f64 / current_width as f64;
            Some((w, ((w as f64 * aspect_ratio).round() as u32).max(1)))
        }
        (None, Some(h)) => {
            let aspect_ratio = current_width as f64 / current_height as f64;
            Some((((h as f64 * aspect_ratio).round() as u32).max(1), h))
        }
        (None, None) => None,
    }
}

fn resize_image(img: DynamicImage, width: Option<u32>, height: Option<u32>) -> DynamicImage {
    match target_dimensions(img.dimensions(), width, height) {
        // Both sides given means an exact, possibly non-uniform, scale
        Some((w, h)) => img.resize_exact(w, h, FilterType::Lanczos3),
        None => img,
    }
}

fn rotate_image(img: DynamicImage, degrees: i32) -> DynamicImage {
    match degrees.rem_euclid(360) {
        0 => img,
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        other => DynamicImage::ImageRgba8(rotate_about_center(&img.to_rgba8(), other)),
    }
}

fn rotated_canvas(width: f64, height: f64, degrees: i32) -> (u32, u32) {
    let (sin, cos) = (degrees as f64).to_radians().sin_cos();
    (
        (width * cos.abs() + height * sin.abs()).ceil().max(1.0) as u32,
        (width * sin.abs() + height * cos.abs()).ceil().max(1.0) as u32,
    )
}

/// Clockwise rotation onto a canvas large enough for the whole image.
/// Uncovered corners are left transparent.
fn rotate_about_center(src: &RgbaImage, degrees: i32) -> RgbaImage {
    let (sin, cos) = (degrees as f64).to_radians().sin_cos();
    let (src_w, src_h) = (src.width() as f64, src.height() as f64);
    let (dst_w, dst_h) = rotated_canvas(src_w, src_h, degrees);

    let (src_cx, src_cy) = (src_w / 2.0, src_h / 2.0);
    let (dst_cx, dst_cy) = (dst_w as f64 / 2.0, dst_h as f64 / 2.0);

    RgbaImage::from_fn(dst_w, dst_h, |x, y| {
        // Inverse-map the destination pixel centre back into the source
        let dx = x as f64 + 0.5 - dst_cx;
        let dy = y as f64 + 0.5 - dst_cy;
        let sx = dx * cos + dy * sin + src_cx;
        let sy = -dx * sin + dy * cos + src_cy;

        if sx >= 0.0 && sy >= 0.0 && sx < src_w && sy < src_h {
            *src.get_pixel(sx as u32, sy as u32)
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

fn encode_image(
    img: DynamicImage,
    format: OutputFormat,
    quality: Option<u8>,
) -> Result<Vec<u8>, ImageError> {
    let mut output = Vec::new();

    match format {
        OutputFormat::Jpeg => {
            let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY).clamp(1, 100);
            let rgb = img.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
            encoder
                .encode_image(&rgb)
                .map_err(|e| ImageError::TransformFailed(format!("JPEG encoding failed: {}", e)))?;
        }
        OutputFormat::Webp => {
            let quality = quality.unwrap_or(DEFAULT_WEBP_QUALITY).clamp(1, 100);
            // libwebp only takes 8-bit RGB or RGBA
            let img = to_8bit(img);
            let encoder = webp::Encoder::from_image(&img)
                .map_err(|e| ImageError::TransformFailed(format!("WebP encoding failed: {}", e)))?;
            output = encoder.encode(quality as f32).to_vec();
        }
        OutputFormat::Avif => {
            let quality = quality.unwrap_or(DEFAULT_AVIF_QUALITY).clamp(1, 100);
            let rgba = img.to_rgba8();
            AvifEncoder::new_with_speed_quality(&mut output, AVIF_SPEED, quality)
                .write_image(rgba.as_raw(), rgba.width(), rgba.height(), image::ExtendedColorType::Rgba8)
                .map_err(|e| ImageError::TransformFailed(format!("AVIF encoding failed: {}", e)))?;
        }
        OutputFormat::Png => write_lossless(img, ImageFormat::Png, "PNG", &mut output)?,
        OutputFormat::Gif => write_lossless(img, ImageFormat::Gif, "GIF", &mut output)?,
        OutputFormat::Bmp => write_lossless(img, ImageFormat::Bmp, "BMP", &mut output)?,
        OutputFormat::Tiff => write_lossless(img, ImageFormat::Tiff, "TIFF", &mut output)?,
    }

    Ok(output)
}

fn to_8bit(img: DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

fn write_lossless(
    img: DynamicImage,
    target: ImageFormat,
    label: &str,
    output: &mut Vec<u8>,
) -> Result<(), ImageError> {
    // Lossless encoders only accept 8-bit RGB(A) across the board
    to_8bit(img)
        .write_to(&mut Cursor::new(output), target)
        .map_err(|e| ImageError::TransformFailed(format!("{} encoding failed: {}", label, e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn convert(source: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, ImageError> {
        ImageCodec::default().transform(source, spec)
    }

    fn decode(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn keeps_source_format_without_params() {
        let source = sample_png(8, 4);
        let out = convert(&source, &TransformSpec::default()).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Png);
        assert_eq!(decode(&out).dimensions(), (8, 4));
    }

    #[test]
    fn width_only_preserves_aspect_ratio() {
        let source = sample_png(40, 20);
        let spec = TransformSpec { width: Some(10), ..Default::default() };
        let out = convert(&source, &spec).unwrap();
        assert_eq!(decode(&out).dimensions(), (10, 5));
    }

    #[test]
    fn height_only_preserves_aspect_ratio() {
        let source = sample_png(40, 20);
        let spec = TransformSpec { height: Some(10), ..Default::default() };
        let out = convert(&source, &spec).unwrap();
        assert_eq!(decode(&out).dimensions(), (20, 10));
    }

    #[test]
    fn both_dimensions_scale_exactly() {
        let source = sample_png(40, 20);
        let spec = TransformSpec { width: Some(7), height: Some(30), ..Default::default() };
        let out = convert(&source, &spec).unwrap();
        assert_eq!(decode(&out).dimensions(), (7, 30));
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let source = sample_png(12, 6);
        for degrees in [90, -90, 270, 450] {
            let spec = TransformSpec { rotate: Some(degrees), ..Default::default() };
            let out = convert(&source, &spec).unwrap();
            assert_eq!(decode(&out).dimensions(), (6, 12), "rotate {}", degrees);
        }
        let spec = TransformSpec { rotate: Some(180), ..Default::default() };
        assert_eq!(decode(&convert(&source, &spec).unwrap()).dimensions(), (12, 6));
    }

    #[test]
    fn arbitrary_angle_enlarges_canvas() {
        let source = sample_png(10, 10);
        let spec = TransformSpec { rotate: Some(45), ..Default::default() };
        let out = decode(&convert(&source, &spec).unwrap());
        let (w, h) = out.dimensions();
        assert!(w > 10 && h > 10);
        // Corner falls outside the rotated square
        assert_eq!(out.to_rgba8().get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn converts_to_requested_format() {
        let source = sample_png(16, 16);
        for (token, expected) in [
            ("jpeg", image::ImageFormat::Jpeg),
            ("jpg", image::ImageFormat::Jpeg),
            ("webp", image::ImageFormat::WebP),
            ("gif", image::ImageFormat::Gif),
            ("bmp", image::ImageFormat::Bmp),
            ("tiff", image::ImageFormat::Tiff),
        ] {
            let spec = TransformSpec { format: Some(token.to_string()), ..Default::default() };
            let out = convert(&source, &spec).unwrap();
            assert_eq!(image::guess_format(&out).unwrap(), expected, "format {}", token);
        }
    }

    #[test]
    fn quality_applies_to_lossy_formats_and_is_ignored_for_png() {
        let source = sample_png(64, 64);
        for token in ["jpeg", "webp"] {
            let low = convert(
                &source,
                &TransformSpec { format: Some(token.into()), quality: Some(5), ..Default::default() },
            )
            .unwrap();
            let high = convert(
                &source,
                &TransformSpec { format: Some(token.into()), quality: Some(95), ..Default::default() },
            )
            .unwrap();
            assert!(low.len() < high.len(), "format {}", token);
        }

        let png = convert(
            &source,
            &TransformSpec { format: Some("png".into()), quality: Some(5), ..Default::default() },
        );
        assert!(png.is_ok());
    }

    #[test]
    fn unsupported_format_fails() {
        let source = sample_png(4, 4);
        let spec = TransformSpec { format: Some("psd".into()), ..Default::default() };
        assert!(matches!(
            convert(&source, &spec),
            Err(ImageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let spec = TransformSpec { format: Some("png".into()), ..Default::default() };
        assert!(matches!(
            convert(b"definitely not an image", &spec),
            Err(ImageError::DecodeError(_))
        ));
    }

    #[test]
    fn aspect_ratio_never_collapses_to_zero() {
        assert_eq!(target_dimensions((1000, 1), Some(10), None), Some((10, 1)));
        assert_eq!(target_dimensions((5, 5), None, None), None);
    }

    #[test]
    fn oversized_output_is_rejected_before_decoding() {
        let source = sample_png(4, 4);
        let codec = ImageCodec::new(OutputLimits { max_dimension: 1000, max_pixels: 100_000 });

        let spec = TransformSpec {
            width: Some(1_000_000),
            height: Some(1_000_000),
            ..Default::default()
        };
        assert!(matches!(codec.transform(&source, &spec), Err(ImageError::InvalidParameter(_))));

        // One side within bounds, the other blown up by the aspect ratio
        let tall = sample_png(1, 400);
        let spec = TransformSpec { width: Some(500), ..Default::default() };
        assert!(matches!(codec.transform(&tall, &spec), Err(ImageError::InvalidParameter(_))));

        // Within bounds before rotating, over the pixel budget after
        let spec = TransformSpec { width: Some(300), height: Some(300), rotate: Some(45), ..Default::default() };
        assert!(matches!(codec.transform(&source, &spec), Err(ImageError::InvalidParameter(_))));

        let spec = TransformSpec { width: Some(300), height: Some(300), ..Default::default() };
        assert_eq!(decode(&codec.transform(&source, &spec).unwrap()).dimensions(), (300, 300));
    }
}
