pub mod codec;
pub mod error;
pub mod paths;
pub mod spec;

pub use codec::{ImageCodec, Transformer};
pub use error::ImageError;
pub use paths::{cache_key, ImageLocation, PathResolver};
pub use spec::{OutputFormat, OutputLimits, TransformSpec};

/// Content type from the leading magic bytes of an encoded image.
pub fn detect_image_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        "image/png"
    } else if data.starts_with(&[0x47, 0x49, 0x46, 0x38]) {
        "image/gif"
    } else if data.starts_with(&[0x52, 0x49, 0x46, 0x46]) && data.get(8..12) == Some(&b"WEBP"[..]) {
        "image/webp"
    } else if data.starts_with(&[0x42, 0x4D]) {
        "image/bmp"
    } else if data.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || data.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        "image/tiff"
    } else if data.get(4..12) == Some(&b"ftypavif"[..]) {
        "image/avif"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_signatures() {
        assert_eq!(detect_image_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(detect_image_type(b"GIF89a......"), "image/gif");
        assert_eq!(detect_image_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(detect_image_type(b"\0\0\0\x1cftypavif"), "image/avif");
        assert_eq!(detect_image_type(b"hello"), "application/octet-stream");
        assert_eq!(
            detect_image_type(&codec::tests::sample_png(2, 2)),
            "image/png"
        );
    }
}
