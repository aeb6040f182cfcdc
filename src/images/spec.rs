use crate::config::AppConfig;
use crate::images::ImageError;

/// Output containers the codec can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
    Tiff,
    Avif,
}

impl OutputFormat {
    pub fn from_token(token: &str) -> Result<Self, ImageError> {
        match token.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "gif" => Ok(OutputFormat::Gif),
            "bmp" => Ok(OutputFormat::Bmp),
            "tif" | "tiff" => Ok(OutputFormat::Tiff),
            "avif" => Ok(OutputFormat::Avif),
            other => Err(ImageError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Only lossy encoders take a quality setting.
    pub fn is_lossy(&self) -> bool {
        matches!(self, OutputFormat::Jpeg | OutputFormat::Webp | OutputFormat::Avif)
    }
}

/// Upper bounds on the size of a generated image.
///
/// Checked against the requested dimensions before anything is decoded, and
/// again by the codec once the source size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_dimension: u32,
    pub max_pixels: u64,
}

impl From<&AppConfig> for OutputLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_dimension: config.transform_max_dimension,
            max_pixels: config.transform_max_pixels,
        }
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits::from(&AppConfig::default())
    }
}

impl OutputLimits {
    pub fn check(&self, width: u32, height: u32) -> Result<(), ImageError> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(ImageError::InvalidParameter(format!(
                "output of {}x{} exceeds the {}px per-side limit",
                width, height, self.max_dimension
            )));
        }
        if width as u64 * height as u64 > self.max_pixels {
            return Err(ImageError::InvalidParameter(format!(
                "output of {}x{} exceeds the {} pixel limit",
                width, height, self.max_pixels
            )));
        }
        Ok(())
    }
}

/// Transformation requested for a single retrieval.
///
/// Built from query parameters on every request and never persisted; its only
/// durable trace is the cache key it produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TransformSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Lowercase format token as requested. `None` keeps the source format.
    pub format: Option<String>,
    pub quality: Option<u8>,
    pub rotate: Option<i32>,
}

impl TransformSpec {
    /// Parse raw query values. Empty values count as absent.
    pub fn from_query(
        width: Option<&str>,
        height: Option<&str>,
        format: Option<&str>,
        quality: Option<&str>,
        rotate: Option<&str>,
    ) -> Result<Self, ImageError> {
        let format = match present(format) {
            Some(raw) => {
                let token = raw.to_ascii_lowercase();
                OutputFormat::from_token(&token)?;
                Some(token)
            }
            None => None,
        };

        Ok(TransformSpec {
            width: present(width).map(|v| parse_dimension("w", v)).transpose()?,
            height: present(height).map(|v| parse_dimension("h", v)).transpose()?,
            format,
            quality: present(quality).map(parse_quality).transpose()?,
            rotate: present(rotate).map(parse_rotate).transpose()?,
        })
    }

    /// Reject requested sizes over `limits`. A missing side counts as 1 here;
    /// the codec rechecks once the aspect ratio is known.
    pub fn check_limits(&self, limits: &OutputLimits) -> Result<(), ImageError> {
        match (self.width, self.height) {
            (None, None) => Ok(()),
            (width, height) => limits.check(width.unwrap_or(1), height.unwrap_or(1)),
        }
    }

    /// Same spec with the format pinned, used once the source extension is known.
    pub fn with_format(&self, token: &str) -> Self {
        TransformSpec {
            format: Some(token.to_ascii_lowercase()),
            ..self.clone()
        }
    }
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_dimension(name: &str, raw: &str) -> Result<u32, ImageError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ImageError::InvalidParameter(format!(
            "{} must be a positive integer, got '{}'",
            name, raw
        ))),
    }
}

fn parse_quality(raw: &str) -> Result<u8, ImageError> {
    match raw.parse::<u8>() {
        Ok(value) if (1..=100).contains(&value) => Ok(value),
        _ => Err(ImageError::InvalidParameter(format!(
            "q must be an integer between 1 and 100, got '{}'",
            raw
        ))),
    }
}

fn parse_rotate(raw: &str) -> Result<i32, ImageError> {
    raw.parse::<i32>().map_err(|_| {
        ImageError::InvalidParameter(format!("rotate must be an integer, got '{}'", raw))
    })
}
