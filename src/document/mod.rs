//! Document normalization - turns images and PDFs into bounded inline images.
//!
//! A source is either a `data:` URL or a public http(s) URL. Its bytes are
//! decoded as a still image first and rendered as a PDF second; every
//! resulting page is shrunk to fit [`MAX_PIXELS`] and re-encoded as JPEG.

mod pdf;

use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::Result;

/// Upper bound on width × height of a single page sent to a model.
pub const MAX_PIXELS: u64 = 10_000_000;

/// Resolution PDF pages are rasterized at.
pub const PDF_RENDER_DPI: f32 = 300.0;

const JPEG_QUALITY: u8 = 85;

/// An image ready to be embedded in a model message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime: String,
    /// Base64 payload, no prefix.
    pub data: String,
}

impl InlineImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// Decode a blob into bitmap pages: one page for a still image, one per page
/// for a PDF. Returns `None` when neither decoder understands the bytes.
pub fn decode_pages(bytes: &[u8]) -> Option<Vec<DynamicImage>> {
    if let Ok(img) = image::load_from_memory(bytes) {
        return Some(vec![img]);
    }
    pdf::render_pages(bytes, PDF_RENDER_DPI)
}

/// Dimensions after shrinking `width × height` to fit into `budget` pixels.
///
/// Aspect ratio is preserved up to rounding and neither side drops below 1.
pub fn fit_to_budget(width: u32, height: u32, budget: u64) -> (u32, u32) {
    let total = width as u64 * height as u64;
    if total <= budget {
        return (width, height);
    }
    let scale = (budget as f64 / total as f64).sqrt();
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    // Clamping a degenerate side up to 1 can push the other past the budget.
    let w = w.min((budget / h as u64).min(u32::MAX as u64) as u32).max(1);
    let h = h.min((budget / w as u64).min(u32::MAX as u64) as u32).max(1);
    (w, h)
}

/// Shrink `img` to fit `budget` pixels. Images within budget are returned as-is.
pub fn downscale(img: DynamicImage, budget: u64) -> DynamicImage {
    let (w, h) = fit_to_budget(img.width(), img.height(), budget);
    if (w, h) == (img.width(), img.height()) {
        return img;
    }
    debug!("Downscaling page {}x{} -> {}x{}", img.width(), img.height(), w, h);
    img.resize_exact(w, h, FilterType::Triangle)
}

/// Re-encode a page as JPEG.
pub fn encode_jpeg(img: &DynamicImage) -> Result<InlineImage> {
    let rgb = img.to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
    encoder.encode_image(&rgb)?;
    Ok(InlineImage {
        mime: "image/jpeg".to_string(),
        data: BASE64.encode(&bytes),
    })
}

/// Decode, downscale and re-encode one blob. `reference` names the blob in
/// error messages.
pub fn normalize(bytes: &[u8], reference: &str) -> Result<Vec<InlineImage>> {
    let pages = decode_pages(bytes).ok_or_else(|| Error::UnsupportedFormat {
        reference: reference.to_string(),
    })?;
    pages
        .into_iter()
        .map(|page| encode_jpeg(&downscale(page, MAX_PIXELS)))
        .collect()
}

/// Resolves image sources and normalizes them as one batch.
#[derive(Clone)]
pub struct Normalizer {
    client: reqwest::Client,
}

impl Normalizer {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Fetch the raw bytes behind a `data:` or http(s) URL.
    pub async fn load_source(&self, source: &str) -> Result<Vec<u8>> {
        if source.starts_with("data:") {
            let (_, payload) = source
                .split_once(',')
                .ok_or_else(|| Error::Tool(format!("Malformed data URL: {}", truncate(source))))?;
            return BASE64
                .decode(payload.trim())
                .map_err(|e| Error::Tool(format!("Invalid base64 in data URL: {}", e)));
        }

        let url = Url::parse(source)
            .map_err(|e| Error::Tool(format!("Invalid URL {}: {}", source, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Tool(format!("Unsupported URL scheme: {}", source)));
        }

        let response = self
            .client
            .get(url)
            .header("User-Agent", "breeze/0.1")
            .send()
            .await
            .map_err(|e| Error::Tool(format!("Failed to fetch {}: {}", source, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Tool(format!("Failed to fetch {}: HTTP {}", source, status)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {}: {}", source, e)))?;
        Ok(bytes.to_vec())
    }

    /// Normalize every source. The first failing source aborts the batch and
    /// its error message is returned instead of partial results.
    ///
    /// Decoding and re-encoding run on the blocking pool.
    pub async fn normalize_all(&self, sources: &[String]) -> std::result::Result<Vec<InlineImage>, String> {
        let mut images = Vec::new();
        for source in sources {
            let reference = truncate(source);
            let pages = match self.load_source(source).await {
                Ok(bytes) => tokio::task::spawn_blocking(move || normalize(&bytes, &reference))
                    .await
                    .unwrap_or_else(|e| Err(Error::Tool(format!("Image conversion failed: {}", e)))),
                Err(e) => Err(e),
            };
            match pages {
                Ok(pages) => images.extend(pages),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(images)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Inline data URLs can be megabytes long; keep error messages readable.
fn truncate(source: &str) -> String {
    const MAX: usize = 80;
    if source.len() <= MAX {
        return source.to_string();
    }
    let mut end = MAX;
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &source[..end])
}
