//! PDF rasterization through a system-installed pdfium library.

use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

/// Render every page of `bytes` at `dpi`. Returns `None` when the bytes are
/// not a PDF or pdfium is not available on this machine.
pub(super) fn render_pages(bytes: &[u8], dpi: f32) -> Option<Vec<DynamicImage>> {
    let bindings = match Pdfium::bind_to_system_library() {
        Ok(bindings) => bindings,
        Err(e) => {
            warn!("pdfium unavailable, PDF input cannot be rendered: {}", e);
            return None;
        }
    };
    let pdfium = Pdfium::new(bindings);
    let document = match pdfium.load_pdf_from_byte_slice(bytes, None) {
        Ok(document) => document,
        Err(e) => {
            debug!("Not a PDF: {}", e);
            return None;
        }
    };

    let config = PdfRenderConfig::new().scale_page_by_factor(dpi / 72.0);
    let mut pages = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let bitmap = match page.render_with_config(&config) {
            Ok(bitmap) => bitmap,
            Err(e) => {
                warn!("Failed to render PDF page {}: {}", index + 1, e);
                continue;
            }
        };
        let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
        if let Some(img) = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()) {
            pages.push(DynamicImage::ImageRgba8(img));
        }
    }
    debug!("Rendered {} PDF page(s) at {} DPI", pages.len(), dpi);
    (!pages.is_empty()).then_some(pages)
}
