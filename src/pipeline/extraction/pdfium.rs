//! PDF page rasterization via Google PDFium.
//!
//! Renders a single statement page to PNG as OCR input, at a fixed
//! upscaling factor over the page's native size.
//!
//! `PdfiumRasterizer` is stateless (`Send + Sync`). Each operation binds a
//! fresh `Pdfium` handle from the process-wide runtime because the upstream
//! type is `!Send`.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgb, RgbImage};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::runtime::pdf_runtime;
use super::types::{PageImage, PageRasterizer};
use super::ExtractionError;

/// Maximum dimension (width or height) for rendered page images.
/// Prevents OOM on extremely large pages or absurd scale settings.
const MAX_DIMENSION_PX: u32 = 4096;

/// Renders statement pages to PNG images using Google PDFium.
pub struct PdfiumRasterizer;

/// Map PDF load errors, singling out encrypted documents.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = format!("{e}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDF: {e}"),
        }
    }
}

/// Target pixel size for a page of `width_points` x `height_points` at
/// `scale`. The longer side is capped at `MAX_DIMENSION_PX` keeping the
/// aspect ratio; neither side drops below one pixel.
fn compute_render_dimensions(width_points: f32, height_points: f32, scale: f32) -> (u32, u32) {
    let w = (width_points * scale).max(1.0);
    let h = (height_points * scale).max(1.0);
    let shrink = (MAX_DIMENSION_PX as f32 / w.max(h)).min(1.0);
    let px = |side: f32| ((side * shrink) as u32).clamp(1, MAX_DIMENSION_PX);
    (px(w), px(h))
}

/// Encode a rendered page as PNG.
fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        scale: f32,
    ) -> Result<PageImage, ExtractionError> {
        let pdfium = pdf_runtime()?.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;

        let pages = document.pages();

        let index = u16::try_from(page_index).map_err(|_| ExtractionError::PdfRendering {
            page: page_index,
            reason: format!("Page index {page_index} exceeds u16 maximum"),
        })?;

        let page = pages.get(index).map_err(|_| ExtractionError::PdfRendering {
            page: page_index,
            reason: format!(
                "Page {page_index} out of range (document has {} pages)",
                pages.len()
            ),
        })?;

        let width_points = page.width().value;
        let height_points = page.height().value;
        let (target_w, target_h) = compute_render_dimensions(width_points, height_points, scale);

        if (target_w as f32) < width_points * scale - 1.0 {
            warn!(
                page = page_index,
                width = target_w,
                height = target_h,
                "Oversized page capped to {MAX_DIMENSION_PX}px"
            );
        }

        let config = PdfRenderConfig::new()
            .set_target_width(target_w as i32)
            .set_maximum_height(target_h as i32);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| ExtractionError::PdfRendering {
                page: page_index,
                reason: format!("Rendering failed: {e}"),
            })?;

        let rendered = bitmap.as_image();
        let (width, height) = rendered.dimensions();
        let png = encode_png(&rendered)?;

        debug!(
            page = page_index,
            width,
            height,
            png_size = png.len(),
            "Rendered PDF page to PNG"
        );

        Ok(PageImage {
            page_index,
            width,
            height,
            png,
        })
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock rasterizer producing a blank 1x1 PNG for each page in range.
pub struct MockPageRasterizer {
    page_count: usize,
}

impl MockPageRasterizer {
    pub fn new(page_count: usize) -> Self {
        Self { page_count }
    }
}

impl PageRasterizer for MockPageRasterizer {
    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_index: usize,
        _scale: f32,
    ) -> Result<PageImage, ExtractionError> {
        if page_index >= self.page_count {
            return Err(ExtractionError::PdfRendering {
                page: page_index,
                reason: format!("Page {page_index} out of range ({} pages)", self.page_count),
            });
        }
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([255, 255, 255])));
        Ok(PageImage {
            page_index,
            width: 1,
            height: 1,
            png: encode_png(&blank)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_page_sizes_at_default_scale() {
        // (width pt, height pt) -> (width px, height px)
        let cases = [
            ((595.0, 842.0), (892, 1263)), // A4
            ((612.0, 792.0), (918, 1188)), // US Letter
        ];
        for ((w, h), expected) in cases {
            assert_eq!(compute_render_dimensions(w, h, 1.5), expected);
        }
    }

    #[test]
    fn oversized_pages_are_capped_keeping_ratio() {
        let (w, h) = compute_render_dimensions(4096.0, 8192.0, 1.0);
        assert_eq!((w, h), (MAX_DIMENSION_PX / 2, MAX_DIMENSION_PX));

        let (w, h) = compute_render_dimensions(8192.0, 10.0, 1.0);
        assert_eq!((w, h), (MAX_DIMENSION_PX, 5));
    }

    #[test]
    fn degenerate_page_is_one_pixel() {
        assert_eq!(compute_render_dimensions(0.0, 0.0, 1.5), (1, 1));
    }

    #[test]
    fn rasterizing_without_runtime_fails() {
        // Only meaningful when no other test initialized the runtime.
        if pdf_runtime().is_err() {
            let err = PdfiumRasterizer.render_page(b"%PDF-1.4", 0, 1.5).unwrap_err();
            assert!(matches!(err, ExtractionError::RuntimeNotInitialized));
        }
    }

    #[test]
    fn mock_renders_pages_in_range() {
        let rasterizer = MockPageRasterizer::new(2);
        let image = rasterizer.render_page(&[], 1, 1.5).unwrap();
        assert_eq!(image.page_index, 1);
        assert_eq!(&image.png[1..4], b"PNG");

        let err = rasterizer.render_page(&[], 2, 1.5).unwrap_err();
        assert!(matches!(err, ExtractionError::PdfRendering { page: 2, .. }));
        assert!(MockPageRasterizer::new(0).render_page(&[], 0, 1.5).is_err());
    }
}
