use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat};
use pdfium_render::prelude::*;

use crate::error::DetectError;
use crate::pdf::bind_pdfium;

/// One rasterized page. Pixel origin is top-left (image convention);
/// detectors are responsible for flipping the y axis when they normalize.
pub struct PageRaster {
    pub page_index: usize,
    pub width_px: u32,
    pub height_px: u32,
    pub image: DynamicImage,
}

impl PageRaster {
    /// A raster that failed to render. Kept in the sequence so page indices
    /// stay aligned; downstream detectors see an effectively blank page.
    fn sentinel(page_index: usize) -> Self {
        Self {
            page_index,
            width_px: 1,
            height_px: 1,
            image: DynamicImage::ImageRgb8(ImageBuffer::new(1, 1)),
        }
    }
}

fn scale_for_dpi(dpi: u32) -> f32 {
    dpi as f32 / 72.0
}

/// Rasterize every page of the document at the given DPI.
///
/// A page that fails to render yields a 1x1 sentinel raster; only failure
/// to open the document itself is fatal.
pub fn render_pages(pdf_path: &Path, dpi: u32) -> Result<Vec<PageRaster>, DetectError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(DetectError::Pdf)?;

    let render_config = PdfRenderConfig::default().scale_page_by_factor(scale_for_dpi(dpi));

    let mut rasters = Vec::new();
    for (page_index, page) in document.pages().iter().enumerate() {
        match page.render_with_config(&render_config) {
            Ok(bitmap) => {
                let image = bitmap.as_image();
                rasters.push(PageRaster {
                    page_index,
                    width_px: image.width(),
                    height_px: image.height(),
                    image,
                });
            }
            Err(e) => {
                tracing::error!("failed to render page {page_index}: {e:?}");
                rasters.push(PageRaster::sentinel(page_index));
            }
        }
    }

    Ok(rasters)
}

/// Rasterize every page to PNG bytes at the given DPI.
///
/// Pages that fail to render or encode are skipped (the vision detector
/// tolerates holes in the page sequence).
pub fn render_pages_png(pdf_path: &Path, dpi: u32) -> Result<Vec<(usize, Vec<u8>)>, DetectError> {
    let mut pages = Vec::new();
    for raster in render_pages(pdf_path, dpi)? {
        if raster.width_px <= 1 && raster.height_px <= 1 {
            continue;
        }
        let mut png = Vec::new();
        match raster
            .image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        {
            Ok(()) => pages.push((raster.page_index, png)),
            Err(e) => {
                tracing::error!("failed to encode page {} as PNG: {e:?}", raster.page_index);
            }
        }
    }
    Ok(pages)
}

pub fn page_count(pdf_path: &Path) -> Result<usize, DetectError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(DetectError::Pdf)?;
    Ok(document.pages().len() as usize)
}
