use std::collections::HashMap;
use std::path::Path;

use crate::config::FilterConfig;
use crate::entities::{BBox, FieldDetection};
use crate::pdf::bind_pdfium;

/// Drops detections whose area is mostly covered by printed text, so the
/// filling stage only annotates genuinely empty input areas.
///
/// The overlap measure is intersection-over-field-area, not IoU: a field
/// is rejected once enough of *it* is covered, no matter how large the
/// text block is. When text extraction fails the filter fails open and
/// returns its input untouched.
#[derive(Clone)]
pub struct TextOverlapFilter {
    overlap_threshold: f64,
}

impl Default for TextOverlapFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl TextOverlapFilter {
    pub fn new(config: FilterConfig) -> Self {
        let mut threshold = config.overlap_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            tracing::warn!("overlap threshold {threshold} outside [0, 1], clamping");
            threshold = threshold.clamp(0.0, 1.0);
        }
        Self {
            overlap_threshold: threshold,
        }
    }

    pub fn overlap_threshold(&self) -> f64 {
        self.overlap_threshold
    }

    pub fn filter(&self, fields: Vec<FieldDetection>, pdf_path: &Path) -> Vec<FieldDetection> {
        if fields.is_empty() || self.overlap_threshold >= 1.0 {
            return fields;
        }

        let text_regions = match extract_text_regions(pdf_path) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::error!("text extraction failed, returning fields unfiltered: {e:?}");
                return fields;
            }
        };

        self.filter_with_regions(fields, &text_regions)
    }

    /// Core of the filter, separated from PDF access so it can run against
    /// arbitrary region sets.
    pub fn filter_with_regions(
        &self,
        fields: Vec<FieldDetection>,
        text_regions: &HashMap<usize, Vec<BBox>>,
    ) -> Vec<FieldDetection> {
        if self.overlap_threshold >= 1.0 {
            return fields;
        }

        let total = fields.len();
        let kept: Vec<FieldDetection> = fields
            .into_iter()
            .filter(|field| {
                let regions = text_regions
                    .get(&field.page_index)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let overlap = text_overlap_ratio(&field.bbox, regions);
                // A threshold of 0.0 rejects any overlap at all, but a
                // field completely clear of text always survives.
                let keep = overlap == 0.0 || overlap < self.overlap_threshold;
                if !keep {
                    tracing::debug!(
                        "rejecting '{}' on page {}: text overlap {:.0}%",
                        field.label,
                        field.page_index,
                        overlap * 100.0
                    );
                }
                keep
            })
            .collect();

        tracing::debug!("text-overlap filter kept {}/{total} fields", kept.len());
        kept
    }
}

/// Fraction of the field covered by text, capped at 1.0 (text blocks may
/// overlap each other).
pub fn text_overlap_ratio(field_bbox: &BBox, text_regions: &[BBox]) -> f64 {
    let field_area = field_bbox.area();
    if field_area <= 0.0 || text_regions.is_empty() {
        return 0.0;
    }
    let total_intersection: f64 = text_regions
        .iter()
        .map(|region| field_bbox.intersection_area(region))
        .sum();
    f64::min(1.0, total_intersection / field_area)
}

/// Extract the text blocks of every page as normalized bottom-left bboxes.
pub fn extract_text_regions(
    pdf_path: &Path,
) -> Result<HashMap<usize, Vec<BBox>>, crate::error::DetectError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(crate::error::DetectError::Pdf)?;

    let mut regions_by_page = HashMap::new();
    for (page_index, page) in document.pages().iter().enumerate() {
        let page_width = page.width().value as f64;
        let page_height = page.height().value as f64;
        if page_width <= 0.0 || page_height <= 0.0 {
            continue;
        }

        let text = match page.text() {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("no text on page {page_index}: {e:?}");
                continue;
            }
        };

        let mut regions = Vec::new();
        for segment in text.segments().iter() {
            let content = segment.text();
            if content.trim().is_empty() {
                continue;
            }
            let bounds = segment.bounds();
            let left = bounds.left.value as f64;
            let bottom = bounds.bottom.value as f64;
            let right = bounds.right.value as f64;
            let top = bounds.top.value as f64;

            if let Some(bbox) = BBox::clamped(
                left / page_width,
                bottom / page_height,
                (right - left) / page_width,
                (top - bottom) / page_height,
            ) {
                regions.push(bbox);
            }
        }
        regions_by_page.insert(page_index, regions);
    }

    Ok(regions_by_page)
}
