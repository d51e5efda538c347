use std::path::Path;

use pdfium_render::prelude::*;

use crate::config::StructureConfig;
use crate::entities::{BBox, DetectionSource, FieldDetection, FieldType};
use crate::error::DetectError;
use crate::pdf::bind_pdfium;

const WIDGET_CONFIDENCE: f64 = 0.98;
const ANNOTATION_CONFIDENCE: f64 = 0.95;
const DRAWN_RECT_CONFIDENCE: f64 = 0.75;
const XOBJECT_CONFIDENCE: f64 = 0.70;

/// IoU above which two structure detections on the same page are the same
/// field.
const INTRA_DEDUP_IOU: f64 = 0.5;

const MAX_INFERRED_LABEL_LEN: usize = 100;

/// A text segment in PDF points, bottom-left origin. Cached per page so
/// label inference does not re-walk the page text for every candidate.
struct TextSegmentRect {
    left: f64,
    bottom: f64,
    right: f64,
    top: f64,
    text: String,
}

/// Extracts form-field candidates from PDF structure: interactive widgets,
/// loose widget annotations, drawn rectangles and XObject blocks.
///
/// Deterministic and independent of page rendering; this is the highest
/// priority detection source.
#[derive(Clone)]
pub struct StructureDetector {
    config: StructureConfig,
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self::new(StructureConfig::default())
    }
}

impl StructureDetector {
    pub fn new(config: StructureConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, pdf_path: &Path) -> Result<Vec<FieldDetection>, DetectError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(DetectError::Pdf)?;

        let mut detections = Vec::new();

        for (page_index, page) in document.pages().iter().enumerate() {
            let page_width = page.width().value as f64;
            let page_height = page.height().value as f64;
            if page_width <= 0.0 || page_height <= 0.0 {
                continue;
            }

            let segments = match page.text() {
                Ok(text) => collect_text_segments(&text),
                Err(e) => {
                    tracing::debug!("no text available for label inference on page {page_index}: {e:?}");
                    Vec::new()
                }
            };

            self.detect_annotations(
                &page,
                page_index,
                page_width,
                page_height,
                &segments,
                &mut detections,
            );
            self.detect_page_objects(
                &page,
                page_index,
                page_width,
                page_height,
                &segments,
                &mut detections,
            );
        }

        Ok(dedup_by_iou(detections))
    }

    /// Widget annotations: native form fields first, then loose widgets
    /// that are not wired into the document's form dictionary.
    fn detect_annotations(
        &self,
        page: &PdfPage,
        page_index: usize,
        page_width: f64,
        page_height: f64,
        segments: &[TextSegmentRect],
        out: &mut Vec<FieldDetection>,
    ) {
        let mut widget_count = 0usize;
        let mut loose_count = 0usize;

        for annotation in page.annotations().iter() {
            if annotation.annotation_type() != PdfPageAnnotationType::Widget {
                continue;
            }
            let rect = match annotation.bounds() {
                Ok(rect) => rect,
                Err(e) => {
                    tracing::debug!("widget annotation without bounds on page {page_index}: {e:?}");
                    continue;
                }
            };
            let left = rect.left.value as f64;
            let bottom = rect.bottom.value as f64;
            let right = rect.right.value as f64;
            let top = rect.top.value as f64;

            let Some(bbox) = normalize_pdf_rect(left, bottom, right, top, page_width, page_height)
            else {
                continue;
            };

            let (field_type, declared_name, confidence, fallback) =
                match annotation.as_form_field() {
                    Some(field) => {
                        widget_count += 1;
                        let field_type = self.map_form_field_type(field, &bbox);
                        (
                            field_type,
                            field.name(),
                            WIDGET_CONFIDENCE,
                            format!("Field {widget_count}"),
                        )
                    }
                    None => {
                        loose_count += 1;
                        (
                            self.classify_by_geometry(&bbox),
                            None,
                            ANNOTATION_CONFIDENCE,
                            format!("Widget {loose_count}"),
                        )
                    }
                };

            let label = declared_name
                .filter(|name| !name.trim().is_empty())
                .or_else(|| {
                    self.infer_label(segments, left, bottom, right, top, page_width, page_height)
                })
                .unwrap_or(fallback);

            push_detection(
                out,
                page_index,
                bbox,
                field_type,
                label,
                confidence,
                None,
            );
        }
    }

    /// Drawn rectangles and XObject/image blocks. Many official forms draw
    /// their input boxes without embedding any interactive field.
    fn detect_page_objects(
        &self,
        page: &PdfPage,
        page_index: usize,
        page_width: f64,
        page_height: f64,
        segments: &[TextSegmentRect],
        out: &mut Vec<FieldDetection>,
    ) {
        let mut rect_count = 0usize;
        let mut xobject_count = 0usize;

        for object in page.objects().iter() {
            let (confidence, is_xobject) = match object {
                PdfPageObject::Path(_) => (DRAWN_RECT_CONFIDENCE, false),
                PdfPageObject::Image(_) | PdfPageObject::XObjectForm(_) => {
                    (XOBJECT_CONFIDENCE, true)
                }
                _ => continue,
            };

            let bounds = match object.bounds() {
                Ok(bounds) => bounds,
                Err(e) => {
                    tracing::debug!("page object without bounds on page {page_index}: {e:?}");
                    continue;
                }
            };
            // Page-object bounds are quad points; take the enclosing
            // axis-aligned rect.
            let left = bounds.left().value as f64;
            let bottom = bounds.bottom().value as f64;
            let right = bounds.right().value as f64;
            let top = bounds.top().value as f64;

            if !self.is_field_candidate(left, bottom, right, top, page_width, page_height) {
                continue;
            }
            let Some(bbox) = normalize_pdf_rect(left, bottom, right, top, page_width, page_height)
            else {
                continue;
            };

            let fallback = if is_xobject {
                xobject_count += 1;
                format!("XObject Field {xobject_count}")
            } else {
                rect_count += 1;
                format!("Field {rect_count}")
            };
            let label = self
                .infer_label(segments, left, bottom, right, top, page_width, page_height)
                .unwrap_or(fallback);

            push_detection(
                out,
                page_index,
                bbox,
                self.classify_by_geometry(&bbox),
                label,
                confidence,
                None,
            );
        }
    }

    fn map_form_field_type(&self, field: &PdfFormField, bbox: &BBox) -> FieldType {
        match field.field_type() {
            PdfFormFieldType::Text => {
                if bbox.height >= self.config.multiline_min_height_ratio {
                    FieldType::Multiline
                } else {
                    FieldType::Text
                }
            }
            PdfFormFieldType::Checkbox
            | PdfFormFieldType::RadioButton
            | PdfFormFieldType::PushButton => FieldType::Checkbox,
            PdfFormFieldType::Signature => FieldType::Signature,
            PdfFormFieldType::ComboBox | PdfFormFieldType::ListBox => FieldType::Text,
            _ => FieldType::Unknown,
        }
    }

    /// Small near-square boxes are checkboxes, wide short boxes are
    /// signature lines, everything else takes text.
    fn classify_by_geometry(&self, bbox: &BBox) -> FieldType {
        let aspect = bbox.aspect_ratio();
        let (aspect_lo, aspect_hi) = self.config.checkbox_aspect_ratio_range;
        if bbox.width < self.config.checkbox_max_size_ratio
            && bbox.height < self.config.checkbox_max_size_ratio
            && (aspect_lo..=aspect_hi).contains(&aspect)
        {
            return FieldType::Checkbox;
        }
        if aspect >= self.config.signature_min_aspect_ratio
            && bbox.height <= self.config.signature_max_height_ratio
        {
            return FieldType::Signature;
        }
        FieldType::Text
    }

    fn is_field_candidate(
        &self,
        left: f64,
        bottom: f64,
        right: f64,
        top: f64,
        page_width: f64,
        page_height: f64,
    ) -> bool {
        let width = right - left;
        let height = top - bottom;
        if width <= 0.0 || height <= 0.0 {
            return false;
        }
        let width_ratio = width / page_width;
        let height_ratio = height / page_height;
        if width_ratio < self.config.min_field_width_ratio {
            return false;
        }
        if height_ratio < self.config.min_field_height_ratio
            || height_ratio > self.config.max_field_height_ratio
        {
            return false;
        }
        let aspect = width / height;
        (0.1..=50.0).contains(&aspect)
    }

    /// Look for a label in the band to the left of the rect, then in the
    /// band above it.
    fn infer_label(
        &self,
        segments: &[TextSegmentRect],
        left: f64,
        bottom: f64,
        right: f64,
        top: f64,
        page_width: f64,
        page_height: f64,
    ) -> Option<String> {
        let distance_x = page_width * self.config.label_search_distance;
        let distance_y = page_height * self.config.label_search_distance;

        let left_band = (f64::max(0.0, left - distance_x), bottom, left, top);
        let above_band = (left, top, right, top + distance_y);

        for band in [left_band, above_band] {
            if let Some(label) = clean_label(&band_text(segments, band)) {
                return Some(label);
            }
        }
        None
    }
}

fn push_detection(
    out: &mut Vec<FieldDetection>,
    page_index: usize,
    bbox: BBox,
    field_type: FieldType,
    label: String,
    confidence: f64,
    template_key: Option<String>,
) {
    match FieldDetection::new(
        page_index,
        bbox,
        field_type,
        label,
        confidence,
        DetectionSource::Structure,
        template_key,
    ) {
        Ok(detection) => out.push(detection),
        Err(e) => tracing::debug!("discarding structure candidate: {e}"),
    }
}

fn collect_text_segments(text: &PdfPageText) -> Vec<TextSegmentRect> {
    text.segments()
        .iter()
        .filter_map(|segment| {
            let content = segment.text();
            let content = content.trim();
            if content.is_empty() {
                return None;
            }
            let bounds = segment.bounds();
            Some(TextSegmentRect {
                left: bounds.left.value as f64,
                bottom: bounds.bottom.value as f64,
                right: bounds.right.value as f64,
                top: bounds.top.value as f64,
                text: content.to_string(),
            })
        })
        .collect()
}

/// Concatenate the text of every segment intersecting the band, in reading
/// order (top-down, then left-to-right).
fn band_text(segments: &[TextSegmentRect], band: (f64, f64, f64, f64)) -> String {
    let (bx0, by0, bx1, by1) = band;
    let mut hits: Vec<&TextSegmentRect> = segments
        .iter()
        .filter(|s| s.left < bx1 && s.right > bx0 && s.bottom < by1 && s.top > by0)
        .collect();
    hits.sort_by(|a, b| {
        b.top
            .total_cmp(&a.top)
            .then_with(|| a.left.total_cmp(&b.left))
    });
    hits.iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse whitespace, strip trailing punctuation, cap the length; reject
/// labels with fewer than two useful characters.
fn clean_label(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches([':', ';', ',', '.', '!', '?', '-', '_', ' ']);
    let capped: String = trimmed.chars().take(MAX_INFERRED_LABEL_LEN).collect();

    if capped.chars().filter(|c| c.is_alphanumeric()).count() < 2 {
        return None;
    }
    Some(capped)
}

/// Drop lower-confidence detections that heavily overlap a kept one on the
/// same page.
fn dedup_by_iou(mut detections: Vec<FieldDetection>) -> Vec<FieldDetection> {
    if detections.len() <= 1 {
        return detections;
    }
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<FieldDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let duplicate = kept.iter().any(|existing| {
            existing.page_index == candidate.page_index
                && candidate.bbox.iou(&existing.bbox) > INTRA_DEDUP_IOU
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

fn normalize_pdf_rect(
    left: f64,
    bottom: f64,
    right: f64,
    top: f64,
    page_width: f64,
    page_height: f64,
) -> Option<BBox> {
    BBox::clamped(
        left / page_width,
        bottom / page_height,
        (right - left) / page_width,
        (top - bottom) / page_height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::BBox;

    fn detector() -> StructureDetector {
        StructureDetector::default()
    }

    fn detection(page_index: usize, bbox: BBox, confidence: f64) -> FieldDetection {
        FieldDetection::new(
            page_index,
            bbox,
            FieldType::Text,
            "field",
            confidence,
            DetectionSource::Structure,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_classify_checkbox() {
        let bbox = BBox::new(0.1, 0.1, 0.02, 0.02).unwrap();
        assert_eq!(detector().classify_by_geometry(&bbox), FieldType::Checkbox);
    }

    #[test]
    fn test_classify_signature() {
        let bbox = BBox::new(0.1, 0.1, 0.4, 0.03).unwrap();
        assert_eq!(detector().classify_by_geometry(&bbox), FieldType::Signature);
    }

    #[test]
    fn test_classify_text() {
        let bbox = BBox::new(0.1, 0.1, 0.3, 0.1).unwrap();
        assert_eq!(detector().classify_by_geometry(&bbox), FieldType::Text);
    }

    #[test]
    fn test_field_candidate_filter() {
        let d = detector();
        // A 200x20pt box on a 612x792 page passes.
        assert!(d.is_field_candidate(100.0, 100.0, 300.0, 120.0, 612.0, 792.0));
        // Too narrow.
        assert!(!d.is_field_candidate(100.0, 100.0, 105.0, 120.0, 612.0, 792.0));
        // Too tall.
        assert!(!d.is_field_candidate(100.0, 100.0, 300.0, 400.0, 612.0, 792.0));
        // Extreme aspect ratio.
        assert!(!d.is_field_candidate(0.0, 100.0, 612.0, 104.1, 612.0, 792.0));
    }

    #[test]
    fn test_normalize_pdf_rect() {
        // A 200x30pt widget near the top of a US Letter page.
        let bbox = normalize_pdf_rect(100.0, 662.0, 300.0, 692.0, 612.0, 792.0).unwrap();
        assert!((bbox.x - 0.1634).abs() < 0.005);
        assert!((bbox.y - 0.8359).abs() < 0.005);
        assert!((bbox.width - 0.3268).abs() < 0.005);
        assert!((bbox.height - 0.0379).abs() < 0.005);

        // Degenerate rects disappear.
        assert!(normalize_pdf_rect(100.0, 100.0, 100.2, 100.2, 612.0, 792.0).is_none());
    }

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label("  Full   Name: "), Some("Full Name".to_string()));
        assert_eq!(clean_label("Date of Birth:"), Some("Date of Birth".to_string()));
        assert_eq!(clean_label("....::"), None);
        assert_eq!(clean_label("x"), None);
        assert_eq!(clean_label(""), None);

        let long = "a".repeat(200);
        assert_eq!(clean_label(&long).unwrap().len(), MAX_INFERRED_LABEL_LEN);
    }

    #[test]
    fn test_band_text_reading_order() {
        let segments = vec![
            TextSegmentRect {
                left: 10.0,
                bottom: 80.0,
                right: 60.0,
                top: 90.0,
                text: "Last".into(),
            },
            TextSegmentRect {
                left: 10.0,
                bottom: 100.0,
                right: 60.0,
                top: 110.0,
                text: "First".into(),
            },
            TextSegmentRect {
                left: 500.0,
                bottom: 100.0,
                right: 550.0,
                top: 110.0,
                text: "Elsewhere".into(),
            },
        ];
        let text = band_text(&segments, (0.0, 70.0, 100.0, 120.0));
        assert_eq!(text, "First Last");
    }

    #[test]
    fn test_dedup_keeps_highest_confidence() {
        let a = BBox::new(0.1, 0.1, 0.3, 0.05).unwrap();
        let nearly_a = BBox::new(0.105, 0.1, 0.3, 0.05).unwrap();
        let far = BBox::new(0.6, 0.6, 0.3, 0.05).unwrap();

        let kept = dedup_by_iou(vec![
            detection(0, a, 0.75),
            detection(0, nearly_a, 0.98),
            detection(0, far, 0.70),
            // Same bbox on another page is not a duplicate.
            detection(1, a, 0.75),
        ]);

        assert_eq!(kept.len(), 3);
        assert!(kept
            .iter()
            .any(|d| d.page_index == 0 && (d.confidence - 0.98).abs() < 1e-9));
        assert!(!kept
            .iter()
            .any(|d| d.page_index == 0 && (d.confidence - 0.75).abs() < 1e-9));
    }
}
