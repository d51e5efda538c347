use image::{DynamicImage, GrayImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::adaptive_threshold;

use crate::config::GeometricConfig;
use crate::entities::{BBox, DetectionSource, FieldDetection, FieldType};

const THRESHOLD_BLOCK_RADIUS: u32 = 5;

const LINE_CONFIDENCE: f64 = 0.85;
const LINE_MIN_WIDTH_RATIO: f64 = 0.10;
const LINE_MAX_HEIGHT_RATIO: f64 = 0.01;
const LINE_MIN_ASPECT: f64 = 8.0;
const LINE_KERNEL_WIDTH_RATIO: f64 = 0.05;

/// A contour bounding box in pixel coordinates (top-left origin) with its
/// heuristic confidence.
#[derive(Debug, Clone, Copy)]
struct ContourCandidate {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    confidence: f64,
}

impl ContourCandidate {
    fn aspect_ratio(&self) -> f64 {
        if self.h > 0 {
            self.w as f64 / self.h as f64
        } else {
            0.0
        }
    }
}

/// Raster-based field detector: finds rectangular outlines and long
/// horizontal rules in a rendered page and classifies them by shape.
///
/// Labels are generic (`"Text Field 1"`, ...); real labels come from the
/// other sources during merging.
#[derive(Clone)]
pub struct GeometricDetector {
    config: GeometricConfig,
}

impl Default for GeometricDetector {
    fn default() -> Self {
        Self::new(GeometricConfig::default())
    }
}

impl GeometricDetector {
    pub fn new(config: GeometricConfig) -> Self {
        Self { config }
    }

    pub fn detect_page(&self, page_image: &DynamicImage, page_index: usize) -> Vec<FieldDetection> {
        let gray = page_image.to_luma8();
        let (img_width, img_height) = gray.dimensions();
        if img_width <= 1 || img_height <= 1 {
            // Sentinel raster for a page that failed to render.
            return Vec::new();
        }

        let binary = binarize_inverted(&gray);

        let mut candidates = self.detect_rectangles(&binary, img_width, img_height);
        candidates.extend(self.detect_horizontal_lines(&binary, img_width, img_height));

        let mut detections = Vec::new();
        let mut counters = [0usize; 3];

        for candidate in candidates {
            let field_type = self.classify(&candidate, img_width, img_height);
            let label = next_label(field_type, &mut counters);

            let Some(bbox) = normalize_pixel_rect(&candidate, img_width, img_height) else {
                continue;
            };
            match FieldDetection::new(
                page_index,
                bbox,
                field_type,
                label,
                candidate.confidence,
                DetectionSource::Geometric,
                None,
            ) {
                Ok(detection) => detections.push(detection),
                Err(e) => tracing::debug!("discarding geometric candidate: {e}"),
            }
        }

        detections
    }

    /// Rectangle pass: close small gaps, trace external contours, keep
    /// boxes in the plausible input-field size range.
    fn detect_rectangles(
        &self,
        binary: &GrayImage,
        img_width: u32,
        img_height: u32,
    ) -> Vec<ContourCandidate> {
        let closed = close_rect(binary, 3, 3);
        let contours: Vec<Contour<u32>> = find_contours(&closed);

        let min_width = (img_width as f64 * self.config.min_field_width_ratio) as u32;
        let min_height = (img_height as f64 * self.config.min_field_height_ratio) as u32;
        let max_height = (img_height as f64 * self.config.max_field_height_ratio) as u32;

        let mut candidates = Vec::new();
        for contour in &contours {
            if contour.border_type != BorderType::Outer {
                continue;
            }
            let Some((x, y, w, h)) = bounding_rect(contour) else {
                continue;
            };
            if w < min_width || h < min_height || h > max_height {
                continue;
            }
            // Hairline contours are noise.
            if w < 3 || h < 3 {
                continue;
            }

            let bounding_area = (w as f64) * (h as f64);
            let rectangularity = polygon_area(contour) / bounding_area;
            let confidence = f64::min(0.9, 0.6 + rectangularity * 0.3);

            candidates.push(ContourCandidate {
                x,
                y,
                w,
                h,
                confidence,
            });
        }
        candidates
    }

    /// Horizontal-line pass: an opening with a wide flat kernel erases
    /// everything but long horizontal rules (signature lines, underlines).
    fn detect_horizontal_lines(
        &self,
        binary: &GrayImage,
        img_width: u32,
        img_height: u32,
    ) -> Vec<ContourCandidate> {
        let kernel_width = ((img_width as f64 * LINE_KERNEL_WIDTH_RATIO) as u32).max(1);
        let opened = open_rect(binary, kernel_width, 1);
        let contours: Vec<Contour<u32>> = find_contours(&opened);

        let min_width = (img_width as f64 * LINE_MIN_WIDTH_RATIO) as u32;
        let max_height = ((img_height as f64 * LINE_MAX_HEIGHT_RATIO) as u32).max(1);

        let mut candidates = Vec::new();
        for contour in &contours {
            if contour.border_type != BorderType::Outer {
                continue;
            }
            let Some((x, y, w, h)) = bounding_rect(contour) else {
                continue;
            };
            if w < min_width || h == 0 || h > max_height {
                continue;
            }
            if (w as f64) / (h as f64) < LINE_MIN_ASPECT {
                continue;
            }

            candidates.push(ContourCandidate {
                x,
                y,
                w,
                h,
                confidence: LINE_CONFIDENCE,
            });
        }
        candidates
    }

    fn classify(&self, candidate: &ContourCandidate, img_width: u32, img_height: u32) -> FieldType {
        let width_ratio = candidate.w as f64 / img_width as f64;
        let height_ratio = candidate.h as f64 / img_height as f64;
        let aspect = candidate.aspect_ratio();
        let (aspect_lo, aspect_hi) = self.config.checkbox_aspect_ratio_range;

        if width_ratio < self.config.checkbox_max_size_ratio
            && height_ratio < self.config.checkbox_max_size_ratio
            && (aspect_lo..=aspect_hi).contains(&aspect)
        {
            return FieldType::Checkbox;
        }
        if aspect >= self.config.signature_min_aspect_ratio
            && height_ratio <= self.config.signature_max_height_ratio
        {
            return FieldType::Signature;
        }
        FieldType::Text
    }
}

fn next_label(field_type: FieldType, counters: &mut [usize; 3]) -> String {
    match field_type {
        FieldType::Checkbox => {
            counters[1] += 1;
            format!("Checkbox {}", counters[1])
        }
        FieldType::Signature => {
            counters[2] += 1;
            format!("Signature {}", counters[2])
        }
        _ => {
            counters[0] += 1;
            format!("Text Field {}", counters[0])
        }
    }
}

/// Pixel rect (top-left origin) to normalized bottom-left bbox.
fn normalize_pixel_rect(
    candidate: &ContourCandidate,
    img_width: u32,
    img_height: u32,
) -> Option<BBox> {
    let w = img_width as f64;
    let h = img_height as f64;
    BBox::clamped(
        candidate.x as f64 / w,
        1.0 - (candidate.y + candidate.h) as f64 / h,
        candidate.w as f64 / w,
        candidate.h as f64 / h,
    )
}

/// Adaptive threshold with ink mapped to foreground (255) and paper to 0.
fn binarize_inverted(gray: &GrayImage) -> GrayImage {
    let mut binary = adaptive_threshold(gray, THRESHOLD_BLOCK_RADIUS);
    for pixel in binary.pixels_mut() {
        pixel.0[0] = 255 - pixel.0[0];
    }
    binary
}

/// Separable rectangular morphology. `imageproc`'s `Norm`-based operators
/// only support square structuring elements, and the line pass needs a
/// wide flat kernel, so the max/min filters are rolled by hand.
fn filter_rect(img: &GrayImage, kw: u32, kh: u32, take_max: bool) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut horizontal = GrayImage::new(width, height);
    let (left, right) = ((kw.saturating_sub(1)) / 2, kw / 2);
    for y in 0..height {
        for x in 0..width {
            let lo = x.saturating_sub(left);
            let hi = (x + right).min(width - 1);
            let mut value = img.get_pixel(lo, y).0[0];
            for xi in (lo + 1)..=hi {
                let v = img.get_pixel(xi, y).0[0];
                value = if take_max { value.max(v) } else { value.min(v) };
            }
            horizontal.put_pixel(x, y, image::Luma([value]));
        }
    }

    let mut out = GrayImage::new(width, height);
    let (up, down) = ((kh.saturating_sub(1)) / 2, kh / 2);
    for y in 0..height {
        let lo = y.saturating_sub(up);
        let hi = (y + down).min(height - 1);
        for x in 0..width {
            let mut value = horizontal.get_pixel(x, lo).0[0];
            for yi in (lo + 1)..=hi {
                let v = horizontal.get_pixel(x, yi).0[0];
                value = if take_max { value.max(v) } else { value.min(v) };
            }
            out.put_pixel(x, y, image::Luma([value]));
        }
    }
    out
}

fn dilate_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    filter_rect(img, kw, kh, true)
}

fn erode_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    filter_rect(img, kw, kh, false)
}

fn close_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    erode_rect(&dilate_rect(img, kw, kh), kw, kh)
}

fn open_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    dilate_rect(&erode_rect(img, kw, kh), kw, kh)
}

fn bounding_rect(contour: &Contour<u32>) -> Option<(u32, u32, u32, u32)> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in &contour.points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Shoelace area of the traced boundary polygon.
fn polygon_area(contour: &Contour<u32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0.0f64;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        doubled += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }
    doubled.abs() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const BLACK: Rgb<u8> = Rgb([0u8, 0u8, 0u8]);

    fn blank_page(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255u8, 255u8, 255u8]))
    }

    fn hollow_box(image: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, stroke: u32) {
        draw_filled_rect_mut(image, Rect::at(x, y).of_size(w, h), BLACK);
        draw_filled_rect_mut(
            image,
            Rect::at(x + stroke as i32, y + stroke as i32)
                .of_size(w - 2 * stroke, h - 2 * stroke),
            Rgb([255u8, 255u8, 255u8]),
        );
    }

    #[test]
    fn test_blank_page_yields_nothing() {
        let page = DynamicImage::ImageRgb8(blank_page(1000, 1000));
        let detections = GeometricDetector::default().detect_page(&page, 0);
        assert!(detections.is_empty());
    }

    #[test]
    fn test_sentinel_raster_yields_nothing() {
        let page = DynamicImage::ImageRgb8(RgbImage::new(1, 1));
        assert!(GeometricDetector::default().detect_page(&page, 0).is_empty());
    }

    #[test]
    fn test_detects_text_field_box() {
        let mut page = blank_page(1000, 1000);
        hollow_box(&mut page, 100, 100, 400, 40, 2);
        let page = DynamicImage::ImageRgb8(page);

        let detections = GeometricDetector::default().detect_page(&page, 3);
        assert!(!detections.is_empty());
        assert!(detections
            .iter()
            .all(|d| d.source == DetectionSource::Geometric && d.page_index == 3));
        assert!(detections.iter().any(|d| d.field_type == FieldType::Text));

        let field = detections
            .iter()
            .find(|d| d.field_type == FieldType::Text)
            .unwrap();
        assert!((field.bbox.x - 0.1).abs() < 0.01);
        // Top-left pixel row 100 with height 40 sits at normalized y = 0.86.
        assert!((field.bbox.y - 0.86).abs() < 0.01);
        assert!((field.bbox.width - 0.4).abs() < 0.01);
    }

    #[test]
    fn test_detects_checkbox_square() {
        let mut page = blank_page(1000, 1000);
        draw_filled_rect_mut(&mut page, Rect::at(100, 100).of_size(20, 20), BLACK);
        let page = DynamicImage::ImageRgb8(page);

        // Small squares require a lower width floor than the default 5%.
        let detector = GeometricDetector::new(GeometricConfig {
            min_field_width_ratio: 0.01,
            ..GeometricConfig::default()
        });
        let detections = detector.detect_page(&page, 0);

        assert!(!detections.is_empty());
        assert!(detections
            .iter()
            .any(|d| d.field_type == FieldType::Checkbox));
    }

    #[test]
    fn test_detects_signature_line() {
        let mut page = blank_page(1000, 1000);
        draw_filled_rect_mut(&mut page, Rect::at(100, 500).of_size(600, 5), BLACK);
        let page = DynamicImage::ImageRgb8(page);

        let detections = GeometricDetector::default().detect_page(&page, 0);
        assert!(!detections.is_empty());
        assert!(detections
            .iter()
            .any(|d| d.field_type == FieldType::Signature));
    }

    #[test]
    fn test_generic_labels_numbered_per_type() {
        let mut page = blank_page(1000, 1000);
        hollow_box(&mut page, 100, 100, 400, 40, 2);
        hollow_box(&mut page, 100, 300, 400, 40, 2);
        let page = DynamicImage::ImageRgb8(page);

        let detections = GeometricDetector::default().detect_page(&page, 0);
        let text_labels: Vec<_> = detections
            .iter()
            .filter(|d| d.field_type == FieldType::Text)
            .map(|d| d.label.as_str())
            .collect();
        assert!(text_labels.contains(&"Text Field 1"));
        assert!(text_labels.contains(&"Text Field 2"));
    }

    #[test]
    fn test_classification_bounds() {
        let detector = GeometricDetector::default();

        let checkbox = ContourCandidate {
            x: 100,
            y: 100,
            w: 20,
            h: 20,
            confidence: 0.8,
        };
        assert_eq!(detector.classify(&checkbox, 1000, 1000), FieldType::Checkbox);

        let signature = ContourCandidate {
            x: 100,
            y: 500,
            w: 600,
            h: 5,
            confidence: 0.85,
        };
        assert_eq!(
            detector.classify(&signature, 1000, 1000),
            FieldType::Signature
        );

        // Moderately wide rectangles are text.
        let text = ContourCandidate {
            x: 100,
            y: 100,
            w: 400,
            h: 40,
            confidence: 0.8,
        };
        assert_eq!(detector.classify(&text, 1000, 1000), FieldType::Text);
    }

    #[test]
    fn test_pixel_to_normalized_conversion() {
        let candidate = ContourCandidate {
            x: 100,
            y: 100,
            w: 400,
            h: 40,
            confidence: 0.8,
        };
        let bbox = normalize_pixel_rect(&candidate, 1000, 1000).unwrap();
        assert!((bbox.x - 0.1).abs() < 1e-9);
        assert!((bbox.y - (1.0 - 140.0 / 1000.0)).abs() < 1e-9);
        assert!((bbox.width - 0.4).abs() < 1e-9);
        assert!((bbox.height - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_morphology_open_erases_short_runs() {
        let mut img = GrayImage::new(100, 10);
        // A 60px run and a 10px run on the same row.
        for x in 10..70 {
            img.put_pixel(x, 5, image::Luma([255]));
        }
        for x in 80..90 {
            img.put_pixel(x, 5, image::Luma([255]));
        }

        let opened = open_rect(&img, 50, 1);
        let survivors: Vec<u32> = (0..100)
            .filter(|&x| opened.get_pixel(x, 5).0[0] > 0)
            .collect();
        assert!(!survivors.is_empty());
        assert!(survivors.iter().all(|&x| (10..70).contains(&x)));
    }
}
