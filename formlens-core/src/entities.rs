use serde::{Deserialize, Serialize};

use crate::error::DetectError;

pub type PageIndex = usize;

/// Tolerance applied to the `x + width <= 1` / `y + height <= 1` checks so
/// detections sitting exactly on the page edge survive float rounding.
const EDGE_EPS: f64 = 1e-9;

/// Normalized widths/heights below this are degenerate and dropped by the
/// clamping constructor.
pub const MIN_NORMALIZED_EXTENT: f64 = 0.001;

/// Axis-aligned rectangle in normalized page coordinates.
///
/// All four values are fractions of the page size in `[0, 1]`, with the
/// origin at the bottom-left of the page (PDF convention). `(x, y)` is the
/// bottom-left corner of the box.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Result<Self, DetectError> {
        for (name, v) in [("x", x), ("y", y), ("width", width), ("height", height)] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(DetectError::InvalidBBox(format!(
                    "{name} must be in [0, 1], got {v}"
                )));
            }
        }
        if width <= 0.0 || height <= 0.0 {
            return Err(DetectError::InvalidBBox(format!(
                "width and height must be > 0, got {width}x{height}"
            )));
        }
        if x + width > 1.0 + EDGE_EPS {
            return Err(DetectError::InvalidBBox(format!(
                "x + width must be <= 1.0, got {}",
                x + width
            )));
        }
        if y + height > 1.0 + EDGE_EPS {
            return Err(DetectError::InvalidBBox(format!(
                "y + height must be <= 1.0, got {}",
                y + height
            )));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Unclamped conversion from `(x_min, y_min, x_max, y_max)`.
    pub fn from_rect(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self, DetectError> {
        Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    /// Unclamped conversion from pixel coordinates. `y_px` is the bottom
    /// edge of the box measured from the bottom of the page.
    pub fn from_pixels(
        x_px: f64,
        y_px: f64,
        width_px: f64,
        height_px: f64,
        page_width_px: f64,
        page_height_px: f64,
    ) -> Result<Self, DetectError> {
        Self::new(
            x_px / page_width_px,
            y_px / page_height_px,
            width_px / page_width_px,
            height_px / page_height_px,
        )
    }

    /// Clamp the given rectangle into `[0, 1]` and build a `BBox`, returning
    /// `None` when the clamped box degenerates below [`MIN_NORMALIZED_EXTENT`].
    ///
    /// Detectors normalize raw toolkit rects through this; out-of-page
    /// coordinates are expected there, not an error.
    pub fn clamped(x: f64, y: f64, width: f64, height: f64) -> Option<Self> {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        let width = width.clamp(0.0, 1.0 - x);
        let height = height.clamp(0.0, 1.0 - y);
        if width < MIN_NORMALIZED_EXTENT || height < MIN_NORMALIZED_EXTENT {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }

    #[inline(always)]
    pub fn to_rect(&self) -> (f64, f64, f64, f64) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }

    #[inline(always)]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    #[inline(always)]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[inline(always)]
    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    #[inline(always)]
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersection_area(other) > 0.0
    }

    #[inline(always)]
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let overlap_x = f64::max(
            0.0,
            f64::min(self.x + self.width, other.x + other.width) - f64::max(self.x, other.x),
        );
        let overlap_y = f64::max(
            0.0,
            f64::min(self.y + self.height, other.y + other.height) - f64::max(self.y, other.y),
        );
        overlap_x * overlap_y
    }

    #[inline(always)]
    pub fn iou(&self, other: &Self) -> f64 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Kind of form field a detection represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Multiline,
    Checkbox,
    Date,
    Number,
    Signature,
    Unknown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Multiline => "multiline",
            FieldType::Checkbox => "checkbox",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Signature => "signature",
            FieldType::Unknown => "unknown",
        }
    }
}

/// Which detector produced a detection. Lower rank wins during merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Structure,
    Geometric,
    Vision,
    Acroform,
    Merged,
}

impl DetectionSource {
    pub fn priority(&self) -> u8 {
        match self {
            DetectionSource::Structure => 1,
            DetectionSource::Geometric => 2,
            DetectionSource::Vision => 3,
            DetectionSource::Acroform => 4,
            DetectionSource::Merged => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Structure => "structure",
            DetectionSource::Geometric => "geometric",
            DetectionSource::Vision => "vision",
            DetectionSource::Acroform => "acroform",
            DetectionSource::Merged => "merged",
        }
    }
}

pub const MAX_LABEL_LEN: usize = 255;

/// One detected form field, the common currency between detectors, merger,
/// filter and the processor. Serialization is lossless so detections can
/// cross process boundaries as JSON.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldDetection {
    pub page_index: PageIndex,
    pub bbox: BBox,
    pub field_type: FieldType,
    pub label: String,
    pub confidence: f64,
    pub source: DetectionSource,
    #[serde(default)]
    pub template_key: Option<String>,
}

impl FieldDetection {
    pub fn new(
        page_index: PageIndex,
        bbox: BBox,
        field_type: FieldType,
        label: impl Into<String>,
        confidence: f64,
        source: DetectionSource,
        template_key: Option<String>,
    ) -> Result<Self, DetectError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DetectError::InvalidDetection(format!(
                "confidence must be in [0, 1], got {confidence}"
            )));
        }
        let label = label.into();
        if label.trim().is_empty() {
            return Err(DetectError::InvalidDetection(
                "label must not be empty".into(),
            ));
        }
        let label = truncate_label(&label);
        Ok(Self {
            page_index,
            bbox,
            field_type,
            label,
            confidence,
            source,
            template_key,
        })
    }
}

/// Cap a label at [`MAX_LABEL_LEN`] characters on a char boundary.
pub fn truncate_label(label: &str) -> String {
    label.chars().take(MAX_LABEL_LEN).collect()
}
