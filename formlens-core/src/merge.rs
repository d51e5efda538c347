use lazy_static::lazy_static;
use regex::Regex;

use crate::config::MergeConfig;
use crate::entities::{DetectionSource, FieldDetection, FieldType};

/// Checkbox-size bound used when deciding whether a text detection may be
/// overridden to checkbox.
const CHECKBOX_MAX_EXTENT: f64 = 0.05;
const CHECKBOX_ASPECT_RANGE: (f64, f64) = (0.5, 2.0);

lazy_static! {
    static ref GENERIC_LABEL: Regex =
        Regex::new(r"^(?:Field|Text Field|Checkbox|Signature|Widget|XObject Field) \d+$").unwrap();
}

/// Merges detections from all sources into one deduplicated, page-sorted
/// list.
///
/// Higher-priority sources win overlaps, but losing candidates still
/// donate what they are better at: real labels flow into generically
/// labelled winners, and shape evidence can override a winner's type.
#[derive(Clone)]
pub struct EnsembleMerger {
    config: MergeConfig,
}

impl Default for EnsembleMerger {
    fn default() -> Self {
        Self::new(MergeConfig::default())
    }
}

impl EnsembleMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn merge(
        &self,
        structure: Vec<FieldDetection>,
        geometric: Vec<FieldDetection>,
        vision: Vec<FieldDetection>,
    ) -> Vec<FieldDetection> {
        let mut all: Vec<FieldDetection> = Vec::new();
        all.extend(structure);
        all.extend(geometric);
        all.extend(vision);
        if all.is_empty() {
            return all;
        }

        all.sort_by_key(|d| d.source.priority());
        let mut kept = self.dedup_by_iou(all);
        sort_by_page_position(&mut kept);
        kept
    }

    /// Same deduplication, but AcroForm detections rank above everything
    /// else. The ranking is a local priority map, not a change to the
    /// global source order.
    pub fn merge_with_acroform(
        &self,
        acroform: Vec<FieldDetection>,
        other: Vec<FieldDetection>,
    ) -> Vec<FieldDetection> {
        if acroform.is_empty() {
            return other;
        }
        if other.is_empty() {
            return acroform;
        }

        let rank = |source: DetectionSource| -> u8 {
            if source == DetectionSource::Acroform {
                0
            } else {
                source.priority()
            }
        };

        let mut all = acroform;
        all.extend(other);
        all.sort_by_key(|d| rank(d.source));
        self.dedup_by_iou(all)
    }

    /// Walk detections in priority order; each candidate either survives
    /// or updates the kept detection it collides with.
    fn dedup_by_iou(&self, detections: Vec<FieldDetection>) -> Vec<FieldDetection> {
        let mut kept: Vec<FieldDetection> = Vec::with_capacity(detections.len());

        for candidate in detections {
            let collision = kept.iter().position(|existing| {
                existing.page_index == candidate.page_index
                    && candidate.bbox.iou(&existing.bbox) > self.config.iou_threshold
            });
            match collision {
                None => kept.push(candidate),
                Some(idx) => resolve_conflict(&mut kept[idx], &candidate),
            }
        }
        kept
    }
}

/// Update the kept (higher-priority) detection with whatever the losing
/// candidate knows better.
fn resolve_conflict(kept: &mut FieldDetection, candidate: &FieldDetection) {
    if is_generic_label(&kept.label) && !is_generic_label(&candidate.label) {
        tracing::debug!(
            "inheriting label '{}' from {}",
            candidate.label,
            candidate.source.as_str()
        );
        kept.label = candidate.label.clone();
    }

    resolve_type_conflict(kept, candidate);

    if candidate.confidence > kept.confidence {
        kept.confidence = candidate.confidence;
    }
}

fn resolve_type_conflict(kept: &mut FieldDetection, candidate: &FieldDetection) {
    if kept.field_type == candidate.field_type {
        return;
    }

    // A checkbox claim beats a text claim only when the winning box is
    // actually checkbox-sized.
    if candidate.field_type == FieldType::Checkbox
        && kept.field_type == FieldType::Text
        && is_checkbox_sized(kept)
    {
        kept.field_type = FieldType::Checkbox;
        return;
    }

    // The raster detector recognizes signature rules by shape; trust it
    // over a text guess.
    if candidate.source == DetectionSource::Geometric
        && candidate.field_type == FieldType::Signature
        && kept.field_type == FieldType::Text
    {
        kept.field_type = FieldType::Signature;
    }

    // Otherwise the kept detection's type stands; structure widgets in
    // particular are authoritative.
}

fn is_checkbox_sized(detection: &FieldDetection) -> bool {
    let bbox = &detection.bbox;
    if bbox.width > CHECKBOX_MAX_EXTENT || bbox.height > CHECKBOX_MAX_EXTENT {
        return false;
    }
    let aspect = bbox.aspect_ratio();
    (CHECKBOX_ASPECT_RANGE.0..=CHECKBOX_ASPECT_RANGE.1).contains(&aspect)
}

/// A label counts as generic when it is an auto-numbered placeholder or
/// blank.
pub fn is_generic_label(label: &str) -> bool {
    let trimmed = label.trim();
    trimmed.is_empty() || GENERIC_LABEL.is_match(trimmed)
}

/// Page ascending, then top-to-bottom (descending top edge in bottom-left
/// coordinates), then left-to-right.
fn sort_by_page_position(detections: &mut [FieldDetection]) {
    detections.sort_by(|a, b| {
        a.page_index.cmp(&b.page_index).then_with(|| {
            let a_top = a.bbox.y + a.bbox.height;
            let b_top = b.bbox.y + b.bbox.height;
            b_top
                .total_cmp(&a_top)
                .then_with(|| a.bbox.x.total_cmp(&b.bbox.x))
        })
    });
}
