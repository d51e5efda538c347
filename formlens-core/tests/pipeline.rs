//! End-to-end pipeline tests against a minimal AcroForm document
//! assembled in code (object offsets and the xref table are computed while
//! writing, so the file is structurally valid without any fixture).

use std::io::Write;
use std::path::PathBuf;

use formlens_core::config::{PipelineConfig, VisionConfig, VisionProvider};
use formlens_core::detect::StructureDetector;
use formlens_core::entities::{DetectionSource, FieldType};
use formlens_core::pipeline::HybridPipeline;
use formlens_core::render;

/// One-page 612x792 document with a single text widget named
/// `name_field` at PDF rect (100, 662)-(300, 692) — 30 points tall,
/// hanging 100 points below the top edge.
fn build_acroform_pdf() -> Vec<u8> {
    let objects: Vec<String> = vec![
        "<< /Type /Catalog /Pages 2 0 R /AcroForm 6 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [5 0 R] /Contents 4 0 R >>"
            .to_string(),
        "<< /Length 0 >>\nstream\n\nendstream".to_string(),
        "<< /Type /Annot /Subtype /Widget /FT /Tx /T (name_field) /Rect [100 662 300 692] /F 4 /P 3 0 R >>"
            .to_string(),
        "<< /Fields [5 0 R] >>".to_string(),
    ];

    let mut out: Vec<u8> = b"%PDF-1.7\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        write!(out, "{} 0 obj\n{}\nendobj\n", i + 1, body).unwrap();
    }

    let xref_pos = out.len();
    write!(out, "xref\n0 {}\n", objects.len() + 1).unwrap();
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        write!(out, "{offset:010} 00000 n \n").unwrap();
    }
    write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_pos
    )
    .unwrap();
    out
}

fn write_temp_pdf(bytes: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("form.pdf");
    std::fs::write(&path, bytes).unwrap();
    (dir, path)
}

#[test]
fn test_structure_detector_finds_named_text_widget() {
    let (_dir, path) = write_temp_pdf(&build_acroform_pdf());

    let detections = StructureDetector::default().detect(&path).unwrap();
    assert_eq!(detections.len(), 1);

    let field = &detections[0];
    assert_eq!(field.page_index, 0);
    assert_eq!(field.field_type, FieldType::Text);
    assert_eq!(field.label, "name_field");
    assert_eq!(field.source, DetectionSource::Structure);
    assert!((field.bbox.x - 0.163).abs() < 0.005);
    assert!((field.bbox.y - 0.835).abs() < 0.005);
    assert!((field.bbox.width - 0.327).abs() < 0.005);
    assert!((field.bbox.height - 0.0379).abs() < 0.005);
}

#[test]
fn test_page_count() {
    let (_dir, path) = write_temp_pdf(&build_acroform_pdf());
    assert_eq!(render::page_count(&path).unwrap(), 1);
}

#[tokio::test]
async fn test_pipeline_detects_widget_end_to_end() {
    let (_dir, path) = write_temp_pdf(&build_acroform_pdf());

    let pipeline = HybridPipeline::default();
    let detections = pipeline.detect(&path, Some("doc-1")).await;

    assert!(!detections.is_empty());
    assert!(detections
        .iter()
        .any(|d| d.label == "name_field" && d.source == DetectionSource::Structure));
}

#[tokio::test]
async fn test_pipeline_is_deterministic() {
    let (_dir, path) = write_temp_pdf(&build_acroform_pdf());

    let pipeline = HybridPipeline::default();
    let first = pipeline.detect(&path, None).await;
    let second = pipeline.detect(&path, None).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_pipeline_survives_broken_vision_detector() {
    let (_dir, path) = write_temp_pdf(&build_acroform_pdf());

    // A vision detector pointed at a provider it can never reach: wrong
    // key, and no network in the test environment. Its failure must not
    // change what the other detectors produce.
    let mut config = PipelineConfig::default();
    config.vision = Some(VisionConfig::new(VisionProvider::OpenAi, "sk-invalid"));
    let with_vision = HybridPipeline::new(config);

    let baseline = HybridPipeline::default().detect(&path, None).await;
    let detections = with_vision.detect(&path, None).await;
    assert_eq!(detections, baseline);
    assert!(detections.iter().any(|d| d.label == "name_field"));
}

#[tokio::test]
async fn test_pipeline_on_unreadable_document_yields_nothing() {
    let (_dir, path) = write_temp_pdf(b"this is not a pdf");

    let pipeline = HybridPipeline::default();
    let detections = pipeline.detect(&path, None).await;
    assert!(detections.is_empty());
}
