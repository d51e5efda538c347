//! Processor tests driving the full claim/download/detect/persist path
//! against directory-backed storage and a scratch database.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use formlens_core::config::PipelineConfig;
use formlens_core::pipeline::HybridPipeline;
use formlens_worker::models::{Document, DocumentStatus};
use formlens_worker::storage::{LocalStorage, Storage};
use formlens_worker::store::Store;
use formlens_worker::{ProcessError, ProcessOptions, Processor};
use uuid::Uuid;

/// Minimal one-page AcroForm document with a single named text widget.
fn acroform_pdf() -> Vec<u8> {
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

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    storage: Arc<dyn Storage>,
    processor: Processor,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("test.db")).unwrap());
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path().join("objects")));
    let pipeline = Arc::new(HybridPipeline::new(PipelineConfig::default()));
    let processor = Processor::new(store.clone(), storage.clone(), pipeline);
    Harness {
        _dir: dir,
        store,
        storage,
        processor,
    }
}

async fn import_widget_pdf(h: &Harness) -> Document {
    let scratch = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(scratch.path(), acroform_pdf()).unwrap();

    let doc = Document::new_imported(
        Uuid::new_v4(),
        "form.pdf",
        "application/pdf",
        format!("originals/{}.pdf", Uuid::new_v4()),
        None,
    );
    h.storage
        .upload(scratch.path(), &doc.storage_key_original, "application/pdf")
        .await
        .unwrap();
    h.store.insert_document(&doc).unwrap();
    doc
}

#[tokio::test]
async fn test_process_document_to_ready() {
    let h = harness().await;
    let doc = import_widget_pdf(&h).await;

    let outcome = h
        .processor
        .process(&doc.id.to_string(), ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, "ready");
    assert_eq!(outcome.page_count, 1);
    assert!(outcome.acroform);
    assert!(outcome.fields_found >= 1);
    assert!(outcome.fields_by_source.contains_key("structure"));

    let loaded = h.store.get_document(&doc.id).unwrap().unwrap();
    assert_eq!(loaded.status, DocumentStatus::Ready);
    assert_eq!(loaded.page_count, Some(1));
    assert!(loaded.acroform);

    let regions = h.store.list_field_regions(&doc.id).unwrap();
    assert_eq!(regions.len(), outcome.fields_found);
    assert!(regions.iter().any(|r| r.label == "name_field"));
    for region in &regions {
        assert!(region.x >= 0.0 && region.x + region.width <= 1.0 + 1e-9);
        assert!(region.y >= 0.0 && region.y + region.height <= 1.0 + 1e-9);
    }
}

#[tokio::test]
async fn test_reprocess_requires_force() {
    let h = harness().await;
    let doc = import_widget_pdf(&h).await;
    let id = doc.id.to_string();

    let first = h
        .processor
        .process(&id, ProcessOptions::default())
        .await
        .unwrap();
    assert_eq!(first.status, "ready");

    // Already processed: a plain re-enqueue is a no-op.
    let skipped = h
        .processor
        .process(&id, ProcessOptions::default())
        .await
        .unwrap();
    assert_eq!(skipped.status, "skipped");
    assert_eq!(
        h.store.get_document(&doc.id).unwrap().unwrap().status,
        DocumentStatus::Ready
    );

    // Force re-runs and replaces the field set.
    let forced = h
        .processor
        .process(&id, ProcessOptions { force: true })
        .await
        .unwrap();
    assert_eq!(forced.status, "ready");
    assert_eq!(
        h.store.list_field_regions(&doc.id).unwrap().len(),
        forced.fields_found
    );
}

#[tokio::test]
async fn test_unknown_document_is_not_found() {
    let h = harness().await;
    let err = h
        .processor
        .process(&Uuid::new_v4().to_string(), ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::NotFound { .. }));
}

#[tokio::test]
async fn test_malformed_id_is_invalid_input() {
    let h = harness().await;
    let err = h
        .processor
        .process("not-a-uuid", ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::InvalidInput(_)));
}

#[tokio::test]
async fn test_missing_object_marks_document_failed() {
    let h = harness().await;
    let doc = Document::new_imported(
        Uuid::new_v4(),
        "ghost.pdf",
        "application/pdf",
        "originals/ghost.pdf",
        None,
    );
    h.store.insert_document(&doc).unwrap();

    let err = h
        .processor
        .process(&doc.id.to_string(), ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Storage(_)));

    let loaded = h.store.get_document(&doc.id).unwrap().unwrap();
    assert_eq!(loaded.status, DocumentStatus::Failed);
    let message = loaded.error_message.unwrap();
    assert!(message.starts_with("StorageFailure"), "{message}");
}

#[tokio::test]
async fn test_unreadable_pdf_marks_document_failed() {
    let h = harness().await;

    let scratch = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(scratch.path(), b"not a pdf at all").unwrap();

    let doc = Document::new_imported(
        Uuid::new_v4(),
        "broken.pdf",
        "application/pdf",
        "originals/broken.pdf",
        None,
    );
    h.storage
        .upload(scratch.path(), &doc.storage_key_original, "application/pdf")
        .await
        .unwrap();
    h.store.insert_document(&doc).unwrap();

    let err = h
        .processor
        .process(&doc.id.to_string(), ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Pipeline(_)));

    let loaded = h.store.get_document(&doc.id).unwrap().unwrap();
    assert_eq!(loaded.status, DocumentStatus::Failed);
    assert!(loaded.error_message.is_some());
}

#[tokio::test]
async fn test_signed_url_for_processed_document() {
    let h = harness().await;
    let doc = import_widget_pdf(&h).await;

    let url = h
        .storage
        .signed_url(&doc.storage_key_original, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(url.contains(&doc.storage_key_original));
}
