use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use formlens_core::entities::{DetectionSource, FieldDetection};
use formlens_core::pipeline::HybridPipeline;
use formlens_core::render;

use crate::error::ProcessError;
use crate::models::Document;
use crate::storage::Storage;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Reclaim the document regardless of its current status and replace
    /// any previously persisted field regions.
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessOutcome {
    pub document_id: String,
    pub status: &'static str,
    pub fields_found: usize,
    pub page_count: usize,
    pub acroform: bool,
    pub fields_by_source: BTreeMap<String, usize>,
    pub fields_by_page: BTreeMap<usize, usize>,
}

impl ProcessOutcome {
    fn skipped(document_id: &Uuid) -> Self {
        Self {
            document_id: document_id.to_string(),
            status: "skipped",
            fields_found: 0,
            page_count: 0,
            acroform: false,
            fields_by_source: BTreeMap::new(),
            fields_by_page: BTreeMap::new(),
        }
    }
}

/// Runs one document through the detection pipeline: claim, download,
/// detect, persist, release.
pub struct Processor {
    store: Arc<Store>,
    storage: Arc<dyn Storage>,
    pipeline: Arc<HybridPipeline>,
}

impl Processor {
    pub fn new(store: Arc<Store>, storage: Arc<dyn Storage>, pipeline: Arc<HybridPipeline>) -> Self {
        Self {
            store,
            storage,
            pipeline,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn pipeline_has_vision(&self) -> bool {
        self.pipeline.has_vision()
    }

    #[tracing::instrument(skip(self))]
    pub async fn process(
        &self,
        document_id: &str,
        options: ProcessOptions,
    ) -> Result<ProcessOutcome, ProcessError> {
        let id = Uuid::parse_str(document_id)
            .map_err(|e| ProcessError::InvalidInput(format!("{document_id}: {e}")))?;

        let document = self.store.get_document(&id)?.ok_or_else(|| {
            ProcessError::NotFound {
                document_id: document_id.to_string(),
            }
        })?;

        if !self.store.claim_for_processing(&id, options.force)? {
            tracing::info!(
                "document {id} is in status '{}' and force is not set, skipping",
                document.status.as_str()
            );
            return Ok(ProcessOutcome::skipped(&id));
        }

        match self.run(&document).await {
            Ok(outcome) => {
                tracing::info!(
                    "document {id} processed: {} fields across {} pages",
                    outcome.fields_found,
                    outcome.page_count
                );
                Ok(outcome)
            }
            Err(e) => {
                let message = error_message(&e);
                if let Err(db_err) = self.store.mark_failed(&id, &message) {
                    tracing::error!("failed to record failure for {id}: {db_err}");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, document: &Document) -> Result<ProcessOutcome, ProcessError> {
        // The temp file is owned by this invocation and removed on every
        // exit path when it drops.
        let temp = tempfile::Builder::new()
            .prefix("formlens-")
            .suffix(".pdf")
            .tempfile()
            .map_err(crate::storage::StorageError::Io)?;

        self.storage
            .download(&document.storage_key_original, temp.path())
            .await?;

        // An unreadable document is fatal here even though the individual
        // detectors would merely come back empty.
        let page_count = {
            let path = temp.path().to_owned();
            tokio::task::spawn_blocking(move || render::page_count(&path))
                .await
                .map_err(|e| ProcessError::Pipeline(anyhow::Error::from(e)))?
                .map_err(|e| ProcessError::Pipeline(anyhow::Error::from(e)))?
        };

        let doc_id = document.id.to_string();
        let detections = self.pipeline.detect(temp.path(), Some(&doc_id)).await;

        let acroform = detections
            .iter()
            .any(|d| d.source == DetectionSource::Structure);

        self.store
            .finish_processing(&document.id, &detections, page_count, acroform)?;

        Ok(build_outcome(&doc_id, &detections, page_count, acroform))
    }
}

/// `<kind>: <message>` with the source chain appended, as stored in
/// `documents.error_message`.
fn error_message(e: &ProcessError) -> String {
    let mut message = format!("{}: {e}", e.kind());
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    message
}

fn build_outcome(
    document_id: &str,
    detections: &[FieldDetection],
    page_count: usize,
    acroform: bool,
) -> ProcessOutcome {
    let mut fields_by_source = BTreeMap::new();
    let mut fields_by_page = BTreeMap::new();
    for detection in detections {
        *fields_by_source
            .entry(detection.source.as_str().to_string())
            .or_insert(0) += 1;
        *fields_by_page.entry(detection.page_index).or_insert(0) += 1;
    }

    ProcessOutcome {
        document_id: document_id.to_string(),
        status: "ready",
        fields_found: detections.len(),
        page_count,
        acroform,
        fields_by_source,
        fields_by_page,
    }
}
