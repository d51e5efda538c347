use std::path::Path;

use crate::config::PipelineConfig;
use crate::detect::{GeometricDetector, StructureDetector, VisionDetector};
use crate::entities::FieldDetection;
use crate::filter::TextOverlapFilter;
use crate::merge::EnsembleMerger;
use crate::render::render_pages;

/// Orchestrates the three detection sources, the ensemble merger and the
/// optional text-overlap filter.
///
/// A fault in any single detector never aborts the run: the failing
/// source is logged and contributes an empty list, and the rest of the
/// pipeline proceeds. Given identical inputs the output ordering is
/// deterministic.
#[derive(Clone)]
pub struct HybridPipeline {
    structure: StructureDetector,
    geometric: GeometricDetector,
    vision: Option<VisionDetector>,
    merger: EnsembleMerger,
    filter: Option<TextOverlapFilter>,
    render_dpi: u32,
}

impl Default for HybridPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl HybridPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            structure: StructureDetector::new(config.structure),
            geometric: GeometricDetector::new(config.geometric),
            vision: config.vision.map(VisionDetector::new),
            merger: EnsembleMerger::new(config.merge),
            filter: config.filter.map(TextOverlapFilter::new),
            render_dpi: config.render_dpi,
        }
    }

    pub fn has_vision(&self) -> bool {
        self.vision.is_some()
    }

    /// Run every configured detector over the document and return the
    /// merged, filtered field list.
    #[tracing::instrument(skip_all)]
    pub async fn detect(&self, pdf_path: &Path, document_id: Option<&str>) -> Vec<FieldDetection> {
        let structure_fields = {
            let detector = self.structure.clone();
            let path = pdf_path.to_owned();
            async move {
                match tokio::task::spawn_blocking(move || detector.detect(&path)).await {
                    Ok(Ok(fields)) => fields,
                    Ok(Err(e)) => {
                        tracing::error!("structure detector failed: {e}");
                        Vec::new()
                    }
                    Err(e) => {
                        tracing::error!("structure detector task panicked: {e}");
                        Vec::new()
                    }
                }
            }
        };

        let geometric_fields = {
            let detector = self.geometric.clone();
            let path = pdf_path.to_owned();
            let dpi = self.render_dpi;
            async move {
                let run = move || -> Vec<FieldDetection> {
                    let rasters = match render_pages(&path, dpi) {
                        Ok(rasters) => rasters,
                        Err(e) => {
                            tracing::error!("page rendering failed: {e}");
                            return Vec::new();
                        }
                    };
                    let mut fields = Vec::new();
                    for raster in &rasters {
                        // One bad page contributes nothing; the remaining
                        // pages still go through.
                        let page_fields =
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                detector.detect_page(&raster.image, raster.page_index)
                            }));
                        match page_fields {
                            Ok(mut page_fields) => fields.append(&mut page_fields),
                            Err(_) => {
                                tracing::error!(
                                    "geometric detector failed on page {}",
                                    raster.page_index
                                );
                            }
                        }
                    }
                    fields
                };
                match tokio::task::spawn_blocking(run).await {
                    Ok(fields) => fields,
                    Err(e) => {
                        tracing::error!("geometric detector task panicked: {e}");
                        Vec::new()
                    }
                }
            }
        };

        let vision_fields = async {
            match &self.vision {
                None => Vec::new(),
                Some(detector) => match detector.detect(pdf_path, document_id).await {
                    Ok(fields) => fields,
                    Err(e) => {
                        tracing::error!("vision detector failed: {e}");
                        Vec::new()
                    }
                },
            }
        };

        let (structure_fields, geometric_fields, vision_fields) =
            tokio::join!(structure_fields, geometric_fields, vision_fields);

        tracing::debug!(
            "merging {} structure / {} geometric / {} vision detections",
            structure_fields.len(),
            geometric_fields.len(),
            vision_fields.len()
        );

        let merged = self
            .merger
            .merge(structure_fields, geometric_fields, vision_fields);

        match &self.filter {
            None => merged,
            Some(filter) => {
                let filter = filter.clone();
                let path = pdf_path.to_owned();
                let unfiltered = merged.clone();
                match tokio::task::spawn_blocking(move || filter.filter(merged, &path)).await {
                    Ok(filtered) => filtered,
                    Err(e) => {
                        // Fail open, same as a text-extraction failure.
                        tracing::error!("text-overlap filter task panicked: {e}");
                        unfiltered
                    }
                }
            }
        }
    }
}
