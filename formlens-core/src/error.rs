use thiserror::Error;

/// Errors raised by the detection pipeline.
///
/// Per-detector and per-page failures are recovered inside the pipeline
/// (the failing detector contributes an empty list); only document-level
/// faults such as an unreadable PDF propagate to the caller.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("invalid bounding box: {0}")]
    InvalidBBox(String),

    #[error("invalid field detection: {0}")]
    InvalidDetection(String),

    #[error("failed to open or read PDF")]
    Pdf(#[source] pdfium_render::prelude::PdfiumError),

    #[error("failed to render PDF pages")]
    Render(#[source] pdfium_render::prelude::PdfiumError),

    #[error("vision provider request failed")]
    VisionRequest(#[source] reqwest::Error),

    #[error("vision provider returned an unusable response: {0}")]
    VisionResponse(String),
}
