pub mod config;
pub mod detect;
pub mod entities;
pub mod error;
pub mod filter;
pub mod merge;
pub mod pdf;
pub mod pipeline;
pub mod render;

pub use config::{
    FilterConfig, GeometricConfig, MergeConfig, PipelineConfig, StructureConfig, VisionConfig,
    VisionProvider,
};
pub use entities::{BBox, DetectionSource, FieldDetection, FieldType};
pub use error::DetectError;
pub use filter::TextOverlapFilter;
pub use merge::EnsembleMerger;
pub use pipeline::HybridPipeline;
