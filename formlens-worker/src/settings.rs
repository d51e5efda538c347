use std::path::PathBuf;
use std::sync::Arc;

use formlens_core::config::{
    FilterConfig, GeometricConfig, MergeConfig, PipelineConfig, StructureConfig, VisionConfig,
    VisionProvider, DEFAULT_RENDER_DPI,
};

use crate::storage::{HttpStorage, LocalStorage, Storage};
use crate::store::{Store, StoreError};

/// Detection knobs shared by the worker service and the CLI. Every flag
/// has an environment fallback so deployments can configure the pipeline
/// without touching the command line.
#[derive(Debug, clap::Args)]
pub struct DetectionArgs {
    /// DPI used when rasterizing pages for the geometric detector
    #[arg(long, env = "FORMLENS_DPI", default_value_t = DEFAULT_RENDER_DPI)]
    pub dpi: u32,

    /// IoU above which two detections are merged into one field
    #[arg(long, env = "FORMLENS_IOU_THRESHOLD", default_value_t = 0.30)]
    pub iou_threshold: f64,

    /// Maximum fraction of a field covered by printed text
    #[arg(long, env = "FORMLENS_TEXT_OVERLAP_THRESHOLD", default_value_t = 0.30)]
    pub text_overlap_threshold: f64,

    /// Disable the text-overlap filter
    #[arg(long, default_value_t = false)]
    pub no_text_filter: bool,

    /// Disable the vision detector
    #[arg(long, default_value_t = false)]
    pub no_vision: bool,

    /// Vision provider to use when vision detection is enabled
    #[arg(long, env = "FORMLENS_VISION_PROVIDER", default_value = "openai")]
    pub vision_provider: VisionProvider,

    /// Vision model name; defaults to the provider's standard model
    #[arg(long, env = "FORMLENS_VISION_MODEL")]
    pub vision_model: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,
}

impl DetectionArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        let vision = if self.no_vision {
            None
        } else {
            let api_key = match self.vision_provider {
                VisionProvider::OpenAi => self.openai_api_key.clone(),
                VisionProvider::Gemini => self.gemini_api_key.clone(),
            };
            match api_key {
                Some(key) if !key.is_empty() => {
                    let mut config = VisionConfig::new(self.vision_provider, key);
                    config.model = self.vision_model.clone();
                    Some(config)
                }
                _ => {
                    tracing::info!(
                        "no API key configured for vision provider, running without vision detection"
                    );
                    None
                }
            }
        };

        PipelineConfig {
            structure: StructureConfig::default(),
            geometric: GeometricConfig::default(),
            merge: MergeConfig {
                iou_threshold: self.iou_threshold,
            },
            filter: (!self.no_text_filter).then_some(FilterConfig {
                overlap_threshold: self.text_overlap_threshold,
            }),
            vision,
            render_dpi: self.dpi,
        }
    }
}

/// Database and object-storage wiring shared by the worker and the CLI.
///
/// With `--storage-url` set, objects live in a Supabase-style REST store;
/// otherwise a local directory is used.
#[derive(Debug, clap::Args)]
pub struct StorageArgs {
    #[arg(long, env = "FORMLENS_DB_PATH", default_value = "formlens.db")]
    pub db_path: PathBuf,

    #[arg(long, env = "FORMLENS_STORAGE_DIR", default_value = "formlens-storage")]
    pub storage_dir: PathBuf,

    #[arg(long, env = "FORMLENS_STORAGE_URL")]
    pub storage_url: Option<String>,

    #[arg(long, env = "FORMLENS_STORAGE_BUCKET", default_value = "formlens")]
    pub storage_bucket: String,

    #[arg(long, env = "FORMLENS_STORAGE_KEY", hide_env_values = true)]
    pub storage_key: Option<String>,
}

impl StorageArgs {
    pub fn open_store(&self) -> Result<Store, StoreError> {
        Store::open(&self.db_path)
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        match (&self.storage_url, &self.storage_key) {
            (Some(url), Some(key)) => {
                Arc::new(HttpStorage::new(url, &self.storage_bucket, key))
            }
            _ => Arc::new(LocalStorage::new(&self.storage_dir)),
        }
    }
}
