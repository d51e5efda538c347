use serde::{Deserialize, Serialize};

/// DPI used when rasterizing pages for the geometric detector.
pub const DEFAULT_RENDER_DPI: u32 = 144;

/// DPI used when rasterizing pages for the vision provider.
pub const DEFAULT_VISION_DPI: u32 = 150;

/// Geometry thresholds for the structure detector.
#[derive(Debug, Clone, Copy)]
pub struct StructureConfig {
    pub min_field_width_ratio: f64,
    pub min_field_height_ratio: f64,
    pub max_field_height_ratio: f64,
    pub checkbox_max_size_ratio: f64,
    pub checkbox_aspect_ratio_range: (f64, f64),
    pub signature_min_aspect_ratio: f64,
    pub signature_max_height_ratio: f64,
    /// Width (as a fraction of the page) of the bands searched for labels.
    pub label_search_distance: f64,
    /// Text widgets taller than this fraction of the page are treated as
    /// multi-line inputs.
    pub multiline_min_height_ratio: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            min_field_width_ratio: 0.02,
            min_field_height_ratio: 0.005,
            max_field_height_ratio: 0.15,
            checkbox_max_size_ratio: 0.03,
            checkbox_aspect_ratio_range: (0.5, 2.0),
            signature_min_aspect_ratio: 4.0,
            signature_max_height_ratio: 0.05,
            label_search_distance: 0.15,
            multiline_min_height_ratio: 0.06,
        }
    }
}

/// Size and classification thresholds for the raster-based detector.
#[derive(Debug, Clone, Copy)]
pub struct GeometricConfig {
    pub min_field_width_ratio: f64,
    pub min_field_height_ratio: f64,
    pub max_field_height_ratio: f64,
    pub checkbox_max_size_ratio: f64,
    pub checkbox_aspect_ratio_range: (f64, f64),
    pub signature_min_aspect_ratio: f64,
    pub signature_max_height_ratio: f64,
}

impl Default for GeometricConfig {
    fn default() -> Self {
        Self {
            min_field_width_ratio: 0.05,
            min_field_height_ratio: 0.005,
            max_field_height_ratio: 0.08,
            checkbox_max_size_ratio: 0.03,
            checkbox_aspect_ratio_range: (0.5, 2.0),
            signature_min_aspect_ratio: 8.0,
            signature_max_height_ratio: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionProvider {
    OpenAi,
    Gemini,
}

impl VisionProvider {
    pub fn default_model(&self) -> &'static str {
        match self {
            VisionProvider::OpenAi => "gpt-4o-mini",
            VisionProvider::Gemini => "gemini-1.5-flash",
        }
    }
}

impl std::str::FromStr for VisionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(VisionProvider::OpenAi),
            "gemini" => Ok(VisionProvider::Gemini),
            other => Err(format!("unsupported vision provider: {other}")),
        }
    }
}

/// Vision-LLM detector configuration. `api_key` is mandatory; a detector
/// without one is simply not constructed and the pipeline runs without it.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub provider: VisionProvider,
    pub api_key: String,
    /// Model name; `None` picks the provider default.
    pub model: Option<String>,
    pub dpi: u32,
    /// Confidence assigned to every vision detection.
    pub confidence: f64,
}

impl VisionConfig {
    pub fn new(provider: VisionProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: None,
            dpi: DEFAULT_VISION_DPI,
            confidence: 0.85,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

/// IoU threshold above which two same-page detections are considered the
/// same field.
#[derive(Debug, Clone, Copy)]
pub struct MergeConfig {
    pub iou_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.30,
        }
    }
}

/// Maximum fraction of a field's area that may be covered by printed text.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    pub overlap_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.30,
        }
    }
}

/// Top-level pipeline configuration aggregating every component knob.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub structure: StructureConfig,
    pub geometric: GeometricConfig,
    pub merge: MergeConfig,
    /// `None` disables the text-overlap filter.
    pub filter: Option<FilterConfig>,
    /// `None` disables the vision detector.
    pub vision: Option<VisionConfig>,
    pub render_dpi: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            structure: StructureConfig::default(),
            geometric: GeometricConfig::default(),
            merge: MergeConfig::default(),
            filter: Some(FilterConfig::default()),
            vision: None,
            render_dpi: DEFAULT_RENDER_DPI,
        }
    }
}
