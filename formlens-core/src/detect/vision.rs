use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use crate::config::{VisionConfig, VisionProvider};
use crate::entities::{BBox, DetectionSource, FieldDetection, FieldType};
use crate::error::DetectError;
use crate::render::render_pages_png;

/// Side length of the relative grid the model reports coordinates in.
const VISION_GRID: f64 = 1000.0;

const VISION_PROMPT: &str = r#"You are a document form field detection engine. Your job is to find every place a human is supposed to type, tick, or sign on this form page.

You MUST:
- Look for empty boxes, underlines, table cells, or whitespace aligned with labels.
- Treat "fill-in-the-blank" lines, rectangular boxes, and empty cells as input fields.
- Include checkboxes and signature areas.

For each field you detect, return JSON with:
- id: a short unique string (like "field_001").
- type: one of "text" | "textarea" | "checkbox" | "signature" | "date" | "number" | "unknown".
- label: the human-readable label, e.g. "Full Name", "NRIC No.", "Marital Status".
- bbox: bounding box as [x_min, y_min, x_max, y_max] in a 0-1000 relative grid, where (0,0) is bottom-left of the page and (1000,1000) is top-right.

Important details:
- Ignore decorative text and headings that are not directly associated with an input field.
- If multiple small boxes form one logical field (e.g., individual digit boxes), treat them as one field that covers the whole group.
- For checkboxes with labels, return the bbox of the checkbox itself and include the label text.

Output format (JSON only, no explanations):
{
  "page_index": <zero_based_page_index>,
  "fields": [
    {"id": "field_001", "type": "text", "label": "Name", "bbox": [100, 120, 600, 160]},
    {"id": "field_002", "type": "checkbox", "label": "Single", "bbox": [120, 300, 150, 330]}
  ]
}"#;

#[derive(Debug, Deserialize)]
struct VisionPageReply {
    #[serde(default)]
    fields: Vec<VisionFieldReply>,
}

#[derive(Debug, Deserialize)]
struct VisionFieldReply {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    bbox: Vec<f64>,
}

/// Vision-LLM field detector. Renders each page to PNG, sends it to the
/// configured provider and parses the strict-JSON reply.
///
/// Every per-page fault (network, JSON, schema) is logged and skipped so a
/// flaky provider still yields detections for the healthy pages.
#[derive(Clone)]
pub struct VisionDetector {
    config: VisionConfig,
    client: reqwest::Client,
}

impl VisionDetector {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn provider(&self) -> VisionProvider {
        self.config.provider
    }

    #[tracing::instrument(skip_all, fields(document_id))]
    pub async fn detect(
        &self,
        pdf_path: &Path,
        document_id: Option<&str>,
    ) -> Result<Vec<FieldDetection>, DetectError> {
        let path = pdf_path.to_owned();
        let dpi = self.config.dpi;
        let pages = tokio::task::spawn_blocking(move || render_pages_png(&path, dpi))
            .await
            .map_err(|e| DetectError::VisionResponse(format!("render task failed: {e}")))??;

        let mut detections = Vec::new();
        for (page_index, png) in pages {
            match self.detect_on_page(&png, page_index).await {
                Ok(mut page_detections) => {
                    tracing::debug!(
                        "vision found {} fields on page {page_index} (doc {:?})",
                        page_detections.len(),
                        document_id
                    );
                    detections.append(&mut page_detections);
                }
                Err(e) => {
                    tracing::error!("vision detection failed on page {page_index}: {e}");
                }
            }
        }
        Ok(detections)
    }

    async fn detect_on_page(
        &self,
        png: &[u8],
        page_index: usize,
    ) -> Result<Vec<FieldDetection>, DetectError> {
        let image_b64 = BASE64.encode(png);
        let content = match self.config.provider {
            VisionProvider::OpenAi => self.call_openai(&image_b64).await?,
            VisionProvider::Gemini => self.call_gemini(&image_b64).await?,
        };
        parse_detections(&content, page_index, self.config.confidence)
    }

    async fn call_openai(&self, image_b64: &str) -> Result<String, DetectError> {
        let body = json!({
            "model": self.config.model_name(),
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": VISION_PROMPT},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/png;base64,{image_b64}")
                    }},
                ],
            }],
            "max_tokens": 4096,
            "temperature": 0.1,
        });

        let reply: serde_json::Value = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(DetectError::VisionRequest)?
            .error_for_status()
            .map_err(DetectError::VisionRequest)?
            .json()
            .await
            .map_err(DetectError::VisionRequest)?;

        reply["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| DetectError::VisionResponse("missing message content".into()))
    }

    async fn call_gemini(&self, image_b64: &str) -> Result<String, DetectError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.config.model_name(),
            self.config.api_key
        );
        let body = json!({
            "contents": [{
                "parts": [
                    {"text": VISION_PROMPT},
                    {"inline_data": {"mime_type": "image/png", "data": image_b64}},
                ],
            }],
            "generationConfig": {"temperature": 0.1},
        });

        let reply: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(DetectError::VisionRequest)?
            .error_for_status()
            .map_err(DetectError::VisionRequest)?
            .json()
            .await
            .map_err(DetectError::VisionRequest)?;

        reply["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| DetectError::VisionResponse("missing candidate text".into()))
    }
}

/// Parse the model reply into detections. Tolerates fenced JSON; fields
/// with malformed bboxes are dropped individually.
fn parse_detections(
    content: &str,
    page_index: usize,
    confidence: f64,
) -> Result<Vec<FieldDetection>, DetectError> {
    let stripped = strip_code_fences(content);
    let reply: VisionPageReply = serde_json::from_str(stripped)
        .map_err(|e| DetectError::VisionResponse(format!("unparseable reply: {e}")))?;

    let mut detections = Vec::new();
    for field in reply.fields {
        let Some(bbox) = grid_to_bbox(&field.bbox) else {
            tracing::debug!("dropping vision field with bad bbox: {:?}", field.bbox);
            continue;
        };
        let field_type = map_field_type(field.kind.as_deref().unwrap_or("unknown"));
        let label = field
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "Unnamed Field".to_string());

        match FieldDetection::new(
            page_index,
            bbox,
            field_type,
            label,
            confidence,
            DetectionSource::Vision,
            field.id,
        ) {
            Ok(detection) => detections.push(detection),
            Err(e) => tracing::debug!("dropping vision field: {e}"),
        }
    }
    Ok(detections)
}

fn strip_code_fences(content: &str) -> &str {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// `[x_min, y_min, x_max, y_max]` on the 0-1000 bottom-left grid to a
/// normalized bbox.
fn grid_to_bbox(bbox: &[f64]) -> Option<BBox> {
    let &[x_min, y_min, x_max, y_max] = bbox else {
        return None;
    };
    BBox::clamped(
        x_min / VISION_GRID,
        y_min / VISION_GRID,
        (x_max - x_min) / VISION_GRID,
        (y_max - y_min) / VISION_GRID,
    )
}

fn map_field_type(kind: &str) -> FieldType {
    match kind.to_ascii_lowercase().as_str() {
        "text" => FieldType::Text,
        "textarea" => FieldType::Multiline,
        "checkbox" => FieldType::Checkbox,
        "signature" => FieldType::Signature,
        "date" => FieldType::Date,
        "number" => FieldType::Number,
        _ => FieldType::Unknown,
    }
}
