use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub type JsonObject = Map<String, Value>;

pub const UNKNOWN_LATENCY_MS: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestTag {
    Status,
    Pipeline,
    Assets,
    LayoutAudit,
    PipelineStart,
    PipelineStop,
    RagLlmContext { prompt: String },
    RagImagesForText,
    RagTextsForImage,
    RagSuggestPairs,
    FigmaFiles,
    FigmaFrames { file_key: String },
    FigmaFrameImport,
    WorkflowRun,
    /// Unknown or already consumed request.
    Untagged,
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestTag::Status => f.write_str("status"),
            RequestTag::Pipeline => f.write_str("pipeline"),
            RequestTag::Assets => f.write_str("assets"),
            RequestTag::LayoutAudit => f.write_str("layout_audit"),
            RequestTag::PipelineStart => f.write_str("pipeline_start"),
            RequestTag::PipelineStop => f.write_str("pipeline_stop"),
            RequestTag::RagLlmContext { .. } => f.write_str("rag_llm_context"),
            RequestTag::RagImagesForText => f.write_str("rag_images_for_text"),
            RequestTag::RagTextsForImage => f.write_str("rag_texts_for_image"),
            RequestTag::RagSuggestPairs => f.write_str("rag_suggest_pairs"),
            RequestTag::FigmaFiles => f.write_str("figma_files"),
            RequestTag::FigmaFrames { file_key } => write!(f, "figma_frames:{file_key}"),
            RequestTag::FigmaFrameImport => f.write_str("figma_frame_import"),
            RequestTag::WorkflowRun => f.write_str("workflow_run"),
            RequestTag::Untagged => f.write_str(""),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub connected: bool,
    pub latency_ms: i64,
}

impl Connectivity {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            latency_ms: UNKNOWN_LATENCY_MS,
        }
    }

    pub fn connected(latency_ms: i64) -> Self {
        Self {
            connected: true,
            latency_ms,
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Precondition,
    Transport,
    Http,
    Payload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ClientEvent {
    StatusReceived { data: JsonObject },
    PipelineReceived { data: JsonObject },
    AssetsReceived { data: JsonObject },
    LayoutAuditReceived { data: JsonObject },
    PipelineStartResult { success: bool, message: String },
    PipelineStopResult { success: bool, message: String },
    RagLlmContextReceived { prompt: String, context: JsonObject },
    RagImagesForTextReceived { images: Vec<Value> },
    RagTextsForImageReceived { texts: Vec<Value> },
    RagSuggestPairsReceived { suggestions: Vec<Value> },
    FigmaFilesReceived { files: Vec<Value> },
    FigmaFramesReceived { file_key: String, frames: Vec<Value> },
    FigmaFrameImportReceived { result: JsonObject },
    WorkflowJobCreated { job: JsonObject },
    ConnectionStatusChanged { connected: bool, latency_ms: i64 },
    Error {
        message: String,
        /// HTTP status, or 0 when there was none.
        status: u16,
        category: ErrorCategory,
    },
}

impl ClientEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, ClientEvent::Error { .. })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineControlBody {
    pub pipeline_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RagLlmContextBody {
    pub prompt: String,
    pub top_k_layouts: u32,
    pub top_k_texts: u32,
    pub top_k_images: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImagesForTextBody {
    pub text: String,
    pub top_k: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TextsForImageBody {
    pub image_path: String,
    pub top_k: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SuggestPairsBody {
    pub layout_json: JsonObject,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FigmaFrameImportBody {
    pub file_key: String,
    pub frame_id: String,
    pub dpi: u32,
    pub page_number: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowRunOptions {
    pub generate_variants: bool,
    pub gamma_sync: bool,
    pub gamma_crop_kinds: Vec<String>,
    pub quality_check: bool,
    pub quality_checks: Vec<String>,
    pub publish_artifacts: bool,
    pub force: bool,
}

impl Default for WorkflowRunOptions {
    fn default() -> Self {
        Self {
            generate_variants: true,
            gamma_sync: true,
            gamma_crop_kinds: vec!["infobox".to_string()],
            quality_check: true,
            quality_checks: vec!["preflight".to_string(), "amazon".to_string()],
            publish_artifacts: true,
            force: false,
        }
    }
}

impl WorkflowRunOptions {
    pub fn to_json_object(&self) -> JsonObject {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => JsonObject::new(),
        }
    }
}
