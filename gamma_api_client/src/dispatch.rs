use crate::protocol::{ClientEvent, Connectivity, JsonObject, RequestTag, UNKNOWN_LATENCY_MS};
use serde_json::Value;

/// Joins base and endpoint with exactly one `/` between them.
pub fn build_url(base: &str, endpoint: &str) -> String {
    match (base.ends_with('/'), endpoint.starts_with('/')) {
        (false, false) => format!("{base}/{endpoint}"),
        (true, true) => format!("{}{endpoint}", &base[..base.len() - 1]),
        _ => format!("{base}{endpoint}"),
    }
}

/// Accepts only JSON objects and arrays.
pub fn parse_document(body: &[u8]) -> Result<Value, String> {
    let doc: Value =
        serde_json::from_slice(body).map_err(|e| format!("JSON Parse Error: {e}"))?;
    if !doc.is_object() && !doc.is_array() {
        return Err("Invalid JSON response format".to_string());
    }
    Ok(doc)
}

pub fn status_connectivity(obj: &JsonObject) -> Connectivity {
    let status = obj.get("status").and_then(Value::as_str).unwrap_or("unknown");
    let latency_ms = obj
        .get("latency_ms")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(UNKNOWN_LATENCY_MS);
    Connectivity {
        connected: status == "connected" || status == "ok",
        latency_ms,
    }
}

// Status is handled by the client.
pub fn route(tag: RequestTag, doc: Value) -> Option<ClientEvent> {
    match tag {
        RequestTag::Status | RequestTag::Untagged => None,
        RequestTag::Pipeline => match doc {
            Value::Object(data) => Some(ClientEvent::PipelineReceived { data }),
            Value::Array(items) => {
                let mut data = JsonObject::new();
                data.insert("pipelines".to_string(), Value::Array(items));
                Some(ClientEvent::PipelineReceived { data })
            }
            _ => None,
        },
        RequestTag::Assets => into_object(doc).map(|data| ClientEvent::AssetsReceived { data }),
        RequestTag::LayoutAudit => {
            into_object(doc).map(|data| ClientEvent::LayoutAuditReceived { data })
        }
        RequestTag::PipelineStart => {
            let (success, message) = control_result(&doc, "Pipeline started");
            Some(ClientEvent::PipelineStartResult { success, message })
        }
        RequestTag::PipelineStop => {
            let (success, message) = control_result(&doc, "Pipeline stopped");
            Some(ClientEvent::PipelineStopResult { success, message })
        }
        RequestTag::RagLlmContext { prompt } => into_object(doc)
            .map(|context| ClientEvent::RagLlmContextReceived { prompt, context }),
        RequestTag::RagImagesForText => into_object(doc).map(|obj| {
            ClientEvent::RagImagesForTextReceived {
                images: array_field(&obj, "images"),
            }
        }),
        RequestTag::RagTextsForImage => into_object(doc).map(|obj| {
            ClientEvent::RagTextsForImageReceived {
                texts: array_field(&obj, "texts"),
            }
        }),
        RequestTag::RagSuggestPairs => into_object(doc).map(|obj| {
            ClientEvent::RagSuggestPairsReceived {
                suggestions: array_field(&obj, "suggestions"),
            }
        }),
        RequestTag::FigmaFiles => into_object(doc).map(|obj| ClientEvent::FigmaFilesReceived {
            files: array_field(&obj, "files"),
        }),
        RequestTag::FigmaFrames { file_key } => {
            into_object(doc).map(|obj| ClientEvent::FigmaFramesReceived {
                file_key,
                frames: array_field(&obj, "frames"),
            })
        }
        RequestTag::FigmaFrameImport => {
            into_object(doc).map(|result| ClientEvent::FigmaFrameImportReceived { result })
        }
        RequestTag::WorkflowRun => {
            into_object(doc).map(|job| ClientEvent::WorkflowJobCreated { job })
        }
    }
}

fn into_object(doc: Value) -> Option<JsonObject> {
    match doc {
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

fn array_field(obj: &JsonObject, key: &str) -> Vec<Value> {
    obj.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn control_result(doc: &Value, default_message: &str) -> (bool, String) {
    let Some(obj) = doc.as_object() else {
        return (false, "Unknown".to_string());
    };
    let success = obj.get("success").and_then(Value::as_bool).unwrap_or(false);
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(default_message)
        .to_string();
    (success, message)
}
