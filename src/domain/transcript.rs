use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded segment. Fields beyond the timing/text contract are
/// decoder diagnostics and are carried opaquely through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(flatten)]
    pub diagnostics: serde_json::Map<String, Value>,
}

/// The structured outcome of a completed inference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<Segment>,
    /// Decoder metadata (detected language, model identifiers, ...).
    #[serde(default)]
    pub info: serde_json::Map<String, Value>,
}

impl TranscriptionResult {
    pub fn detected_language(&self) -> Option<&str> {
        self.info.get("language").and_then(Value::as_str)
    }
}
