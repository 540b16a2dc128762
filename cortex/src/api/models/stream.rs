//! Newline-delimited JSON events emitted by the streaming endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::chat::ChatResponse;
use super::compare::CompareResponse;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// One line of response text
    Line { text: String },
    /// A target finished (success or embedded error)
    ResponseDone { response: ChatResponse },
    /// The call failed after the stream started
    Error { message: String },
    /// Terminal event; carries the aggregate for compare streams
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compare: Option<CompareResponse>,
    },
}

impl StreamEvent {
    /// Serialize as one NDJSON line, including the trailing newline.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": format!("failed to encode event: {e}") }).to_string()
        });
        line.push('\n');
        line
    }
}
