//! MCP `add_message` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `add_message` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddMessageParams {
    #[schemars(description = "Session to add the message to. Created if it does not exist.")]
    pub session_id: String,

    #[schemars(description = "Message author role, e.g. 'user', 'assistant', 'system'")]
    pub role: String,

    #[schemars(description = "Message text. It is embedded for similarity search.")]
    pub content: String,

    #[schemars(description = "Optional JSON object searchable with jsonpath filters")]
    pub metadata: Option<serde_json::Value>,

    #[schemars(description = "Token count of the content, if known")]
    pub token_count: Option<i64>,
}
