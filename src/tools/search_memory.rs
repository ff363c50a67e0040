//! MCP `search_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_memory` MCP tool.
///
/// Provide `text`, `metadata`, or both.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    #[schemars(description = "Session whose messages are searched")]
    pub session_id: String,

    #[schemars(
        description = "Natural language query. Results are ranked by similarity to it. Required unless 'metadata' is provided."
    )]
    pub text: Option<String>,

    #[schemars(
        description = "Metadata filter object: {\"where\": {\"jsonpath\": \"$.tag\", \"and\": [...], \"or\": [...]}, \"start_date\": \"...\", \"end_date\": \"...\"}"
    )]
    pub metadata: Option<serde_json::Value>,

    #[schemars(
        description = "Ranking: 'similarity' (default) or 'mmr' to diversify results. 'mmr' requires 'text'."
    )]
    pub r#type: Option<String>,

    #[schemars(
        description = "MMR trade-off in [0, 1]: 1 ranks purely by relevance, lower values favour diversity. Defaults to 0.5."
    )]
    pub mmr_lambda: Option<f32>,

    #[schemars(description = "Maximum number of results. Defaults to 10.")]
    pub limit: Option<usize>,
}
