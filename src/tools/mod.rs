pub mod add_message;
pub mod search_memory;

use add_message::AddMessageParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::service::RequestContext;
use rmcp::{tool, tool_handler, tool_router, RoleServer, ServerHandler};
use search_memory::SearchMemoryParams;
use std::future::Future;
use std::sync::Arc;

use mneme::config::MnemeConfig;
use mneme::db::engine::SqliteEngine;
use mneme::db::messages::{insert_message, NewMessage};
use mneme::embedding::EmbeddingProvider;
use mneme::search::{cancel_when, MemorySearch, SearchPayload, SearchType};

/// The Mneme MCP tool handler. Holds the shared search service, storage engine
/// and embedding provider, and exposes the tools via `#[tool_router]`.
#[derive(Clone)]
pub struct MnemeTools {
    tool_router: ToolRouter<Self>,
    search: MemorySearch,
    engine: Arc<SqliteEngine>,
    embedding: Arc<dyn EmbeddingProvider>,
}

#[tool_router]
impl MnemeTools {
    pub fn new(
        engine: Arc<SqliteEngine>,
        embedding: Arc<dyn EmbeddingProvider>,
        config: Arc<MnemeConfig>,
    ) -> Self {
        let search = MemorySearch::new(
            Arc::clone(&embedding),
            engine.clone(),
            config.search.clone(),
        );
        Self {
            tool_router: Self::tool_router(),
            search,
            engine,
            embedding,
        }
    }

    /// Search a session's messages by text similarity and/or metadata.
    ///
    /// A client's cancel notification for this request cancels the search.
    #[tool(description = "Search a session's messages by natural language text and/or a metadata filter. Type 'mmr' diversifies results. Returns messages with a similarity score (higher is more similar).")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<String, String> {
        self.run_search(params, ctx.ct.cancelled()).await
    }

    async fn run_search(
        &self,
        params: SearchMemoryParams,
        cancelled: impl Future<Output = ()>,
    ) -> Result<String, String> {
        let search_type = match params.r#type.as_deref() {
            Some(t) => t.parse::<SearchType>().map_err(|e| e.to_string())?,
            None => SearchType::Similarity,
        };
        let payload = SearchPayload {
            text: params.text,
            metadata: params.metadata,
            search_type,
            mmr_lambda: params.mmr_lambda,
        };

        tracing::info!(
            session_id = %params.session_id,
            search_type = %search_type,
            "search_memory called"
        );

        let limit = params.limit.unwrap_or(0);
        let results = cancel_when(cancelled, |cancel| async move {
            self.search
                .search(&params.session_id, &payload, limit, &cancel)
                .await
        })
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "search_memory failed");
            e.to_string()
        })?;

        serde_json::to_string(&serde_json::json!({
            "results": results,
            "total": results.len(),
        }))
        .map_err(|e| format!("serialization failed: {e}"))
    }

    /// Store a message and its embedding.
    #[tool(description = "Add a message to a session. The content is embedded so search_memory can find it; metadata is searchable with jsonpath filters.")]
    async fn add_message(
        &self,
        Parameters(params): Parameters<AddMessageParams>,
    ) -> Result<String, String> {
        if params.content.trim().is_empty() {
            return Err("content must not be empty".into());
        }
        if params
            .metadata
            .as_ref()
            .is_some_and(|m| !m.is_object() && !m.is_null())
        {
            return Err("metadata must be a JSON object".into());
        }

        // Embed content (CPU-heavy or network-bound → spawn_blocking)
        let embedding_provider = Arc::clone(&self.embedding);
        let content_for_embed = params.content.clone();
        let embedding = tokio::task::spawn_blocking(move || {
            embedding_provider.embed(&content_for_embed)
        })
        .await
        .map_err(|e| format!("embedding task failed: {e}"))?
        .map_err(|e| format!("embedding failed: {e}"))?;

        let engine = Arc::clone(&self.engine);
        let session_id = params.session_id;
        let message = NewMessage {
            role: params.role,
            content: params.content,
            metadata: params.metadata,
            token_count: params.token_count.unwrap_or(0),
            created_at: None,
        };

        let (uuid, session_id) = tokio::task::spawn_blocking(move || {
            engine
                .with_connection(|conn| insert_message(conn, &session_id, &message, Some(&embedding)))
                .map(|uuid| (uuid, session_id))
        })
        .await
        .map_err(|e| format!("db task failed: {e}"))?
        .map_err(|e| format!("store failed: {e}"))?;

        tracing::info!(%uuid, %session_id, "message stored");

        Ok(serde_json::json!({ "uuid": uuid, "session_id": session_id }).to_string())
    }
}

#[tool_handler]
impl ServerHandler for MnemeTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Mneme stores conversation messages per session. Use add_message to save \
                 messages and search_memory to find them by meaning, metadata, or both."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
