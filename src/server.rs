//! MCP server over stdio or Streamable HTTP.

use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::Arc;

use crate::tools::MnemeTools;
use mneme::config::MnemeConfig;

/// Start the MCP server on the configured transport.
pub async fn serve(config: MnemeConfig) -> Result<()> {
    match config.server.transport.as_str() {
        "stdio" => serve_stdio(config).await,
        "http" => serve_http(config).await,
        other => anyhow::bail!("unknown transport: {other}. Supported: stdio, http"),
    }
}

async fn serve_stdio(config: MnemeConfig) -> Result<()> {
    tracing::info!("starting Mneme MCP server on stdio");

    let (engine, embedding) = crate::cli::open_backends(&config)?;
    let tools = MnemeTools::new(engine, embedding, Arc::new(config));

    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");
    Ok(())
}

async fn serve_http(config: MnemeConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting Mneme MCP server on HTTP");

    let (engine, embedding) = crate::cli::open_backends(&config)?;
    let config = Arc::new(config);

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(MnemeTools::new(engine.clone(), embedding.clone(), config.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}
