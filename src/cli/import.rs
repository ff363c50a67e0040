use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use mneme::config::MnemeConfig;
use mneme::db::messages::{insert_message, NewMessage};

/// Messages are embedded in batches of this size.
const EMBED_BATCH: usize = 32;

/// One entry of an import file: a message plus the session it belongs to.
#[derive(Debug, Deserialize)]
struct ImportMessage {
    session_id: String,
    #[serde(flatten)]
    message: NewMessage,
}

/// Import messages from a JSON array, embedding each one.
pub async fn import(config: &MnemeConfig, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read import file: {}", file.display()))?;
    let entries: Vec<ImportMessage> =
        serde_json::from_str(&json).context("failed to parse import JSON")?;

    let (engine, provider) = super::open_backends(config)?;

    println!("Importing {} messages...", entries.len());

    let mut imported = 0usize;
    for batch in entries.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|e| e.message.content.clone()).collect();
        let ep = Arc::clone(&provider);
        let embeddings = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            ep.embed_batch(&refs)
        })
        .await??;
        anyhow::ensure!(
            embeddings.len() == batch.len(),
            "provider returned {} embeddings for {} messages",
            embeddings.len(),
            batch.len()
        );

        engine.with_connection(|conn| {
            for (entry, embedding) in batch.iter().zip(&embeddings) {
                insert_message(conn, &entry.session_id, &entry.message, Some(embedding))
                    .with_context(|| format!("failed to import into session {}", entry.session_id))?;
            }
            Ok(())
        })?;
        imported += batch.len();
        tracing::debug!(imported, "import batch stored");
    }

    println!("Import complete: {imported} messages imported.");
    Ok(())
}
