use anyhow::{Context, Result};

use mneme::config::MnemeConfig;
use mneme::search::{cancel_when, MemorySearch, SearchPayload, SearchType};

/// Options for a terminal search.
pub struct SearchArgs {
    pub session_id: String,
    pub text: Option<String>,
    pub filter: Option<String>,
    pub mmr: bool,
    pub lambda: Option<f32>,
    pub limit: usize,
    pub json: bool,
}

/// Run a search from the terminal. Ctrl-C cancels it.
pub async fn search(config: &MnemeConfig, args: SearchArgs) -> Result<()> {
    let metadata = args
        .filter
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--filter must be a JSON object")?;

    let payload = SearchPayload {
        text: args.text,
        metadata,
        search_type: if args.mmr {
            SearchType::Mmr
        } else {
            SearchType::Similarity
        },
        mmr_lambda: args.lambda,
    };

    let (engine, provider) = super::open_backends(config)?;
    let search = MemorySearch::new(provider, engine, config.search.clone());

    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let results = cancel_when(ctrl_c, |cancel| async move {
        search
            .search(&args.session_id, &payload, args.limit, &cancel)
            .await
    })
    .await;
    let results = results?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", results.len());
    for (i, result) in results.iter().enumerate() {
        let message = &result.message;
        let preview: String = message.content.chars().take(120).collect();
        let ellipsis = if message.content.chars().count() > 120 { "..." } else { "" };
        let score = result
            .distance
            .map_or_else(|| "-".to_string(), |d| format!("{d:.4}"));

        println!(
            "  {}. [{}] {} {} (score: {score})",
            i + 1,
            message.role,
            message.uuid,
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
        println!("     {preview}{ellipsis}");
        if let Some(metadata) = &message.metadata {
            println!("     metadata: {metadata}");
        }
        println!();
    }

    Ok(())
}
