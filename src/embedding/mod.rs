//! Text-to-vector embedding providers.
//!
//! [`EmbeddingProvider`] is the collaborator search uses to turn query text
//! into a vector. Two implementations ship: a local ONNX model and an
//! OpenAI-compatible HTTP API. Pick one with [`create_provider`].

pub mod local;
pub mod remote;

use anyhow::Result;

use crate::search::cancel::Abort;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Like [`embed_batch`](Self::embed_batch), but gives up once `abort` is
    /// raised. Providers that cannot stop mid-call just finish the batch.
    fn embed_batch_abortable(&self, texts: &[&str], abort: &Abort) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embed_batch(texts)?;
        anyhow::ensure!(!abort.is_raised(), "embedding aborted");
        Ok(vectors)
    }

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("provider returned no embedding"))
    }

    /// Number of dimensions every vector has.
    fn dimensions(&self) -> usize;
}

/// Create an embedding provider from config.
///
/// `"local"` needs model files from `mneme model download`; `"openai"` talks
/// to `api_base` and must be created inside a Tokio runtime.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        "openai" => {
            let provider = remote::RemoteEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local, openai"),
    }
}
