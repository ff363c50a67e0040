//! OpenAI-compatible HTTP embedding provider.
//!
//! POSTs `{"model", "input"}` to `{api_base}/embeddings`. Works with the
//! OpenAI API and with local servers exposing the same endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::search::cancel::Abort;

pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    runtime: Handle,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbeddingProvider {
    /// Must be called from within a Tokio runtime; requests are driven on it.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .context("the openai embedding provider needs a running Tokio runtime")?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "no API key set, sending unauthenticated embedding requests"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let endpoint = format!("{}/embeddings", config.api_base.trim_end_matches('/'));
        tracing::info!(
            %endpoint,
            model = %config.model,
            timeout_secs = config.request_timeout_secs,
            "remote embedding provider ready"
        );

        Ok(Self {
            client,
            runtime,
            endpoint,
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("HTTP request failed for {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding request failed with HTTP {status}: {body}");
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("failed to decode embedding response")?;
        into_input_order(body.data, texts.len())
    }
}

/// Sort response rows by `index`, requiring exactly one row per input.
fn into_input_order(mut data: Vec<EmbeddingDatum>, expected: usize) -> Result<Vec<Vec<f32>>> {
    anyhow::ensure!(
        data.len() == expected,
        "expected {expected} embeddings, got {}",
        data.len()
    );
    data.sort_by_key(|d| d.index);
    for (position, datum) in data.iter().enumerate() {
        anyhow::ensure!(
            datum.index == position,
            "embedding response has a missing or duplicate index {position}"
        );
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    /// Blocks on the runtime captured at construction, so call it from a
    /// blocking-pool thread, never from an async task.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch_abortable(texts, &Abort::new())
    }

    /// Raising `abort` drops the in-flight request.
    fn embed_batch_abortable(&self, texts: &[&str], abort: &Abort) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let vectors = self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = abort.raised() => anyhow::bail!("embedding request to {} aborted", self.endpoint),
                result = self.request(texts) => result,
            }
        })?;
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dimensions) {
            anyhow::bail!(
                "model {} returned {} dimensions, configured for {}",
                self.model,
                v.len(),
                self.dimensions
            );
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum(index: usize, value: f32) -> EmbeddingDatum {
        EmbeddingDatum {
            index,
            embedding: vec![value],
        }
    }

    #[test]
    fn reorders_by_index() {
        let out = into_input_order(vec![datum(1, 1.0), datum(0, 0.0), datum(2, 2.0)], 3).unwrap();
        assert_eq!(out, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn rejects_count_and_index_mismatches() {
        assert!(into_input_order(vec![datum(0, 0.0)], 2).is_err());
        assert!(into_input_order(vec![datum(0, 0.0), datum(0, 1.0)], 2).is_err());
        assert!(into_input_order(vec![datum(0, 0.0), datum(5, 1.0)], 2).is_err());
    }

    #[test]
    fn response_shape_parses() {
        let body: EmbeddingResponse = serde_json::from_str(
            r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.5]}],"model":"m"}"#,
        )
        .unwrap();
        assert_eq!(body.data[0].embedding, vec![0.5, -0.5]);
    }

    #[test]
    fn requires_runtime() {
        assert!(RemoteEmbeddingProvider::new(&EmbeddingConfig::default()).is_err());
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (format!("http://{addr}"), server)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hung_server_times_out() {
        let (api_base, server) = silent_server().await;
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_base,
            dimensions: 2,
            request_timeout_secs: 1,
            ..Default::default()
        };
        let provider = std::sync::Arc::new(RemoteEmbeddingProvider::new(&config).unwrap());
        let started = std::time::Instant::now();
        let result = tokio::task::spawn_blocking(move || provider.embed_batch(&["hi"]))
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
        server.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abort_drops_the_in_flight_request() {
        let (api_base, server) = silent_server().await;
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_base,
            dimensions: 2,
            request_timeout_secs: 600,
            ..Default::default()
        };
        let provider = std::sync::Arc::new(RemoteEmbeddingProvider::new(&config).unwrap());
        let abort = Abort::new();
        let call = tokio::task::spawn_blocking({
            let abort = abort.clone();
            move || provider.embed_batch_abortable(&["hi"], &abort)
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort.raise();

        let result = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("aborted request should return promptly")
            .unwrap();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("aborted"), "{err}");
        server.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_server_is_an_error() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_base: "http://127.0.0.1:9".into(),
            dimensions: 2,
            ..Default::default()
        };
        let provider = std::sync::Arc::new(RemoteEmbeddingProvider::new(&config).unwrap());
        let result = tokio::task::spawn_blocking(move || provider.embed_batch(&["hi"]))
            .await
            .unwrap();
        assert!(result.is_err());
    }
}
