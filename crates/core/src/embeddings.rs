use crate::config::EmbeddingEndpointConfig;
use crate::error::IngestError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Turns texts into vectors, one per input, in input order.
///
/// Any error is treated as retryable by the batch builder, up to its retry budget.
pub trait Embedder {
    fn model_name(&self) -> &str;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        (**self).embed_batch(texts)
    }
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        (**self).embed_batch(texts)
    }
}

/// Hashing trigram embedder that needs no network access.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        vector
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Blocking client for an Azure OpenAI embeddings deployment.
pub struct AzureOpenAiEmbedder {
    client: Client,
    url: Url,
    api_key: String,
    deployment: String,
    request_chunk_size: usize,
}

impl AzureOpenAiEmbedder {
    pub fn new(config: &EmbeddingEndpointConfig) -> Result<Self, IngestError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.embeddings_url()?,
            api_key: config.api_key.clone(),
            deployment: config.deployment.clone(),
            request_chunk_size: config.request_chunk_size.max(1),
        })
    }

    fn embed_request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("api-key", &self.api_key)
            .json(&EmbeddingRequest { input: inputs })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(IngestError::Embedding(format!(
                "deployment {} returned {status}: {body}",
                self.deployment
            )));
        }

        let mut parsed: EmbeddingResponse = response.json()?;
        parse_embeddings(&mut parsed, inputs.len())
    }
}

fn parse_embeddings(
    parsed: &mut EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, IngestError> {
    if parsed.data.len() != expected {
        return Err(IngestError::Embedding(format!(
            "received {} embeddings for {} inputs",
            parsed.data.len(),
            expected
        )));
    }
    parsed.data.sort_by_key(|entry| entry.index);
    Ok(parsed
        .data
        .drain(..)
        .map(|entry| entry.embedding)
        .collect())
}

impl Embedder for AzureOpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.deployment
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for request in texts.chunks(self.request_chunk_size) {
            debug!(deployment = %self.deployment, inputs = request.len(), "embedding request");
            vectors.extend(self.embed_request(request)?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vectors = embedder
            .embed_batch(&["abc", "defg"])
            .expect("local embedding cannot fail");
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
    }

    #[test]
    fn response_is_reordered_by_index() -> Result<(), Box<dyn std::error::Error>> {
        let mut parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#,
        )?;
        let vectors = parse_embeddings(&mut parsed, 2)?;
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
        Ok(())
    }

    #[test]
    fn short_response_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let mut parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#)?;
        assert!(matches!(
            parse_embeddings(&mut parsed, 3),
            Err(IngestError::Embedding(_))
        ));
        Ok(())
    }
}
