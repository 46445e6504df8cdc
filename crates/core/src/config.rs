use crate::error::IngestError;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_VERSION: &str = "2024-02-01";
pub const DEFAULT_REQUEST_CHUNK_SIZE: usize = 3_000;

/// Connection settings for an Azure OpenAI embeddings deployment.
///
/// Built once at startup and handed to [`crate::AzureOpenAiEmbedder`]; nothing reads
/// credentials from the environment after that.
#[derive(Debug, Clone)]
pub struct EmbeddingEndpointConfig {
    pub endpoint: Url,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    /// Maximum number of texts sent in a single HTTP request.
    pub request_chunk_size: usize,
    pub timeout: Duration,
}

impl EmbeddingEndpointConfig {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Result<Self, IngestError> {
        let api_key = api_key.into();
        let deployment = deployment.into();

        if api_key.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "missing embedding API key".to_string(),
            ));
        }
        if deployment.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "missing embedding deployment name".to_string(),
            ));
        }

        Ok(Self {
            endpoint: Url::parse(endpoint.trim())?,
            api_key: api_key.trim().to_string(),
            deployment: deployment.trim().to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            request_chunk_size: DEFAULT_REQUEST_CHUNK_SIZE,
            timeout: Duration::from_secs(60),
        })
    }

    pub fn embeddings_url(&self) -> Result<Url, IngestError> {
        let mut url = self.endpoint.join(&format!(
            "openai/deployments/{}/embeddings",
            self.deployment
        ))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// Returns `None` when the endpoint is blank so callers can pass optional flags through.
    pub fn from_parts(endpoint: Option<String>, api_key: Option<String>) -> Option<Self> {
        let endpoint = endpoint?.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = api_key.and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Some(Self { endpoint, api_key })
    }
}
