use std::time::Duration;

use kmdb_core::article::Category;
use kmdb_core::entity::NerSpan;
use kmdb_core::error::AppError;
use kmdb_core::traits::{
    CategoryClassifier, Lemmatizer, NerTagger, RelevanceClassifier, RelevancePrediction,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// JSON client for the model-serving service.
///
/// One endpoint per model: `/ner`, `/relevance`, `/category` and
/// `/lemmatize`. Implements all four model traits so the classify and
/// resolve workers can share a single connection pool.
#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl InferenceClient {
    pub fn with_base_url(base_url: &str) -> Result<Self, AppError> {
        Self::build(base_url, DEFAULT_INFERENCE_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.base_url, timeout)
    }

    fn build(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, AppError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::ModelError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        response.json().await.map_err(|e| {
            AppError::InvalidCollaboratorOutput(format!("Failed to parse {path} response: {e}"))
        })
    }
}

// ---- Wire types ----

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    embedding: &'a [f32],
}

#[derive(Deserialize)]
struct NerResponse {
    entities: Vec<NerSpan>,
}

#[derive(Deserialize)]
struct CategoryResponse {
    label: String,
}

#[derive(Deserialize)]
struct LemmaResponse {
    lemma: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl NerTagger for InferenceClient {
    async fn tag(&self, text: &str) -> Result<Vec<NerSpan>, AppError> {
        let response: NerResponse = self.post("/ner", &TextRequest { text }).await?;
        Ok(response.entities)
    }
}

impl RelevanceClassifier for InferenceClient {
    async fn predict(&self, text: &str) -> Result<RelevancePrediction, AppError> {
        self.post("/relevance", &TextRequest { text }).await
    }
}

impl CategoryClassifier for InferenceClient {
    async fn categorize(&self, embedding: &[f32]) -> Result<Category, AppError> {
        let response: CategoryResponse =
            self.post("/category", &EmbeddingRequest { embedding }).await?;
        response
            .label
            .parse()
            .map_err(AppError::InvalidCollaboratorOutput)
    }
}

impl Lemmatizer for InferenceClient {
    async fn lemmatize(&self, text: &str) -> Result<String, AppError> {
        let response: LemmaResponse = self.post("/lemmatize", &TextRequest { text }).await?;
        Ok(response.lemma)
    }
}
