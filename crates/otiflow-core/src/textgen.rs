use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_TEXTGEN_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TEXTGEN_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Service returned no text")]
    EmptyResponse,
}

pub type TextGenResult<T> = Result<T, TextGenError>;

/// Prompt in, text out. Callers degrade to a fixed string on error.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> TextGenResult<String>;
}

#[derive(Debug, Clone)]
pub struct TextGenConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl TextGenConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_TEXTGEN_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_TEXTGEN_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Client for a `generateContent` style HTTP endpoint.
pub struct HttpTextGenerator {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl HttpTextGenerator {
    pub fn new(config: &TextGenConfig) -> TextGenResult<Self> {
        let base = Url::parse(&config.base_url)?;
        let endpoint = base.join(&format!("v1beta/models/{}:generateContent", config.model))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> TextGenResult<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TextGenError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(TextGenError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// Replies with a fixed text, or fails every call.
pub struct CannedGenerator {
    reply: Option<String>,
}

impl CannedGenerator {
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self { reply: None }
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> TextGenResult<String> {
        self.reply.clone().ok_or(TextGenError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_built_from_config() {
        let config = TextGenConfig::new("key")
            .with_base_url("http://localhost:9000/")
            .with_model("test-model");
        let generator = HttpTextGenerator::new(&config).unwrap();
        assert_eq!(
            generator.endpoint().as_str(),
            "http://localhost:9000/v1beta/models/test-model:generateContent"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = TextGenConfig::new("key").with_base_url("not a url");
        assert!(matches!(
            HttpTextGenerator::new(&config),
            Err(TextGenError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_response_text_extraction() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"there"}]}}]}"#,
        )
        .unwrap();
        let text: String = parsed.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect();
        assert_eq!(text, "Hello there");
    }

    #[tokio::test]
    async fn test_canned_generator() {
        assert_eq!(CannedGenerator::new("hi").generate("x").await.unwrap(), "hi");
        assert!(CannedGenerator::failing().generate("x").await.is_err());
    }
}
