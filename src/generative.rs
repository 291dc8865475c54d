//! Generative text client used for caption and title rewrites.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{ConfigError, Generative};
use crate::error::RequestError;
use crate::media::ContentClass;
use crate::request_client::{ClientSettings, CredentialPlacement, CredentialRing, RateLimitedClient};
use crate::retry::{RetryController, RetryError};
use crate::transport::{HttpTransport, RequestBody};

pub const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Error)]
pub enum GenerativeError {
    #[error("No API keys configured")]
    NoKeys,
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("No content generated")]
    NoContent,
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<GenerativeError>,
    },
}

impl From<RetryError<GenerativeError>> for GenerativeError {
    fn from(err: RetryError<GenerativeError>) -> Self {
        let attempts = err.attempts();
        GenerativeError::Exhausted {
            attempts,
            last: Box::new(err.into_last()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1024,
        }
    }
}

impl GenerationOptions {
    pub fn rewrite() -> Self {
        Self {
            temperature: 0.8,
            max_output_tokens: 500,
            ..Self::default()
        }
    }
}

/// Media sent alongside a prompt as an `inline_data` part.
#[derive(Clone, PartialEq, Eq)]
pub struct InlineMedia {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for InlineMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineMedia")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteTarget {
    Title,
    Caption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteTone {
    Engaging,
    Shorten,
    Professional,
    Casual,
}

impl RewriteTone {
    pub const ALL: [RewriteTone; 4] = [
        RewriteTone::Engaging,
        RewriteTone::Shorten,
        RewriteTone::Professional,
        RewriteTone::Casual,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RewriteTone::Engaging => "Engaging",
            RewriteTone::Shorten => "Shorten",
            RewriteTone::Professional => "Professional",
            RewriteTone::Casual => "Casual",
        }
    }
}

/// Built-in instruction text for a target and tone.
pub fn preset_instruction(target: RewriteTarget, tone: RewriteTone) -> &'static str {
    use RewriteTarget::*;
    use RewriteTone::*;
    match (target, tone) {
        (Title, Engaging) => {
            "Create a short, engaging title from this text \
            in the same language. Provide only one option:"
        }
        (Title, Shorten) => {
            "Create a short, concise title from this text \
            in the same language. Provide only one option:"
        }
        (Title, Professional) => {
            "Create a short, professional title from this text \
            in the same language. Provide only one option:"
        }
        (Title, Casual) => {
            "Create a short, casual title from this text \
            in the same language. Provide only one option:"
        }
        (Caption, Engaging) => {
            "Rewrite this as an engaging social media caption \
            in the same language. Provide only one option:"
        }
        (Caption, Shorten) => {
            "Rewrite this as a shorter social media caption \
            in the same language. Provide only one option:"
        }
        (Caption, Professional) => {
            "Rewrite this as a professional social media caption \
            in the same language. Provide only one option:"
        }
        (Caption, Casual) => {
            "Rewrite this as a casual social media caption \
            in the same language. Provide only one option:"
        }
    }
}

pub fn rewrite_prompt(original: &str, instruction: &str) -> String {
    format!(
        "{}\n\nOriginal text:\n\"{}\"\n\nRewritten text:",
        instruction, original
    )
}

#[derive(Serialize)]
struct GenerateBody {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationOptions,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug)]
pub struct GenerativeClient {
    client: RateLimitedClient,
    retry: RetryController,
    model: String,
    standard_timeout: Duration,
    heavy_timeout: Duration,
}

impl GenerativeClient {
    pub fn new(
        client: RateLimitedClient,
        retry: RetryController,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            model: model.into(),
            standard_timeout: Duration::from_secs(45),
            heavy_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(
        cfg: &Generative,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|_| ConfigError::Invalid("generative.base_url must be an absolute URL"))?;
        let client = RateLimitedClient::new(
            transport,
            base_url,
            CredentialRing::new(cfg.api_keys.iter().map(String::as_str)),
            CredentialPlacement::Header(API_KEY_HEADER),
            ClientSettings {
                min_interval: cfg.min_interval(),
                max_attempts: cfg.max_attempts,
                rate_limit_delay: cfg.rate_limit_delay(),
                timeout: None,
            },
        );
        let retry = RetryController::new(cfg.fallback_table());
        let mut this = Self::new(client, retry, cfg.model.clone());
        this.standard_timeout = cfg.timeout_for(ContentClass::Standard);
        this.heavy_timeout = cfg.timeout_for(ContentClass::Heavy);
        Ok(this)
    }

    fn timeout_for(&self, class: ContentClass) -> Duration {
        match class {
            ContentClass::Standard => self.standard_timeout,
            ContentClass::Heavy => self.heavy_timeout,
        }
    }

    pub async fn generate_text(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenerativeError> {
        let parts = vec![Part::Text { text: prompt.to_string() }];
        self.generate(parts, options, ContentClass::Standard).await
    }

    pub async fn rewrite_text(
        &self,
        original: &str,
        instruction: &str,
    ) -> Result<String, GenerativeError> {
        let prompt = rewrite_prompt(original, instruction);
        self.generate_text(&prompt, GenerationOptions::rewrite()).await
    }

    /// Rewrite with the media attached as context. Video media uses the
    /// heavy retry class.
    pub async fn rewrite_with_media(
        &self,
        original: &str,
        instruction: &str,
        media: &InlineMedia,
    ) -> Result<String, GenerativeError> {
        let class = ContentClass::for_mime(&media.mime);
        let prompt = format!(
            "{}\n\nUse the attached media as context.",
            rewrite_prompt(original, instruction)
        );
        let parts = vec![
            Part::Text { text: prompt },
            Part::Inline {
                inline_data: InlineData {
                    mime_type: media.mime.clone(),
                    data: STANDARD.encode(&media.bytes),
                },
            },
        ];
        self.generate(parts, GenerationOptions::rewrite(), class).await
    }

    /// True when the service answers a trivial prompt with "hello".
    pub async fn test_connection(&self) -> Result<bool, GenerativeError> {
        let options = GenerationOptions {
            max_output_tokens: 10,
            ..GenerationOptions::default()
        };
        let reply = self.generate_text("Say 'Hello' in one word", options).await?;
        Ok(reply.trim().to_lowercase().contains("hello"))
    }

    #[instrument(skip_all, fields(class = ?class))]
    async fn generate(
        &self,
        parts: Vec<Part>,
        options: GenerationOptions,
        class: ContentClass,
    ) -> Result<String, GenerativeError> {
        if !self.client.has_credentials() {
            return Err(GenerativeError::NoKeys);
        }
        let body = serde_json::to_value(GenerateBody {
            contents: vec![Content { parts }],
            generation_config: options,
        })
        .map_err(|e| RequestError::Decode(e.to_string()))?;
        let timeout = self.timeout_for(class);

        let text = self
            .retry
            .run(class, |attempt| {
                let body = body.clone();
                let number = attempt.number;
                let model = attempt.target.unwrap_or_else(|| self.model.clone());
                async move {
                    debug!(attempt = number, model = %model, "generateContent");
                    let endpoint = format!("models/{}:generateContent", model);
                    let response = self
                        .client
                        .send_with_timeout(
                            Method::POST,
                            &endpoint,
                            RequestBody::Json(body),
                            Some(timeout),
                        )
                        .await?;
                    extract_text(&response).ok_or(GenerativeError::NoContent)
                }
            })
            .await?;
        Ok(text)
    }
}

fn extract_text(response: &Value) -> Option<String> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}
