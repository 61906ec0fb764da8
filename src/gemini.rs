//! Gemini (Google) REST client implementing both service traits.

use crate::error::{
    is_invalid_key_message, parse_retry_after, sanitize_error_message, BlogVizError, Result,
};
use crate::schema::Schema;
use crate::service::{
    ContentPart, ContentRequest, ContentResponse, ImageGenerationService, Modality,
    TextGenerationService, TextRequest,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Default API host.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Environment variable overriding the API host.
pub const BASE_URL_ENV: &str = "BLOGVIZ_GEMINI_BASE_URL";

/// Gemini text models used for prompt synthesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextModel {
    /// Gemini 2.5 Flash (fast, structured output).
    #[default]
    Flash25,
    /// Gemini 2.5 Pro (slower, stronger reasoning).
    Pro25,
}

impl TextModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flash25 => "gemini-2.5-flash",
            Self::Pro25 => "gemini-2.5-pro",
        }
    }
}

/// Gemini image models used for synthesis and editing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageModel {
    /// Gemini 2.5 Flash Image preview.
    #[default]
    FlashImagePreview,
    /// Nano Banana - Gemini 2.5 Flash Image (fast, economical).
    NanoBanana,
    /// Nano Banana Pro - Gemini 3 Pro Image (highest quality).
    NanoBananaPro,
}

impl ImageModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlashImagePreview => "gemini-2.5-flash-image-preview",
            Self::NanoBanana => "gemini-2.5-flash-image",
            Self::NanoBananaPro => "nano-banana-pro-preview",
        }
    }
}

/// Builder for [`GeminiClient`].
#[derive(Debug, Clone, Default)]
pub struct GeminiClientBuilder {
    base_url: Option<String>,
    client: Option<reqwest::Client>,
}

impl GeminiClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API host. Falls back to `BLOGVIZ_GEMINI_BASE_URL`, then the
    /// public endpoint.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Uses a preconfigured HTTP client.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Builds the client, resolving the base URL.
    pub fn build(self) -> Result<GeminiClient> {
        let base_url = self
            .base_url
            .or_else(|| std::env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(BlogVizError::Validation(format!(
                "Gemini base URL must be http(s): {base_url}"
            )));
        }

        Ok(GeminiClient {
            client: self.client.unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Gemini `generateContent` client.
///
/// The API key is supplied per call so the session's credential can change
/// between requests.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    /// Creates a new `GeminiClientBuilder`.
    pub fn builder() -> GeminiClientBuilder {
        GeminiClientBuilder::new()
    }

    /// Returns the resolved API host.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    /// Checks that the key is accepted by fetching the model's metadata.
    pub async fn check_key(&self, api_key: &str, model: &str) -> Result<()> {
        let url = format!("{}/v1beta/models/{}", self.base_url, model);

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", api_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        Err(parse_error(status.as_u16(), &text, &headers))
    }

    async fn send(
        &self,
        api_key: &str,
        model: &str,
        body: &GeminiRequest,
    ) -> Result<GeminiCandidate> {
        let start = Instant::now();
        tracing::debug!(model, "sending Gemini generateContent request");

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        let candidate = gemini_response.into_candidate()?;

        tracing::debug!(
            model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Gemini request complete"
        );
        Ok(candidate)
    }
}

#[async_trait]
impl TextGenerationService for GeminiClient {
    async fn generate_text(&self, api_key: &str, request: &TextRequest) -> Result<String> {
        let body = GeminiRequest::from_text_request(request);
        let candidate = self.send(api_key, &request.model, &body).await?;

        candidate
            .text()
            .ok_or_else(|| BlogVizError::Parse("Gemini response contained no text".into()))
    }
}

#[async_trait]
impl ImageGenerationService for GeminiClient {
    async fn generate_content(
        &self,
        api_key: &str,
        request: &ContentRequest,
    ) -> Result<ContentResponse> {
        let body = GeminiRequest::from_content_request(request);
        let candidate = self.send(api_key, &request.model, &body).await?;

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if matches!(reason, "IMAGE_OTHER" | "NO_IMAGE") {
                return Err(BlogVizError::NoImageProduced(format!(
                    "generation finished with {reason}"
                )));
            }
        }

        Ok(candidate.into_content_response())
    }
}

/// Maps a non-success HTTP response to an error.
fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> BlogVizError {
    let message = serde_json::from_str::<GeminiErrorBody>(text)
        .map(|body| body.error.message)
        .unwrap_or_else(|_| text.to_string());
    let message = sanitize_error_message(&message);

    if status == 401 || status == 403 || is_invalid_key_message(&message) {
        return BlogVizError::Auth(message);
    }
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(std::time::Duration::from_secs);
        return BlogVizError::RateLimited { retry_after };
    }
    let lower = message.to_lowercase();
    if lower.contains("safety") || lower.contains("blocked") || lower.contains("prohibited") {
        return BlogVizError::ContentBlocked(message);
    }
    BlogVizError::Api { status, message }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Schema>,
}

impl GeminiRequest {
    fn from_text_request(req: &TextRequest) -> Self {
        Self {
            contents: vec![GeminiContent {
                parts: vec![GeminiRequestPart::Text {
                    text: req.prompt.clone(),
                }],
            }],
            system_instruction: Some(GeminiContent {
                parts: vec![GeminiRequestPart::Text {
                    text: req.system_instruction.clone(),
                }],
            }),
            generation_config: GeminiConfig {
                response_mime_type: Some(req.response_mime_type.clone()),
                response_schema: req.response_schema.clone(),
                ..Default::default()
            },
        }
    }

    fn from_content_request(req: &ContentRequest) -> Self {
        let parts = req
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => GeminiRequestPart::Text { text: text.clone() },
                ContentPart::InlineData { mime_type, data } => GeminiRequestPart::InlineData {
                    inline_data: GeminiInlineData {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    },
                },
            })
            .collect();

        Self {
            contents: vec![GeminiContent { parts }],
            system_instruction: None,
            generation_config: GeminiConfig {
                response_modalities: req.modalities.clone(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GeminiResponse {
    /// Checks for blocks and returns the first candidate.
    fn into_candidate(self) -> Result<GeminiCandidate> {
        // prompt_feedback blocks arrive as HTTP 200
        if let Some(ref feedback) = self.prompt_feedback {
            if let Some(ref reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .clone()
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(BlogVizError::ContentBlocked(msg));
            }
        }

        let candidate = self.candidates.into_iter().next().ok_or_else(|| {
            BlogVizError::Service("No candidates in Gemini response".into())
        })?;

        if let Some(ref finish_reason) = candidate.finish_reason {
            match finish_reason.as_str() {
                "SAFETY"
                | "IMAGE_SAFETY"
                | "IMAGE_PROHIBITED_CONTENT"
                | "IMAGE_RECITATION"
                | "RECITATION"
                | "PROHIBITED_CONTENT"
                | "BLOCKLIST" => {
                    return Err(BlogVizError::ContentBlocked(format!(
                        "Content blocked by Gemini safety filter: {}",
                        finish_reason
                    )));
                }
                _ => {} // STOP, MAX_TOKENS, etc. are normal
            }
        }

        Ok(candidate)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl GeminiCandidate {
    fn parts(&self) -> &[GeminiPartResponse] {
        self.content.as_ref().map(|c| c.parts.as_slice()).unwrap_or(&[])
    }

    fn text(&self) -> Option<String> {
        let text: String = self
            .parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn into_content_response(self) -> ContentResponse {
        let parts = self
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| match (p.inline_data, p.text) {
                (Some(inline), _) => Some(ContentPart::InlineData {
                    mime_type: inline.mime_type,
                    data: inline.data,
                }),
                (None, Some(text)) => Some(ContentPart::Text(text)),
                (None, None) => None,
            })
            .collect();
        ContentResponse { parts }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}
