//! Service traits for the generative text and image backends.

use crate::error::Result;
use crate::schema::Schema;
use crate::types::{EncodedImage, DEFAULT_IMAGE_MIME};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kinds of output requested from the image service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    /// Inline image data.
    Image,
    /// Plain text.
    Text,
}

/// A single piece of content sent to or returned by the image service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    /// Text instruction or commentary.
    Text(String),
    /// Base64 binary data tagged with its MIME type.
    InlineData {
        /// MIME type reported for the data; may be empty.
        mime_type: String,
        /// Base64 payload.
        data: String,
    },
}

/// A structured-output request to the text service.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    /// Model identifier.
    pub model: String,
    /// User content.
    pub prompt: String,
    /// System instruction steering the model.
    pub system_instruction: String,
    /// MIME type the response text must have.
    pub response_mime_type: String,
    /// Shape the response must conform to.
    pub response_schema: Option<Schema>,
}

/// A content request to the image service.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered request parts.
    pub parts: Vec<ContentPart>,
    /// Requested response modalities.
    pub modalities: Vec<Modality>,
}

/// The parts returned by the image service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentResponse {
    /// Response parts in service order.
    pub parts: Vec<ContentPart>,
}

impl ContentResponse {
    /// Returns the first inline data part as an encoded image.
    ///
    /// The MIME type comes from the part itself, falling back to JPEG when
    /// the service leaves it blank.
    pub fn first_image(&self) -> Option<EncodedImage> {
        self.parts.iter().find_map(|part| match part {
            ContentPart::InlineData { mime_type, data } => {
                let mime = if mime_type.trim().is_empty() {
                    DEFAULT_IMAGE_MIME
                } else {
                    mime_type.as_str()
                };
                Some(EncodedImage::from_base64(mime, data))
            }
            ContentPart::Text(_) => None,
        })
    }

    /// Concatenates the text parts, if any.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::InlineData { .. } => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// Backend that turns a prompt and a schema into schema-conforming text.
#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Sends one request and returns the response text.
    async fn generate_text(&self, api_key: &str, request: &TextRequest) -> Result<String>;
}

/// Backend that turns text and image parts into new content parts.
#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    /// Sends one request and returns the response parts.
    async fn generate_content(
        &self,
        api_key: &str,
        request: &ContentRequest,
    ) -> Result<ContentResponse>;
}
