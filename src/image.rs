//! Image synthesis and editing on top of an [`ImageGenerationService`].

use crate::error::{BlogVizError, Result};
use crate::service::{ContentPart, ContentRequest, ImageGenerationService, Modality};
use crate::types::EncodedImage;
use std::time::Instant;

/// Composes the single instruction sent for a new image.
///
/// Widescreen framing and the style guide are always present; the overlay
/// clause only when `text_overlay` is non-empty.
pub fn compose_generation_prompt(
    prompt: &str,
    style_guide: &str,
    text_overlay: Option<&str>,
) -> String {
    let mut full = format!(
        "A high-quality image, widescreen 16:9 aspect ratio, landscape orientation. Scene: {prompt}. Style: {style_guide}."
    );
    if let Some(text) = text_overlay.filter(|t| !t.is_empty()) {
        full.push_str(&format!(
            " The image must prominently feature the exact text: \"{text}\". Ensure the text is written exactly as provided, is complete, and clearly readable. The style of the text should integrate seamlessly with the image's overall aesthetic. The entire text must be visible and not cut off."
        ));
    }
    full
}

fn response_modalities() -> Vec<Modality> {
    vec![Modality::Image, Modality::Text]
}

async fn request_image(
    service: &dyn ImageGenerationService,
    api_key: &str,
    request: ContentRequest,
) -> Result<EncodedImage> {
    let start = Instant::now();
    let response = service.generate_content(api_key, &request).await?;

    let image = response.first_image().ok_or_else(|| {
        let detail = response
            .text()
            .unwrap_or_else(|| "response contained no image part".into());
        BlogVizError::NoImageProduced(detail)
    })?;

    tracing::debug!(
        model = %request.model,
        duration_ms = start.elapsed().as_millis() as u64,
        "image received"
    );
    Ok(image)
}

/// Generates one image for a prompt in the session's shared style.
pub async fn synthesize_image(
    service: &dyn ImageGenerationService,
    model: &str,
    api_key: &str,
    prompt: &str,
    style_guide: &str,
    text_overlay: Option<&str>,
) -> Result<EncodedImage> {
    if api_key.trim().is_empty() {
        return Err(BlogVizError::Validation("API key is not set.".into()));
    }

    let request = ContentRequest {
        model: model.to_string(),
        parts: vec![ContentPart::Text(compose_generation_prompt(
            prompt,
            style_guide,
            text_overlay,
        ))],
        modalities: response_modalities(),
    };
    request_image(service, api_key, request).await
}

/// Sends an existing image and an instruction, returning the edited image.
///
/// The source reference is decoded before anything is sent, so a malformed
/// reference never reaches the service.
pub async fn edit_image(
    service: &dyn ImageGenerationService,
    model: &str,
    api_key: &str,
    source: &EncodedImage,
    instruction: &str,
) -> Result<EncodedImage> {
    if api_key.trim().is_empty() {
        return Err(BlogVizError::Validation("API key is not set.".into()));
    }
    if instruction.trim().is_empty() {
        return Err(BlogVizError::Validation(
            "Edit instruction is empty.".into(),
        ));
    }

    let decoded = source.decode()?;
    let request = ContentRequest {
        model: model.to_string(),
        parts: vec![
            ContentPart::InlineData {
                mime_type: decoded.mime_type,
                data: decoded.data,
            },
            ContentPart::Text(instruction.to_string()),
        ],
        modalities: response_modalities(),
    };
    request_image(service, api_key, request).await
}
