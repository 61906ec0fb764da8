//! Prompt synthesis: article text to a validated [`PromptSet`].

use crate::error::{BlogVizError, Result};
use crate::schema::Schema;
use crate::service::{TextGenerationService, TextRequest};
use crate::types::PromptSet;

/// Allowed number of heading prompts.
pub const HEADING_PROMPT_RANGE: std::ops::RangeInclusive<usize> = 3..=5;

const SYSTEM_INSTRUCTION: &str = r#"You are a world-class creative director and prompt engineer who gets the most out of AI image generation models (especially Gemini 2.5 Flash Image / Nano Banana). Analyze the given blog article in depth and devise prompts for attractive, high-quality images that increase reader engagement.

Do not list keywords. Describe rich, narrative scenes. Follow the guidelines below strictly and return only a JSON object.

### Core principles
1. Describe the scene: write prompts as narrative, descriptive prose rather than keyword lists.
2. Be specific: instead of "fantasy armor", write "ornate elven plate armor etched with silver leaf patterns, with a high collar and pauldrons shaped like falcon wings".
3. Make the intent clear: consider the article's context and tone (professional, playful, serious, ...) and write prompts that fit it.

### Strategy by style
Choose the style that suits the article's theme.

- Photorealistic scenes:
  - Use photography terms (`photorealistic`, `close-up portrait`, `wide-angle shot`, `macro shot`).
  - Describe camera angle, lens, lighting (`cinematic lighting`, `three-point softbox setup`, `natural light`) and mood in detail.
- Illustrations, stickers, icons:
  - Name the art style explicitly (`kawaii style sticker`, `minimalist vector art`, `noir art style`).
  - Mention line style (`bold outlines`, `delicate line art`) and shading.
- Minimalist design:
  - Compose with deliberate negative space.
  - State subject placement (`positioned in the bottom-right of the frame`) and background (`vast, empty white canvas`).

### Output format
Return only a JSON object that meets these requirements.

1. Prompts: one for the eye-catch image and one per major heading, written in specific, visually rich, imaginative English following the strategy above.
2. Japanese translation: a natural, easy-to-read Japanese translation of every English prompt.
3. Style guide: the single most important instruction, defining the visual identity of the whole article. Write one English phrase describing a unified art style applied to every image. Be specific about medium (digital painting, vector illustration, photography), palette (vivid pastels, monochrome) and atmosphere (minimal, cyberpunk, dreamy). Good examples: "A consistent style of minimalist vector art with a pastel color palette", "photorealistic, cinematic lighting, moody atmosphere", "Japanese woodblock print style with bold outlines and flat colors"."#;

fn prompt_schema(english_description: &str) -> Schema {
    Schema::object()
        .with_required(
            "english",
            Schema::string().with_description(english_description),
        )
        .with_required(
            "japanese",
            Schema::string()
                .with_description("A natural Japanese translation of the English prompt."),
        )
}

/// Builds the structured-output schema for a [`PromptSet`].
pub fn prompt_set_schema() -> Schema {
    Schema::object()
        .with_required(
            "mainPrompt",
            prompt_schema(
                "A detailed, visually rich prompt in English. It should capture the core theme of the blog post.",
            )
            .with_description("The prompt for the main eye-catching image."),
        )
        .with_required(
            "headingPrompts",
            Schema::array(prompt_schema(
                "A detailed, visually rich prompt in English for a heading image.",
            ))
            .with_description(
                "A list of 3 to 5 prompts, each corresponding to a major section or heading in the article.",
            ),
        )
        .with_required(
            "styleGuide",
            Schema::string().with_description(
                "A short phrase in English describing the consistent art style for all generated images (e.g., 'concept art, digital painting, vibrant colors').",
            ),
        )
}

/// Builds the text request for an article.
pub fn build_request(model: &str, article: &str) -> TextRequest {
    TextRequest {
        model: model.to_string(),
        prompt: format!(
            "Analyze the following blog article and generate image generation prompts in the specified JSON format.\n\n---\n\n{article}"
        ),
        system_instruction: SYSTEM_INSTRUCTION.to_string(),
        response_mime_type: "application/json".to_string(),
        response_schema: Some(prompt_set_schema()),
    }
}

/// Parses and validates the service's response text.
///
/// Every prompt needs a non-empty English text, and the main prompt also a
/// Japanese one. A heading count outside [`HEADING_PROMPT_RANGE`] is
/// tolerated with a warning.
pub fn parse_prompt_set(text: &str) -> Result<PromptSet> {
    let set: PromptSet = serde_json::from_str(text.trim())
        .map_err(|e| BlogVizError::Parse(format!("invalid prompt set JSON: {e}")))?;

    if set.main_prompt.english.trim().is_empty() || set.main_prompt.japanese.trim().is_empty() {
        return Err(BlogVizError::Parse(
            "main prompt is missing its English or Japanese text".into(),
        ));
    }
    if let Some(i) = set
        .heading_prompts
        .iter()
        .position(|p| p.english.trim().is_empty())
    {
        return Err(BlogVizError::Parse(format!(
            "heading prompt {} has no English text",
            i + 1
        )));
    }
    if !HEADING_PROMPT_RANGE.contains(&set.heading_prompts.len()) {
        tracing::warn!(
            count = set.heading_prompts.len(),
            "heading prompt count outside the requested 3-5 range"
        );
    }

    Ok(set)
}

/// Sends the article to the text service and returns the prompt set.
///
/// Makes exactly one request; the caller owns any retry decision.
pub async fn synthesize_prompts(
    service: &dyn TextGenerationService,
    model: &str,
    api_key: &str,
    article: &str,
) -> Result<PromptSet> {
    if api_key.trim().is_empty() {
        return Err(BlogVizError::Validation("API key is not set.".into()));
    }
    if article.trim().is_empty() {
        return Err(BlogVizError::Validation("Article text is empty.".into()));
    }

    let request = build_request(model, article);
    let text = service.generate_text(api_key, &request).await?;
    let set = parse_prompt_set(&text)?;

    tracing::debug!(
        headings = set.heading_prompts.len(),
        style_guide = %set.style_guide,
        "synthesized prompt set"
    );
    Ok(set)
}
