//! Core types: prompts, prompt sets, encoded images and generated images.

use crate::error::{BlogVizError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Marker appended to a prompt's English text once its image has been edited.
pub const EDITED_MARKER: &str = "(edited)";

/// MIME type assumed when the service does not report one.
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Maps a MIME type to a format.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// An illustration prompt in English with its Japanese translation.
///
/// The English text is what gets sent to the image model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Scene description sent to the image service.
    pub english: String,
    /// Translation shown to the user.
    pub japanese: String,
}

impl Prompt {
    /// Creates a prompt.
    pub fn new(english: impl Into<String>, japanese: impl Into<String>) -> Self {
        Self {
            english: english.into(),
            japanese: japanese.into(),
        }
    }
}

/// Stable position of a prompt inside its [`PromptSet`].
///
/// Loading flags, gating and edits are keyed by slot rather than by the
/// prompt's text, which changes when an image is edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSlot {
    /// The eye-catch image for the whole article.
    Main,
    /// The heading image at this zero-based index.
    Heading(usize),
}

impl PromptSlot {
    /// Returns true for the main (eye-catch) slot.
    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main)
    }
}

impl std::fmt::Display for PromptSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Heading(i) => write!(f, "heading-{}", i + 1),
        }
    }
}

/// The prompts synthesized for one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSet {
    /// Prompt for the main eye-catch image.
    pub main_prompt: Prompt,
    /// One prompt per major section of the article.
    pub heading_prompts: Vec<Prompt>,
    /// Art style applied to every image of the session.
    pub style_guide: String,
}

impl PromptSet {
    /// Returns the prompt at the given slot.
    pub fn get(&self, slot: PromptSlot) -> Option<&Prompt> {
        match slot {
            PromptSlot::Main => Some(&self.main_prompt),
            PromptSlot::Heading(i) => self.heading_prompts.get(i),
        }
    }

    /// Iterates over every prompt with its slot, main prompt first.
    pub fn slots(&self) -> impl Iterator<Item = (PromptSlot, &Prompt)> {
        std::iter::once((PromptSlot::Main, &self.main_prompt)).chain(
            self.heading_prompts
                .iter()
                .enumerate()
                .map(|(i, p)| (PromptSlot::Heading(i), p)),
        )
    }

    /// Total number of prompts, main included.
    pub fn len(&self) -> usize {
        1 + self.heading_prompts.len()
    }

    /// Always false; a prompt set carries at least its main prompt.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A self-describing image reference: `data:<mime-type>;base64,<payload>`.
///
/// Construction from an arbitrary string is unchecked; [`EncodedImage::decode`]
/// validates the shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedImage(String);

/// An [`EncodedImage`] split into its MIME type and base64 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// MIME type from the reference header.
    pub mime_type: String,
    /// Base64 payload, still encoded.
    pub data: String,
}

impl EncodedImage {
    /// Builds a reference from a MIME type and an already base64-encoded payload.
    pub fn from_base64(mime_type: &str, data: &str) -> Self {
        Self(format!("data:{mime_type};base64,{data}"))
    }

    /// Builds a reference from raw bytes.
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::from_base64(mime_type, &data)
    }

    /// Returns the reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the reference into MIME type and payload.
    ///
    /// Fails with [`BlogVizError::MalformedImage`] when there is no comma
    /// separating a non-empty header and payload, or when the header has no
    /// `:<mime>;` section.
    pub fn decode(&self) -> Result<DecodedImage> {
        let (header, data) = self
            .0
            .split_once(',')
            .filter(|(h, d)| !h.is_empty() && !d.is_empty())
            .ok_or_else(|| {
                BlogVizError::MalformedImage("expected '<header>,<payload>'".into())
            })?;

        let mime_type = header
            .split_once(':')
            .and_then(|(_, rest)| rest.split_once(';'))
            .map(|(mime, _)| mime)
            .filter(|mime| !mime.is_empty())
            .ok_or_else(|| {
                BlogVizError::MalformedImage(format!(
                    "could not determine MIME type from header '{header}'"
                ))
            })?;

        Ok(DecodedImage {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    /// Decodes the payload into raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let decoded = self.decode()?;
        base64::engine::general_purpose::STANDARD
            .decode(decoded.data.as_bytes())
            .map_err(|e| BlogVizError::Decode(e.to_string()))
    }

    /// Returns the image format named by the header, if recognized.
    pub fn format(&self) -> Option<ImageFormat> {
        let decoded = self.decode().ok()?;
        ImageFormat::from_mime_type(&decoded.mime_type)
    }

    /// Writes the decoded image to the given path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

impl From<String> for EncodedImage {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EncodedImage {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-unique identifier of a generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub u64);

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An image produced for one prompt of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    /// Identifier used to target edits.
    pub id: ImageId,
    /// Slot of the prompt this image was generated for.
    pub slot: PromptSlot,
    /// The prompt, with [`EDITED_MARKER`] appended once edited.
    pub prompt: Prompt,
    /// Current image data.
    pub image: EncodedImage,
    /// Text rendered into the image, main prompt only.
    pub text_overlay: Option<String>,
    /// Number of successful edits applied.
    pub edit_count: u32,
}

impl GeneratedImage {
    /// Replaces the image data with an edited version.
    ///
    /// The English text gains the edit marker only on the first edit.
    pub fn apply_edit(&mut self, image: EncodedImage) {
        self.image = image;
        if !self.is_edited() {
            self.prompt.english = format!("{} {}", self.prompt.english, EDITED_MARKER);
        }
        self.edit_count += 1;
    }

    /// Returns true once at least one edit has been applied.
    pub fn is_edited(&self) -> bool {
        self.edit_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";

    fn sample_set() -> PromptSet {
        PromptSet {
            main_prompt: Prompt::new("A cat in a garden", "庭の猫"),
            heading_prompts: vec![
                Prompt::new("A dog on a beach", "ビーチの犬"),
                Prompt::new("A bird in the sky", "空の鳥"),
            ],
            style_guide: "photorealistic, warm lighting".into(),
        }
    }

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"short"), None);
    }

    #[test]
    fn test_format_from_mime_type() {
        assert_eq!(
            ImageFormat::from_mime_type("image/png"),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_mime_type("IMAGE/JPEG"),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::from_mime_type("image/gif"), None);
    }

    #[test]
    fn test_prompt_set_wire_shape() {
        let json = r#"{
            "mainPrompt": {"english": "A cat in a garden", "japanese": "庭の猫"},
            "headingPrompts": [{"english": "A dog on a beach", "japanese": "ビーチの犬"}],
            "styleGuide": "photorealistic, warm lighting"
        }"#;
        let set: PromptSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.main_prompt.english, "A cat in a garden");
        assert_eq!(set.heading_prompts.len(), 1);
        assert_eq!(set.style_guide, "photorealistic, warm lighting");

        let value = serde_json::to_value(&set).unwrap();
        assert!(value.get("mainPrompt").is_some());
        assert!(value.get("main_prompt").is_none());
    }

    #[test]
    fn test_prompt_set_slots() {
        let set = sample_set();
        let slots: Vec<_> = set.slots().map(|(slot, _)| slot).collect();
        assert_eq!(
            slots,
            vec![
                PromptSlot::Main,
                PromptSlot::Heading(0),
                PromptSlot::Heading(1)
            ]
        );
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.get(PromptSlot::Heading(1)).map(|p| p.english.as_str()),
            Some("A bird in the sky")
        );
        assert!(set.get(PromptSlot::Heading(2)).is_none());
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(PromptSlot::Main.to_string(), "main");
        assert_eq!(PromptSlot::Heading(0).to_string(), "heading-1");
    }

    #[test]
    fn test_encoded_image_decode() {
        let image = EncodedImage::from_base64("image/png", "iVBORw0KGgo=");
        assert_eq!(image.as_str(), "data:image/png;base64,iVBORw0KGgo=");

        let decoded = image.decode().unwrap();
        assert_eq!(decoded.mime_type, "image/png");
        assert_eq!(decoded.data, "iVBORw0KGgo=");
        assert_eq!(image.format(), Some(ImageFormat::Png));
    }

    #[test]
    fn test_encoded_image_without_comma_is_malformed() {
        let image = EncodedImage::from("data:image/png;base64");
        assert!(matches!(
            image.decode(),
            Err(BlogVizError::MalformedImage(_))
        ));

        let image = EncodedImage::from("data:image/png;base64,");
        assert!(matches!(
            image.decode(),
            Err(BlogVizError::MalformedImage(_))
        ));
    }

    #[test]
    fn test_encoded_image_without_mime_is_malformed() {
        for raw in ["garbage,abcd", "data:;base64,abcd", "data:image/png,abcd"] {
            let image = EncodedImage::from(raw);
            assert!(
                matches!(image.decode(), Err(BlogVizError::MalformedImage(_))),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn test_encoded_image_bytes() {
        let image = EncodedImage::from_bytes("image/png", &PNG_MAGIC);
        assert_eq!(image.to_bytes().unwrap(), PNG_MAGIC.to_vec());

        let bad = EncodedImage::from("data:image/png;base64,@@@");
        assert!(matches!(bad.to_bytes(), Err(BlogVizError::Decode(_))));
    }

    #[test]
    fn test_apply_edit_marks_once() {
        let mut image = GeneratedImage {
            id: ImageId(1),
            slot: PromptSlot::Main,
            prompt: Prompt::new("A cat in a garden", "庭の猫"),
            image: EncodedImage::from_base64("image/jpeg", "AAAA"),
            text_overlay: None,
            edit_count: 0,
        };

        image.apply_edit(EncodedImage::from_base64("image/png", "BBBB"));
        assert_eq!(image.prompt.english, "A cat in a garden (edited)");
        assert_eq!(image.edit_count, 1);

        image.apply_edit(EncodedImage::from_base64("image/png", "CCCC"));
        assert_eq!(image.prompt.english, "A cat in a garden (edited)");
        assert_eq!(image.edit_count, 2);
        assert_eq!(image.image.as_str(), "data:image/png;base64,CCCC");
        assert_eq!(image.prompt.japanese, "庭の猫");
    }
}
