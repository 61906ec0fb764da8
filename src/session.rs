//! The generation session: article, prompt set, generated images and the
//! single user-visible error slot.
//!
//! Every public operation catches its own failures and reports them through
//! [`SessionState::error`]; none of them return `Err`. Service calls run
//! without holding the state lock, so image requests for different slots
//! can be in flight at the same time.

use crate::credential::CredentialHolder;
use crate::error::{BlogVizError, Operation};
use crate::gemini::{GeminiClient, ImageModel, TextModel};
use crate::image;
use crate::prompts;
use crate::service::{ImageGenerationService, TextGenerationService};
use crate::types::{EncodedImage, GeneratedImage, ImageId, Prompt, PromptSet, PromptSlot};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Models used by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model for prompt synthesis.
    pub text_model: TextModel,
    /// Model for image synthesis and editing.
    pub image_model: ImageModel,
}

/// How a session operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The result was folded into the session.
    Completed,
    /// The operation failed; the message is in the error slot.
    Failed,
    /// A request for the same key was already in flight; nothing was sent.
    Rejected,
    /// The result arrived after the session was reset and was dropped.
    Discarded,
}

/// The open edit dialog and its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditSurface {
    /// Image being edited.
    pub target: ImageId,
    /// True while an edit request is in flight.
    pub in_progress: bool,
}

/// Snapshot of everything the session tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Article text as last entered.
    pub article: String,
    /// Prompts for the current article, once synthesized.
    pub prompt_set: Option<PromptSet>,
    /// Generated images in completion order.
    pub images: Vec<GeneratedImage>,
    /// Slots with an image request in flight.
    pub loading: BTreeSet<PromptSlot>,
    /// True while prompt synthesis is in flight.
    pub prompt_loading: bool,
    /// Text to render into the main image.
    pub overlay_text: String,
    /// The single user-visible error message.
    pub error: Option<String>,
    /// Edit dialog state.
    pub editing: Option<EditSurface>,
    /// Advanced each time prompt generation resets the session.
    pub epoch: u64,
    next_image_id: u64,
}

impl SessionState {
    /// True once any image carries this slot. Derived from `images` on
    /// every call.
    pub fn is_generated(&self, slot: PromptSlot) -> bool {
        self.images.iter().any(|img| img.slot == slot)
    }

    /// True while an image request for this slot is in flight.
    pub fn is_loading(&self, slot: PromptSlot) -> bool {
        self.loading.contains(&slot)
    }

    /// Looks up an image by id.
    pub fn image(&self, id: ImageId) -> Option<&GeneratedImage> {
        self.images.iter().find(|img| img.id == id)
    }

    fn reset_for_new_prompts(&mut self) {
        self.epoch += 1;
        self.prompt_set = None;
        self.images.clear();
        self.loading.clear();
        self.overlay_text.clear();
        self.error = None;
        self.editing = None;
        self.prompt_loading = true;
    }

    /// Resolves the prompt, style guide and overlay for an image request.
    fn image_request(&self, slot: PromptSlot) -> Result<(Prompt, String, Option<String>), BlogVizError> {
        let set = self
            .prompt_set
            .as_ref()
            .ok_or_else(|| BlogVizError::Validation("Generate prompts first.".into()))?;
        if set.style_guide.trim().is_empty() {
            return Err(BlogVizError::Validation("Style guide not found.".into()));
        }
        let prompt = set.get(slot).cloned().ok_or_else(|| {
            BlogVizError::Validation(format!("No prompt exists for {slot}."))
        })?;

        // Captured now so later edits to the field do not leak into this request.
        let overlay = (slot.is_main() && !self.overlay_text.trim().is_empty())
            .then(|| self.overlay_text.clone());

        Ok((prompt, set.style_guide.clone(), overlay))
    }

    fn push_image(
        &mut self,
        slot: PromptSlot,
        prompt: Prompt,
        image: EncodedImage,
        text_overlay: Option<String>,
    ) -> ImageId {
        self.next_image_id += 1;
        let id = ImageId(self.next_image_id);
        self.images.push(GeneratedImage {
            id,
            slot,
            prompt,
            image,
            text_overlay,
            edit_count: 0,
        });
        id
    }
}

/// Orchestrates prompt synthesis, image synthesis and image edits.
pub struct Session {
    credential: Arc<CredentialHolder>,
    text_service: Arc<dyn TextGenerationService>,
    image_service: Arc<dyn ImageGenerationService>,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a session over the given services with default models.
    pub fn new(
        credential: Arc<CredentialHolder>,
        text_service: Arc<dyn TextGenerationService>,
        image_service: Arc<dyn ImageGenerationService>,
    ) -> Self {
        Self {
            credential,
            text_service,
            image_service,
            config: SessionConfig::default(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Creates a session that uses one Gemini client for both services.
    pub fn gemini(client: GeminiClient, credential: Arc<CredentialHolder>) -> Self {
        let client = Arc::new(client);
        Self::new(credential, client.clone(), client)
    }

    /// Replaces the model configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the model configuration.
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Returns the credential holder.
    pub fn credential(&self) -> &CredentialHolder {
        &self.credential
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Sets the article text used by the next prompt generation.
    pub fn set_article(&self, article: impl Into<String>) {
        self.state.lock().article = article.into();
    }

    /// Sets the text to render into the main image.
    pub fn set_overlay_text(&self, text: impl Into<String>) {
        self.state.lock().overlay_text = text.into();
    }

    /// Returns the current error message.
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Clears the error slot.
    pub fn dismiss_error(&self) {
        self.state.lock().error = None;
    }

    /// Returns the current prompt set.
    pub fn prompt_set(&self) -> Option<PromptSet> {
        self.state.lock().prompt_set.clone()
    }

    /// Returns the generated images.
    pub fn images(&self) -> Vec<GeneratedImage> {
        self.state.lock().images.clone()
    }

    /// See [`SessionState::is_loading`].
    pub fn is_loading(&self, slot: PromptSlot) -> bool {
        self.state.lock().is_loading(slot)
    }

    /// See [`SessionState::is_generated`].
    pub fn is_generated(&self, slot: PromptSlot) -> bool {
        self.state.lock().is_generated(slot)
    }

    /// True while prompt synthesis is in flight.
    pub fn is_prompt_loading(&self) -> bool {
        self.state.lock().prompt_loading
    }

    /// Returns the edit dialog state.
    pub fn editing(&self) -> Option<EditSurface> {
        self.state.lock().editing
    }

    /// True while an edit request is in flight.
    pub fn is_editing(&self) -> bool {
        self.editing().is_some_and(|e| e.in_progress)
    }

    fn fail(&self, operation: Operation, err: BlogVizError) -> Outcome {
        let message = err.user_message(operation);
        tracing::error!(%operation, error = %err, "operation failed");
        self.state.lock().error = Some(message);
        Outcome::Failed
    }

    fn require_api_key(&self, operation: Operation) -> Result<String, Outcome> {
        self.credential
            .require()
            .map_err(|err| self.fail(operation, err))
    }

    /// Synthesizes a prompt set for the current article.
    ///
    /// Clears the prompt set, images, loading flags, overlay text, error
    /// and edit dialog before the request is sent.
    pub async fn generate_prompts(&self) -> Outcome {
        let operation = Operation::PromptGeneration;
        let api_key = match self.require_api_key(operation) {
            Ok(key) => key,
            Err(outcome) => return outcome,
        };

        let (article, epoch) = {
            let mut state = self.state.lock();
            if state.article.trim().is_empty() {
                state.error = Some("Paste a blog article first.".into());
                return Outcome::Failed;
            }
            state.reset_for_new_prompts();
            (state.article.clone(), state.epoch)
        };

        let result = prompts::synthesize_prompts(
            self.text_service.as_ref(),
            self.config.text_model.as_str(),
            &api_key,
            &article,
        )
        .await;

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                tracing::debug!(epoch, "discarding prompt set from a superseded request");
                return Outcome::Discarded;
            }
            state.prompt_loading = false;
            if let Ok(set) = &result {
                state.prompt_set = Some(set.clone());
            }
        }

        match result {
            Ok(set) => {
                tracing::info!(prompts = set.len(), "prompt set ready");
                Outcome::Completed
            }
            Err(err) => self.fail(operation, err),
        }
    }

    /// Generates an image for one slot of the current prompt set.
    ///
    /// A second request for a slot that is still loading is rejected.
    pub async fn generate_image(&self, slot: PromptSlot) -> Outcome {
        let operation = Operation::ImageGeneration;
        let api_key = match self.require_api_key(operation) {
            Ok(key) => key,
            Err(outcome) => return outcome,
        };

        let prepared = {
            let mut state = self.state.lock();
            match state.image_request(slot) {
                Ok(_) if state.is_loading(slot) => {
                    tracing::warn!(%slot, "image request already in flight; ignoring");
                    return Outcome::Rejected;
                }
                Ok((prompt, style_guide, overlay)) => {
                    state.loading.insert(slot);
                    state.error = None;
                    Ok((prompt, style_guide, overlay, state.epoch))
                }
                Err(err) => Err(err),
            }
        };
        let (prompt, style_guide, overlay, epoch) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(operation, err),
        };

        tracing::debug!(%slot, overlay = overlay.is_some(), "requesting image");
        let result = image::synthesize_image(
            self.image_service.as_ref(),
            self.config.image_model.as_str(),
            &api_key,
            &prompt.english,
            &style_guide,
            overlay.as_deref(),
        )
        .await;

        let result = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                tracing::debug!(%slot, epoch, "discarding image from a superseded prompt set");
                return Outcome::Discarded;
            }
            state.loading.remove(&slot);
            result.map(|encoded| state.push_image(slot, prompt, encoded, overlay))
        };

        match result {
            Ok(id) => {
                tracing::info!(%slot, image = %id, "image generated");
                Outcome::Completed
            }
            Err(err) => self.fail(operation, err),
        }
    }

    /// Opens the edit dialog for an image. Returns false if the image does
    /// not exist or another edit is in flight.
    pub fn begin_edit(&self, id: ImageId) -> bool {
        let mut state = self.state.lock();
        if state.image(id).is_none() || state.editing.is_some_and(|e| e.in_progress) {
            return false;
        }
        state.editing = Some(EditSurface {
            target: id,
            in_progress: false,
        });
        true
    }

    /// Closes the edit dialog unless an edit is in flight.
    pub fn close_edit(&self) {
        let mut state = self.state.lock();
        if !state.editing.is_some_and(|e| e.in_progress) {
            state.editing = None;
        }
    }

    /// Edits a generated image with a free-text instruction.
    ///
    /// On success the image is replaced in place and the edit dialog
    /// closes; on failure the dialog stays open on the same image.
    pub async fn edit_image(&self, id: ImageId, instruction: &str) -> Outcome {
        let operation = Operation::ImageEdit;
        let api_key = match self.require_api_key(operation) {
            Ok(key) => key,
            Err(outcome) => return outcome,
        };
        if instruction.trim().is_empty() {
            return self.fail(
                operation,
                BlogVizError::Validation("Enter an edit instruction.".into()),
            );
        }

        let prepared = {
            let mut state = self.state.lock();
            if state.editing.is_some_and(|e| e.in_progress) {
                tracing::warn!(image = %id, "edit already in flight; ignoring");
                return Outcome::Rejected;
            }
            match state.image(id).map(|img| img.image.clone()) {
                Some(source) => {
                    state.editing = Some(EditSurface {
                        target: id,
                        in_progress: true,
                    });
                    state.error = None;
                    Ok((source, state.epoch))
                }
                None => Err(BlogVizError::Validation(format!("Image {id} not found."))),
            }
        };
        let (source, epoch) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(operation, err),
        };

        let result = image::edit_image(
            self.image_service.as_ref(),
            self.config.image_model.as_str(),
            &api_key,
            &source,
            instruction,
        )
        .await;

        let result = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                tracing::debug!(image = %id, epoch, "discarding edit from a superseded prompt set");
                return Outcome::Discarded;
            }
            match result {
                Ok(edited) => {
                    if let Some(img) = state.images.iter_mut().find(|img| img.id == id) {
                        img.apply_edit(edited);
                    }
                    state.editing = None;
                    Ok(())
                }
                Err(err) => {
                    state.editing = Some(EditSurface {
                        target: id,
                        in_progress: false,
                    });
                    Err(err)
                }
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(image = %id, "image edited");
                Outcome::Completed
            }
            Err(err) => self.fail(operation, err),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::service::{ContentPart, ContentRequest, ContentResponse, TextRequest};
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    const ONE_HEADING: &str = r#"{
        "mainPrompt": {"english": "A cat in a garden", "japanese": "庭の猫"},
        "headingPrompts": [{"english": "A dog on a beach", "japanese": "ビーチの犬"}],
        "styleGuide": "photorealistic, warm lighting"
    }"#;

    const THREE_HEADINGS: &str = r#"{
        "mainPrompt": {"english": "A cat in a garden", "japanese": "庭の猫"},
        "headingPrompts": [
            {"english": "A dog on a beach", "japanese": "ビーチの犬"},
            {"english": "A fox in snow", "japanese": "雪の中の狐"},
            {"english": "An owl at night", "japanese": "夜のフクロウ"}
        ],
        "styleGuide": "flat vector art"
    }"#;

    struct FakeText {
        response: std::result::Result<String, String>,
        requests: Mutex<Vec<TextRequest>>,
    }

    impl FakeText {
        fn ok(json: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(json.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Err(message.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl TextGenerationService for FakeText {
        async fn generate_text(&self, _api_key: &str, request: &TextRequest) -> Result<String> {
            self.requests.lock().push(request.clone());
            self.response
                .clone()
                .map_err(BlogVizError::from_service_message)
        }
    }

    /// Image service that can hold requests until released and fail on
    /// prompts containing a marker.
    struct FakeImages {
        requests: Mutex<Vec<ContentRequest>>,
        entered: Notify,
        gate: Option<Semaphore>,
        fail_marker: Option<String>,
    }

    impl FakeImages {
        fn immediate() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                entered: Notify::new(),
                gate: None,
                fail_marker: None,
            })
        }

        fn gated() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                entered: Notify::new(),
                gate: Some(Semaphore::new(0)),
                fail_marker: None,
            })
        }

        fn failing_on(marker: &str) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                entered: Notify::new(),
                gate: None,
                fail_marker: Some(marker.to_string()),
            })
        }

        fn release(&self, n: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(n);
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }

        fn request_text(&self, index: usize) -> String {
            self.requests.lock()[index]
                .parts
                .iter()
                .find_map(|p| match p {
                    ContentPart::Text(t) => Some(t.clone()),
                    ContentPart::InlineData { .. } => None,
                })
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ImageGenerationService for FakeImages {
        async fn generate_content(
            &self,
            _api_key: &str,
            request: &ContentRequest,
        ) -> Result<ContentResponse> {
            let n = {
                let mut requests = self.requests.lock();
                requests.push(request.clone());
                requests.len()
            };
            self.entered.notify_one();

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            let fails = self.fail_marker.as_ref().is_some_and(|marker| {
                request.parts.iter().any(|p| match p {
                    ContentPart::Text(t) => t.contains(marker.as_str()),
                    ContentPart::InlineData { .. } => false,
                })
            });
            if fails {
                return Err(BlogVizError::Service("upstream failure".into()));
            }

            Ok(ContentResponse {
                parts: vec![ContentPart::InlineData {
                    mime_type: "image/png".into(),
                    data: format!("IMG{n}"),
                }],
            })
        }
    }

    fn session_with(text: Arc<FakeText>, images: Arc<FakeImages>) -> Session {
        let credential = Arc::new(CredentialHolder::in_memory());
        credential.set("test-key").unwrap();
        Session::new(credential, text, images)
    }

    async fn ready_session(json: &str, images: Arc<FakeImages>) -> Session {
        let session = session_with(FakeText::ok(json), images);
        session.set_article("An article about pets.");
        assert_eq!(session.generate_prompts().await, Outcome::Completed);
        session
    }

    #[tokio::test]
    async fn test_prompt_generation_installs_set() {
        let text = FakeText::ok(ONE_HEADING);
        let session = session_with(text.clone(), FakeImages::immediate());
        session.set_article("valid text");

        assert_eq!(session.generate_prompts().await, Outcome::Completed);

        let expected = PromptSet {
            main_prompt: Prompt::new("A cat in a garden", "庭の猫"),
            heading_prompts: vec![Prompt::new("A dog on a beach", "ビーチの犬")],
            style_guide: "photorealistic, warm lighting".into(),
        };
        let state = session.snapshot();
        assert_eq!(state.prompt_set, Some(expected));
        assert!(state.images.is_empty());
        assert!(state.error.is_none());
        assert!(!state.prompt_loading);
        assert_eq!(text.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_article_fails_validation() {
        let text = FakeText::ok(ONE_HEADING);
        let session = session_with(text.clone(), FakeImages::immediate());
        session.set_article("first article");
        session.generate_prompts().await;
        let before = session.snapshot();

        session.set_article("");
        assert_eq!(session.generate_prompts().await, Outcome::Failed);

        let after = session.snapshot();
        assert!(after.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(after.prompt_set, before.prompt_set);
        assert_eq!(after.epoch, before.epoch);
        assert_eq!(text.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_validation() {
        let text = FakeText::ok(ONE_HEADING);
        let session = Session::new(
            Arc::new(CredentialHolder::in_memory()),
            text.clone(),
            FakeImages::immediate(),
        );
        session.set_article("valid text");

        assert_eq!(session.generate_prompts().await, Outcome::Failed);
        assert!(session.error().unwrap().contains("API key"));
        assert!(session.prompt_set().is_none());
        assert_eq!(text.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_generation_failure_leaves_no_set() {
        let session = session_with(FakeText::failing("backend exploded"), FakeImages::immediate());
        session.set_article("valid text");

        assert_eq!(session.generate_prompts().await, Outcome::Failed);
        let state = session.snapshot();
        assert!(state.prompt_set.is_none());
        assert!(!state.prompt_loading);
        assert!(state
            .error
            .unwrap()
            .starts_with("Failed to generate prompts."));
    }

    #[tokio::test]
    async fn test_invalid_key_message() {
        let session = session_with(
            FakeText::failing("API key not valid. Please pass a valid API key."),
            FakeImages::immediate(),
        );
        session.set_article("valid text");

        session.generate_prompts().await;
        assert!(session.error().unwrap().contains("API key is not valid"));
    }

    #[tokio::test]
    async fn test_new_prompt_generation_resets_session() {
        let session = ready_session(THREE_HEADINGS, FakeImages::immediate()).await;
        session.set_overlay_text("Title");
        session.generate_image(PromptSlot::Main).await;
        assert_eq!(session.images().len(), 1);

        assert_eq!(session.generate_prompts().await, Outcome::Completed);
        let state = session.snapshot();
        assert!(state.images.is_empty());
        assert!(state.loading.is_empty());
        assert!(state.overlay_text.is_empty());
        assert!(state.prompt_set.is_some());
        assert_eq!(state.epoch, 2);
    }

    #[tokio::test]
    async fn test_loading_flag_lifecycle() {
        let images = FakeImages::gated();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;
        let slot = PromptSlot::Heading(1);

        let (outcome, ()) = tokio::join!(session.generate_image(slot), async {
            images.entered.notified().await;
            assert!(session.is_loading(slot));
            assert!(!session.is_loading(PromptSlot::Main));
            images.release(1);
        });

        assert_eq!(outcome, Outcome::Completed);
        assert!(!session.is_loading(slot));
        assert!(session.is_generated(slot));
        assert!(images.request_text(0).contains("Scene: A fox in snow."));
        assert!(images.request_text(0).contains("Style: flat vector art."));
    }

    #[tokio::test]
    async fn test_loading_flag_cleared_on_failure() {
        let images = FakeImages::failing_on("A dog on a beach");
        let session = ready_session(THREE_HEADINGS, images.clone()).await;

        let outcome = session.generate_image(PromptSlot::Heading(0)).await;
        assert_eq!(outcome, Outcome::Failed);
        assert!(!session.is_loading(PromptSlot::Heading(0)));
        assert!(!session.is_generated(PromptSlot::Heading(0)));
        assert!(session
            .error()
            .unwrap()
            .starts_with("Failed to generate the image."));
    }

    #[tokio::test]
    async fn test_overlay_captured_at_request_time() {
        let images = FakeImages::gated();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;
        session.set_overlay_text("Sale 50%");

        let (outcome, ()) = tokio::join!(session.generate_image(PromptSlot::Main), async {
            images.entered.notified().await;
            session.set_overlay_text("X");
            images.release(1);
        });

        assert_eq!(outcome, Outcome::Completed);
        let generated = session.images();
        assert_eq!(generated[0].text_overlay.as_deref(), Some("Sale 50%"));
        assert!(images.request_text(0).contains("\"Sale 50%\""));
    }

    #[tokio::test]
    async fn test_overlay_only_applies_to_main() {
        let images = FakeImages::immediate();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;
        session.set_overlay_text("Sale 50%");

        session.generate_image(PromptSlot::Heading(2)).await;
        assert!(session.images()[0].text_overlay.is_none());
        assert!(!images.request_text(0).contains("exact text"));

        session.set_overlay_text("   ");
        session.generate_image(PromptSlot::Main).await;
        assert!(session.images()[1].text_overlay.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_request_is_rejected() {
        let images = FakeImages::gated();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;

        let (first, second) = tokio::join!(session.generate_image(PromptSlot::Main), async {
            images.entered.notified().await;
            let outcome = session.generate_image(PromptSlot::Main).await;
            images.release(1);
            outcome
        });

        assert_eq!(first, Outcome::Completed);
        assert_eq!(second, Outcome::Rejected);
        assert_eq!(images.calls(), 1);
        assert_eq!(session.images().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_slot() {
        let images = FakeImages::failing_on("A fox in snow");
        let session = ready_session(THREE_HEADINGS, images.clone()).await;

        let (a, b, c) = tokio::join!(
            session.generate_image(PromptSlot::Main),
            session.generate_image(PromptSlot::Heading(1)),
            session.generate_image(PromptSlot::Heading(2)),
        );

        assert_eq!(a, Outcome::Completed);
        assert_eq!(b, Outcome::Failed);
        assert_eq!(c, Outcome::Completed);
        let state = session.snapshot();
        assert!(state.loading.is_empty());
        assert_eq!(state.images.len(), 2);
        assert!(state.is_generated(PromptSlot::Main));
        assert!(!state.is_generated(PromptSlot::Heading(1)));
        assert!(state.is_generated(PromptSlot::Heading(2)));
    }

    #[tokio::test]
    async fn test_regeneration_allows_duplicates() {
        let images = FakeImages::immediate();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;

        session.generate_image(PromptSlot::Main).await;
        session.generate_image(PromptSlot::Main).await;

        let generated = session.images();
        assert_eq!(generated.len(), 2);
        assert_ne!(generated[0].id, generated[1].id);
        assert!(generated.iter().all(|img| img.slot == PromptSlot::Main));
    }

    #[tokio::test]
    async fn test_gating_survives_unrelated_changes() {
        let images = FakeImages::immediate();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;

        session.generate_image(PromptSlot::Heading(0)).await;
        assert!(session.is_generated(PromptSlot::Heading(0)));

        session.generate_image(PromptSlot::Main).await;
        session.generate_image(PromptSlot::Heading(2)).await;
        let main_id = session.images()[1].id;
        session.edit_image(main_id, "Brighter").await;

        assert!(session.is_generated(PromptSlot::Heading(0)));
        assert!(!session.is_generated(PromptSlot::Heading(1)));
    }

    #[tokio::test]
    async fn test_edit_replaces_exactly_one_entry() {
        let images = FakeImages::immediate();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;
        session.generate_image(PromptSlot::Main).await;
        session.generate_image(PromptSlot::Heading(0)).await;
        session.generate_image(PromptSlot::Main).await;
        let before = session.images();

        let target = before[0].id;
        assert!(session.begin_edit(target));
        assert_eq!(session.edit_image(target, "Add a rainbow").await, Outcome::Completed);

        let after = session.images();
        assert_eq!(after.len(), before.len());
        assert_eq!(after[0].id, target);
        assert_eq!(after[0].prompt.english, "A cat in a garden (edited)");
        assert_eq!(after[0].image.as_str(), "data:image/png;base64,IMG4");
        assert_eq!(after[0].edit_count, 1);
        assert_eq!(after[1], before[1]);
        assert_eq!(after[2], before[2]);
        assert!(session.editing().is_none());
        assert!(session.is_generated(PromptSlot::Main));

        // The edit request carries the previous image first.
        let requests = images.requests.lock();
        assert_eq!(
            requests[3].parts[0],
            ContentPart::InlineData {
                mime_type: "image/png".into(),
                data: "IMG1".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_repeated_edits_mark_once() {
        let session = ready_session(THREE_HEADINGS, FakeImages::immediate()).await;
        session.generate_image(PromptSlot::Main).await;
        let id = session.images()[0].id;

        session.edit_image(id, "Warmer").await;
        session.edit_image(id, "Even warmer").await;

        let img = &session.images()[0];
        assert_eq!(img.prompt.english, "A cat in a garden (edited)");
        assert_eq!(img.edit_count, 2);
    }

    #[tokio::test]
    async fn test_failed_edit_keeps_dialog_open() {
        let images = FakeImages::failing_on("Make it explode");
        let session = ready_session(THREE_HEADINGS, images.clone()).await;
        session.generate_image(PromptSlot::Main).await;
        let before = session.images();
        let id = before[0].id;

        assert!(session.begin_edit(id));
        assert_eq!(session.edit_image(id, "Make it explode").await, Outcome::Failed);

        assert_eq!(
            session.editing(),
            Some(EditSurface {
                target: id,
                in_progress: false
            })
        );
        assert_eq!(session.images(), before);
        assert!(session.error().unwrap().starts_with("Failed to edit the image."));
    }

    #[tokio::test]
    async fn test_edit_requires_instruction() {
        let images = FakeImages::immediate();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;
        session.generate_image(PromptSlot::Main).await;
        let id = session.images()[0].id;

        assert_eq!(session.edit_image(id, "  ").await, Outcome::Failed);
        assert_eq!(images.calls(), 1);
        assert!(session.error().is_some());
    }

    #[tokio::test]
    async fn test_edit_unknown_image() {
        let session = ready_session(THREE_HEADINGS, FakeImages::immediate()).await;
        assert!(!session.begin_edit(ImageId(42)));
        assert_eq!(session.edit_image(ImageId(42), "Fix").await, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_image_without_prompt_set() {
        let images = FakeImages::immediate();
        let session = session_with(FakeText::ok(THREE_HEADINGS), images.clone());

        assert_eq!(session.generate_image(PromptSlot::Main).await, Outcome::Failed);
        assert_eq!(images.calls(), 0);
        assert_eq!(session.error().as_deref(), Some("Generate prompts first."));
    }

    #[tokio::test]
    async fn test_image_for_unknown_slot() {
        let images = FakeImages::immediate();
        let session = ready_session(ONE_HEADING, images.clone()).await;

        assert_eq!(
            session.generate_image(PromptSlot::Heading(3)).await,
            Outcome::Failed
        );
        assert_eq!(images.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_image_after_reset_is_discarded() {
        let images = FakeImages::gated();
        let session = ready_session(THREE_HEADINGS, images.clone()).await;

        let (outcome, ()) = tokio::join!(session.generate_image(PromptSlot::Heading(0)), async {
            images.entered.notified().await;
            session.set_article("A different article");
            assert_eq!(session.generate_prompts().await, Outcome::Completed);
            images.release(1);
        });

        assert_eq!(outcome, Outcome::Discarded);
        let state = session.snapshot();
        assert!(state.images.is_empty());
        assert!(state.loading.is_empty());
    }

    #[tokio::test]
    async fn test_new_operation_clears_error() {
        let images = FakeImages::failing_on("A dog on a beach");
        let session = ready_session(THREE_HEADINGS, images.clone()).await;

        session.generate_image(PromptSlot::Heading(0)).await;
        assert!(session.error().is_some());

        assert_eq!(session.generate_image(PromptSlot::Main).await, Outcome::Completed);
        assert!(session.error().is_none());

        session.generate_image(PromptSlot::Heading(0)).await;
        session.dismiss_error();
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn test_close_edit() {
        let session = ready_session(THREE_HEADINGS, FakeImages::immediate()).await;
        session.generate_image(PromptSlot::Main).await;
        let id = session.images()[0].id;

        assert!(session.begin_edit(id));
        session.close_edit();
        assert!(session.editing().is_none());
        assert!(!session.is_editing());
    }
}
