#![warn(missing_docs)]
//! BlogViz - turn a blog article into illustrations with Gemini.
//!
//! The crate synthesizes one prompt per article plus one per major heading,
//! generates an image for each prompt in a shared style, and edits
//! generated images with free-text instructions. A [`Session`] holds the
//! article, prompt set, images, loading flags and a single error slot.
//!
//! # Quick Start
//!
//! ```no_run
//! use blogviz::{CredentialHolder, GeminiClient, Outcome, PromptSlot, Session};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> blogviz::Result<()> {
//!     let credential = Arc::new(CredentialHolder::in_memory());
//!     credential.set("your-api-key")?;
//!
//!     let session = Session::gemini(GeminiClient::builder().build()?, credential);
//!     session.set_article("# Gardening for beginners\n...");
//!
//!     if session.generate_prompts().await == Outcome::Completed {
//!         session.set_overlay_text("Start today");
//!         session.generate_image(PromptSlot::Main).await;
//!     }
//!     if let Some(message) = session.error() {
//!         eprintln!("{message}");
//!     }
//!     for image in session.images() {
//!         image.image.save(format!("{}.png", image.slot))?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `cli` (default): the `blogviz` command-line interface

mod error;

pub mod credential;
pub mod gemini;
pub mod image;
pub mod prompts;
pub mod schema;
pub mod service;
pub mod session;
pub mod types;

// Re-export error types at crate root
pub use error::{is_invalid_key_message, BlogVizError, ErrorKind, Operation, Result};

pub use credential::{
    CredentialHolder, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use gemini::{GeminiClient, GeminiClientBuilder, ImageModel, TextModel};
pub use service::{
    ContentPart, ContentRequest, ContentResponse, ImageGenerationService, Modality,
    TextGenerationService, TextRequest,
};
pub use session::{EditSurface, Outcome, Session, SessionConfig, SessionState};
pub use types::{
    EncodedImage, GeneratedImage, ImageFormat, ImageId, Prompt, PromptSet, PromptSlot,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::credential::CredentialHolder;
    pub use crate::error::{BlogVizError, Result};
    pub use crate::gemini::GeminiClient;
    pub use crate::service::{ImageGenerationService, TextGenerationService};
    pub use crate::session::{Outcome, Session};
    pub use crate::types::{EncodedImage, GeneratedImage, PromptSet, PromptSlot};
}
