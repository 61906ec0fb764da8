//! CLI for BlogViz - article illustrations via Gemini.

use anyhow::Context;
use blogviz::credential::{mask_key, FileCredentialStore, MemoryCredentialStore};
use blogviz::{
    CredentialHolder, CredentialStore, EncodedImage, GeminiClient, ImageFormat, ImageModel,
    Operation, Outcome, PromptSet, PromptSlot, Session, SessionConfig, TextModel,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blogviz")]
#[command(about = "Generate illustration prompts, images and edits for a blog article")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Model for prompt synthesis
    #[arg(long, global = true, value_enum, default_value = "flash")]
    text_model: TextModelArg,

    /// Model for image generation and editing
    #[arg(long, global = true, value_enum, default_value = "flash-image-preview")]
    image_model: ImageModelArg,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored Gemini API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Print image prompts for an article
    Prompts(PromptsArgs),

    /// Generate prompts and images for an article
    Illustrate(IllustrateArgs),

    /// Edit an existing image with a text instruction
    Edit(EditArgs),
}

#[derive(Subcommand)]
enum KeyAction {
    /// Store a key
    Set { key: String },
    /// Remove the stored key
    Clear,
    /// Show the current key, masked
    Show,
    /// Ask the service whether the current key is accepted
    Verify,
}

#[derive(Args)]
struct PromptsArgs {
    /// Article file, or `-` for stdin
    article: String,
}

#[derive(Args)]
struct IllustrateArgs {
    /// Article file, or `-` for stdin
    article: String,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Text to render into the main image
    #[arg(long)]
    overlay: Option<String>,

    /// Which images to generate
    #[arg(long, value_enum, default_value = "all")]
    only: Selection,
}

#[derive(Args)]
struct EditArgs {
    /// Image to edit (PNG, JPEG or WebP)
    image: PathBuf,

    /// What to change
    instruction: String,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Selection {
    Main,
    Headings,
    All,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TextModelArg {
    Flash,
    Pro,
}

impl From<TextModelArg> for TextModel {
    fn from(arg: TextModelArg) -> Self {
        match arg {
            TextModelArg::Flash => TextModel::Flash25,
            TextModelArg::Pro => TextModel::Pro25,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImageModelArg {
    FlashImagePreview,
    NanoBanana,
    NanoBananaPro,
}

impl From<ImageModelArg> for ImageModel {
    fn from(arg: ImageModelArg) -> Self {
        match arg {
            ImageModelArg::FlashImagePreview => ImageModel::FlashImagePreview,
            ImageModelArg::NanoBanana => ImageModel::NanoBanana,
            ImageModelArg::NanoBananaPro => ImageModel::NanoBananaPro,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blogviz=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SessionConfig {
        text_model: cli.text_model.into(),
        image_model: cli.image_model.into(),
    };
    let credential = Arc::new(load_credential()?);

    match cli.command {
        Commands::Key { action } => manage_key(action, &credential, config, cli.json).await?,
        Commands::Prompts(args) => print_prompts(args, credential, config, cli.json).await?,
        Commands::Illustrate(args) => illustrate(args, credential, config, cli.json).await?,
        Commands::Edit(args) => edit(args, &credential, config, cli.json).await?,
    }

    Ok(())
}

fn load_credential() -> anyhow::Result<CredentialHolder> {
    let store: Arc<dyn CredentialStore> = match FileCredentialStore::default_location() {
        Some(path) => Arc::new(FileCredentialStore::new(path)),
        None => {
            tracing::warn!("no config directory; the API key will not be saved");
            Arc::new(MemoryCredentialStore::new())
        }
    };
    Ok(CredentialHolder::load(store)?)
}

fn read_article(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
}

fn new_session(credential: Arc<CredentialHolder>, config: SessionConfig) -> anyhow::Result<Session> {
    Ok(Session::gemini(GeminiClient::builder().build()?, credential).with_config(config))
}

fn session_failure(session: &Session) -> anyhow::Error {
    anyhow::anyhow!(session
        .error()
        .unwrap_or_else(|| "Operation did not complete.".into()))
}

async fn manage_key(
    action: KeyAction,
    credential: &CredentialHolder,
    config: SessionConfig,
    json_output: bool,
) -> anyhow::Result<()> {
    match action {
        KeyAction::Set { key } => {
            credential.set(&key)?;
            println!("API key saved.");
        }
        KeyAction::Clear => {
            credential.set("")?;
            println!("API key cleared.");
        }
        KeyAction::Show => {
            let masked = credential.get().map(|key| mask_key(&key));
            if json_output {
                let result = serde_json::json!({ "present": masked.is_some(), "key": masked });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", masked.as_deref().unwrap_or("(not set)"));
            }
        }
        KeyAction::Verify => {
            let key = credential.require()?;
            let client = GeminiClient::builder().build()?;
            match client.check_key(&key, config.text_model.as_str()).await {
                Ok(()) => println!("API key accepted."),
                Err(err) => anyhow::bail!("{}", err.user_message(Operation::PromptGeneration)),
            }
        }
    }
    Ok(())
}

fn print_prompt_set(set: &PromptSet) {
    println!("Style guide: {}", set.style_guide);
    for (slot, prompt) in set.slots() {
        println!();
        println!("[{slot}]");
        println!("  EN: {}", prompt.english);
        println!("  JA: {}", prompt.japanese);
    }
}

async fn print_prompts(
    args: PromptsArgs,
    credential: Arc<CredentialHolder>,
    config: SessionConfig,
    json_output: bool,
) -> anyhow::Result<()> {
    let session = new_session(credential, config)?;
    session.set_article(read_article(&args.article)?);

    if session.generate_prompts().await != Outcome::Completed {
        return Err(session_failure(&session));
    }
    let set = session.prompt_set().context("prompt set missing after generation")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&set)?);
    } else {
        print_prompt_set(&set);
    }
    Ok(())
}

fn selected_slots(set: &PromptSet, selection: Selection) -> Vec<PromptSlot> {
    set.slots()
        .map(|(slot, _)| slot)
        .filter(|slot| match selection {
            Selection::Main => slot.is_main(),
            Selection::Headings => !slot.is_main(),
            Selection::All => true,
        })
        .collect()
}

async fn illustrate(
    args: IllustrateArgs,
    credential: Arc<CredentialHolder>,
    config: SessionConfig,
    json_output: bool,
) -> anyhow::Result<()> {
    let session = Arc::new(new_session(credential, config)?);
    session.set_article(read_article(&args.article)?);

    if session.generate_prompts().await != Outcome::Completed {
        return Err(session_failure(&session));
    }
    let set = session.prompt_set().context("prompt set missing after generation")?;
    if let Some(text) = &args.overlay {
        session.set_overlay_text(text.as_str());
    }

    std::fs::create_dir_all(&args.output)?;
    std::fs::write(
        args.output.join("prompts.json"),
        serde_json::to_string_pretty(&set)?,
    )?;

    let mut tasks = JoinSet::new();
    for slot in selected_slots(&set, args.only) {
        let session = session.clone();
        tasks.spawn(async move { (slot, session.generate_image(slot).await) });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (slot, outcome) = joined?;
        if outcome != Outcome::Completed {
            let message = session.error().unwrap_or_else(|| format!("{outcome:?}"));
            if !json_output {
                eprintln!("{slot}: {message}");
            }
            failures.push((slot, message));
        }
    }

    let mut written = Vec::new();
    for image in session.images() {
        let path = image_path(&args.output, &image.slot.to_string(), &image.image);
        image.image.save(&path)?;
        written.push((image, path));
    }

    if json_output {
        let result = serde_json::json!({
            "success": failures.is_empty(),
            "output": args.output.display().to_string(),
            "style_guide": set.style_guide,
            "images": written.iter().map(|(image, path)| serde_json::json!({
                "slot": image.slot.to_string(),
                "file": path.display().to_string(),
                "prompt": image.prompt.english,
                "text_overlay": image.text_overlay,
            })).collect::<Vec<_>>(),
            "failures": failures.iter().map(|(slot, message)| serde_json::json!({
                "slot": slot.to_string(),
                "error": message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for (image, path) in &written {
            println!("Generated {}: {}", image.slot, path.display());
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("{} of {} images failed", failures.len(), failures.len() + written.len());
    }
    Ok(())
}

fn image_path(dir: &Path, stem: &str, image: &EncodedImage) -> PathBuf {
    let ext = image.format().unwrap_or(ImageFormat::Jpeg).extension();
    dir.join(format!("{stem}.{ext}"))
}

async fn edit(
    args: EditArgs,
    credential: &CredentialHolder,
    config: SessionConfig,
    json_output: bool,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let format = ImageFormat::from_magic_bytes(&bytes)
        .with_context(|| format!("{} is not a PNG, JPEG or WebP image", args.image.display()))?;
    let source = EncodedImage::from_bytes(format.mime_type(), &bytes);

    let api_key = credential
        .require()
        .map_err(|err| anyhow::anyhow!(err.user_message(Operation::ImageEdit)))?;
    let client = GeminiClient::builder().build()?;

    let edited = blogviz::image::edit_image(
        &client,
        config.image_model.as_str(),
        &api_key,
        &source,
        &args.instruction,
    )
    .await
    .map_err(|err| anyhow::anyhow!(err.user_message(Operation::ImageEdit)))?;

    edited.save(&args.output)?;

    if json_output {
        let result = serde_json::json!({
            "success": true,
            "output": args.output.display().to_string(),
            "format": edited.format().map(|f| f.extension()),
            "model": config.image_model.as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Edited image: {}", args.output.display());
    }
    Ok(())
}
