use crate::config::GeminiConfig;
use crate::integrations::gemini::{self, GeminiError, InlineImage};
use base64::Engine as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
const FALLBACK_PROMPT: &str = "Professional product photo";
const FALLBACK_NAME: &str = "image.jpg";

#[derive(Debug, thiserror::Error)]
pub enum EnhancerError {
    #[error("unsupported file type {0:?}: use JPG or PNG")]
    UnsupportedType(String),
    #[error("file size must be less than 10MB ({0} bytes)")]
    TooLarge(u64),
    #[error("could not read image: {0}")]
    Read(#[source] io::Error),
    #[error("upload a product photo first")]
    NoImage,
    #[error("could not save result: {0}")]
    Write(#[source] io::Error),
    #[error("image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error(transparent)]
    Gemini(#[from] GeminiError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Marketplace {
    Wb,
    Ozon,
    #[default]
    Both,
}

impl Marketplace {
    pub const ALL: [Marketplace; 3] = [Marketplace::Wb, Marketplace::Ozon, Marketplace::Both];

    pub fn badge(&self) -> &'static str {
        match self {
            Marketplace::Wb => "WB",
            Marketplace::Ozon => "Ozon",
            Marketplace::Both => "Universal",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Style {
    Minimal,
    Premium,
    Eco,
    Fashion,
    Tech,
    Lifestyle,
}

impl Style {
    pub const ALL: [Style; 6] = [
        Style::Minimal,
        Style::Premium,
        Style::Eco,
        Style::Fashion,
        Style::Tech,
        Style::Lifestyle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Minimal => "minimal",
            Style::Premium => "premium",
            Style::Eco => "eco",
            Style::Fashion => "fashion",
            Style::Tech => "tech",
            Style::Lifestyle => "lifestyle",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Style::Minimal => "Minimal",
            Style::Premium => "Premium",
            Style::Eco => "Eco",
            Style::Fashion => "Fashion",
            Style::Tech => "Tech",
            Style::Lifestyle => "Lifestyle",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mood {
    Clean,
    Warm,
    Bright,
    Dark,
    Professional,
}

impl Mood {
    pub const ALL: [Mood; 5] = [Mood::Clean, Mood::Warm, Mood::Bright, Mood::Dark, Mood::Professional];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Clean => "clean",
            Mood::Warm => "warm",
            Mood::Bright => "bright",
            Mood::Dark => "dark",
            Mood::Professional => "professional",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mood::Clean => "Clean",
            Mood::Warm => "Warm",
            Mood::Bright => "Bright",
            Mood::Dark => "Dark",
            Mood::Professional => "Professional",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Template {
    pub id: &'static str,
    pub name: &'static str,
    pub marketplace: Marketplace,
    pub description: &'static str,
}

pub const TEMPLATES: [Template; 3] = [
    Template {
        id: "wb-studio-clean",
        name: "WB Studio Clean",
        marketplace: Marketplace::Wb,
        description: "Clean studio photo with white background, optimal for Wildberries",
    },
    Template {
        id: "ozon-lifestyle-soft",
        name: "Ozon Lifestyle Soft",
        marketplace: Marketplace::Ozon,
        description: "Soft lifestyle setting with natural lighting, perfect for Ozon",
    },
    Template {
        id: "premium-apple-look",
        name: "Premium Apple Look",
        marketplace: Marketplace::Both,
        description: "Premium Apple-style studio photo with perfect lighting",
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Upload,
    Edit,
    Result,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Everything needed to run one enhancement off the UI thread.
#[derive(Clone, Debug)]
pub struct EnhanceJob {
    pub prompt: String,
    pub image: InlineImage,
}

pub struct EnhanceOutcome {
    pub prompt: String,
    /// `None` means the model returned no image.
    pub result: Result<Option<Vec<u8>>, EnhancerError>,
}

/// Wizard state for one enhancement session. `reset` returns it to a
/// freshly created state on the upload screen.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditorState {
    screen: Screen,
    pub original: Option<SourceImage>,
    pub marketplace: Marketplace,
    pub template: Option<Template>,
    pub styles: Vec<Style>,
    pub mood: Option<Mood>,
    pub description: String,
    pub generated_prompt: Option<String>,
    pub enhanced: Option<Vec<u8>>,
}

impl EditorState {
    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn load_image(&mut self, path: &Path) -> Result<(), EnhancerError> {
        let mime_type = validate_upload(path)?;
        let bytes = fs::read(path).map_err(EnhancerError::Read)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(FALLBACK_NAME)
            .to_string();
        self.original = Some(SourceImage {
            path: path.to_path_buf(),
            name,
            mime_type,
            bytes,
        });
        self.screen = Screen::Edit;
        Ok(())
    }

    pub fn set_marketplace(&mut self, marketplace: Marketplace) {
        self.marketplace = marketplace;
    }

    /// Selecting the active template again clears it.
    pub fn toggle_template(&mut self, template: Template) {
        if self.template.is_some_and(|t| t.id == template.id) {
            self.template = None;
        } else {
            self.template = Some(template);
        }
    }

    pub fn toggle_style(&mut self, style: Style) {
        if let Some(pos) = self.styles.iter().position(|s| *s == style) {
            self.styles.remove(pos);
        } else {
            self.styles.push(style);
        }
    }

    pub fn toggle_mood(&mut self, mood: Mood) {
        self.mood = if self.mood == Some(mood) { None } else { Some(mood) };
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    /// Empty segments are left out rather than rendered as blanks.
    pub fn build_prompt(&self) -> String {
        let mut prompt = self
            .template
            .map(|t| t.description)
            .unwrap_or(FALLBACK_PROMPT)
            .to_string();
        prompt.push('.');
        if !self.styles.is_empty() {
            let styles: Vec<&str> = self.styles.iter().map(Style::as_str).collect();
            prompt.push_str(&format!(" Styles: {}.", styles.join(", ")));
        }
        if let Some(mood) = self.mood {
            prompt.push_str(&format!(" Mood: {}.", mood.as_str()));
        }
        let description = self.description.trim();
        if !description.is_empty() {
            prompt.push(' ');
            prompt.push_str(description);
        }
        prompt
    }

    pub fn begin_enhance(&self) -> Result<EnhanceJob, EnhancerError> {
        let original = self.original.as_ref().ok_or(EnhancerError::NoImage)?;
        Ok(EnhanceJob {
            prompt: self.build_prompt(),
            image: InlineImage {
                mime_type: original.mime_type.to_string(),
                data: original.bytes.clone(),
            },
        })
    }

    pub fn finish_enhance(&mut self, prompt: String, enhanced: Option<Vec<u8>>) {
        self.generated_prompt = Some(prompt);
        self.enhanced = enhanced;
        self.screen = Screen::Result;
    }

    pub fn refine(&mut self) {
        if self.screen == Screen::Result {
            self.screen = Screen::Edit;
        }
    }

    pub fn back(&mut self) {
        if self.screen == Screen::Edit {
            self.screen = Screen::Upload;
        }
    }

    pub fn reset(&mut self) {
        *self = EditorState::default();
    }

    /// Enhanced bytes when present, otherwise the original upload.
    pub fn result_bytes(&self) -> Option<&[u8]> {
        self.enhanced
            .as_deref()
            .or_else(|| self.original.as_ref().map(|o| o.bytes.as_slice()))
    }

    pub fn result_file_name(&self) -> String {
        let name = self
            .original
            .as_ref()
            .map(|o| o.name.as_str())
            .unwrap_or(FALLBACK_NAME);
        format!("enhanced-{name}")
    }

    pub fn save_result(&self, dir: &Path) -> Result<PathBuf, EnhancerError> {
        let bytes = self.result_bytes().ok_or(EnhancerError::NoImage)?;
        fs::create_dir_all(dir).map_err(EnhancerError::Write)?;
        let path = dir.join(self.result_file_name());
        fs::write(&path, bytes).map_err(EnhancerError::Write)?;
        tracing::info!(path = %path.display(), "enhanced image saved");
        Ok(path)
    }
}

/// Checks type (by extension) and size before anything is read.
pub fn validate_upload(path: &Path) -> Result<&'static str, EnhancerError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let mime_type = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => return Err(EnhancerError::UnsupportedType(extension)),
    };
    let size = fs::metadata(path).map_err(EnhancerError::Read)?.len();
    if size > MAX_UPLOAD_BYTES {
        return Err(EnhancerError::TooLarge(size));
    }
    Ok(mime_type)
}

/// Runs the image model on the original upload. Without a key, or in
/// simulation mode, no request is made and the result is `None`.
pub fn spawn_enhance(
    config: GeminiConfig,
    api_key: String,
    simulate: bool,
    job: EnhanceJob,
) -> Receiver<EnhanceOutcome> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let result = enhance(&config, &api_key, simulate, &job);
        let _ = sender.send(EnhanceOutcome {
            prompt: job.prompt,
            result,
        });
    });
    receiver
}

fn enhance(
    config: &GeminiConfig,
    api_key: &str,
    simulate: bool,
    job: &EnhanceJob,
) -> Result<Option<Vec<u8>>, EnhancerError> {
    if simulate || api_key.trim().is_empty() || !config.enabled {
        tracing::info!("enhancer running without the image model");
        return Ok(None);
    }
    let encoded = gemini::generate_image_standalone(config, api_key, &job.prompt, Some(&job.image))?;
    match encoded {
        Some(data) => Ok(Some(base64::engine::general_purpose::STANDARD.decode(data)?)),
        None => Ok(None),
    }
}
