use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const API_KEY_ENV: &str = "STORY2COMIC_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    pub backend: BackendConfig,

    #[serde(default)]
    pub style: StyleConfig,

    /// Fan-out for reference image generation.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub extra_api_keys: Vec<String>,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl BackendConfig {
    /// Primary key, with the environment taking precedence over the file.
    pub fn primary_key(&self) -> String {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => self.api_key.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StyleConfig {
    #[serde(default = "default_art_style")]
    pub art_style: String,
    #[serde(default = "default_color")]
    pub color: bool,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            art_style: default_art_style(),
            color: default_color(),
            language: default_language(),
        }
    }
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout() -> u64 {
    120
}
fn default_art_style() -> String {
    "classic western comic book, inked line art".to_string()
}
fn default_color() -> bool {
    true
}
fn default_language() -> String {
    "en".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new("config.yml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}
