//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or [`Config::minimal`] when
//! no file exists) describes the stock local setup: documents in `docs/`,
//! Ollama on `localhost:11434`, `nomic-embed-text` embeddings and
//! `llama3:latest` answers.
//!
//! A handful of environment variables override file values after parsing:
//! `DOCQA_DOCS_DIR`, `DOCQA_INDEX_PATH`, `DOCQA_EMBED_MODEL`,
//! `DOCQA_LLM_MODEL` and `OLLAMA_HOST`.

use anyhow::{bail, Context, Result};
use docqa_core::chunk::ChunkOptions;
use docqa_core::retrieve::MmrParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_docs_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            dir: default_docs_dir(),
            recursive: false,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("index_store/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    docqa_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    docqa_core::chunk::DEFAULT_CHUNK_OVERLAP
}

impl ChunkingConfig {
    pub fn options(&self) -> Result<ChunkOptions> {
        Ok(ChunkOptions::new(self.chunk_size, self.chunk_overlap)?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda_mult: default_lambda_mult(),
        }
    }
}

fn default_k() -> usize {
    docqa_core::retrieve::DEFAULT_K
}
fn default_fetch_k() -> usize {
    docqa_core::retrieve::DEFAULT_FETCH_K
}
fn default_lambda_mult() -> f32 {
    docqa_core::retrieve::DEFAULT_LAMBDA_MULT
}

impl RetrievalConfig {
    pub fn params(&self) -> Result<MmrParams> {
        Ok(MmrParams::new(self.k, self.fetch_k, self.lambda_mult)?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_ollama")]
    pub provider: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Service base URL; defaults per provider (see [`EmbeddingConfig::base_url`]).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            model: default_embed_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_ollama() -> String {
    "ollama".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

fn provider_base_url<'a>(provider: &str, url: &'a Option<String>) -> &'a str {
    match url {
        Some(url) => url.trim_end_matches('/'),
        None if provider == "openai" => DEFAULT_OPENAI_URL,
        None => DEFAULT_OLLAMA_URL,
    }
}

impl EmbeddingConfig {
    /// Configured URL, or the provider's default.
    pub fn base_url(&self) -> &str {
        provider_base_url(&self.provider, &self.url)
    }
}

fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Models offered for per-question selection.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            model: default_llm_model(),
            models: default_models(),
            stream: default_stream(),
            url: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    /// Configured URL, or the provider's default.
    pub fn base_url(&self) -> &str {
        provider_base_url(&self.provider, &self.url)
    }
}

fn default_llm_model() -> String {
    "llama3:latest".to_string()
}
fn default_models() -> Vec<String> {
    ["llama3:latest", "mistral:7b", "qwen3:8b", "deepseek-r1:8b"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}
fn default_stream() -> bool {
    true
}
fn default_generation_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// Stock configuration used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DOCQA_DOCS_DIR") {
            self.docs.dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("DOCQA_INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(model) = lookup("DOCQA_EMBED_MODEL") {
            self.embedding.model = model;
        }
        if let Some(model) = lookup("DOCQA_LLM_MODEL") {
            self.generation.model = model;
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            let url = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{}", host)
            };
            if self.embedding.provider == "ollama" {
                self.embedding.url = Some(url.clone());
            }
            if self.generation.provider == "ollama" {
                self.generation.url = Some(url);
            }
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.chunking.options()?;
        self.retrieval.params()?;

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        match self.embedding.provider.as_str() {
            "ollama" | "openai" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be ollama, openai, or local.",
                other
            ),
        }

        if self.generation.model.trim().is_empty() {
            bail!("generation.model must not be empty");
        }
        match self.generation.provider.as_str() {
            "ollama" | "openai" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be ollama or openai.",
                other
            ),
        }

        Ok(())
    }
}

/// Parse a config file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Like [`load_config`], but falls back to [`Config::minimal`] when the file
/// does not exist.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::debug!(path = %path.display(), "config file not found, using defaults");
    let mut config = Config::minimal();
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
