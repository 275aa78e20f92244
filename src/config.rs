//! TOML configuration parsing and validation.
//!
//! Every section and field has a default, so an empty file (or
//! [`Config::default`]) yields a working configuration pointed at the TJSP
//! e-SAJ portal with keyword-only retrieval.
//!
//! ```toml
//! [portal]
//! base_url = "https://esaj.tjsp.jus.br"
//! timeout_secs = 30
//! max_retries = 3
//! delay_min_secs = 3.0
//! delay_max_secs = 7.0
//!
//! [storage]
//! download_dir = "data/raw_pdfs"
//!
//! [retrieval]
//! corpus_path = "data/simple_rag/processed_data.json"
//! top_k = 5
//!
//! [embedding]
//! provider = "disabled"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for any configured delay or interval, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Settings for the acquisition engine's session against the portal.
#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_search_path")]
    pub search_path: String,
    #[serde(default = "default_warm_up_path")]
    pub warm_up_path: String,
    /// Visit `warm_up_path` once before the first search to collect cookies.
    #[serde(default)]
    pub warm_up: bool,
    /// Per-request deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per search or download.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Randomized throttle applied before every search request.
    #[serde(default = "default_delay_min")]
    pub delay_min_secs: f64,
    #[serde(default = "default_delay_max")]
    pub delay_max_secs: f64,
    /// Randomized pause between failed attempts.
    #[serde(default = "default_retry_delay_min")]
    pub retry_delay_min_secs: f64,
    #[serde(default = "default_retry_delay_max")]
    pub retry_delay_max_secs: f64,
    /// Pause between consecutive downloads of a batch.
    #[serde(default = "default_download_interval")]
    pub download_interval_secs: f64,
    #[serde(default)]
    pub proxy: Option<String>,
    /// User agents to rotate through; the first is used when rotation is off.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

fn default_base_url() -> String {
    "https://esaj.tjsp.jus.br".to_string()
}
fn default_search_path() -> String {
    "/cjsg/resultadoCompleta.do".to_string()
}
fn default_warm_up_path() -> String {
    "/cjsg/consultaCompleta.do".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_delay_min() -> f64 {
    3.0
}
fn default_delay_max() -> f64 {
    7.0
}
fn default_retry_delay_min() -> f64 {
    5.0
}
fn default_retry_delay_max() -> f64 {
    10.0
}
fn default_download_interval() -> f64 {
    2.0
}
fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string(),
    ]
}
fn default_accept_language() -> String {
    "pt-BR,pt;q=0.9,en;q=0.8".to_string()
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_path: default_search_path(),
            warm_up_path: default_warm_up_path(),
            warm_up: false,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            delay_min_secs: default_delay_min(),
            delay_max_secs: default_delay_max(),
            retry_delay_min_secs: default_retry_delay_min(),
            retry_delay_max_secs: default_retry_delay_max(),
            download_interval_secs: default_download_interval(),
            proxy: None,
            user_agents: default_user_agents(),
            accept_language: default_accept_language(),
        }
    }
}

impl PortalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Same settings with every deliberate delay set to zero.
    ///
    /// Intended for tests and local mirrors; never point this at the real
    /// portal.
    pub fn without_delays(mut self) -> Self {
        self.delay_min_secs = 0.0;
        self.delay_max_secs = 0.0;
        self.retry_delay_min_secs = 0.0;
        self.retry_delay_max_secs = 0.0;
        self.download_interval_secs = 0.0;
        self
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data/raw_pdfs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// JSON snapshot file or a directory of `.txt` files.
    #[serde(default = "default_corpus_path")]
    pub corpus_path: PathBuf,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunking applied to directory corpora.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("data/simple_rag/processed_data.json")
}
fn default_top_k() -> usize {
    5
}
fn default_chunk_chars() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            top_k: default_top_k(),
            chunk_chars: default_chunk_chars(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embed_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embed_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        let p = &self.portal;
        if p.max_retries == 0 {
            bail!("portal.max_retries must be >= 1");
        }
        if p.timeout_secs == 0 {
            bail!("portal.timeout_secs must be > 0");
        }
        for (name, value) in [
            ("delay_min_secs", p.delay_min_secs),
            ("delay_max_secs", p.delay_max_secs),
            ("retry_delay_min_secs", p.retry_delay_min_secs),
            ("retry_delay_max_secs", p.retry_delay_max_secs),
            ("download_interval_secs", p.download_interval_secs),
        ] {
            if !value.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&value) {
                bail!("portal.{name} must be between 0 and {MAX_DELAY_SECS}, got {value}");
            }
        }
        for (name, lo, hi) in [
            ("delay", p.delay_min_secs, p.delay_max_secs),
            ("retry_delay", p.retry_delay_min_secs, p.retry_delay_max_secs),
        ] {
            if hi < lo {
                bail!("portal.{name}_min_secs must be <= portal.{name}_max_secs");
            }
        }
        if p.user_agents.is_empty() {
            bail!("portal.user_agents must list at least one user agent");
        }
        reqwest::Url::parse(&p.base_url)
            .with_context(|| format!("portal.base_url is not a valid URL: {}", p.base_url))?;

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.chunk_chars == 0 {
            bail!("retrieval.chunk_chars must be > 0");
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_chars {
            bail!("retrieval.chunk_overlap must be smaller than retrieval.chunk_chars");
        }

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" | "local" => {}
            "openai" | "ollama" => {
                if e.model.is_none() {
                    bail!("embedding.model must be specified when provider is '{}'", e.provider);
                }
                if e.dims.is_none() || e.dims == Some(0) {
                    bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }
        if e.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
