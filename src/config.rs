use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub persona: PersonaConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonaConfig {
    /// Name of the default persona used when a user has no override.
    pub default: String,
    /// Optional extra system-prompt text for the default persona.
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-oss:20b".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContentConfig {
    /// URLs to ingest — documentation pages, blogs.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Local directories to ingest. `~/`-prefixed entries expand to the
    /// user's home directory; relative entries resolve against the working
    /// directory.
    #[serde(default)]
    pub directories: Vec<String>,
    /// YAML file declaring additional retrieval references
    /// (repositories, API surfaces).
    #[serde(default)]
    pub references_file: Option<PathBuf>,
    /// Run a full reference reload before serving.
    #[serde(default)]
    pub reload_on_startup: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// URIs containing any of these substrings are always re-fetched and
    /// re-ingested.
    #[serde(default = "default_volatile_patterns")]
    pub volatile_patterns: Vec<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            volatile_patterns: default_volatile_patterns(),
        }
    }
}

fn default_volatile_patterns() -> Vec<String> {
    vec!["-SNAPSHOT".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2800
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_wait_millis")]
    pub max_wait_millis: u64,
    /// Enable hypothetical-document query rewriting (dual-pass retrieval).
    #[serde(default)]
    pub hyde: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            max_wait_millis: default_max_wait_millis(),
            hyde: false,
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_similarity_threshold() -> f64 {
    0.0
}
fn default_max_wait_millis() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    /// Prepended to every exported tool name.
    #[serde(default)]
    pub prefix: String,
    /// Tool groups enabled for chat turns (e.g. "web").
    #[serde(default)]
    pub groups: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.persona.default.trim().is_empty() {
        anyhow::bail!("persona.default must not be blank");
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.refresh.volatile_patterns.iter().any(|p| p.is_empty()) {
        anyhow::bail!("refresh.volatile_patterns must not contain empty patterns");
    }

    Ok(config)
}

/// Resolve a configured path against the user's home directory and the
/// process working directory. `~` and `~/...` expand to the home directory,
/// absolute paths pass through, everything else resolves against `cwd`.
pub fn resolve_path(input: &str, home: &Path, cwd: &Path) -> PathBuf {
    if input == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = input.strip_prefix("~/") {
        return home.join(rest);
    }
    let path = Path::new(input);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// [`resolve_path`] using the real home directory and working directory.
pub fn resolve_path_here(input: &str) -> PathBuf {
    let home = directories::UserDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_path(input, &home, &cwd)
}
