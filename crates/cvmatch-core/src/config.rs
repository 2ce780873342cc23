use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MatchError, Result};

macro_rules! selection_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self { $($name::$variant => $text),+ }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }

        impl FromStr for $name {
            type Err = MatchError;

            fn from_str(s: &str) -> Result<Self> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| {
                        let known: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        MatchError::InvalidConfig(format!(
                            "unknown {} '{}', expected one of: {}",
                            stringify!($name), s, known.join(", ")
                        ))
                    })
            }
        }
    };
}

selection_enum!(
    /// Embedding model variant (axis 1).
    EmbeddingModelKind {
        MiniLm => "mini_lm",
        BgeM3 => "bge_m3",
        Hashed => "hashed",
    }
);

selection_enum!(
    /// Generative model variant (axis 2).
    GenerativeModelKind {
        ClaudeHaiku => "claude_haiku",
        ClaudeSonnet => "claude_sonnet",
        LocalTinyLlama => "local_tiny_llama",
        LocalLlama2Chat => "local_llama2_chat",
    }
);

selection_enum!(
    /// Retrieval backend (axis 3).
    RetrievalBackend {
        Exact => "exact",
        Approximate => "approximate",
    }
);

selection_enum!(
    /// Prompt template version (axis 4).
    PromptVersion {
        V1 => "v1",
        V2 => "v2",
    }
);

impl EmbeddingModelKind {
    /// Output dimension of the variant. Query and stored vectors must agree.
    pub fn dimension(self) -> usize {
        match self {
            EmbeddingModelKind::MiniLm => 384,
            EmbeddingModelKind::BgeM3 => 1024,
            EmbeddingModelKind::Hashed => 512,
        }
    }
}

/// The four independent axes that compose a pipeline. Any combination is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineSelection {
    pub embedding_model: EmbeddingModelKind,
    pub generative_model: GenerativeModelKind,
    pub retrieval_backend: RetrievalBackend,
    pub prompt_version: PromptVersion,
}

impl Default for PipelineSelection {
    fn default() -> Self {
        Self {
            embedding_model: EmbeddingModelKind::MiniLm,
            generative_model: GenerativeModelKind::LocalTinyLlama,
            retrieval_backend: RetrievalBackend::Approximate,
            prompt_version: PromptVersion::V1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Applied before top-K truncation when set.
    pub min_score: Option<f32>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 3, min_score: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub enabled: bool,
    pub window_size: usize,
    pub stride: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { enabled: true, window_size: 5, stride: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub timeout_secs: f64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub api_key_env: String,
    pub local_base_url: String,
}

impl GenerationSettings {
    pub fn timeout(&self) -> Result<Duration> {
        if self.timeout_secs <= 0.0 {
            return Err(MatchError::InvalidConfig("generation.timeout_secs must be positive".into()));
        }
        Duration::try_from_secs_f64(self.timeout_secs).map_err(|e| {
            MatchError::InvalidConfig(format!("generation.timeout_secs ({}) is not a usable duration: {e}", self.timeout_secs))
        })
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 120.0,
            max_tokens: 512,
            temperature: 0.2,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            local_base_url: "http://127.0.0.1:8080/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub lancedb_dir: String,
    pub table_prefix: String,
    /// Rows required before an IVF-PQ index is trained; below this the store scans.
    pub ann_min_rows: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { lancedb_dir: "~/.cvmatch/lancedb".to_string(), table_prefix: "candidates".to_string(), ann_min_rows: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Root holding one sub-directory per embedding variant (`mini_lm/`, `bge_m3/`).
    pub model_dir: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self { model_dir: "models".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Typed view of the merged configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    pub pipeline: PipelineSelection,
    pub retrieval: RetrievalSettings,
    pub chunking: ChunkingSettings,
    pub generation: GenerationSettings,
    pub store: StoreSettings,
    pub models: ModelSettings,
    pub log: LogSettings,
}

impl MatchSettings {
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(MatchError::InvalidConfig("retrieval.top_k must be at least 1".into()));
        }
        if self.chunking.window_size == 0 || self.chunking.stride == 0 {
            return Err(MatchError::InvalidConfig("chunking.window_size and chunking.stride must be positive".into()));
        }
        if self.chunking.stride > self.chunking.window_size {
            return Err(MatchError::InvalidConfig(format!(
                "chunking.stride ({}) must be <= chunking.window_size ({})",
                self.chunking.stride, self.chunking.window_size
            )));
        }
        self.generation.timeout()?;
        Ok(())
    }

    pub fn lancedb_path(&self) -> PathBuf {
        expand_path(&self.store.lancedb_dir)
    }

    pub fn model_root(&self) -> PathBuf {
        expand_path(&self.models.model_dir)
    }
}

/// Layered configuration source.
///
/// Merges defaults, `cvmatch.toml`, `cvmatch.<env>.toml` (env from `RUST_ENV`)
/// and `CVMATCH_*` environment variables (`__` separates nested keys).
pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(MatchSettings::default()))
            .merge(Toml::file(dir.join("cvmatch.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("cvmatch.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("cvmatch.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("cvmatch.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("CVMATCH_").split("__"));

        Ok(Self { figment })
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| MatchError::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    pub fn settings(&self) -> Result<MatchSettings> {
        let settings: MatchSettings = self
            .figment
            .extract()
            .map_err(|e| MatchError::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Mutable "current configuration" cell.
///
/// Setters take effect at the start of the next run; a run reads one snapshot.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<MatchSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: MatchSettings) -> Self {
        Self { inner: Arc::new(RwLock::new(settings)) }
    }

    pub fn snapshot(&self) -> MatchSettings {
        self.inner.read().clone()
    }

    pub fn replace(&self, settings: MatchSettings) {
        *self.inner.write() = settings;
    }

    pub fn set_embedding_model(&self, kind: EmbeddingModelKind) {
        self.inner.write().pipeline.embedding_model = kind;
    }

    pub fn set_generative_model(&self, kind: GenerativeModelKind) {
        self.inner.write().pipeline.generative_model = kind;
    }

    pub fn set_retrieval_backend(&self, backend: RetrievalBackend) {
        self.inner.write().pipeline.retrieval_backend = backend;
    }

    pub fn set_prompt_version(&self, version: PromptVersion) {
        self.inner.write().pipeline.prompt_version = version;
    }

    pub fn set_top_k(&self, top_k: usize) {
        self.inner.write().retrieval.top_k = top_k;
    }

    pub fn set_min_score(&self, min_score: Option<f32>) {
        self.inner.write().retrieval.min_score = min_score;
    }

    pub fn set_generation_timeout(&self, timeout: Duration) {
        self.inner.write().generation.timeout_secs = timeout.as_secs_f64();
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
