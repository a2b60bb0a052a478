//! Configuration types.
//!
//! Every section is optional in the file; accessors fill in defaults so a
//! missing file behaves the same as an empty one.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default data directory, relative to the project directory.
pub const DEFAULT_DATA_DIR: &str = ".plangraph";

/// Default number of records embedded per batch during startup sync.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Root configuration.
///
/// ```toml
/// data_dir = ".plangraph"
///
/// [search]
/// enabled = true
/// batch_size = 32
///
/// [embedding]
/// provider = "hash"
/// dimensions = 384
///
/// [logging]
/// filter = "plangraph=info,warn"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlangraphConfig {
    /// Where collections live. Relative paths resolve against the project dir.
    pub data_dir: Option<PathBuf>,
    pub search: Option<SearchConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub logging: Option<LoggingConfig>,
}

impl PlangraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: PlangraphConfig) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.search.is_some() {
            self.search = other.search;
        }
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn search(&self) -> SearchConfig {
        self.search.clone().unwrap_or_default()
    }

    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

/// `[search]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    /// Records embedded per batch during startup sync.
    pub batch_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// `[embedding]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    /// Output embedding dimensions. Default depends on provider.
    pub dimensions: Option<usize>,
    /// Vector-space version override. Changing it re-embeds everything.
    pub model_version: Option<u32>,
    pub openai: Option<EmbeddingOpenAiConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            dimensions: None,
            model_version: None,
            openai: None,
        }
    }
}

impl EmbeddingConfig {
    /// API key from config, falling back to `OPENAI_API_KEY`.
    pub fn openai_api_key(&self) -> Option<String> {
        self.openai
            .as_ref()
            .and_then(|o| o.api_key.clone())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

/// Which embedding provider to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Zero vectors; search returns arbitrary order.
    Null,
    /// Deterministic offline hashing embedder.
    #[default]
    Hash,
    /// OpenAI-compatible embeddings API.
    #[serde(rename = "openai")]
    OpenAi,
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Hash => "hash",
            Self::OpenAi => "openai",
        }
    }
}

/// `[embedding.openai]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOpenAiConfig {
    pub model: String,
    /// Custom base URL (for proxies and compatible servers).
    pub base_url: Option<String>,
    /// API key (prefer the `OPENAI_API_KEY` env var).
    pub api_key: Option<String>,
}

impl Default for EmbeddingOpenAiConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Optional daily-rotated JSON log file.
    pub json_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "plangraph=info,warn".to_string(),
            json_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_defaults() {
        let config = PlangraphConfig::from_toml("").unwrap();
        assert_eq!(config.data_dir(), PathBuf::from(".plangraph"));
        assert!(config.search().enabled);
        assert_eq!(config.search().batch_size, 32);
        assert_eq!(config.embedding().provider, EmbeddingProviderKind::Hash);
        assert_eq!(config.logging().filter, "plangraph=info,warn");
    }

    #[test]
    fn test_full_config() {
        let config = PlangraphConfig::from_toml(
            r#"
data_dir = "state"

[search]
enabled = false
batch_size = 8

[embedding]
provider = "openai"
dimensions = 256
model_version = 3

[embedding.openai]
model = "text-embedding-3-large"
base_url = "http://localhost:8080/v1"
api_key = "sk-test"

[logging]
filter = "debug"
json_file = "logs/plangraph.log"
"#,
        )
        .unwrap();

        assert_eq!(config.data_dir(), PathBuf::from("state"));
        assert!(!config.search().enabled);
        assert_eq!(config.search().batch_size, 8);

        let embedding = config.embedding();
        assert_eq!(embedding.provider, EmbeddingProviderKind::OpenAi);
        assert_eq!(embedding.dimensions, Some(256));
        assert_eq!(embedding.model_version, Some(3));
        assert_eq!(embedding.openai_api_key().as_deref(), Some("sk-test"));
        assert_eq!(
            embedding.openai.as_ref().unwrap().model,
            "text-embedding-3-large"
        );

        assert_eq!(
            config.logging().json_file,
            Some(PathBuf::from("logs/plangraph.log"))
        );
    }

    #[test]
    fn test_provider_names() {
        for (name, kind) in [
            ("null", EmbeddingProviderKind::Null),
            ("hash", EmbeddingProviderKind::Hash),
            ("openai", EmbeddingProviderKind::OpenAi),
        ] {
            let config =
                PlangraphConfig::from_toml(&format!("[embedding]\nprovider = \"{name}\"")).unwrap();
            assert_eq!(config.embedding().provider, kind);
            assert_eq!(kind.as_str(), name);
        }
        assert!(PlangraphConfig::from_toml("[embedding]\nprovider = \"onnx\"").is_err());
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base = PlangraphConfig::from_toml(
            "data_dir = \"a\"\n[search]\nbatch_size = 4\n[logging]\nfilter = \"warn\"",
        )
        .unwrap();
        let over = PlangraphConfig::from_toml("[search]\nenabled = false").unwrap();
        base.merge(over);

        assert_eq!(base.data_dir(), PathBuf::from("a"));
        assert!(!base.search().enabled);
        // Sections replace wholesale.
        assert_eq!(base.search().batch_size, 32);
        assert_eq!(base.logging().filter, "warn");
    }
}
