//! Configuration management.
//!
//! [`MemoryConfig`] is assembled from defaults, an optional TOML file and
//! `GROMOZEKA_MEMORY_*` environment overrides, in that order.
//!
//! # Environment Variables
//!
//! | Variable | Type | Default | Description |
//! |----------|------|---------|-------------|
//! | `GROMOZEKA_MEMORY_VECTOR_ENABLED` | bool | `true` | Enable vector memory sync |
//! | `GROMOZEKA_MEMORY_LLM_TIMEOUT_SECS` | u64 | `30` | Budget for one resolution LLM call |
//! | `GROMOZEKA_MEMORY_CANDIDATE_DISTANCE` | usize | `3` | Edit distance for candidate lookup |
//! | `GROMOZEKA_MEMORY_FUZZY_DISTANCE` | usize | `1` | Edit distance for FUZZY matches |
//! | `GROMOZEKA_MEMORY_KEYWORD_WEIGHT` | f32 | `0.5` | Keyword weight in hybrid fusion |
//! | `GROMOZEKA_MEMORY_SEMANTIC_WEIGHT` | f32 | `0.5` | Semantic weight in hybrid fusion |
//! | `GROMOZEKA_MEMORY_CANDIDATE_POOL` | usize | `500` | Candidates ranked per search, whatever the page |
//! | `GROMOZEKA_MEMORY_LOG` | filter | `info` | Log filter directive |
//! | `GROMOZEKA_MEMORY_LOG_FORMAT` | `json`/`pretty` | `pretty` | Log output format |

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the memory engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryConfig {
    /// Entity resolution tuning.
    pub resolution: ResolutionConfig,
    /// Hybrid search tuning.
    pub search: SearchConfig,
    /// Vector memory synchronization.
    pub vector_memory: VectorMemoryConfig,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Entity resolution tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionConfig {
    /// Levenshtein distance used when collecting candidates from the store.
    pub candidate_max_distance: usize,
    /// Levenshtein distance between fuzzy keys accepted as a FUZZY match.
    pub fuzzy_max_distance: usize,
    /// Minimum fuzzy-key length before edit-distance matching applies.
    pub fuzzy_min_length: usize,
    /// Budget for the single LLM reconciliation call.
    pub llm_timeout: Duration,
    /// Maximum candidates returned by the store lookup.
    pub candidate_limit: usize,
    /// Whether new entities get an LLM-written summary.
    pub summarize_entities: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            candidate_max_distance: 3,
            fuzzy_max_distance: 1,
            fuzzy_min_length: 6,
            llm_timeout: Duration::from_secs(30),
            candidate_limit: 50,
            summarize_entities: true,
        }
    }
}

/// Hybrid search tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Weight of the normalized keyword score.
    pub keyword_weight: f32,
    /// Weight of the normalized semantic score.
    pub semantic_weight: f32,
    /// Characters of context on each side of a highlight.
    pub highlight_context_chars: usize,
    /// Maximum highlights per result.
    pub max_highlights: usize,
    /// Candidates fetched and normalized per search, independent of the
    /// requested page. Pages that end within the pool rank consistently.
    pub candidate_pool: usize,
}

impl SearchConfig {
    /// Returns `(keyword, semantic)` weights scaled to sum to one.
    ///
    /// Negative or non-finite weights count as zero; if both are zero the
    /// split is even.
    #[must_use]
    pub fn normalized_weights(&self) -> (f32, f32) {
        let clean = |w: f32| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let (k, s) = (clean(self.keyword_weight), clean(self.semantic_weight));
        let total = k + s;
        if total <= f32::EPSILON {
            (0.5, 0.5)
        } else {
            (k / total, s / total)
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.5,
            semantic_weight: 0.5,
            highlight_context_chars: 40,
            max_highlights: 3,
            candidate_pool: 500,
        }
    }
}

/// Vector memory synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorMemoryConfig {
    /// When false, every synchronizer operation is a silent no-op.
    pub enabled: bool,
}

impl Default for VectorMemoryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging settings read from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `gromozeka_memory=debug`.
    pub filter: Option<String>,
    /// `json` or `pretty`.
    pub format: Option<String>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Resolution section.
    pub resolution: Option<ConfigFileResolution>,
    /// Search section.
    pub search: Option<ConfigFileSearch>,
    /// Vector memory section.
    pub vector_memory: Option<ConfigFileVectorMemory>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// Resolution section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileResolution {
    /// Candidate lookup distance.
    pub candidate_max_distance: Option<usize>,
    /// FUZZY match distance.
    pub fuzzy_max_distance: Option<usize>,
    /// FUZZY minimum key length.
    pub fuzzy_min_length: Option<usize>,
    /// LLM timeout in seconds.
    pub llm_timeout_secs: Option<u64>,
    /// Candidate limit.
    pub candidate_limit: Option<usize>,
    /// Summarize new entities.
    pub summarize_entities: Option<bool>,
}

/// Search section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSearch {
    /// Keyword weight.
    pub keyword_weight: Option<f32>,
    /// Semantic weight.
    pub semantic_weight: Option<f32>,
    /// Highlight context.
    pub highlight_context_chars: Option<usize>,
    /// Highlights per result.
    pub max_highlights: Option<usize>,
    /// Candidate pool size.
    pub candidate_pool: Option<usize>,
}

/// Vector memory section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileVectorMemory {
    /// Enabled flag.
    pub enabled: Option<bool>,
}

impl MemoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parses configuration from TOML text without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`].
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self::from_config_file(file))
    }

    /// Builds configuration from defaults and environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(resolution) = file.resolution {
            let target = &mut config.resolution;
            if let Some(v) = resolution.candidate_max_distance {
                target.candidate_max_distance = v;
            }
            if let Some(v) = resolution.fuzzy_max_distance {
                target.fuzzy_max_distance = v;
            }
            if let Some(v) = resolution.fuzzy_min_length {
                target.fuzzy_min_length = v;
            }
            if let Some(v) = resolution.llm_timeout_secs {
                target.llm_timeout = Duration::from_secs(v);
            }
            if let Some(v) = resolution.candidate_limit {
                target.candidate_limit = v;
            }
            if let Some(v) = resolution.summarize_entities {
                target.summarize_entities = v;
            }
        }
        if let Some(search) = file.search {
            if let Some(v) = search.keyword_weight {
                config.search.keyword_weight = v;
            }
            if let Some(v) = search.semantic_weight {
                config.search.semantic_weight = v;
            }
            if let Some(v) = search.highlight_context_chars {
                config.search.highlight_context_chars = v;
            }
            if let Some(v) = search.max_highlights {
                config.search.max_highlights = v;
            }
            if let Some(v) = search.candidate_pool {
                config.search.candidate_pool = v;
            }
        }
        if let Some(v) = file.vector_memory.and_then(|vm| vm.enabled) {
            config.vector_memory.enabled = v;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        config
    }

    /// Applies `GROMOZEKA_MEMORY_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = parse_bool_env("GROMOZEKA_MEMORY_VECTOR_ENABLED") {
            self.vector_memory.enabled = v;
        }
        if let Some(v) = parse_env("GROMOZEKA_MEMORY_LLM_TIMEOUT_SECS") {
            self.resolution.llm_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_env("GROMOZEKA_MEMORY_CANDIDATE_DISTANCE") {
            self.resolution.candidate_max_distance = v;
        }
        if let Some(v) = parse_env("GROMOZEKA_MEMORY_FUZZY_DISTANCE") {
            self.resolution.fuzzy_max_distance = v;
        }
        if let Some(v) = parse_env("GROMOZEKA_MEMORY_KEYWORD_WEIGHT") {
            self.search.keyword_weight = v;
        }
        if let Some(v) = parse_env("GROMOZEKA_MEMORY_SEMANTIC_WEIGHT") {
            self.search.semantic_weight = v;
        }
        if let Some(v) = parse_env("GROMOZEKA_MEMORY_CANDIDATE_POOL") {
            self.search.candidate_pool = v;
        }
        if let Ok(v) = std::env::var("GROMOZEKA_MEMORY_LOG") {
            self.logging.filter = Some(v);
        }
        if let Ok(v) = std::env::var("GROMOZEKA_MEMORY_LOG_FORMAT") {
            self.logging.format = Some(v);
        }
    }
}

/// Parses a boolean env var: `0`/`false`/`no`/`off` are false, any other value true.
fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        !matches!(
            v.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        )
    })
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.resolution.candidate_max_distance, 3);
        assert_eq!(config.resolution.fuzzy_max_distance, 1);
        assert_eq!(config.resolution.llm_timeout, Duration::from_secs(30));
        assert!(config.vector_memory.enabled);
        assert_eq!(config.search.normalized_weights(), (0.5, 0.5));
    }

    #[test]
    fn test_from_toml() {
        let config = MemoryConfig::from_toml(
            r#"
            [resolution]
            fuzzy_min_length = 4
            llm_timeout_secs = 5

            [search]
            keyword_weight = 3.0
            semantic_weight = 1.0
            candidate_pool = 50

            [vector_memory]
            enabled = false

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.resolution.fuzzy_min_length, 4);
        assert_eq!(config.resolution.llm_timeout, Duration::from_secs(5));
        assert_eq!(config.resolution.candidate_max_distance, 3);
        assert_eq!(config.search.normalized_weights(), (0.75, 0.25));
        assert_eq!(config.search.candidate_pool, 50);
        assert!(!config.vector_memory.enabled);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(MemoryConfig::from_toml("[search\nkeyword_weight = ").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.toml");
        std::fs::write(&path, "[resolution]\ncandidate_limit = 7\n").unwrap();

        let config = MemoryConfig::load_from_file(&path).unwrap();
        assert_eq!(config.resolution.candidate_limit, 7);
    }

    #[test]
    fn test_degenerate_weights() {
        let config = SearchConfig {
            keyword_weight: -1.0,
            semantic_weight: f32::NAN,
            ..SearchConfig::default()
        };
        assert_eq!(config.normalized_weights(), (0.5, 0.5));

        let semantic_only = SearchConfig {
            keyword_weight: 0.0,
            semantic_weight: 2.0,
            ..SearchConfig::default()
        };
        assert_eq!(semantic_only.normalized_weights(), (0.0, 1.0));
    }
}
