//! Orchestrator configuration.
//!
//! All types deserialize with per-field defaults so a partial JSON config
//! works; `OrchestratorConfig::from_json` parses and validates in one step.
//! Validation failures are `PolicyError`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaxError};

/// Which retrieval channels a recall consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchModeKind {
    TextOnly,
    VectorOnly,
    Hybrid,
}

/// Search mode plus the hybrid mixing knob. `alpha` is validated to
/// `0.0..=1.0` and carried for forward compatibility; fusion itself is
/// unweighted reciprocal-rank fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchMode {
    pub kind: SearchModeKind,
    pub alpha: f32,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self {
            kind: SearchModeKind::TextOnly,
            alpha: 0.5,
        }
    }
}

/// Vector backend selection hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VectorEnginePreference {
    Auto,
    MetalPreferred,
    CpuOnly,
}

impl Default for VectorEnginePreference {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Total token budget of a recall context.
    pub max_context_tokens: i64,
    /// Per-item budget for an item surfaced in full.
    pub expansion_max_tokens: i64,
    /// Per-item budget for a clipped snippet.
    pub snippet_max_tokens: i64,
    /// Ceiling on the number of context items.
    pub max_snippets: i64,
    /// Candidates pulled per retrieval channel.
    pub search_top_k: i64,
    pub search_mode: SearchMode,
    /// Reciprocal-rank-fusion constant.
    pub rrf_k: i64,
    /// Snippet preview byte clamp.
    pub preview_max_bytes: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 1500,
            expansion_max_tokens: 600,
            snippet_max_tokens: 200,
            max_snippets: 24,
            search_top_k: 24,
            search_mode: SearchMode {
                kind: SearchModeKind::Hybrid,
                alpha: 0.5,
            },
            rrf_k: 60,
            preview_max_bytes: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 400,
            overlap_tokens: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub enable_text_search: bool,
    pub enable_vector_search: bool,
    pub rag: RagConfig,
    pub chunking: ChunkingConfig,
    /// Parallelism hint for embedding calls during ingest. State mutation
    /// stays serialized regardless.
    pub ingest_concurrency: usize,
    /// Chunk group size per `embed_batch` call.
    pub ingest_batch_size: usize,
    /// Capacity of the recall-time query-embedding LRU. Zero disables.
    pub embedding_cache_capacity: usize,
    pub use_metal_vector_search: bool,
    pub require_on_device_providers: bool,
    pub vector_preference: VectorEnginePreference,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_text_search: true,
            enable_vector_search: true,
            rag: RagConfig::default(),
            chunking: ChunkingConfig::default(),
            ingest_concurrency: 1,
            ingest_batch_size: 32,
            embedding_cache_capacity: 2048,
            use_metal_vector_search: true,
            require_on_device_providers: true,
            vector_preference: VectorEnginePreference::Auto,
        }
    }
}

impl OrchestratorConfig {
    /// Parse a JSON config (missing fields take defaults) and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| WaxError::policy(format!("config parse failed: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation: mode/channel pairing, chunk geometry, batch
    /// sizing. Embedder-dependent checks happen at orchestrator
    /// construction.
    pub fn validate(&self) -> Result<()> {
        match self.rag.search_mode.kind {
            SearchModeKind::TextOnly => {
                if !self.enable_text_search {
                    return Err(WaxError::policy(
                        "text-only mode requires text search to be enabled",
                    ));
                }
            }
            SearchModeKind::VectorOnly => {
                if !self.enable_vector_search {
                    return Err(WaxError::policy(
                        "vector-only mode requires vector search to be enabled",
                    ));
                }
            }
            SearchModeKind::Hybrid => {
                if !self.enable_text_search && !self.enable_vector_search {
                    return Err(WaxError::policy(
                        "hybrid mode requires at least one enabled channel",
                    ));
                }
            }
        }
        let alpha = self.rag.search_mode.alpha;
        if !(0.0..=1.0).contains(&alpha) || alpha.is_nan() {
            return Err(WaxError::policy("search mode alpha must be within 0..=1"));
        }
        if self.rag.rrf_k < 1 {
            return Err(WaxError::policy("rrf_k must be positive"));
        }
        if self.chunking.target_tokens == 0 {
            return Err(WaxError::policy("chunking target_tokens must be positive"));
        }
        if self.chunking.overlap_tokens >= self.chunking.target_tokens {
            return Err(WaxError::policy(
                "chunking overlap_tokens must be smaller than target_tokens",
            ));
        }
        if self.ingest_batch_size == 0 {
            return Err(WaxError::policy("ingest_batch_size must be positive"));
        }
        if self.ingest_concurrency == 0 {
            return Err(WaxError::policy("ingest_concurrency must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config = OrchestratorConfig::from_json(
            r#"{"enable_vector_search": false, "rag": {"search_top_k": 5}}"#,
        )
        .unwrap();
        assert!(!config.enable_vector_search);
        assert_eq!(config.rag.search_top_k, 5);
        assert_eq!(config.rag.rrf_k, 60);
        assert_eq!(config.chunking.target_tokens, 400);
    }

    #[test]
    fn mode_channel_pairings_validated() {
        let mut config = OrchestratorConfig {
            enable_text_search: false,
            ..OrchestratorConfig::default()
        };
        config.rag.search_mode.kind = SearchModeKind::TextOnly;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig {
            enable_vector_search: false,
            ..OrchestratorConfig::default()
        };
        config.rag.search_mode.kind = SearchModeKind::VectorOnly;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig {
            enable_text_search: false,
            enable_vector_search: false,
            ..OrchestratorConfig::default()
        };
        config.rag.search_mode.kind = SearchModeKind::Hybrid;
        assert!(config.validate().is_err());
    }

    #[test]
    fn chunking_geometry_validated() {
        let mut config = OrchestratorConfig::default();
        config.chunking.target_tokens = 10;
        config.chunking.overlap_tokens = 10;
        assert!(config.validate().is_err());
        config.chunking.overlap_tokens = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_json_is_policy_error() {
        let err = OrchestratorConfig::from_json("{nope").unwrap_err();
        assert!(matches!(err, WaxError::Policy(_)));
    }
}
