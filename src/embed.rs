//! Embedding capability.
//!
//! The orchestrator talks to embedding models through this narrow contract
//! so providers plug in without the engine knowing their runtime. A
//! provider that declares `normalize()` is responsible for returning
//! already-normalized vectors.

use crate::error::Result;

/// Provider self-description, surfaced for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddingIdentity {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub dimensions: Option<u32>,
    pub normalized: Option<bool>,
}

pub trait Embedder: Send + Sync {
    /// Output dimensionality. Must be positive and constant.
    fn dimensions(&self) -> u32;

    /// Whether returned vectors are unit-normalized by the provider.
    fn normalize(&self) -> bool;

    fn identity(&self) -> Option<EmbeddingIdentity>;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embedding. Providers with native batching override this; the
    /// default loops over `embed`.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}
