//! Memory orchestrator.
//!
//! Binds the store, the text/vector engines and the structured-memory map
//! behind one ingest/recall surface. Mutations are staged per subsystem
//! and published together: `flush` first commits the store (frames, WAL
//! checkpoint, embedding journal, memory segment — one atomic TOC/footer/
//! header publication), then promotes the staged engine state. A failed
//! flush leaves every subsystem exactly as before.

pub mod chunk;
pub mod config;
pub mod context;
pub mod recall;

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use rayon::prelude::*;

use crate::embed::Embedder;
use crate::error::{Result, WaxError};
use crate::format::mv2v::VecSimilarity;
use crate::format::toc::SegmentKind;
use crate::store::{Metadata, WaxStore};
use crate::structured::{encode_memory_segment, StructuredMemoryEntry, StructuredMemoryStore};
use crate::text::{tokenize, InvertedTextEngine, TextBackend};
use crate::vector::{DenseVectorEngine, VectorBackend};

pub use config::{
    ChunkingConfig, OrchestratorConfig, RagConfig, SearchMode, SearchModeKind,
    VectorEnginePreference,
};
pub use context::{RagContext, RagItem, RagItemKind};
pub use recall::{SearchResult, SearchSource};

use config::SearchModeKind as Mode;
use recall::StructuredCandidate;

/// Structured-memory rows are indexed under ids above this base so they
/// can never collide with content frame ids.
pub const STRUCTURED_ID_BASE: u64 = 1 << 63;

pub struct MemoryOrchestrator {
    config: OrchestratorConfig,
    store: WaxStore,
    embedder: Option<Arc<dyn Embedder>>,
    text: Box<dyn TextBackend + Send>,
    vector: Option<Box<dyn VectorBackend + Send>>,
    facts: StructuredMemoryStore,
    embed_cache: Option<LruCache<String, Vec<f32>>>,
    closed: bool,
}

impl std::fmt::Debug for MemoryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryOrchestrator")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("embedder", &self.embedder.as_ref().map(|_| "<embedder>"))
            .field("text", &"<text backend>")
            .field("vector", &self.vector.as_ref().map(|_| "<vector backend>"))
            .field("facts", &self.facts)
            .field("embed_cache", &self.embed_cache.as_ref().map(|c| c.len()))
            .field("closed", &self.closed)
            .finish()
    }
}

fn render_fact(entry: &StructuredMemoryEntry) -> String {
    format!("{} {} {}", entry.entity, entry.attribute, entry.value)
}

/// All preferences currently resolve to the in-process dense engine; the
/// knobs select among backends when more than one is linked in.
fn build_vector_engine(
    _preference: VectorEnginePreference,
    dimensions: u32,
) -> Result<Box<dyn VectorBackend + Send>> {
    Ok(Box::new(DenseVectorEngine::new(
        dimensions,
        VecSimilarity::Cosine,
    )?))
}

impl MemoryOrchestrator {
    /// Open (or create) the store at `path` and rebuild the engines from
    /// its committed state. `embedder` is required whenever vector search
    /// is enabled.
    pub fn new(
        path: impl AsRef<Path>,
        config: OrchestratorConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        config.validate()?;
        let vector_embedder = if config.enable_vector_search {
            let Some(embedder) = embedder.clone() else {
                return Err(WaxError::policy("vector search enabled requires an embedder"));
            };
            if embedder.dimensions() == 0 {
                return Err(WaxError::policy("embedder dimensions must be positive"));
            }
            Some(embedder)
        } else {
            None
        };

        let path = path.as_ref();
        let mut store = if path.exists() {
            WaxStore::open(path, true)?
        } else {
            WaxStore::create(path)?
        };

        // Rebuild the lexical index from committed live frames.
        let mut text = Box::new(InvertedTextEngine::new());
        let live_ids = store.live_frame_ids();
        for frame_id in live_ids {
            let content = store.frame_content(frame_id)?;
            if content.is_empty() {
                continue;
            }
            text.index(frame_id, &String::from_utf8_lossy(&content));
        }

        // Rebuild structured memory from its committed segment and index
        // the rendered rows under the reserved id space.
        let facts = match store.aux_segment(SegmentKind::Memory) {
            Some(bytes) => StructuredMemoryStore::from_segment_bytes(bytes)?,
            None => StructuredMemoryStore::new(),
        };
        for entry in facts.all(-1) {
            text.index(STRUCTURED_ID_BASE + entry.id, &render_fact(&entry));
        }

        // Rebuild the vector engine from the persisted embedding journal;
        // no re-embedding happens on reopen.
        let vector = if let Some(embedder) = vector_embedder {
            let mut engine = build_vector_engine(config.vector_preference, embedder.dimensions())?;
            if let Some((_, first)) = store.embeddings().iter().next() {
                if first.len() as u32 != embedder.dimensions() {
                    return Err(WaxError::policy(
                        "embedder dimensions do not match persisted embeddings",
                    ));
                }
            }
            for (frame_id, values) in store.embeddings().clone() {
                engine.add(frame_id, &values)?;
            }
            store.set_embedding_similarity(engine.similarity());
            Some(engine)
        } else {
            None
        };

        let embed_cache = NonZeroUsize::new(config.embedding_cache_capacity).map(LruCache::new);

        Ok(Self {
            config,
            store,
            embedder,
            text,
            vector,
            facts,
            embed_cache,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(WaxError::store("orchestrator is closed"));
        }
        Ok(())
    }

    /// Chunk `content`, write one frame per chunk and stage text/vector
    /// index entries. Nothing becomes visible until `flush`. Returns the
    /// frame ids created.
    pub fn remember(&mut self, content: &str, metadata: &Metadata) -> Result<Vec<u64>> {
        self.ensure_open()?;
        let chunks = chunk::chunk_text(
            content,
            self.config.chunking.target_tokens,
            self.config.chunking.overlap_tokens,
        );
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk_text in &chunks {
            let frame_id = self.store.put(chunk_text.as_bytes(), metadata)?;
            self.text.stage_index(frame_id, chunk_text);
            ids.push(frame_id);
        }

        if self.vector.is_some() && !chunks.is_empty() {
            self.embed_and_stage(&ids, &chunks)?;
        }
        Ok(ids)
    }

    fn embed_and_stage(&mut self, ids: &[u64], chunks: &[String]) -> Result<()> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| WaxError::policy("vector search enabled requires an embedder"))?
            .clone();
        let dimensions = embedder.dimensions();
        let batch_size = self.config.ingest_batch_size;

        let batches: Vec<&[String]> = chunks.chunks(batch_size).collect();
        let embedded: Vec<Result<Vec<Vec<f32>>>> = if self.config.ingest_concurrency > 1 {
            batches
                .par_iter()
                .map(|batch| embedder.embed_batch(batch))
                .collect()
        } else {
            batches
                .iter()
                .map(|batch| embedder.embed_batch(batch))
                .collect()
        };

        let mut id_iter = ids.iter();
        for batch in embedded {
            for values in batch? {
                let frame_id = *id_iter
                    .next()
                    .ok_or_else(|| WaxError::policy("embedder returned too many vectors"))?;
                if values.len() as u32 != dimensions {
                    return Err(WaxError::policy("embedder returned wrong dimensions"));
                }
                let engine = self
                    .vector
                    .as_mut()
                    .ok_or_else(|| WaxError::policy("vector channel is not enabled"))?;
                engine.stage_add(frame_id, &values)?;
                self.store.put_embedding(frame_id, &values)?;
            }
        }
        if id_iter.next().is_some() {
            return Err(WaxError::policy("embedder returned too few vectors"));
        }
        Ok(())
    }

    /// Stage a structured fact and its rendered text-index row. Visible
    /// after `flush`.
    pub fn remember_fact(
        &mut self,
        entity: &str,
        attribute: &str,
        value: &str,
        metadata: &Metadata,
    ) -> Result<u64> {
        self.ensure_open()?;
        let id = self.facts.stage_upsert(entity, attribute, value, metadata)?;
        let rendered = format!("{entity} {attribute} {value}");
        self.text.stage_index(STRUCTURED_ID_BASE + id, &rendered);
        Ok(id)
    }

    /// Publish everything staged since the last flush. The store commit is
    /// the atomicity point: if it fails, no staged text/vector/fact
    /// mutation becomes visible and everything stays staged for a retry.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.facts.pending_mutation_count() > 0 {
            let (next_id, entries) = self.facts.staged_view();
            self.store
                .stage_aux_segment(SegmentKind::Memory, encode_memory_segment(next_id, &entries))?;
        }
        self.store.commit()?;
        self.text.commit_staged();
        if let Some(vector) = self.vector.as_mut() {
            vector.commit_staged();
        }
        self.facts.commit_staged();
        Ok(())
    }

    /// Recall with channel selection from the configured search mode.
    pub fn recall(&mut self, query: &str) -> Result<RagContext> {
        self.recall_inner(query, None)
    }

    /// Recall with an explicit query embedding; the embedder is not
    /// consulted. Requires the vector channel and matching dimensions.
    pub fn recall_with_embedding(&mut self, query: &str, embedding: &[f32]) -> Result<RagContext> {
        self.recall_inner(query, Some(embedding))
    }

    fn recall_inner(&mut self, query: &str, embedding: Option<&[f32]>) -> Result<RagContext> {
        self.ensure_open()?;

        if let Some(embedding) = embedding {
            if !self.config.enable_vector_search {
                return Err(WaxError::policy(
                    "explicit embedding requires vector search to be enabled",
                ));
            }
            let dimensions = self.vector.as_ref().map(|v| v.dimensions()).unwrap_or(0);
            if embedding.len() as u32 != dimensions {
                return Err(WaxError::policy("explicit embedding dimension mismatch"));
            }
        }

        let mode = self.config.rag.search_mode.kind;
        let use_text = self.config.enable_text_search && matches!(mode, Mode::TextOnly | Mode::Hybrid);
        let use_vector =
            self.config.enable_vector_search && matches!(mode, Mode::VectorOnly | Mode::Hybrid);
        let top_k = self.config.rag.search_top_k;

        let text_ranked: Vec<u64> = if use_text {
            self.text
                .search(query, top_k)
                .into_iter()
                .map(|hit| hit.frame_id)
                .filter(|frame_id| *frame_id < STRUCTURED_ID_BASE)
                .collect()
        } else {
            Vec::new()
        };

        let vector_ranked: Vec<u64> = if use_vector {
            let query_vector = match embedding {
                Some(embedding) => Some(embedding.to_vec()),
                None if !query.is_empty() => Some(self.query_embedding(query)?),
                None => None,
            };
            match (query_vector, self.vector.as_ref()) {
                (Some(query_vector), Some(engine)) => engine
                    .search(&query_vector, top_k)?
                    .into_iter()
                    .map(|(frame_id, _)| frame_id)
                    .collect(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let structured_ranked = self.structured_candidates(query, top_k);
        let mut fused = recall::fuse_candidates(
            &text_ranked,
            &vector_ranked,
            &structured_ranked,
            self.config.rag.rrf_k,
        );
        fused.truncate(top_k.max(0) as usize);
        fused.truncate(self.config.rag.max_snippets.max(0) as usize);

        // Attach frame previews; structured hits already carry their
        // rendered text.
        for result in &mut fused {
            if result.preview_text.is_none() && result.frame_id < STRUCTURED_ID_BASE {
                let content = self.store.frame_content(result.frame_id)?;
                result.preview_text = Some(String::from_utf8_lossy(&content).into_owned());
            }
        }

        Ok(context::build_context(query, &fused, &self.config.rag))
    }

    fn query_embedding(&mut self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = self.embed_cache.as_mut() {
            if let Some(cached) = cache.get(query) {
                return Ok(cached.clone());
            }
        }
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| WaxError::policy("vector search enabled requires an embedder"))?;
        let values = embedder.embed(query)?;
        if values.len() as u32 != embedder.dimensions() {
            return Err(WaxError::policy("embedder returned wrong dimensions"));
        }
        if let Some(cache) = self.embed_cache.as_mut() {
            cache.put(query.to_string(), values.clone());
        }
        Ok(values)
    }

    /// Facts whose rendered text shares at least one token with the query,
    /// ranked by matching-token count (ties keep entity/attribute/id
    /// order).
    fn structured_candidates(&self, query: &str, top_k: i64) -> Vec<StructuredCandidate> {
        if top_k <= 0 {
            return Vec::new();
        }
        let query_tokens: std::collections::BTreeSet<String> =
            tokenize(query).into_iter().collect();
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let mut matched: Vec<(usize, StructuredCandidate)> = Vec::new();
        for entry in self.facts.all(-1) {
            let rendered = render_fact(&entry);
            let matches = tokenize(&rendered)
                .into_iter()
                .collect::<std::collections::BTreeSet<String>>()
                .intersection(&query_tokens)
                .count();
            if matches > 0 {
                matched.push((
                    matches,
                    StructuredCandidate {
                        id: STRUCTURED_ID_BASE + entry.id,
                        rendered,
                    },
                ));
            }
        }
        matched.sort_by(|a, b| b.0.cmp(&a.0));
        matched.truncate(top_k as usize);
        matched.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// Exact fact lookup against the committed map.
    pub fn fact(&self, entity: &str, attribute: &str) -> Option<&StructuredMemoryEntry> {
        self.facts.get(entity, attribute)
    }

    /// Committed facts with the given entity prefix.
    pub fn facts_by_entity_prefix(&self, prefix: &str, limit: i64) -> Vec<StructuredMemoryEntry> {
        self.facts.query_by_entity_prefix(prefix, limit)
    }

    /// Stage removal of a fact. Visible after `flush`.
    pub fn forget_fact(&mut self, entity: &str, attribute: &str) -> Result<Option<u64>> {
        self.ensure_open()?;
        let removed = self.facts.stage_remove(entity, attribute);
        if let Some(id) = removed {
            self.text.stage_remove(STRUCTURED_ID_BASE + id);
        }
        Ok(removed)
    }

    /// Store-level counters, exposed for diagnostics and tests.
    pub fn store_stats(&self) -> crate::store::WaxStats {
        self.store.stats()
    }

    /// Close the underlying store (auto-committing local mutations).
    /// Operations after close fail.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.store.close()
    }
}
