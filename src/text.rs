//! Lexical full-text engine.
//!
//! Reference implementation of the text capability: a per-frame term
//! frequency map plus an inverted token index. Scoring sums document term
//! frequencies over the distinct query tokens; ties break by ascending
//! frame id so rankings are identical across platforms.
//!
//! Staged mutations are invisible to `search` until `commit_staged` and are
//! applied in insertion order, so a later mutation on the same frame wins.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, WaxError};

/// Lowercase-Unicode tokenization splitting on non-alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// One ranked text hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextHit {
    pub frame_id: u64,
    pub score: f32,
}

/// Text index capability used by the orchestrator.
pub trait TextBackend {
    fn index(&mut self, frame_id: u64, text: &str);
    fn index_batch(&mut self, frame_ids: &[u64], texts: &[String]) -> Result<()>;
    fn remove(&mut self, frame_id: u64);
    fn search(&self, query: &str, top_k: i64) -> Vec<TextHit>;

    fn stage_index(&mut self, frame_id: u64, text: &str);
    fn stage_index_batch(&mut self, frame_ids: &[u64], texts: &[String]) -> Result<()>;
    fn stage_remove(&mut self, frame_id: u64);
    fn pending_mutation_count(&self) -> usize;
    fn commit_staged(&mut self);
    fn rollback_staged(&mut self);
}

enum PendingOp {
    Index(u64, HashMap<String, u32>),
    Remove(u64),
}

/// In-memory inverted index engine.
#[derive(Default)]
pub struct InvertedTextEngine {
    /// frame id → token → term frequency
    docs: HashMap<u64, HashMap<String, u32>>,
    /// token → frame ids containing it
    inverted: HashMap<String, BTreeSet<u64>>,
    pending: Vec<PendingOp>,
}

impl InvertedTextEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn term_frequencies(text: &str) -> HashMap<String, u32> {
        let mut frequencies = HashMap::new();
        for token in tokenize(text) {
            *frequencies.entry(token).or_insert(0) += 1;
        }
        frequencies
    }

    fn apply_index(&mut self, frame_id: u64, frequencies: HashMap<String, u32>) {
        self.apply_remove(frame_id);
        for token in frequencies.keys() {
            self.inverted
                .entry(token.clone())
                .or_default()
                .insert(frame_id);
        }
        self.docs.insert(frame_id, frequencies);
    }

    fn apply_remove(&mut self, frame_id: u64) {
        if let Some(old) = self.docs.remove(&frame_id) {
            for token in old.keys() {
                if let Some(postings) = self.inverted.get_mut(token) {
                    postings.remove(&frame_id);
                    if postings.is_empty() {
                        self.inverted.remove(token);
                    }
                }
            }
        }
    }
}

impl TextBackend for InvertedTextEngine {
    fn index(&mut self, frame_id: u64, text: &str) {
        let frequencies = Self::term_frequencies(text);
        self.apply_index(frame_id, frequencies);
    }

    fn index_batch(&mut self, frame_ids: &[u64], texts: &[String]) -> Result<()> {
        if frame_ids.len() != texts.len() {
            return Err(WaxError::policy(
                "index_batch frame_ids and texts sizes must match",
            ));
        }
        for (frame_id, text) in frame_ids.iter().zip(texts) {
            self.index(*frame_id, text);
        }
        Ok(())
    }

    fn remove(&mut self, frame_id: u64) {
        self.apply_remove(frame_id);
    }

    fn search(&self, query: &str, top_k: i64) -> Vec<TextHit> {
        if top_k <= 0 {
            return Vec::new();
        }
        let query_tokens: BTreeSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut candidates: BTreeSet<u64> = BTreeSet::new();
        for token in &query_tokens {
            if let Some(postings) = self.inverted.get(token) {
                candidates.extend(postings);
            }
        }

        let mut hits: Vec<TextHit> = candidates
            .into_iter()
            .map(|frame_id| {
                let doc = &self.docs[&frame_id];
                let score: u32 = query_tokens
                    .iter()
                    .filter_map(|token| doc.get(token))
                    .sum();
                TextHit {
                    frame_id,
                    score: score as f32,
                }
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.frame_id.cmp(&b.frame_id))
        });
        hits.truncate(top_k as usize);
        hits
    }

    fn stage_index(&mut self, frame_id: u64, text: &str) {
        self.pending
            .push(PendingOp::Index(frame_id, Self::term_frequencies(text)));
    }

    fn stage_index_batch(&mut self, frame_ids: &[u64], texts: &[String]) -> Result<()> {
        if frame_ids.len() != texts.len() {
            return Err(WaxError::policy(
                "stage_index_batch frame_ids and texts sizes must match",
            ));
        }
        for (frame_id, text) in frame_ids.iter().zip(texts) {
            self.stage_index(*frame_id, text);
        }
        Ok(())
    }

    fn stage_remove(&mut self, frame_id: u64) {
        self.pending.push(PendingOp::Remove(frame_id));
    }

    fn pending_mutation_count(&self) -> usize {
        self.pending.len()
    }

    fn commit_staged(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for op in pending {
            match op {
                PendingOp::Index(frame_id, frequencies) => self.apply_index(frame_id, frequencies),
                PendingOp::Remove(frame_id) => self.apply_remove(frame_id),
            }
        }
    }

    fn rollback_staged(&mut self) {
        self.pending.clear();
    }
}
