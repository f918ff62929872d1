//! Shared test support: opt-in verbose logging and a deterministic
//! bag-of-words mock embedder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use waxstore::embed::{Embedder, EmbeddingIdentity};
use waxstore::Result;

/// Install a verbose tracing subscriber when `WAX_TEST_LOG` is set.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if std::env::var_os("WAX_TEST_LOG").is_some() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
                )
                .try_init();
        }
    });
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

/// Deterministic embedder: hashed bag-of-words buckets, unit-normalized.
/// Texts sharing tokens get similar vectors, so cosine ranking behaves.
pub struct MockEmbedder {
    dimensions: u32,
    embed_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimensions: u32) -> Self {
        Self {
            dimensions,
            embed_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimensions as usize];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            values[bucket] += 1.0;
        }
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut values {
                *value /= norm;
            }
        }
        values
    }
}

impl Embedder for MockEmbedder {
    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn normalize(&self) -> bool {
        true
    }

    fn identity(&self) -> Option<EmbeddingIdentity> {
        Some(EmbeddingIdentity {
            provider: Some("waxstore-tests".to_string()),
            model: Some("bag-of-words".to_string()),
            dimensions: Some(self.dimensions),
            normalized: Some(true),
        })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vectorize(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}
