//! Dense vector engine.
//!
//! Reference implementation of the vector capability: a fixed-dimension
//! frame-id → vector map scored under a similarity metric chosen at
//! construction. Results sort by descending score (L2 is negated so larger
//! is always better) with ascending-id tie-break.
//!
//! The committed map round-trips through the MV2V dense-float segment
//! encoding in ascending frame-id order.

use std::collections::BTreeMap;

use crate::error::{Result, WaxError};
use crate::format::mv2v::{
    decode_dense_vec_segment, encode_dense_vec_segment, VecSegmentInfo, VecSimilarity,
};

/// Vector index capability used by the orchestrator.
pub trait VectorBackend {
    fn dimensions(&self) -> u32;
    fn similarity(&self) -> VecSimilarity;
    fn search(&self, vector: &[f32], top_k: i64) -> Result<Vec<(u64, f32)>>;

    fn add(&mut self, frame_id: u64, vector: &[f32]) -> Result<()>;
    fn add_batch(&mut self, frame_ids: &[u64], vectors: &[Vec<f32>]) -> Result<()>;
    fn remove(&mut self, frame_id: u64);

    fn stage_add(&mut self, frame_id: u64, vector: &[f32]) -> Result<()>;
    fn stage_add_batch(&mut self, frame_ids: &[u64], vectors: &[Vec<f32>]) -> Result<()>;
    fn stage_remove(&mut self, frame_id: u64);
    fn pending_mutation_count(&self) -> usize;
    fn commit_staged(&mut self);
    fn rollback_staged(&mut self);

    /// Serialize the committed map as an MV2V dense-float segment.
    fn serialize_dense_segment(&self) -> Result<Vec<u8>>;
    /// Replace the committed map from an MV2V dense-float segment. The
    /// segment's encoding, dimension and similarity must match the engine.
    fn load_dense_segment(&mut self, bytes: &[u8]) -> Result<()>;
}

enum PendingOp {
    Add(u64, Vec<f32>),
    Remove(u64),
}

pub struct DenseVectorEngine {
    dimensions: u32,
    similarity: VecSimilarity,
    vectors: BTreeMap<u64, Vec<f32>>,
    pending: Vec<PendingOp>,
}

impl DenseVectorEngine {
    /// `dimensions` must be positive; every vector and query must match it.
    pub fn new(dimensions: u32, similarity: VecSimilarity) -> Result<Self> {
        if dimensions == 0 {
            return Err(WaxError::policy("vector engine dimensions must be positive"));
        }
        Ok(Self {
            dimensions,
            similarity,
            vectors: BTreeMap::new(),
            pending: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() as u64 != self.dimensions as u64 {
            return Err(WaxError::policy(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.similarity {
            VecSimilarity::Dot => dot(a, b),
            VecSimilarity::Cosine => {
                let norms = norm(a) * norm(b);
                if norms == 0.0 {
                    0.0
                } else {
                    dot(a, b) / norms
                }
            }
            VecSimilarity::L2 => {
                let mut sum = 0.0f32;
                for (x, y) in a.iter().zip(b) {
                    let d = x - y;
                    sum += d * d;
                }
                -sum.sqrt()
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

impl VectorBackend for DenseVectorEngine {
    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn similarity(&self) -> VecSimilarity {
        self.similarity
    }

    fn search(&self, vector: &[f32], top_k: i64) -> Result<Vec<(u64, f32)>> {
        self.check_dimension(vector)?;
        if top_k <= 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(u64, f32)> = self
            .vectors
            .iter()
            .map(|(frame_id, candidate)| (*frame_id, self.score(vector, candidate)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k as usize);
        Ok(scored)
    }

    fn add(&mut self, frame_id: u64, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        self.vectors.insert(frame_id, vector.to_vec());
        Ok(())
    }

    fn add_batch(&mut self, frame_ids: &[u64], vectors: &[Vec<f32>]) -> Result<()> {
        if frame_ids.len() != vectors.len() {
            return Err(WaxError::policy(
                "add_batch frame_ids and vectors sizes must match",
            ));
        }
        for (frame_id, vector) in frame_ids.iter().zip(vectors) {
            self.add(*frame_id, vector)?;
        }
        Ok(())
    }

    fn remove(&mut self, frame_id: u64) {
        self.vectors.remove(&frame_id);
    }

    fn stage_add(&mut self, frame_id: u64, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        self.pending.push(PendingOp::Add(frame_id, vector.to_vec()));
        Ok(())
    }

    fn stage_add_batch(&mut self, frame_ids: &[u64], vectors: &[Vec<f32>]) -> Result<()> {
        if frame_ids.len() != vectors.len() {
            return Err(WaxError::policy(
                "stage_add_batch frame_ids and vectors sizes must match",
            ));
        }
        for (frame_id, vector) in frame_ids.iter().zip(vectors) {
            self.stage_add(*frame_id, vector)?;
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
                PendingOp::Add(frame_id, vector) => {
                    self.vectors.insert(frame_id, vector);
                }
                PendingOp::Remove(frame_id) => {
                    self.vectors.remove(&frame_id);
                }
            }
        }
    }

    fn rollback_staged(&mut self) {
        self.pending.clear();
    }

    fn serialize_dense_segment(&self) -> Result<Vec<u8>> {
        let mut vectors = Vec::with_capacity(self.vectors.len() * self.dimensions as usize);
        let mut frame_ids = Vec::with_capacity(self.vectors.len());
        for (frame_id, vector) in &self.vectors {
            frame_ids.push(*frame_id);
            vectors.extend_from_slice(vector);
        }
        let info = VecSegmentInfo {
            similarity: self.similarity,
            dimension: self.dimensions,
            vector_count: frame_ids.len() as u64,
            payload_length: vectors.len() as u64 * 4,
        };
        encode_dense_vec_segment(&info, &vectors, &frame_ids)
    }

    fn load_dense_segment(&mut self, bytes: &[u8]) -> Result<()> {
        let decoded = decode_dense_vec_segment(bytes)?;
        if decoded.info.dimension != self.dimensions {
            return Err(WaxError::policy("segment dimension mismatch"));
        }
        if decoded.info.similarity != self.similarity {
            return Err(WaxError::policy("segment similarity mismatch"));
        }
        self.vectors.clear();
        let dim = self.dimensions as usize;
        for (index, frame_id) in decoded.frame_ids.iter().enumerate() {
            self.vectors
                .insert(*frame_id, decoded.vectors[index * dim..(index + 1) * dim].to_vec());
        }
        Ok(())
    }
}
