//! Candidate fusion for unified recall.
//!
//! Text and vector channels are fused with reciprocal-rank fusion:
//! `score(f) = Σ_channels 1 / (rrf_k + rank_channel(f))` with 1-based
//! ranks. Structured-memory hits are unioned in with their own source tag
//! and contribute an RRF term from their own ranking. Ordering is by
//! descending fused score with ascending-id tie-break.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which channel produced (or co-produced) a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchSource {
    Text,
    Vector,
    Timeline,
    StructuredMemory,
}

/// A fused recall candidate prior to context assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub frame_id: u64,
    pub score: f32,
    pub preview_text: Option<String>,
    pub sources: Vec<SearchSource>,
}

/// A structured-memory candidate: reserved id plus its rendered text.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredCandidate {
    pub id: u64,
    pub rendered: String,
}

pub(crate) fn fuse_candidates(
    text_ranked: &[u64],
    vector_ranked: &[u64],
    structured_ranked: &[StructuredCandidate],
    rrf_k: i64,
) -> Vec<SearchResult> {
    struct Accum {
        score: f32,
        sources: Vec<SearchSource>,
        preview: Option<String>,
    }
    let mut fused: HashMap<u64, Accum> = HashMap::new();
    let mut bump = |frame_id: u64, rank: usize, source: SearchSource, preview: Option<&str>| {
        let term = 1.0f32 / (rrf_k as f32 + rank as f32);
        let entry = fused.entry(frame_id).or_insert(Accum {
            score: 0.0,
            sources: Vec::new(),
            preview: None,
        });
        entry.score += term;
        entry.sources.push(source);
        if entry.preview.is_none() {
            entry.preview = preview.map(str::to_string);
        }
    };

    for (index, frame_id) in text_ranked.iter().enumerate() {
        bump(*frame_id, index + 1, SearchSource::Text, None);
    }
    for (index, frame_id) in vector_ranked.iter().enumerate() {
        bump(*frame_id, index + 1, SearchSource::Vector, None);
    }
    for (index, candidate) in structured_ranked.iter().enumerate() {
        bump(
            candidate.id,
            index + 1,
            SearchSource::StructuredMemory,
            Some(&candidate.rendered),
        );
    }

    let mut results: Vec<SearchResult> = fused
        .into_iter()
        .map(|(frame_id, accum)| SearchResult {
            frame_id,
            score: accum.score,
            preview_text: accum.preview,
            sources: accum.sources,
        })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.frame_id.cmp(&b.frame_id))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_channel_preserves_rank_order() {
        let results = fuse_candidates(&[3, 1, 2], &[], &[], 60);
        let ids: Vec<u64> = results.iter().map(|r| r.frame_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn frame_in_both_channels_carries_both_sources() {
        let results = fuse_candidates(&[1, 2], &[2, 3], &[], 60);
        let both = results.iter().find(|r| r.frame_id == 2).unwrap();
        assert_eq!(both.sources, vec![SearchSource::Text, SearchSource::Vector]);
        // 1/(60+2) + 1/(60+1) beats any single-channel rank-1 term.
        assert_eq!(results[0].frame_id, 2);
    }

    #[test]
    fn equal_scores_order_by_ascending_id() {
        let results = fuse_candidates(&[9], &[4], &[], 60);
        assert_eq!(results[0].frame_id, 4);
        assert_eq!(results[1].frame_id, 9);
    }

    #[test]
    fn structured_hits_union_with_their_tag_and_preview() {
        let structured = vec![StructuredCandidate {
            id: (1u64 << 63) + 5,
            rendered: "user:1 city Paris".to_string(),
        }];
        let results = fuse_candidates(&[1], &[], &structured, 60);
        let hit = results
            .iter()
            .find(|r| r.frame_id == (1u64 << 63) + 5)
            .unwrap();
        assert_eq!(hit.sources, vec![SearchSource::StructuredMemory]);
        assert_eq!(hit.preview_text.as_deref(), Some("user:1 city Paris"));
    }

    #[test]
    fn better_text_rank_never_lowers_fused_rank() {
        // Frame 1 at text rank 1 vs rank 2, vector rank fixed.
        let worse = fuse_candidates(&[2, 1], &[1, 2], &[], 60);
        let better = fuse_candidates(&[1, 2], &[1, 2], &[], 60);
        let pos = |results: &[SearchResult], id: u64| {
            results.iter().position(|r| r.frame_id == id).unwrap()
        };
        assert!(pos(&better, 1) <= pos(&worse, 1));
    }
}
