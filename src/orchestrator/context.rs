//! Token-budgeted RAG context assembly.
//!
//! Each fused result becomes one item: *expanded* when its preview fits the
//! per-item expansion budget, *snippet* when it must be clipped, and
//! *surrogate* (`"frame <id>"`) when no preview text exists. A running
//! token count enforces the total budget; the item that would exceed it is
//! truncated to fit and ends the context.

use serde::{Deserialize, Serialize};

use super::chunk::{clamp_bytes, count_tokens, truncate_tokens};
use super::config::RagConfig;
use super::recall::{SearchResult, SearchSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RagItemKind {
    Snippet,
    Expanded,
    Surrogate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagItem {
    pub kind: RagItemKind,
    pub frame_id: u64,
    pub score: f32,
    pub sources: Vec<SearchSource>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RagContext {
    pub query: String,
    pub items: Vec<RagItem>,
    pub total_tokens: i64,
}

pub(crate) fn build_context(query: &str, results: &[SearchResult], rag: &RagConfig) -> RagContext {
    let budget = rag.max_context_tokens.max(0) as usize;
    let mut items = Vec::new();
    let mut total: usize = 0;

    for result in results {
        let score = if result.score.is_nan() {
            0.0
        } else {
            result.score
        };

        let (kind, text) = match result.preview_text.as_deref() {
            None | Some("") => (RagItemKind::Surrogate, format!("frame {}", result.frame_id)),
            Some(preview) => {
                let preview = clamp_bytes(preview, rag.preview_max_bytes);
                if count_tokens(preview) as i64 <= rag.expansion_max_tokens {
                    (RagItemKind::Expanded, preview.to_string())
                } else {
                    (
                        RagItemKind::Snippet,
                        truncate_tokens(preview, rag.snippet_max_tokens.max(0) as usize),
                    )
                }
            }
        };

        let tokens = count_tokens(&text);
        if total + tokens > budget {
            let remaining = budget - total;
            if remaining == 0 {
                break;
            }
            let truncated = truncate_tokens(&text, remaining);
            let truncated_tokens = count_tokens(&truncated);
            if truncated_tokens == 0 {
                break;
            }
            total += truncated_tokens;
            items.push(RagItem {
                kind,
                frame_id: result.frame_id,
                score,
                sources: result.sources.clone(),
                text: truncated,
            });
            break;
        }

        total += tokens;
        items.push(RagItem {
            kind,
            frame_id: result.frame_id,
            score,
            sources: result.sources.clone(),
            text,
        });
    }

    RagContext {
        query: query.to_string(),
        items,
        total_tokens: total as i64,
    }
}
