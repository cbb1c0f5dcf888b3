//! Hybrid retrieval pipeline.

use crate::error::KbError;
use crate::store::KbStore;
use crate::types::{Block, Citation, Document, RetrievalTrace};
use crate::vector::VectorIndex;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use wooster_models::chat::ChatRequest;
use wooster_models::router::{ModelRouter, TaskTag};

/// Lexical candidates taken before merging.
const FTS_CANDIDATES: usize = 50;

/// Dense candidates taken before merging.
const VECTOR_CANDIDATES: usize = 50;

/// Contexts kept after reranking.
const DEFAULT_TOP_K: usize = 10;

/// Link-graph neighbors pulled in per expanded block.
const EXPANSION_CAP: usize = 4;

/// Documents need this many inbound links before expansion kicks in.
const EXPANSION_MIN_IN_DEGREE: usize = 2;

/// System prompt for the retrieval gate classifier.
const GATE_PROMPT: &str = "You decide whether answering the user's message requires searching their \
personal notes. Reply with exactly one word: yes or no.";

/// A hybrid retrieval query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// The query text.
    pub text: String,
    /// Restrict results to one namespace.
    pub scope: Option<String>,
    /// Contexts to return; defaults to 10.
    pub top_k: Option<usize>,
    /// Whether to populate citations.
    pub want_citations: bool,
    /// Skip the retrieval gate and always retrieve.
    pub force_retrieval: bool,
}

impl QueryRequest {
    /// A plain query with defaults: no scope, top-10, citations on, gated.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            scope: None,
            top_k: None,
            want_citations: true,
            force_retrieval: false,
        }
    }
}

/// One retrieved context.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// The source block.
    pub block_id: String,
    /// The source document.
    pub doc_id: String,
    /// Breadcrumb of headings above the block.
    pub heading_path: Vec<String>,
    /// The context text.
    pub text: String,
    /// Combined relevance score (0 for expansion neighbors).
    pub score: f32,
}

/// The result of a hybrid query.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// Retrieved contexts, best first (expansion neighbors last).
    pub contexts: Vec<RetrievedContext>,
    /// Stable citations, parallel to the directly-retrieved contexts.
    pub citations: Vec<Citation>,
    /// Identifier of the persisted retrieval trace.
    pub trace_id: String,
    /// The dense leg was unavailable; results are FTS-only.
    pub degraded: bool,
    /// The gate classifier decided retrieval was unnecessary.
    pub gated_out: bool,
}

/// Executes hybrid queries against the coupled stores.
pub(crate) struct QueryEngine {
    store: Arc<KbStore>,
    index: Arc<dyn VectorIndex>,
    router: Arc<ModelRouter>,
    privacy_excluded_tags: Vec<String>,
}

impl QueryEngine {
    pub(crate) fn new(
        store: Arc<KbStore>,
        index: Arc<dyn VectorIndex>,
        router: Arc<ModelRouter>,
        privacy_excluded_tags: Vec<String>,
    ) -> Self {
        Self {
            store,
            index,
            router,
            privacy_excluded_tags,
        }
    }

    /// Runs the full pipeline: gate, lexical, dense, merge, rerank, expand,
    /// cite, trace.
    pub(crate) async fn query(&self, request: QueryRequest) -> Result<QueryResponse, KbError> {
        let started = std::time::Instant::now();
        let trace_id = Uuid::new_v4().to_string();

        if !request.force_retrieval && !self.gate_allows(&request.text).await {
            let trace = RetrievalTrace {
                id: trace_id.clone(),
                timestamp: Utc::now(),
                query: request.text.clone(),
                fts_hits: Vec::new(),
                vector_hits: Vec::new(),
                rerank_scores: Vec::new(),
                selected: Vec::new(),
                latency_ms: started.elapsed().as_millis() as u64,
                degraded: false,
            };
            self.store.insert_trace(&trace)?;
            return Ok(QueryResponse {
                contexts: Vec::new(),
                citations: Vec::new(),
                trace_id,
                degraded: false,
                gated_out: true,
            });
        }

        // Lexical leg.
        let fts_raw = self.store.fts_search(&request.text, FTS_CANDIDATES)?;
        let fts_hits: Vec<String> = fts_raw.iter().map(|(id, _)| id.clone()).collect();

        // Dense leg; failure degrades to FTS-only rather than serving stale
        // vector results for an unembeddable query.
        let (vector_raw, degraded) = match self.embed_query(&request.text).await {
            Ok(query_vector) => (self.index.search(&query_vector, VECTOR_CANDIDATES), false),
            Err(err) => {
                tracing::warn!(%err, "dense leg unavailable, degrading to FTS-only");
                (Vec::new(), true)
            }
        };
        let vector_hits: Vec<String> = vector_raw.iter().map(|(id, _)| id.clone()).collect();

        // Merge by block id with normalized weighted scores.
        let combined = merge_scores(&fts_raw, &vector_raw);

        // Load candidate blocks and filter by namespace and privacy tags.
        let candidate_ids: Vec<String> = combined.iter().map(|(id, _)| id.clone()).collect();
        let blocks = self.store.blocks_by_ids(&candidate_ids)?;
        let documents = self.documents_for(&blocks)?;

        let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
        let mut selected: Vec<(Block, f32)> = Vec::new();
        for (block_id, score) in &combined {
            if selected.len() >= top_k {
                break;
            }
            let Some(block) = blocks.iter().find(|block| &block.id == block_id) else {
                continue;
            };
            let Some(document) = documents.get(&block.doc_id) else {
                continue;
            };
            if self.excluded(document, request.scope.as_deref()) {
                continue;
            }
            selected.push((block.clone(), *score));
        }

        // Link-graph expansion for well-connected documents.
        let neighbors = self.expand(&selected)?;

        let mut contexts: Vec<RetrievedContext> = selected
            .iter()
            .map(|(block, score)| RetrievedContext {
                block_id: block.id.clone(),
                doc_id: block.doc_id.clone(),
                heading_path: block.heading_path.clone(),
                text: block.text.clone(),
                score: *score,
            })
            .collect();
        let citations: Vec<Citation> = if request.want_citations {
            selected
                .iter()
                .map(|(block, _)| Citation {
                    doc_id: block.doc_id.clone(),
                    start_offset: block.start_offset,
                    end_offset: block.end_offset,
                })
                .collect()
        } else {
            Vec::new()
        };
        contexts.extend(neighbors);

        let trace = RetrievalTrace {
            id: trace_id.clone(),
            timestamp: Utc::now(),
            query: request.text.clone(),
            fts_hits,
            vector_hits,
            rerank_scores: combined,
            selected: contexts.iter().map(|ctx| ctx.block_id.clone()).collect(),
            latency_ms: started.elapsed().as_millis() as u64,
            degraded,
        };
        self.store.insert_trace(&trace)?;

        Ok(QueryResponse {
            contexts,
            citations,
            trace_id,
            degraded,
            gated_out: false,
        })
    }

    /// Asks the classifier whether retrieval is needed; on any routing
    /// failure the answer defaults to yes (retrieve).
    async fn gate_allows(&self, query: &str) -> bool {
        let request = ChatRequest::with_system(GATE_PROMPT, query);
        match self
            .router
            .generate(TaskTag::RouterClassification, request)
            .await
        {
            Ok(response) => {
                let answer = response.text().trim().to_ascii_lowercase();
                !answer.starts_with("no")
            }
            Err(err) => {
                tracing::debug!(%err, "retrieval gate unavailable, defaulting to retrieve");
                true
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, KbError> {
        let embedder = self
            .router
            .select_embedding_model()
            .map_err(|err| KbError::EmbedderUnavailable(err.to_string()))?;
        let mut vectors = embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|err| KbError::EmbedderUnavailable(err.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| KbError::EmbedderUnavailable("empty embedding response".to_string()))
    }

    fn documents_for(&self, blocks: &[Block]) -> Result<HashMap<String, Document>, KbError> {
        let mut documents = HashMap::new();
        for block in blocks {
            if !documents.contains_key(&block.doc_id)
                && let Some(document) = self.store.document(&block.doc_id)?
            {
                documents.insert(block.doc_id.clone(), document);
            }
        }
        Ok(documents)
    }

    fn excluded(&self, document: &Document, scope: Option<&str>) -> bool {
        if let Some(scope) = scope
            && document.namespace != scope
        {
            return true;
        }
        document
            .tags
            .iter()
            .any(|tag| self.privacy_excluded_tags.contains(tag))
    }

    /// 1-hop neighbors for selected blocks whose document is well linked.
    fn expand(&self, selected: &[(Block, f32)]) -> Result<Vec<RetrievedContext>, KbError> {
        let selected_ids: Vec<&String> = selected.iter().map(|(block, _)| &block.id).collect();
        let mut neighbors = Vec::new();

        for (block, _) in selected {
            if self.store.in_degree(&block.doc_id)? < EXPANSION_MIN_IN_DEGREE {
                continue;
            }
            let mut added = 0usize;

            // Outgoing neighbors first, then documents linking in.
            let mut neighbor_docs = self
                .store
                .outgoing_neighbors(&block.doc_id, EXPANSION_CAP)?;
            for backlink in self.store.backlinks(&block.doc_id)? {
                if let Some(source) = self
                    .store
                    .blocks_by_ids(&[backlink.src_block_id.clone()])?
                    .pop()
                {
                    neighbor_docs.push(source.doc_id);
                }
            }

            for neighbor_doc in neighbor_docs {
                if added >= EXPANSION_CAP {
                    break;
                }
                let Some(neighbor) = self.store.first_block_of(&neighbor_doc)? else {
                    continue;
                };
                let already_selected = selected_ids.contains(&&neighbor.id)
                    || neighbors
                        .iter()
                        .any(|ctx: &RetrievedContext| ctx.block_id == neighbor.id);
                if already_selected {
                    continue;
                }
                neighbors.push(RetrievedContext {
                    block_id: neighbor.id.clone(),
                    doc_id: neighbor.doc_id.clone(),
                    heading_path: neighbor.heading_path.clone(),
                    text: neighbor.text.clone(),
                    score: 0.0,
                });
                added += 1;
            }
        }
        Ok(neighbors)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Score fusion
// ─────────────────────────────────────────────────────────────────────────────

/// Merges the two candidate lists by block id with an equal-weight sum of
/// normalized scores. bm25 is a cost (lower is better); cosine is a
/// similarity. Both normalize to `[0, 1]` before fusion.
fn merge_scores(fts: &[(String, f64)], vector: &[(String, f32)]) -> Vec<(String, f32)> {
    let fts_norm = normalize(fts.iter().map(|(id, bm25)| (id.clone(), -*bm25 as f32)));
    let vector_norm = normalize(vector.iter().map(|(id, score)| (id.clone(), *score)));

    let mut combined: HashMap<String, f32> = HashMap::new();
    for (id, score) in fts_norm {
        *combined.entry(id).or_default() += 0.5 * score;
    }
    for (id, score) in vector_norm {
        *combined.entry(id).or_default() += 0.5 * score;
    }

    let mut out: Vec<(String, f32)> = combined.into_iter().collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(core::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out
}

/// Min-max normalization onto `[0, 1]`; a single candidate scores 1.
fn normalize(scores: impl Iterator<Item = (String, f32)>) -> Vec<(String, f32)> {
    let collected: Vec<(String, f32)> = scores.collect();
    if collected.is_empty() {
        return collected;
    }
    let min = collected
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::INFINITY, f32::min);
    let max = collected
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    collected
        .into_iter()
        .map(|(id, score)| {
            let normalized = if range > 0.0 {
                (score - min) / range
            } else {
                1.0
            };
            (id, normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_blocks_present_in_both_legs() {
        let fts = vec![("both".to_string(), -5.0f64), ("lex".to_string(), -4.0)];
        let vector = vec![("both".to_string(), 0.9f32), ("dense".to_string(), 0.8)];

        let merged = merge_scores(&fts, &vector);
        assert_eq!(merged[0].0, "both");
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn single_candidate_normalizes_to_full_weight() {
        let merged = merge_scores(&[("only".to_string(), -3.0)], &[]);
        assert_eq!(merged, vec![("only".to_string(), 0.5)]);
    }

    #[test]
    fn merge_is_deterministic_on_ties() {
        let fts = vec![("b".to_string(), -1.0f64), ("a".to_string(), -1.0)];
        let merged = merge_scores(&fts, &[]);
        assert_eq!(merged[0].0, "a");
    }
}
