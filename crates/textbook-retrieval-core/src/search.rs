//! Hybrid retrieval: exact title match first, semantic search as fallback.
//!
//! # Algorithm
//!
//! 1. Normalize the query with [`normalize_title`].
//! 2. **Exact pass** (`exact`, `hybrid`): the first title index row whose
//!    normalized title contains the normalized query is the match. If its
//!    passage exists, return it alone with `score = 0.0`.
//! 3. **Semantic pass** (`semantic`, or `hybrid` after an exact miss): embed
//!    the raw query, take the `top_k` nearest title rows, and walk them by
//!    ascending distance. A candidate is skipped when it has no content, when
//!    its key was already emitted, or when its content embedding has cosine
//!    similarity ≥ `similarity_threshold` with an already accepted result.
//! 4. `hybrid` never merges the two passes.
//!
//! The exact pass is first-match, not best-match. A query contained in several
//! titles resolves to the lowest row id even when a later title matches it
//! word for word. Changing this would change observable output order.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::corpus::{CorpusStore, TitleIndex};
use crate::embedding::{cosine_similarity, Embedder};
use crate::index::{DistanceMetric, EmbeddingIndex};
use crate::normalize::{normalize_title, CorpusKey};

/// Default number of semantic candidates.
pub const DEFAULT_TOP_K: usize = 5;
/// Default content-similarity threshold above which a candidate is a duplicate.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.98;

/// Which retrieval passes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Exact,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Exact => "exact",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(SearchMode::Exact),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use exact, semantic, or hybrid.",
                other
            ),
        }
    }
}

/// Per-call retrieval parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Number of nearest title rows the semantic pass considers.
    pub top_k: usize,
    /// Content cosine similarity at or above which a candidate is dropped.
    pub similarity_threshold: f32,
    pub mode: SearchMode,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            mode: SearchMode::Hybrid,
        }
    }
}

/// A retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Original (non-normalized) title.
    pub title: String,
    pub unit_id: String,
    /// `0.0` for an exact match, otherwise the embedding distance.
    pub score: f32,
    pub content: String,
}

/// Corpus, title index, and title embeddings bound to one embedder.
///
/// Read-only after construction and safe to share across threads. The only
/// interior state is a per-row memo of content embeddings, filled on first
/// use and never invalidated (content is immutable for the process lifetime).
pub struct HybridRetriever {
    corpus: CorpusStore,
    titles: TitleIndex,
    index: EmbeddingIndex,
    embedder: Arc<dyn Embedder>,
    content_vectors: Vec<OnceLock<Vec<f32>>>,
}

impl HybridRetriever {
    /// Assemble a retriever from prebuilt parts.
    ///
    /// # Errors
    ///
    /// Fails if the index does not have exactly one row per title row, or if
    /// its dimensionality differs from the embedder's.
    pub fn new(
        corpus: CorpusStore,
        titles: TitleIndex,
        index: EmbeddingIndex,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if index.len() != titles.row_count() {
            bail!(
                "embedding index has {} rows but the title index has {}",
                index.len(),
                titles.row_count()
            );
        }
        if index.dims() != embedder.dims() {
            bail!(
                "embedding index has {} dimensions but embedder '{}' produces {}",
                index.dims(),
                embedder.model_name(),
                embedder.dims()
            );
        }
        let content_vectors = (0..titles.row_count()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            corpus,
            titles,
            index,
            embedder,
            content_vectors,
        })
    }

    /// Embed every title row with `embedder` and assemble a retriever.
    pub fn build(
        corpus: CorpusStore,
        titles: TitleIndex,
        embedder: Arc<dyn Embedder>,
        metric: DistanceMetric,
        batch_size: usize,
    ) -> Result<Self> {
        let index =
            EmbeddingIndex::embed_texts(embedder.as_ref(), &titles.titles(), metric, batch_size)?;
        Self::new(corpus, titles, index, embedder)
    }

    pub fn corpus(&self) -> &CorpusStore {
        &self.corpus
    }

    pub fn titles(&self) -> &TitleIndex {
        &self.titles
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Run a search.
    ///
    /// An empty result is a normal outcome meaning "nothing found". `Err` is
    /// reserved for infrastructure failures such as the embedder failing.
    pub fn search(&self, query: &str, params: &SearchParams) -> Result<Vec<SearchHit>> {
        let normalized = normalize_title(query);
        let results = match params.mode {
            SearchMode::Exact => self.exact_pass(&normalized).into_iter().collect(),
            SearchMode::Semantic => {
                self.semantic_pass(query, params.top_k, params.similarity_threshold)?
            }
            SearchMode::Hybrid => match self.exact_pass(&normalized) {
                Some(hit) => vec![hit],
                None => self.semantic_pass(query, params.top_k, params.similarity_threshold)?,
            },
        };
        tracing::debug!(
            query,
            mode = %params.mode,
            results = results.len(),
            "search complete"
        );
        Ok(results)
    }

    fn exact_pass(&self, normalized_query: &str) -> Option<SearchHit> {
        let (_, entry) = self.titles.first_containing(normalized_query)?;
        let content = self.corpus.content(&entry.key())?;
        Some(SearchHit {
            title: entry.title.clone(),
            unit_id: entry.unit_id.clone(),
            score: 0.0,
            content: content.to_string(),
        })
    }

    fn semantic_pass(&self, query: &str, top_k: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_one(query)?;
        let neighbors = self.index.query(&query_vec, top_k)?;

        let mut results = Vec::new();
        let mut seen_keys: HashSet<CorpusKey> = HashSet::new();
        let mut accepted: Vec<&[f32]> = Vec::new();

        for neighbor in neighbors {
            let Some(entry) = self.titles.row(neighbor.row) else {
                continue;
            };
            let key = entry.key();
            if seen_keys.contains(&key) {
                continue;
            }
            let Some(content) = self.corpus.content(&key) else {
                continue;
            };

            let content_vec = self.content_vector(neighbor.row, content)?;
            let duplicate = accepted
                .iter()
                .any(|prev| cosine_similarity(content_vec, prev) >= threshold);
            if duplicate {
                tracing::debug!(title = %entry.title, "dropping near-duplicate passage");
                continue;
            }

            accepted.push(content_vec);
            seen_keys.insert(key);
            results.push(SearchHit {
                title: entry.title.clone(),
                unit_id: entry.unit_id.clone(),
                score: neighbor.distance,
                content: content.to_string(),
            });
        }

        Ok(results)
    }

    fn content_vector(&self, row: usize, content: &str) -> Result<&[f32]> {
        let cell = &self.content_vectors[row];
        if let Some(v) = cell.get() {
            return Ok(v);
        }
        let v = self.embedder.embed_one(content)?;
        Ok(cell.get_or_init(|| v))
    }
}
