//! Retrieval engine over a corpus of text chunks.
//!
//! A [`SearchEngine`] is built once and is immutable afterwards. Construction
//! decides the ranking strategy:
//!
//! - **semantic**: an [`EmbeddingProvider`] encoded the whole corpus; queries
//!   are ranked by cosine similarity. A query that fails to encode is ranked
//!   by the keyword strategy instead.
//! - **keyword**: no provider, or the provider failed while encoding the
//!   corpus. Chunks are ranked by token occurrence counts.
//!
//! Neither strategy surfaces provider errors to the caller.

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::corpus::{self, Corpus};
use crate::embedding::{self, cosine_similarity, EmbeddingProvider};
use crate::models::{RankedResult, SearchableChunk, Strategy};

const DEFAULT_BATCH_SIZE: usize = 64;
/// Multiplier applied when every query token occurs in a chunk.
const FULL_MATCH_BONUS: f64 = 1.5;

/// Token-count ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordStrategy;

impl KeywordStrategy {
    /// Score every chunk by the summed occurrence counts of the lower-cased
    /// query tokens, normalized by the best score.
    pub fn rank(&self, chunks: &[SearchableChunk], query: &str, top_k: usize) -> Vec<RankedResult> {
        let query = query.to_lowercase();
        let tokens: Vec<&str> = query.split_whitespace().collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let text = chunk.text.to_lowercase();
                let counts: Vec<usize> = tokens.iter().map(|t| text.matches(t).count()).collect();
                let mut score = counts.iter().sum::<usize>() as f64;
                if counts.iter().all(|&c| c > 0) {
                    score *= FULL_MATCH_BONUS;
                }
                (score > 0.0).then_some((i, score))
            })
            .collect();

        // Stable: ties keep corpus order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let max = scored.first().map(|(_, s)| *s).unwrap_or(0.0);
        scored.truncate(top_k);

        let normalized = scored
            .into_iter()
            .map(|(i, s)| (i, if max > 0.0 { s / max } else { 0.0 }));
        to_ranked(normalized, chunks, Strategy::Keyword)
    }
}

/// Cosine ranking against precomputed chunk vectors, with keyword fallback.
pub struct SemanticStrategy {
    provider: Box<dyn EmbeddingProvider>,
    vectors: Vec<Vec<f32>>,
    keyword: KeywordStrategy,
}

impl SemanticStrategy {
    pub async fn rank(&self, chunks: &[SearchableChunk], query: &str, top_k: usize) -> Vec<RankedResult> {
        let query_vec = match embedding::embed_query(self.provider.as_ref(), query).await {
            Ok(v) if v.len() == self.provider.dims() => v,
            Ok(v) => {
                warn!(
                    expected = self.provider.dims(),
                    got = v.len(),
                    "query embedding has wrong dimensionality, using keyword ranking"
                );
                return self.keyword.rank(chunks, query, top_k);
            }
            Err(e) => {
                warn!(error = %e, "query embedding failed, using keyword ranking");
                return self.keyword.rank(chunks, query, top_k);
            }
        };

        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(&query_vec, v) as f64))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        let clamped = scored.into_iter().map(|(i, s)| (i, s.clamp(0.0, 1.0)));
        to_ranked(clamped, chunks, Strategy::Semantic)
    }
}

/// Turn `(chunk position, score)` pairs, best first, into 1-based ranked
/// results.
fn to_ranked(
    scored: impl Iterator<Item = (usize, f64)>,
    chunks: &[SearchableChunk],
    strategy: Strategy,
) -> Vec<RankedResult> {
    scored
        .enumerate()
        .map(|(pos, (i, score))| {
            let c = &chunks[i];
            RankedResult {
                rank: pos + 1,
                score,
                chunk_id: c.chunk_id.clone(),
                text: c.text.clone(),
                source_file: c.source_file.clone(),
                chunk_index: c.chunk_index,
                strategy,
            }
        })
        .collect()
}

enum RetrievalStrategy {
    Semantic(SemanticStrategy),
    Keyword(KeywordStrategy),
}

/// Immutable retrieval engine; share it behind an `Arc` for concurrent
/// queries.
pub struct SearchEngine {
    chunks: Vec<SearchableChunk>,
    strategy: RetrievalStrategy,
}

impl SearchEngine {
    /// Build an engine from configuration.
    ///
    /// A missing or malformed corpus yields an empty engine, and a provider
    /// that cannot be created or fails to encode the corpus yields keyword
    /// mode. Both are logged, neither is an error.
    pub async fn load(retrieval: &RetrievalConfig, embedding_config: &EmbeddingConfig) -> Self {
        let path = &retrieval.corpus_path;
        let corpus = match corpus::load_corpus(path, retrieval.chunk_chars, retrieval.chunk_overlap) {
            Ok(c) => {
                info!(path = %path.display(), chunks = c.chunks.len(), "corpus loaded");
                c
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "corpus unavailable, starting empty");
                Corpus::default()
            }
        };

        let provider = if embedding_config.is_enabled() {
            match embedding::create_provider(embedding_config) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "embedding provider unavailable, using keyword ranking");
                    None
                }
            }
        } else {
            None
        };

        Self::build(corpus, provider, embedding_config.batch_size).await
    }

    /// Build an engine from chunks already in memory.
    ///
    /// Errors only on duplicate chunk ids.
    pub async fn from_chunks(
        chunks: Vec<SearchableChunk>,
        provider: Option<Box<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        corpus::check_unique_ids(&chunks)?;
        let corpus = Corpus {
            embedding_model: None,
            chunks,
        };
        Ok(Self::build(corpus, provider, DEFAULT_BATCH_SIZE).await)
    }

    /// Like [`from_chunks`](Self::from_chunks), keeping the corpus's stored
    /// vectors when they were produced by `provider`'s model.
    pub async fn from_corpus(
        corpus: Corpus,
        provider: Option<Box<dyn EmbeddingProvider>>,
        batch_size: usize,
    ) -> Result<Self> {
        corpus::check_unique_ids(&corpus.chunks)?;
        Ok(Self::build(corpus, provider, batch_size).await)
    }

    async fn build(corpus: Corpus, provider: Option<Box<dyn EmbeddingProvider>>, batch_size: usize) -> Self {
        let strategy = match provider {
            None => RetrievalStrategy::Keyword(KeywordStrategy),
            Some(provider) => match encode_corpus(&corpus, provider.as_ref(), batch_size).await {
                Ok(vectors) => {
                    info!(model = provider.model_name(), chunks = vectors.len(), "semantic retrieval ready");
                    RetrievalStrategy::Semantic(SemanticStrategy {
                        provider,
                        vectors,
                        keyword: KeywordStrategy,
                    })
                }
                Err(e) => {
                    warn!(
                        model = provider.model_name(),
                        error = %format!("{e:#}"),
                        "corpus encoding failed, using keyword ranking"
                    );
                    RetrievalStrategy::Keyword(KeywordStrategy)
                }
            },
        };

        Self {
            chunks: corpus.chunks,
            strategy,
        }
    }

    /// Rank the corpus against `query`, best first.
    ///
    /// Errors only when `top_k` is zero.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RankedResult>> {
        if top_k == 0 {
            bail!("top_k must be >= 1");
        }
        if self.chunks.is_empty() || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let results = match &self.strategy {
            RetrievalStrategy::Semantic(s) => s.rank(&self.chunks, query, top_k).await,
            RetrievalStrategy::Keyword(k) => k.rank(&self.chunks, query, top_k),
        };
        debug!(query, hits = results.len(), "search finished");
        Ok(results)
    }

    pub fn mode(&self) -> Strategy {
        match self.strategy {
            RetrievalStrategy::Semantic(_) => Strategy::Semantic,
            RetrievalStrategy::Keyword(_) => Strategy::Keyword,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[SearchableChunk] {
        &self.chunks
    }
}

/// Vectors for every chunk, reusing stored ones when they came from the
/// same model with the right dimensionality.
async fn encode_corpus(
    corpus: &Corpus,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let dims = provider.dims();

    let stored_usable = corpus.embedding_model.as_deref() == Some(provider.model_name())
        && corpus
            .chunks
            .iter()
            .all(|c| c.embedding.as_ref().is_some_and(|v| v.len() == dims));
    if stored_usable && !corpus.chunks.is_empty() {
        debug!(model = provider.model_name(), "using stored chunk embeddings");
        return Ok(corpus
            .chunks
            .iter()
            .filter_map(|c| c.embedding.clone())
            .collect());
    }

    if corpus.chunks.is_empty() {
        // Nothing to encode; still make sure the provider answers.
        embedding::embed_query(provider, "probe").await?;
        return Ok(Vec::new());
    }

    let mut vectors = Vec::with_capacity(corpus.chunks.len());
    for batch in corpus.chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = provider.embed(&texts).await?;
        if batch_vectors.len() != texts.len() {
            bail!(
                "provider returned {} vectors for {} texts",
                batch_vectors.len(),
                texts.len()
            );
        }
        if let Some(bad) = batch_vectors.iter().find(|v| v.len() != dims) {
            bail!("provider returned a {}-dim vector, expected {}", bad.len(), dims);
        }
        vectors.extend(batch_vectors);
    }
    Ok(vectors)
}
