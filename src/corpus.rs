//! Corpus snapshots consumed by the retrieval engine.
//!
//! Two on-disk shapes are accepted:
//!
//! - a JSON snapshot (`processed_data.json`):
//!
//!   ```json
//!   {
//!     "embedding_model": "all-minilm-l6-v2",
//!     "documents": [
//!       {"file": "acordao.pdf", "chunks": [
//!         {"id": "acordao.pdf#0", "text": "...", "chunk_index": 0, "embedding": [0.1, 0.2]}
//!       ]}
//!     ]
//!   }
//!   ```
//!
//!   `embedding_model` and `embedding` are optional; chunk ids may be
//!   strings or integers.
//! - a directory of `.txt` files, chunked with [`crate::chunk`]; ids are
//!   `<relative path>#<index>`.
//!
//! Chunks are flattened in document order, then chunk order.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::models::SearchableChunk;

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    /// Model that produced the stored chunk embeddings, if any.
    pub embedding_model: Option<String>,
    pub chunks: Vec<SearchableChunk>,
}

#[derive(Deserialize)]
struct Snapshot {
    #[serde(default)]
    embedding_model: Option<String>,
    #[serde(default)]
    documents: Vec<SnapshotDocument>,
}

#[derive(Deserialize)]
struct SnapshotDocument {
    file: String,
    #[serde(default)]
    chunks: Vec<SnapshotChunk>,
}

#[derive(Deserialize)]
struct SnapshotChunk {
    id: ChunkId,
    text: String,
    #[serde(default)]
    chunk_index: Option<i64>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkId {
    Text(String),
    Number(i64),
}

impl ChunkId {
    fn into_string(self) -> String {
        match self {
            ChunkId::Text(s) => s,
            ChunkId::Number(n) => n.to_string(),
        }
    }
}

/// Load a snapshot file or a directory of text files.
pub fn load_corpus(path: &Path, chunk_chars: usize, chunk_overlap: usize) -> Result<Corpus> {
    let corpus = if path.is_dir() {
        load_directory(path, chunk_chars, chunk_overlap)?
    } else {
        load_snapshot(path)?
    };
    check_unique_ids(&corpus.chunks)?;
    Ok(corpus)
}

pub fn load_snapshot(path: &Path) -> Result<Corpus> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus snapshot: {}", path.display()))?;
    parse_snapshot(&content)
        .with_context(|| format!("Failed to parse corpus snapshot: {}", path.display()))
}

/// Parse the JSON snapshot format.
pub fn parse_snapshot(json: &str) -> Result<Corpus> {
    let snapshot: Snapshot = serde_json::from_str(json)?;

    let mut chunks = Vec::new();
    for doc in snapshot.documents {
        for (position, chunk) in doc.chunks.into_iter().enumerate() {
            chunks.push(SearchableChunk {
                chunk_id: chunk.id.into_string(),
                text: chunk.text,
                source_file: doc.file.clone(),
                chunk_index: chunk.chunk_index.unwrap_or(position as i64),
                embedding: chunk.embedding,
            });
        }
    }

    Ok(Corpus {
        embedding_model: snapshot.embedding_model,
        chunks,
    })
}

pub fn load_directory(dir: &Path, chunk_chars: usize, chunk_overlap: usize) -> Result<Corpus> {
    let mut chunks = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk corpus directory: {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }

        let rel = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;

        for piece in chunk_text(&text, chunk_chars, chunk_overlap) {
            chunks.push(SearchableChunk {
                chunk_id: format!("{}#{}", rel, piece.index),
                text: piece.text,
                source_file: rel.clone(),
                chunk_index: piece.index,
                embedding: None,
            });
        }
    }

    Ok(Corpus {
        embedding_model: None,
        chunks,
    })
}

/// Chunk ids must be unique across the corpus.
pub fn check_unique_ids(chunks: &[SearchableChunk]) -> Result<()> {
    let mut seen = HashSet::with_capacity(chunks.len());
    for c in chunks {
        if !seen.insert(c.chunk_id.as_str()) {
            bail!("duplicate chunk id in corpus: {}", c.chunk_id);
        }
    }
    Ok(())
}
