//! Overlapping character chunker for plain-text corpora.
//!
//! Text is whitespace-normalized, then cut into windows of at most
//! `max_chars` characters. A window ends at the last whitespace or sentence
//! punctuation inside it when one exists; consecutive windows share
//! `overlap` characters. Chunks are never empty and indices are contiguous
//! from 0.

const SENTENCE_END: [char; 3] = ['.', '!', '?'];

/// One chunk of a document, before it is tied to a corpus file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: i64,
    pub text: String,
}

/// Collapse every whitespace run into a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into overlapping chunks.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars - 1);
    let chars: Vec<char> = normalize_whitespace(text).chars().collect();
    let len = chars.len();

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < len {
        let mut end = (start + max_chars).min(len);
        if end < len {
            // Back off to a natural boundary; keep the hard cut if none.
            if let Some(pos) = (start + 1..=end)
                .rev()
                .find(|&i| chars[i] == ' ' || SENTENCE_END.contains(&chars[i - 1]))
            {
                end = pos;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        if end >= len {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextChunk {
            index: i as i64,
            text,
        })
        .collect()
}
