//! Core data models shared by the acquisition and retrieval engines.
//!
//! These types represent the decisions found on the portal, the outcome of
//! each PDF download, the indexed text chunks, and the ranked hits returned
//! by the search engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::cnj;

/// Where a [`DecisionRecord`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Parsed from a live portal response.
    Origin,
    /// Taken from the built-in example set because the portal was unreachable.
    Fallback,
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::Origin => write!(f, "origin"),
            RecordSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// One court decision (acórdão) found by a portal search.
///
/// Records are immutable once built. Use [`DecisionRecord::new`] so that
/// `generated_filename` is always derived from the case number and judgment
/// date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub case_number: String,
    pub judgment_date: Option<NaiveDate>,
    pub publication_date: Option<NaiveDate>,
    pub rapporteur: String,
    pub venue: String,
    pub judging_body: String,
    pub case_class: String,
    /// The ementa (headnote). May be large.
    pub summary: String,
    /// Absolute URL of the decision PDF, when the listing exposes one.
    pub pdf_url: Option<String>,
    pub generated_filename: String,
    pub scraped_at: DateTime<Utc>,
    /// Heuristic relevance in `[0.0, 1.0]`.
    pub relevance: f64,
    pub source: RecordSource,
}

/// Field bag used to build a [`DecisionRecord`].
#[derive(Debug, Clone, Default)]
pub struct DecisionFields {
    pub case_number: String,
    pub judgment_date: Option<NaiveDate>,
    pub publication_date: Option<NaiveDate>,
    pub rapporteur: String,
    pub venue: String,
    pub judging_body: String,
    pub case_class: String,
    pub summary: String,
    pub pdf_url: Option<String>,
}

impl DecisionRecord {
    pub fn new(fields: DecisionFields, relevance: f64, source: RecordSource) -> Self {
        let generated_filename = cnj::decision_filename(&fields.case_number, fields.judgment_date);
        Self {
            case_number: fields.case_number,
            judgment_date: fields.judgment_date,
            publication_date: fields.publication_date,
            rapporteur: fields.rapporteur,
            venue: fields.venue,
            judging_body: fields.judging_body,
            case_class: fields.case_class,
            summary: fields.summary,
            pdf_url: fields.pdf_url,
            generated_filename,
            scraped_at: Utc::now(),
            relevance: relevance.clamp(0.0, 1.0),
            source,
        }
    }

    /// A record is valid when it carries a case number.
    pub fn is_valid(&self) -> bool {
        !self.case_number.trim().is_empty()
    }

    /// Whether [`download_record`](crate::acquisition::Scraper::download_record)
    /// has anything to fetch.
    pub fn is_downloadable(&self) -> bool {
        self.pdf_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

/// Terminal status of a download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Success,
    Failed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadStatus::Success => write!(f, "success"),
            DownloadStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of fetching one PDF.
///
/// `local_path` is set iff `status` is [`DownloadStatus::Success`];
/// `failure_reason` is set iff it is [`DownloadStatus::Failed`].
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    /// Case number of the originating record, when downloaded from one.
    pub case_number: Option<String>,
    pub url: String,
    pub filename: String,
    pub status: DownloadStatus,
    pub local_path: Option<PathBuf>,
    pub byte_size: u64,
    pub content_type: Option<String>,
    /// Hex SHA-256 of the stored payload.
    pub sha256: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts: u32,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }
}

/// One unit of indexed text, loaded from a corpus snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchableChunk {
    pub chunk_id: String,
    pub text: String,
    pub source_file: String,
    pub chunk_index: i64,
    pub embedding: Option<Vec<f32>>,
}

/// Which ranking produced a [`RankedResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Semantic,
    Keyword,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Semantic => write!(f, "semantic"),
            Strategy::Keyword => write!(f, "keyword"),
        }
    }
}

/// A search hit returned by the retrieval engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    /// 1-based, contiguous.
    pub rank: usize,
    /// Relevance in `[0.0, 1.0]`.
    pub score: f64,
    pub chunk_id: String,
    pub text: String,
    pub source_file: String,
    pub chunk_index: i64,
    pub strategy: Strategy,
}
