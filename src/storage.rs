//! On-disk layout for downloaded decisions.
//!
//! Each download produces `<download_dir>/<name>.pdf` plus a sibling
//! `<name>_metadata.json` describing the case and the transfer. PDFs are
//! written to a temporary file first and renamed into place, so the final
//! path only ever holds a validated payload.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::models::{DecisionRecord, DownloadOutcome, DownloadStatus};

/// Leading bytes of every PDF file.
pub const PDF_MAGIC: &[u8] = b"%PDF";

const SUMMARY_EXCERPT_CHARS: usize = 500;

/// Whether `bytes` starts with the PDF signature.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Reduce a caller-supplied name to a single safe path component ending in
/// `.pdf`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned = if cleaned.is_empty() { "documento" } else { cleaned };
    if cleaned.to_ascii_lowercase().ends_with(".pdf") {
        cleaned.to_string()
    } else {
        format!("{cleaned}.pdf")
    }
}

/// Final location of a PDF inside `dir`.
pub fn pdf_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(sanitize_filename(filename))
}

/// Sidecar path: `foo.pdf` → `foo_metadata.json`.
pub fn metadata_path(pdf_path: &Path) -> PathBuf {
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "documento".to_string());
    pdf_path.with_file_name(format!("{stem}_metadata.json"))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Atomically store a validated PDF payload at `path`.
pub async fn store_pdf(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .context("PDF path has no parent directory")?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;

    let tmp = dir.join(format!(".{}.part", Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("failed to write temporary file: {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("failed to move PDF into place: {}", path.display()));
    }
    Ok(())
}

/// Whether `path` already holds a file starting with the PDF signature.
pub async fn holds_pdf(path: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut head = [0u8; PDF_MAGIC.len()];
    file.read_exact(&mut head).await.is_ok() && is_pdf(&head)
}

/// Sidecar JSON written next to every download attempt.
#[derive(Debug, Serialize)]
pub struct DownloadMetadata {
    pub case_number: Option<String>,
    pub judgment_date: Option<String>,
    pub publication_date: Option<String>,
    pub rapporteur: Option<String>,
    pub venue: Option<String>,
    pub judging_body: Option<String>,
    pub case_class: Option<String>,
    pub summary_excerpt: Option<String>,
    pub pdf_url: String,
    pub filename: String,
    pub local_path: Option<String>,
    pub download_status: DownloadStatus,
    pub failure_reason: Option<String>,
    pub file_size_bytes: u64,
    pub content_type: Option<String>,
    pub sha256: Option<String>,
    pub scraped_at: Option<String>,
    pub downloaded_at: String,
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn portal_date(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%d/%m/%Y").to_string())
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

impl DownloadMetadata {
    pub fn new(outcome: &DownloadOutcome, record: Option<&DecisionRecord>) -> Self {
        Self {
            case_number: outcome.case_number.clone(),
            judgment_date: record.and_then(|r| portal_date(r.judgment_date)),
            publication_date: record.and_then(|r| portal_date(r.publication_date)),
            rapporteur: record.and_then(|r| non_empty(&r.rapporteur)),
            venue: record.and_then(|r| non_empty(&r.venue)),
            judging_body: record.and_then(|r| non_empty(&r.judging_body)),
            case_class: record.and_then(|r| non_empty(&r.case_class)),
            summary_excerpt: record
                .and_then(|r| non_empty(&r.summary))
                .map(|s| s.chars().take(SUMMARY_EXCERPT_CHARS).collect()),
            pdf_url: outcome.url.clone(),
            filename: outcome.filename.clone(),
            local_path: outcome
                .local_path
                .as_ref()
                .map(|p| p.display().to_string()),
            download_status: outcome.status,
            failure_reason: outcome.failure_reason.clone(),
            file_size_bytes: outcome.byte_size,
            content_type: outcome.content_type.clone(),
            sha256: outcome.sha256.clone(),
            scraped_at: record.map(|r| iso(r.scraped_at)),
            downloaded_at: iso(Utc::now()),
        }
    }
}

/// Write the sidecar JSON for `pdf_path`.
pub async fn write_metadata(pdf_path: &Path, metadata: &DownloadMetadata) -> Result<PathBuf> {
    let path = metadata_path(pdf_path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let mut data = serde_json::to_vec_pretty(metadata)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;
    data.push(b'\n');
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(b"%PDF-1.7\n..."));
        assert!(!is_pdf(b"<html>erro</html>"));
        assert!(!is_pdf(b"%PD"));
        assert!(!is_pdf(b""));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("15-03-2023_1001234-56_2023_8_26_0100.pdf"), "15-03-2023_1001234-56_2023_8_26_0100.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd.pdf");
        assert_eq!(sanitize_filename("acórdão 1"), "ac_rd_o_1.pdf");
        assert_eq!(sanitize_filename(".."), "documento.pdf");
        assert_eq!(sanitize_filename("X.PDF"), "X.PDF");
    }

    #[test]
    fn test_metadata_path() {
        let p = Path::new("/data/raw_pdfs/15-03-2023_1001234.pdf");
        assert_eq!(
            metadata_path(p),
            PathBuf::from("/data/raw_pdfs/15-03-2023_1001234_metadata.json")
        );
    }

    #[tokio::test]
    async fn test_holds_pdf() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pdf = tmp.path().join("a.pdf");
        assert!(!holds_pdf(&pdf).await);
        store_pdf(&pdf, b"%PDF-1.4 corpo").await.unwrap();
        assert!(holds_pdf(&pdf).await);

        let html = tmp.path().join("b.pdf");
        std::fs::write(&html, b"<html>").unwrap();
        assert!(!holds_pdf(&html).await);
        std::fs::write(&html, b"%P").unwrap();
        assert!(!holds_pdf(&html).await);
    }

    #[tokio::test]
    async fn test_store_pdf_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = pdf_path(tmp.path(), "a.pdf");
        store_pdf(&path, b"%PDF-1.4 one").await.unwrap();
        store_pdf(&path, b"%PDF-1.4 one").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 one");
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
