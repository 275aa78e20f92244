//! Acquisition engine: portal search and PDF download.
//!
//! A [`Scraper`] owns one HTTP session (cookie store, browser-like headers,
//! optional proxy) against the e-SAJ jurisprudence portal. Every request is
//! throttled with a randomized delay and retried a bounded number of times.
//!
//! # Failure handling
//!
//! - Non-2xx responses, transport errors, timeouts, and 2xx pages carrying a
//!   bot-block indicator all count as failed attempts.
//! - When every attempt of a search fails, [`Scraper::search`] returns the
//!   built-in example set from [`crate::fallback`], tagged
//!   [`RecordSource::Fallback`]. It never returns an error for network
//!   problems.
//! - Downloads that fail report a [`DownloadStatus::Failed`] outcome with the
//!   last failure reason. A sidecar metadata file is written either way,
//!   except when a valid PDF from an earlier download already sits at the
//!   target path: its sidecar is left untouched.

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, CONTENT_TYPE, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{PortalConfig, StorageConfig, MAX_DELAY_SECS};
use crate::fallback;
use crate::listing;
use crate::models::{DecisionRecord, DownloadOutcome, DownloadStatus, RecordSource};
use crate::storage::{self, DownloadMetadata};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Per-call overrides for [`Scraper::search_with`].
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    pub timeout: Option<Duration>,
    /// Total attempts for this call. Values below 1 are treated as 1.
    pub max_retries: Option<u32>,
}

/// Counters accumulated over the lifetime of a [`Scraper`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScraperStats {
    pub searches: u64,
    pub attempts: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// HTTP 400/403/429 responses and pages carrying a block indicator.
    pub anti_bot_blocks: u64,
    pub fallback_usages: u64,
    pub cache_hits: u64,
}

/// Per-item result of [`Scraper::download_batch`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub outcomes: Vec<DownloadOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
}

/// Response body accepted by a fetch loop.
struct Payload {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

/// What a fetch loop produced.
struct Fetched {
    payload: Option<Payload>,
    last_error: Option<String>,
    attempts: u32,
}

/// How a 2xx body is judged before the loop accepts it.
#[derive(Clone, Copy)]
enum Expect {
    Listing,
    Pdf,
}

fn is_block_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 400 | 403 | 429)
}

/// Clamp a configured number of seconds into `[0, MAX_DELAY_SECS]`.
fn bounded_secs(secs: f64) -> f64 {
    if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, MAX_DELAY_SECS)
    }
}

/// Uniform random duration in `[min_secs, max_secs]`, both bounded.
fn jitter(min_secs: f64, max_secs: f64) -> Duration {
    let (lo, hi) = (bounded_secs(min_secs), bounded_secs(max_secs));
    let secs = if hi > lo {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        lo
    };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Query string of a full-text acórdão search ordered by relevance.
fn search_params(term: &str) -> Vec<(&'static str, String)> {
    let fixed: [(&'static str, &'static str); 19] = [
        ("dados.pesquisarComSinonimos", "S"),
        ("dados.pesquisarComAcentos", "S"),
        ("dados.buscaEmenta", ""),
        ("dados.nuProcOrigem", ""),
        ("dados.nuRegistro", ""),
        ("agenteSelectedEntitiesList", ""),
        ("contadoragente", "0"),
        ("contadorMagistrdo", "0"),
        ("classeSelected", ""),
        ("codigoAssuntoSelected", ""),
        ("comarcaSelected", ""),
        ("secoesTreeSelection.values", ""),
        ("dadosConsulta.localPesquisa.cdLocal", "-1"),
        ("cbPesquisa", "DOCSLIVOS"),
        ("dados.limparDadosConsultaPublica", "false"),
        ("dadosConsulta.tipoNuProcesso", "UNIFICADO"),
        ("dadosConsulta.tipoPesquisa", ""),
        ("dadosConsulta.pesquisaPalavras", "ACORDA"),
        ("dadosConsulta.ordenacao", "RELEVANCIA"),
    ];
    let mut params = vec![("dados.buscaInteiroTeor", term.to_string())];
    params.extend(fixed.iter().map(|(k, v)| (*k, v.to_string())));
    params
}

/// Session against the jurisprudence portal.
///
/// Mutating operations take `&mut self`: one instance serves one caller at
/// a time.
pub struct Scraper {
    config: PortalConfig,
    download_dir: PathBuf,
    base_url: Url,
    search_url: Url,
    client: reqwest::Client,
    warmed_up: bool,
    cache: HashMap<(String, usize), Vec<DecisionRecord>>,
    stats: ScraperStats,
}

impl Scraper {
    pub fn new(portal: &PortalConfig, storage: &StorageConfig) -> Result<Self> {
        let base_url = Url::parse(&portal.base_url)
            .with_context(|| format!("invalid portal base URL: {}", portal.base_url))?;
        let search_url = base_url
            .join(&portal.search_path)
            .with_context(|| format!("invalid search path: {}", portal.search_path))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&portal.accept_language)
                .context("invalid portal.accept_language header value")?,
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(portal.timeout());
        if let Some(proxy) = &portal.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .with_context(|| format!("invalid proxy URL: {proxy}"))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            config: portal.clone(),
            download_dir: storage.download_dir.clone(),
            base_url,
            search_url,
            client,
            warmed_up: false,
            cache: HashMap::new(),
            stats: ScraperStats::default(),
        })
    }

    pub fn stats(&self) -> ScraperStats {
        self.stats.clone()
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Search the portal for decisions matching `term`.
    ///
    /// Returns at most `max_results` records. Errors only when `term` is
    /// blank or `max_results` is zero.
    pub async fn search(&mut self, term: &str, max_results: usize) -> Result<Vec<DecisionRecord>> {
        self.search_with(term, max_results, &RequestOverrides::default())
            .await
    }

    pub async fn search_with(
        &mut self,
        term: &str,
        max_results: usize,
        overrides: &RequestOverrides,
    ) -> Result<Vec<DecisionRecord>> {
        let term = term.trim();
        if term.is_empty() {
            bail!("search term must not be empty");
        }
        if max_results == 0 {
            bail!("max_results must be >= 1");
        }
        self.stats.searches += 1;

        let key = (term.to_string(), max_results);
        if let Some(cached) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            debug!(term, max_results, "serving search from cache");
            return Ok(cached.clone());
        }

        if self.config.warm_up && !self.warmed_up {
            self.warm_up().await;
        }

        pause(jitter(self.config.delay_min_secs, self.config.delay_max_secs)).await;

        let timeout = overrides.timeout.unwrap_or_else(|| self.config.timeout());
        let max_retries = overrides.max_retries.unwrap_or(self.config.max_retries).max(1);
        let url = self.search_url.clone();
        let params = search_params(term);

        info!(term, max_results, "searching portal");
        let fetched = self
            .fetch(&url, &params, timeout, max_retries, Expect::Listing)
            .await;

        let Some(payload) = fetched.payload else {
            warn!(
                term,
                attempts = fetched.attempts,
                error = fetched.last_error.as_deref().unwrap_or("unknown"),
                "portal unreachable, serving example decisions"
            );
            self.stats.fallback_usages += 1;
            let mut records = fallback::fallback_records(term);
            records.truncate(max_results);
            return Ok(records);
        };

        let html = String::from_utf8_lossy(&payload.bytes);
        let records = listing::parse_listing(&html, &self.base_url, max_results);
        info!(term, found = records.len(), "portal search finished");
        self.cache.insert(key, records.clone());
        Ok(records)
    }

    /// Download `url` into `<download_dir>/<filename>`.
    pub async fn download_pdf(&mut self, url: &str, filename: &str) -> DownloadOutcome {
        self.download(url, filename, None).await
    }

    /// Download the PDF of `record` under its generated filename.
    pub async fn download_record(&mut self, record: &DecisionRecord) -> DownloadOutcome {
        match record.pdf_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                self.download(url, &record.generated_filename, Some(record))
                    .await
            }
            _ => {
                let path = storage::pdf_path(&self.download_dir, &record.generated_filename);
                let outcome = failed_outcome(Some(record), "", &path, "no pdf url", 0);
                self.write_sidecar(&path, &outcome, Some(record)).await;
                outcome
            }
        }
    }

    /// Download every record in order, pausing between items.
    pub async fn download_batch(&mut self, records: &[DecisionRecord]) -> DownloadReport {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            if i > 0 && record.is_downloadable() {
                let interval = self.config.download_interval_secs;
                pause(jitter(interval, interval)).await;
            }
            info!(
                item = i + 1,
                total = records.len(),
                case_number = %record.case_number,
                "downloading decision"
            );
            outcomes.push(self.download_record(record).await);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        info!(succeeded, failed, "batch download finished");

        DownloadReport {
            outcomes,
            succeeded,
            failed,
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    }

    async fn download(
        &mut self,
        url: &str,
        filename: &str,
        record: Option<&DecisionRecord>,
    ) -> DownloadOutcome {
        let path = storage::pdf_path(&self.download_dir, filename);

        let target = match self.base_url.join(url.trim()) {
            Ok(u) => u,
            Err(e) => {
                let reason = format!("invalid url: {e}");
                warn!(url, %reason, "download skipped");
                let outcome = failed_outcome(record, url, &path, &reason, 0);
                self.write_sidecar(&path, &outcome, record).await;
                return outcome;
            }
        };

        let timeout = self.config.timeout();
        let max_retries = self.config.max_retries.max(1);
        let fetched = self
            .fetch(&target, &[], timeout, max_retries, Expect::Pdf)
            .await;

        let outcome = match fetched.payload {
            Some(payload) => match storage::store_pdf(&path, &payload.bytes).await {
                Ok(()) => {
                    info!(url = %target, path = %path.display(), bytes = payload.bytes.len(), "PDF stored");
                    DownloadOutcome {
                        case_number: record.map(|r| r.case_number.clone()),
                        url: target.to_string(),
                        filename: file_name(&path),
                        status: DownloadStatus::Success,
                        local_path: Some(path.clone()),
                        byte_size: payload.bytes.len() as u64,
                        content_type: payload.content_type,
                        sha256: Some(storage::sha256_hex(&payload.bytes)),
                        failure_reason: None,
                        attempts: fetched.attempts,
                    }
                }
                Err(e) => {
                    warn!(url = %target, error = %e, "failed to store PDF");
                    failed_outcome(record, target.as_str(), &path, &format!("{e:#}"), fetched.attempts)
                }
            },
            None => {
                let reason = fetched
                    .last_error
                    .unwrap_or_else(|| "download failed".to_string());
                warn!(url = %target, attempts = fetched.attempts, %reason, "PDF download failed");
                failed_outcome(record, target.as_str(), &path, &reason, fetched.attempts)
            }
        };

        self.write_sidecar(&path, &outcome, record).await;
        outcome
    }

    /// Record `outcome` next to `path`. A failure never replaces the
    /// metadata of a PDF already stored there.
    async fn write_sidecar(&self, path: &Path, outcome: &DownloadOutcome, record: Option<&DecisionRecord>) {
        if !outcome.is_success() && storage::holds_pdf(path).await {
            warn!(
                path = %path.display(),
                "keeping metadata of previously stored PDF after failed download"
            );
            return;
        }
        let metadata = DownloadMetadata::new(outcome, record);
        if let Err(e) = storage::write_metadata(path, &metadata).await {
            warn!(path = %path.display(), error = %e, "failed to write download metadata");
        }
    }

    async fn warm_up(&mut self) {
        self.warmed_up = true;
        let url = match self.base_url.join(&self.config.warm_up_path) {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "invalid warm-up path");
                return;
            }
        };
        let ua = self.pick_user_agent();
        match self.client.get(url.clone()).header(USER_AGENT, ua).send().await {
            Ok(resp) => debug!(url = %url, status = resp.status().as_u16(), "session warmed up"),
            Err(e) => warn!(url = %url, error = %e, "session warm-up failed"),
        }
    }

    fn pick_user_agent(&self) -> String {
        self.config
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    /// Run up to `max_retries` attempts against `url`, sleeping a randomized
    /// backoff between them.
    async fn fetch(
        &mut self,
        url: &Url,
        params: &[(&'static str, String)],
        timeout: Duration,
        max_retries: u32,
        expect: Expect,
    ) -> Fetched {
        let mut last_error = None;

        for attempt in 1..=max_retries {
            if attempt > 1 {
                pause(jitter(
                    self.config.retry_delay_min_secs,
                    self.config.retry_delay_max_secs,
                ))
                .await;
            }
            self.stats.attempts += 1;

            let mut request = self
                .client
                .get(url.clone())
                .header(USER_AGENT, self.pick_user_agent())
                .timeout(timeout);
            if !params.is_empty() {
                request = request.query(params);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let reason = if e.is_timeout() {
                        "request timed out".to_string()
                    } else {
                        format!("request failed: {e}")
                    };
                    warn!(attempt, max_retries, url = %url, %reason, "attempt failed");
                    self.stats.failed_requests += 1;
                    last_error = Some(reason);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                if is_block_status(status) {
                    self.stats.anti_bot_blocks += 1;
                }
                warn!(attempt, max_retries, url = %url, status = status.as_u16(), "attempt failed");
                self.stats.failed_requests += 1;
                last_error = Some(format!("HTTP {}", status.as_u16()));
                continue;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = match response.bytes().await {
                Ok(b) => b.to_vec(),
                Err(e) => {
                    warn!(attempt, max_retries, url = %url, error = %e, "failed to read body");
                    self.stats.failed_requests += 1;
                    last_error = Some(format!("failed to read body: {e}"));
                    continue;
                }
            };

            if let Err(reason) = self.judge(expect, &bytes, content_type.as_deref()) {
                warn!(attempt, max_retries, url = %url, %reason, "response rejected");
                self.stats.failed_requests += 1;
                last_error = Some(reason);
                continue;
            }

            self.stats.successful_requests += 1;
            debug!(attempt, url = %url, bytes = bytes.len(), "attempt succeeded");
            return Fetched {
                payload: Some(Payload { bytes, content_type }),
                last_error: None,
                attempts: attempt,
            };
        }

        Fetched {
            payload: None,
            last_error,
            attempts: max_retries,
        }
    }

    fn judge(&mut self, expect: Expect, bytes: &[u8], content_type: Option<&str>) -> Result<(), String> {
        match expect {
            Expect::Listing => {
                let body = String::from_utf8_lossy(bytes);
                if let Some(indicator) = listing::detect_block(&body) {
                    self.stats.anti_bot_blocks += 1;
                    return Err(format!("blocked by portal ({indicator})"));
                }
                Ok(())
            }
            Expect::Pdf => {
                if bytes.is_empty() {
                    return Err("empty payload".to_string());
                }
                if let Some(ct) = content_type {
                    if !ct.to_ascii_lowercase().contains("pdf") {
                        debug!(content_type = ct, "unexpected content type for PDF");
                    }
                }
                if !storage::is_pdf(bytes) {
                    return Err("payload is not a PDF".to_string());
                }
                Ok(())
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn failed_outcome(
    record: Option<&DecisionRecord>,
    url: &str,
    path: &Path,
    reason: &str,
    attempts: u32,
) -> DownloadOutcome {
    DownloadOutcome {
        case_number: record.map(|r| r.case_number.clone()),
        url: url.to_string(),
        filename: file_name(path),
        status: DownloadStatus::Failed,
        local_path: None,
        byte_size: 0,
        content_type: None,
        sha256: None,
        failure_reason: Some(reason.to_string()),
        attempts,
    }
}

/// Whether every record of a result set came from the live portal.
pub fn all_from_origin(records: &[DecisionRecord]) -> bool {
    records.iter().all(|r| r.source == RecordSource::Origin)
}
