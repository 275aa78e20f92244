//! Acquisition engine against a local mock of the portal.
//!
//! Each test starts an axum server on `127.0.0.1:0` whose behaviour is
//! scripted per request, so retries, blocks and payload validation can be
//! observed without touching the real portal.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use jurisprudencia::acquisition::{RequestOverrides, Scraper};
use jurisprudencia::config::{PortalConfig, StorageConfig};
use jurisprudencia::models::{DecisionFields, DecisionRecord, DownloadStatus, RecordSource};

const LISTING: &str = r#"
<html><body><table>
<tr class="fundocinza1"><td>
  <a cdacordao="101" cdforo="0">1001234-88.2023.8.26.0100</a>
  <strong>Relator(a):</strong> João Silva Santos
  <strong>Órgão julgador:</strong> 5ª Câmara de Direito Privado
  <strong>Data do julgamento:</strong> 15/03/2023
  <strong>Ementa:</strong> APELAÇÃO CÍVEL - DANO MORAL - NEGATIVAÇÃO INDEVIDA.
</td></tr>
<tr class="fundocinza1"><td>
  <a cdacordao="102" cdforo="0">2005678-66.2023.8.26.0224</a>
  <strong>Data do julgamento:</strong> 10/03/2023
  <strong>Ementa:</strong> RESPONSABILIDADE CIVIL - DANO MORAL.
</td></tr>
<tr class="fundocinza1"><td>
  <a cdacordao="103" cdforo="0">0000001-15.2019.8.26.0100</a>
  <strong>Ementa:</strong> COBRANÇA INDEVIDA.
</td></tr>
</table></body></html>"#;

const EMPTY_LISTING: &str = "<html><body><p>Nenhum resultado encontrado.</p></body></html>";
const CAPTCHA_PAGE: &str = "<html><body>Please complete the CAPTCHA to continue</body></html>";
const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\n%%EOF";

/// One scripted reply.
#[derive(Clone)]
enum Reply {
    Status(u16),
    Html(&'static str),
    Pdf,
    Bytes(&'static str, &'static [u8]),
    /// Answer with an empty listing after the given delay.
    Stall(Duration),
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Status(code) => StatusCode::from_u16(code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response(),
            Reply::Html(body) => ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response(),
            Reply::Pdf => ([(header::CONTENT_TYPE, "application/pdf")], PDF_BYTES).into_response(),
            Reply::Bytes(ct, body) => ([(header::CONTENT_TYPE, ct)], body).into_response(),
            Reply::Stall(_) => Reply::Html(EMPTY_LISTING).into_response(),
        }
    }
}

/// Replies served in order; the last one repeats forever.
#[derive(Clone)]
struct Script {
    replies: Arc<Mutex<Vec<Reply>>>,
    hits: Arc<AtomicUsize>,
    agents: Arc<Mutex<Vec<String>>>,
}

impl Script {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            hits: Arc::new(AtomicUsize::new(0)),
            agents: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn next(&self) -> Reply {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies[0].clone()
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// `User-Agent` header of every request seen so far.
    fn agents(&self) -> Vec<String> {
        self.agents.lock().unwrap().clone()
    }
}

async fn scripted(State(script): State<Script>, headers: HeaderMap) -> Reply {
    if let Some(ua) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        script.agents.lock().unwrap().push(ua.to_string());
    }
    let reply = script.next();
    if let Reply::Stall(delay) = reply {
        tokio::time::sleep(delay).await;
    }
    reply
}

struct MockPortal {
    base_url: String,
    search: Script,
    pdf: Script,
    warm_up: Script,
}

async fn start_portal(search: Vec<Reply>, pdf: Vec<Reply>) -> MockPortal {
    let search = Script::new(search);
    let pdf = Script::new(pdf);
    let warm_up = Script::new(vec![Reply::Html("<html>ok</html>")]);

    let app = Router::new()
        .route(
            "/cjsg/resultadoCompleta.do",
            get(scripted).with_state(search.clone()),
        )
        .route("/cjsg/getArquivo.do", get(scripted).with_state(pdf.clone()))
        .route(
            "/cjsg/consultaCompleta.do",
            get(scripted).with_state(warm_up.clone()),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockPortal {
        base_url: format!("http://{}", addr),
        search,
        pdf,
        warm_up,
    }
}

fn portal_config(base_url: &str) -> PortalConfig {
    PortalConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5,
        ..PortalConfig::default()
    }
    .without_delays()
}

fn scraper_with(config: &PortalConfig, dir: &Path) -> Scraper {
    let storage = StorageConfig {
        download_dir: dir.to_path_buf(),
    };
    Scraper::new(config, &storage).unwrap()
}

fn scraper_for(portal: &MockPortal, dir: &Path) -> Scraper {
    scraper_with(&portal_config(&portal.base_url), dir)
}

fn read_sidecar(path: &Path) -> serde_json::Value {
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}

// ============ search ============

#[tokio::test]
async fn failing_origin_serves_fallback_after_exact_attempts() {
    let portal = start_portal(vec![Reply::Status(500)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let records = scraper.search("dano moral", 2).await.unwrap();

    assert_eq!(portal.search.hits(), 3);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.source == RecordSource::Fallback));
    assert_eq!(records[0].case_number, "1001234-88.2023.8.26.0100");
    assert_eq!(records[1].case_number, "2002345-90.2023.8.26.0100");

    let stats = scraper.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failed_requests, 3);
    assert_eq!(stats.fallback_usages, 1);
    assert_eq!(stats.anti_bot_blocks, 0);
}

#[tokio::test]
async fn fallback_is_not_cached() {
    let portal = start_portal(vec![Reply::Status(503)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    scraper.search("dano moral", 2).await.unwrap();
    scraper.search("dano moral", 2).await.unwrap();

    assert_eq!(portal.search.hits(), 6);
    assert_eq!(scraper.stats().cache_hits, 0);
    assert_eq!(scraper.stats().fallback_usages, 2);
}

#[tokio::test]
async fn overrides_bound_the_retry_budget() {
    let portal = start_portal(vec![Reply::Status(500)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let overrides = RequestOverrides {
        timeout: Some(Duration::from_secs(2)),
        max_retries: Some(1),
    };
    let records = scraper
        .search_with("execução", 5, &overrides)
        .await
        .unwrap();

    assert_eq!(portal.search.hits(), 1);
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.source == RecordSource::Fallback));
}

#[tokio::test]
async fn slow_origin_times_out_on_every_attempt() {
    let portal = start_portal(
        vec![Reply::Stall(Duration::from_millis(1500))],
        vec![Reply::Pdf],
    )
    .await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let overrides = RequestOverrides {
        timeout: Some(Duration::from_millis(200)),
        max_retries: None,
    };
    let records = scraper
        .search_with("dano moral", 3, &overrides)
        .await
        .unwrap();

    assert_eq!(portal.search.hits(), 3);
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.source == RecordSource::Fallback));
    assert_eq!(scraper.stats().attempts, 3);
    assert_eq!(scraper.stats().failed_requests, 3);
}

#[tokio::test]
async fn closed_port_exhausts_default_budget() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let tmp = TempDir::new().unwrap();
    let config = portal_config(&format!("http://{addr}"));
    assert_eq!(config.max_retries, 3);
    let mut scraper = scraper_with(&config, tmp.path());

    let records = scraper.search("agravo", 1).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, RecordSource::Fallback);
    let stats = scraper.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failed_requests, 3);
    assert_eq!(stats.successful_requests, 0);
    assert_eq!(stats.fallback_usages, 1);
}

#[tokio::test]
async fn warm_up_runs_once_and_agents_rotate_within_config() {
    let portal = start_portal(vec![Reply::Status(500), Reply::Html(LISTING)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let agents = vec!["juris-test-a/1.0".to_string(), "juris-test-b/1.0".to_string()];
    let config = PortalConfig {
        warm_up: true,
        user_agents: agents.clone(),
        ..portal_config(&portal.base_url)
    };
    let mut scraper = scraper_with(&config, tmp.path());

    scraper.search("dano moral", 5).await.unwrap();
    scraper.search("locação", 5).await.unwrap();

    assert_eq!(portal.warm_up.hits(), 1);
    assert_eq!(portal.search.hits(), 3);
    let seen = portal.search.agents();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|ua| agents.contains(ua)));
    assert!(portal.warm_up.agents().iter().all(|ua| agents.contains(ua)));
}

#[tokio::test]
async fn listing_is_parsed_ranked_and_cached() {
    let portal = start_portal(vec![Reply::Html(LISTING)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let records = scraper.search("dano moral", 2).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.source == RecordSource::Origin));
    assert_eq!(records[0].case_number, "1001234-88.2023.8.26.0100");
    assert_eq!(records[0].rapporteur, "João Silva Santos");
    assert_eq!(records[0].generated_filename, "15-03-2023_1001234-88_2023_8_26_0100.pdf");
    assert!(records[0].relevance > records[1].relevance);
    assert_eq!(
        records[0].pdf_url.as_deref(),
        Some(format!("{}/cjsg/getArquivo.do?cdAcordao=101&cdForo=0", portal.base_url).as_str())
    );

    let again = scraper.search("dano moral", 2).await.unwrap();
    assert_eq!(again, records);
    assert_eq!(portal.search.hits(), 1);
    assert_eq!(scraper.stats().cache_hits, 1);
    assert_eq!(scraper.stats().searches, 2);
}

#[tokio::test]
async fn reachable_origin_without_matches_returns_empty() {
    let portal = start_portal(vec![Reply::Html(EMPTY_LISTING)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let records = scraper.search("termo sem resultados", 5).await.unwrap();
    assert!(records.is_empty());
    assert_eq!(portal.search.hits(), 1);
    assert_eq!(scraper.stats().fallback_usages, 0);
}

#[tokio::test]
async fn block_page_is_retried_then_parsed() {
    let portal = start_portal(
        vec![Reply::Html(CAPTCHA_PAGE), Reply::Status(403), Reply::Html(LISTING)],
        vec![Reply::Pdf],
    )
    .await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let records = scraper.search("dano moral", 10).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.source == RecordSource::Origin));

    let stats = scraper.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.anti_bot_blocks, 2);
    assert_eq!(stats.successful_requests, 1);
}

#[tokio::test]
async fn contract_errors_do_not_touch_network() {
    let portal = start_portal(vec![Reply::Html(LISTING)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    assert!(scraper.search("", 5).await.is_err());
    assert!(scraper.search("dano", 0).await.is_err());
    assert_eq!(portal.search.hits(), 0);
}

// ============ download ============

#[tokio::test]
async fn valid_pdf_is_stored_with_sidecar() {
    let portal = start_portal(vec![Reply::Html(LISTING)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let url = format!("{}/cjsg/getArquivo.do?cdAcordao=1&cdForo=0", portal.base_url);
    let outcome = scraper.download_pdf(&url, "decisao.pdf").await;

    assert_eq!(outcome.status, DownloadStatus::Success);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.byte_size, PDF_BYTES.len() as u64);
    let path = tmp.path().join("decisao.pdf");
    assert_eq!(outcome.local_path.as_deref(), Some(path.as_path()));
    assert_eq!(std::fs::read(&path).unwrap(), PDF_BYTES);

    let meta = read_sidecar(&tmp.path().join("decisao_metadata.json"));
    assert_eq!(meta["download_status"], "success");
    assert_eq!(meta["file_size_bytes"], PDF_BYTES.len());
    assert_eq!(meta["content_type"], "application/pdf");
    assert_eq!(meta["pdf_url"], url.as_str());
    assert!(meta["downloaded_at"].as_str().unwrap().ends_with('Z'));

    // Repeating the download leaves the same file in place.
    let again = scraper.download_pdf(&url, "decisao.pdf").await;
    assert!(again.is_success());
    assert_eq!(std::fs::read(&path).unwrap(), PDF_BYTES);
    let entries = std::fs::read_dir(tmp.path()).unwrap().count();
    assert_eq!(entries, 2);
}

#[tokio::test]
async fn failed_retry_keeps_metadata_of_stored_pdf() {
    let portal = start_portal(
        vec![Reply::Html(LISTING)],
        vec![Reply::Pdf, Reply::Status(503)],
    )
    .await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let url = format!("{}/cjsg/getArquivo.do?cdAcordao=7&cdForo=0", portal.base_url);
    let first = scraper.download_pdf(&url, "x.pdf").await;
    let second = scraper.download_pdf(&url, "x.pdf").await;

    assert!(first.is_success());
    assert_eq!(second.status, DownloadStatus::Failed);
    assert_eq!(portal.pdf.hits(), 4);

    let path = tmp.path().join("x.pdf");
    assert_eq!(std::fs::read(&path).unwrap(), PDF_BYTES);
    let meta = read_sidecar(&tmp.path().join("x_metadata.json"));
    assert_eq!(meta["download_status"], "success");
    assert_eq!(meta["local_path"], path.display().to_string());
    assert_eq!(meta["file_size_bytes"], PDF_BYTES.len());
}

#[tokio::test]
async fn html_error_page_is_rejected_even_with_200() {
    let portal = start_portal(
        vec![Reply::Html(LISTING)],
        vec![Reply::Html("<html><body>Erro ao gerar documento</body></html>")],
    )
    .await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let url = format!("{}/cjsg/getArquivo.do?cdAcordao=1", portal.base_url);
    let outcome = scraper.download_pdf(&url, "erro.pdf").await;

    assert_eq!(outcome.status, DownloadStatus::Failed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(portal.pdf.hits(), 3);
    assert!(outcome.local_path.is_none());
    assert!(outcome.failure_reason.as_deref().unwrap().contains("not a PDF"));
    assert!(!tmp.path().join("erro.pdf").exists());

    let meta = read_sidecar(&tmp.path().join("erro_metadata.json"));
    assert_eq!(meta["download_status"], "failed");
    assert_eq!(meta["local_path"], serde_json::Value::Null);
}

#[tokio::test]
async fn empty_payload_is_rejected() {
    let portal = start_portal(
        vec![Reply::Html(LISTING)],
        vec![Reply::Bytes("application/pdf", b"")],
    )
    .await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let url = format!("{}/cjsg/getArquivo.do", portal.base_url);
    let outcome = scraper.download_pdf(&url, "vazio.pdf").await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.failure_reason.as_deref(), Some("empty payload"));
    assert!(!tmp.path().join("vazio.pdf").exists());
}

#[tokio::test]
async fn transient_failure_then_pdf_succeeds() {
    let portal = start_portal(
        vec![Reply::Html(LISTING)],
        vec![Reply::Status(502), Reply::Pdf],
    )
    .await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let url = format!("{}/cjsg/getArquivo.do", portal.base_url);
    let outcome = scraper.download_pdf(&url, "flaky.pdf").await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(portal.pdf.hits(), 2);
}

#[tokio::test]
async fn filename_cannot_escape_download_dir() {
    let portal = start_portal(vec![Reply::Html(LISTING)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("pdfs");
    let mut scraper = scraper_for(&portal, &dir);

    let url = format!("{}/cjsg/getArquivo.do", portal.base_url);
    let outcome = scraper.download_pdf(&url, "../../fora.pdf").await;

    assert!(outcome.is_success());
    let stored = outcome.local_path.unwrap();
    assert!(stored.starts_with(&dir));
    assert!(!tmp.path().join("fora.pdf").exists());
}

#[tokio::test]
async fn search_then_batch_download() {
    let portal = start_portal(vec![Reply::Html(LISTING)], vec![Reply::Pdf]).await;
    let tmp = TempDir::new().unwrap();
    let mut scraper = scraper_for(&portal, tmp.path());

    let mut records = scraper.search("dano moral", 10).await.unwrap();
    records.push(DecisionRecord::new(
        DecisionFields {
            case_number: "3003456-92.2023.8.26.0100".to_string(),
            ..Default::default()
        },
        0.1,
        RecordSource::Origin,
    ));

    let report = scraper.download_batch(&records).await;
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.outcomes[3].failure_reason.as_deref(), Some("no pdf url"));
    assert_eq!(portal.pdf.hits(), 3);

    let first = &records[0];
    assert!(tmp.path().join(&first.generated_filename).exists());
    let meta = read_sidecar(&tmp.path().join("15-03-2023_1001234-88_2023_8_26_0100_metadata.json"));
    assert_eq!(meta["case_number"], "1001234-88.2023.8.26.0100");
    assert_eq!(meta["rapporteur"], "João Silva Santos");
    assert_eq!(meta["judgment_date"], "15/03/2023");
    assert_eq!(meta["download_status"], "success");
}
