//! Defensive parser for the portal's search-result listing.
//!
//! The page structure changes between portal versions, so the parser tries
//! several container layouts in order and reads fields by their visible
//! labels rather than by position in the markup.
//!
//! | Layout | Selectors |
//! |--------|-----------|
//! | classic e-SAJ rows | `tr.fundocinza1`, `div.fundocinza1` |
//! | result tables / cards | `table[id*=resultado]`, `.unj-resultado-pesquisa`, `div.resultado` |

use chrono::NaiveDate;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::cnj;
use crate::models::{DecisionFields, DecisionRecord, RecordSource};

const LAYOUTS: &[&str] = &[
    "tr.fundocinza1, div.fundocinza1",
    "table[id*=resultado], .unj-resultado-pesquisa, div.resultado",
];

/// Summary length used when a block has no `Ementa:` label.
const SUMMARY_FALLBACK_CHARS: usize = 500;

/// Phrases that mark an anti-automation interstitial instead of results.
const BLOCK_INDICATORS: &[&str] = &[
    "captcha",
    "access denied",
    "acesso negado",
    "bot detected",
    "security check",
    "unusual traffic",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Rapporteur,
    Venue,
    JudgingBody,
    JudgmentDate,
    PublicationDate,
    RegistrationDate,
    CaseClass,
    Summary,
}

const LABELS: &[(&str, Field)] = &[
    ("Relator(a):", Field::Rapporteur),
    ("Relator:", Field::Rapporteur),
    ("Comarca:", Field::Venue),
    ("Órgão julgador:", Field::JudgingBody),
    ("Órgão Julgador:", Field::JudgingBody),
    ("Data do julgamento:", Field::JudgmentDate),
    ("Data do Julgamento:", Field::JudgmentDate),
    ("Data de publicação:", Field::PublicationDate),
    ("Data de Publicação:", Field::PublicationDate),
    ("Data de registro:", Field::RegistrationDate),
    ("Data de Registro:", Field::RegistrationDate),
    ("Classe/Assunto:", Field::CaseClass),
    ("Classe:", Field::CaseClass),
    ("Ementa:", Field::Summary),
];

/// Return the first anti-bot indicator present in `body`, if any.
pub fn detect_block(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    BLOCK_INDICATORS.iter().copied().find(|i| lower.contains(i))
}

/// Parse a portal date (`dd/mm/yyyy`, also `-` or `.` separated) found
/// anywhere in `raw`.
pub fn parse_portal_date(raw: &str) -> Option<NaiveDate> {
    raw.split_whitespace().find_map(|token| {
        let token = token.trim_matches(|c: char| !c.is_ascii_digit());
        let normalized = token.replace(['-', '.'], "/");
        NaiveDate::parse_from_str(&normalized, "%d/%m/%Y").ok()
    })
}

/// Heuristic relevance by listing position when the portal provides none.
pub fn positional_relevance(index: usize) -> f64 {
    (0.9 - 0.1 * index as f64).max(0.0)
}

/// Parse up to `max_results` decisions from a listing page.
///
/// Blocks without a recognizable case number get a `TJSP-<n>` placeholder
/// instead of being discarded. Returns an empty vector when no layout
/// matches.
pub fn parse_listing(html: &str, base_url: &Url, max_results: usize) -> Vec<DecisionRecord> {
    let document = Html::parse_document(html);

    let blocks = match find_blocks(&document) {
        Some(blocks) => blocks,
        None => {
            warn!("no known result layout matched the listing page");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for block in blocks {
        if records.len() >= max_results {
            break;
        }
        let text = block_text(&block);
        if text.is_empty() {
            continue;
        }
        let index = records.len();
        let fields = extract_fields(&block, &text, base_url, index);
        if !cnj::validate(&fields.case_number) {
            debug!(case_number = %fields.case_number, "case number fails CNJ check digits");
        }
        records.push(DecisionRecord::new(fields, positional_relevance(index), RecordSource::Origin));
    }
    records
}

fn find_blocks(document: &Html) -> Option<Vec<ElementRef<'_>>> {
    for layout in LAYOUTS {
        let Ok(selector) = Selector::parse(layout) else {
            continue;
        };
        let blocks: Vec<ElementRef<'_>> = document.select(&selector).collect();
        if !blocks.is_empty() {
            debug!(layout, count = blocks.len(), "listing layout matched");
            return Some(blocks);
        }
    }
    None
}

fn block_text(block: &ElementRef<'_>) -> String {
    let joined = block.text().collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_fields(block: &ElementRef<'_>, text: &str, base_url: &Url, index: usize) -> DecisionFields {
    let labelled = labelled_values(text);
    let get = |field: Field| -> String {
        labelled
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };

    let case_number = cnj::find_case_number(text)
        .map(str::to_string)
        .unwrap_or_else(|| format!("TJSP-{}", index + 1));

    let summary = match get(Field::Summary) {
        s if !s.is_empty() => s,
        _ => truncate_chars(text, SUMMARY_FALLBACK_CHARS),
    };

    let publication = get(Field::PublicationDate);
    let publication_date = parse_portal_date(&publication)
        .or_else(|| parse_portal_date(&get(Field::RegistrationDate)));

    let judgment = get(Field::JudgmentDate);
    let judgment_date = parse_portal_date(&judgment).or_else(|| {
        // Older layouts print a bare date without a label.
        if labelled.is_empty() {
            parse_portal_date(text)
        } else {
            None
        }
    });

    DecisionFields {
        case_number,
        judgment_date,
        publication_date,
        rapporteur: get(Field::Rapporteur),
        venue: get(Field::Venue),
        judging_body: get(Field::JudgingBody),
        case_class: get(Field::CaseClass),
        summary,
        pdf_url: pdf_link(block, base_url),
    }
}

/// Split `text` at every known label; each value runs to the next label.
fn labelled_values(text: &str) -> Vec<(Field, String)> {
    let mut hits: Vec<(usize, usize, Field)> = Vec::new();
    for (label, field) in LABELS {
        let Some(pos) = text.find(label) else {
            continue;
        };
        // Label variants share a field; the earliest occurrence wins.
        match hits.iter_mut().find(|(_, _, f)| f == field) {
            Some(existing) if pos < existing.0 => *existing = (pos, label.len(), *field),
            Some(_) => {}
            None => hits.push((pos, label.len(), *field)),
        }
    }
    hits.sort_by_key(|(pos, _, _)| *pos);

    let mut values = Vec::with_capacity(hits.len());
    for (i, (pos, len, field)) in hits.iter().enumerate() {
        let start = pos + len;
        let end = hits.get(i + 1).map(|(next, _, _)| *next).unwrap_or(text.len());
        if start <= end {
            values.push((*field, text[start..end].trim().to_string()));
        }
    }
    values
}

fn pdf_link(block: &ElementRef<'_>, base_url: &Url) -> Option<String> {
    if let Ok(sel) = Selector::parse("a[cdacordao]") {
        if let Some(anchor) = block.select(&sel).next() {
            let cd = anchor.value().attr("cdacordao").unwrap_or_default().trim();
            let foro = anchor.value().attr("cdforo").unwrap_or("0").trim();
            if !cd.is_empty() {
                let mut url = base_url.join("/cjsg/getArquivo.do").ok()?;
                url.query_pairs_mut()
                    .append_pair("cdAcordao", cd)
                    .append_pair("cdForo", if foro.is_empty() { "0" } else { foro });
                return Some(url.to_string());
            }
        }
    }

    let sel = Selector::parse("a[href*=\"getArquivo.do\"]").ok()?;
    let href = block.select(&sel).next()?.value().attr("href")?;
    base_url.join(href).ok().map(|u| u.to_string())
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://esaj.tjsp.jus.br").unwrap()
    }

    const CLASSIC: &str = r#"
<html><body><table>
<tr class="fundocinza1"><td>
  <a class="esajLinkLogin downloadEmenta" cdacordao="16789123" cdforo="0">1001234-88.2023.8.26.0100</a>
  <table>
    <tr class="ementaClass2"><td><strong>Classe/Assunto:</strong> Apelação Cível / Indenização por Dano Moral</td></tr>
    <tr class="ementaClass2"><td><strong>Relator(a):</strong> João Silva Santos</td></tr>
    <tr class="ementaClass2"><td><strong>Comarca:</strong> São Paulo</td></tr>
    <tr class="ementaClass2"><td><strong>Órgão julgador:</strong> 5ª Câmara de Direito Privado</td></tr>
    <tr class="ementaClass2"><td><strong>Data do julgamento:</strong> 15/03/2023</td></tr>
    <tr class="ementaClass2"><td><strong>Data de publicação:</strong> 20/03/2023</td></tr>
    <tr class="ementaClass2"><td><strong>Ementa:</strong> APELAÇÃO CÍVEL - DANO MORAL - NEGATIVAÇÃO INDEVIDA.</td></tr>
  </table>
</td></tr>
<tr class="fundocinza1"><td>
  <span>Processo sem número legível</span>
  <a href="/cjsg/getArquivo.do?cdAcordao=555&amp;cdForo=0">PDF</a>
</td></tr>
</table></body></html>"#;

    const CARDS: &str = r#"
<html><body>
<div class="resultado">Apelação 2005678-66.2023.8.26.0224 julgado em 10/03/2023 - RESPONSABILIDADE CIVIL</div>
<div class="resultado">Agravo 4004567-06.2023.8.26.0000 julgado em 21/06/2023</div>
<div class="resultado">Embargos 5005678-96.2023.8.26.0100</div>
</body></html>"#;

    #[test]
    fn test_classic_layout_fields() {
        let records = parse_listing(CLASSIC, &base(), 10);
        assert_eq!(records.len(), 2);
        let r = &records[0];
        assert_eq!(r.case_number, "1001234-88.2023.8.26.0100");
        assert_eq!(r.rapporteur, "João Silva Santos");
        assert_eq!(r.venue, "São Paulo");
        assert_eq!(r.judging_body, "5ª Câmara de Direito Privado");
        assert_eq!(r.case_class, "Apelação Cível / Indenização por Dano Moral");
        assert_eq!(r.judgment_date, NaiveDate::from_ymd_opt(2023, 3, 15));
        assert_eq!(r.publication_date, NaiveDate::from_ymd_opt(2023, 3, 20));
        assert_eq!(r.summary, "APELAÇÃO CÍVEL - DANO MORAL - NEGATIVAÇÃO INDEVIDA.");
        assert_eq!(
            r.pdf_url.as_deref(),
            Some("https://esaj.tjsp.jus.br/cjsg/getArquivo.do?cdAcordao=16789123&cdForo=0")
        );
        assert_eq!(r.source, RecordSource::Origin);
    }

    #[test]
    fn test_placeholder_when_no_case_number() {
        let records = parse_listing(CLASSIC, &base(), 10);
        assert_eq!(records[1].case_number, "TJSP-2");
        assert_eq!(
            records[1].pdf_url.as_deref(),
            Some("https://esaj.tjsp.jus.br/cjsg/getArquivo.do?cdAcordao=555&cdForo=0")
        );
    }

    #[test]
    fn test_card_layout_and_limit() {
        let records = parse_listing(CARDS, &base(), 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].case_number, "2005678-66.2023.8.26.0224");
        assert_eq!(records[0].judgment_date, NaiveDate::from_ymd_opt(2023, 3, 10));
        assert!(records[0].pdf_url.is_none());
        assert_eq!(records[1].case_number, "4004567-06.2023.8.26.0000");
    }

    #[test]
    fn test_positional_relevance_descends() {
        let records = parse_listing(CARDS, &base(), 10);
        let scores: Vec<f64> = records.iter().map(|r| r.relevance).collect();
        assert!((scores[0] - 0.9).abs() < 1e-9);
        assert!((scores[1] - 0.8).abs() < 1e-9);
        assert!((scores[2] - 0.7).abs() < 1e-9);
        assert_eq!(positional_relevance(20), 0.0);
    }

    #[test]
    fn test_unknown_layout_is_empty() {
        let records = parse_listing("<html><body><p>Nenhum resultado</p></body></html>", &base(), 5);
        assert!(records.is_empty());
    }

    #[test]
    fn test_summary_truncated_without_label() {
        let long = "x".repeat(800);
        let html = format!(r#"<div class="resultado">{long}</div>"#);
        let records = parse_listing(&html, &base(), 5);
        assert_eq!(records[0].summary.chars().count(), SUMMARY_FALLBACK_CHARS + 3);
    }

    #[test]
    fn test_detect_block() {
        assert_eq!(detect_block("<title>Please solve the CAPTCHA</title>"), Some("captcha"));
        assert_eq!(detect_block("<div class=\"resultado\">ok</div>"), None);
    }

    #[test]
    fn test_parse_portal_date_variants() {
        let d = NaiveDate::from_ymd_opt(2024, 5, 15);
        assert_eq!(parse_portal_date("15/05/2024"), d);
        assert_eq!(parse_portal_date("julgado em 15-05-2024."), d);
        assert_eq!(parse_portal_date("15.05.2024"), d);
        assert_eq!(parse_portal_date("Recente"), None);
    }
}
