//! Built-in example decisions served when the portal cannot be reached.
//!
//! The set is small and fixed. Every record produced here is tagged
//! [`RecordSource::Fallback`] so callers can tell substituted data from live
//! portal results.

use chrono::NaiveDate;

use crate::models::{DecisionFields, DecisionRecord, RecordSource};

struct Example {
    case_number: &'static str,
    judgment_date: (i32, u32, u32),
    venue: &'static str,
    judging_body: &'static str,
    case_class: &'static str,
    theme: &'static str,
    summary: &'static str,
}

const EXAMPLES: &[Example] = &[
    Example {
        case_number: "1001234-88.2023.8.26.0100",
        judgment_date: (2023, 3, 15),
        venue: "São Paulo",
        judging_body: "5ª Câmara de Direito Privado",
        case_class: "Apelação Cível",
        theme: "dano moral negativação",
        summary: "APELAÇÃO CÍVEL - Ação de indenização por danos morais - Inscrição indevida em cadastros de proteção ao crédito - Dano moral in re ipsa - Quantum indenizatório - Razoabilidade - Recurso parcialmente provido.",
    },
    Example {
        case_number: "2002345-90.2023.8.26.0100",
        judgment_date: (2023, 4, 12),
        venue: "São Paulo",
        judging_body: "2ª Câmara de Direito Privado",
        case_class: "Apelação Cível",
        theme: "cobrança indevida serviços",
        summary: "RESPONSABILIDADE CIVIL - Prestação de serviços - Cobrança indevida - Falha na prestação de serviços - Dano moral configurado - Valor da indenização mantido - Recurso não provido.",
    },
    Example {
        case_number: "3003456-92.2023.8.26.0100",
        judgment_date: (2023, 5, 9),
        venue: "São Paulo",
        judging_body: "30ª Câmara de Direito Privado",
        case_class: "Apelação Cível",
        theme: "consumidor vício produto",
        summary: "APELAÇÃO - Ação declaratória c.c. indenização - Relação de consumo - Vício do produto - Responsabilidade objetiva do fornecedor - Danos materiais e morais - Procedência mantida.",
    },
    Example {
        case_number: "4004567-06.2023.8.26.0000",
        judgment_date: (2023, 6, 21),
        venue: "São Paulo",
        judging_body: "13ª Câmara de Direito Privado",
        case_class: "Agravo de Instrumento",
        theme: "tutela urgência cobrança",
        summary: "AGRAVO DE INSTRUMENTO - Tutela de urgência - Suspensão de cobrança - Verossimilhança das alegações - Perigo de dano - Requisitos presentes - Decisão mantida - Recurso não provido.",
    },
    Example {
        case_number: "5005678-96.2023.8.26.0100",
        judgment_date: (2023, 8, 2),
        venue: "São Paulo",
        judging_body: "22ª Câmara de Direito Privado",
        case_class: "Embargos à Execução",
        theme: "execução cálculos juros",
        summary: "EMBARGOS À EXECUÇÃO - Excesso de execução - Cálculos - Correção monetária e juros - Acolhimento parcial - Redução do valor executado - Recurso parcialmente provido.",
    },
];

const FALLBACK_RAPPORTEUR: &str = "Des. Exemplo Silva";
const MAX_MATCHES: usize = 5;
const UNMATCHED_DEFAULT: usize = 3;

/// Naive keyword overlap: how many query words occur in the example's theme
/// or summary.
fn overlap(words: &[String], example: &Example) -> usize {
    let summary = example.summary.to_lowercase();
    words
        .iter()
        .filter(|w| example.theme.contains(w.as_str()) || summary.contains(w.as_str()))
        .count()
}

/// Example decisions relevant to `query`, most relevant first.
///
/// Examples sharing at least one word with the query are kept (at most
/// five); when none match, the first three are returned. An empty query
/// returns the whole set.
pub fn fallback_records(query: &str) -> Vec<DecisionRecord> {
    let words: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();

    let selected: Vec<&Example> = if words.is_empty() {
        EXAMPLES.iter().collect()
    } else {
        let mut scored: Vec<(usize, &Example)> = EXAMPLES
            .iter()
            .map(|ex| (overlap(&words, ex), ex))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable: equal overlap keeps table order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        if scored.is_empty() {
            EXAMPLES.iter().take(UNMATCHED_DEFAULT).collect()
        } else {
            scored.into_iter().take(MAX_MATCHES).map(|(_, ex)| ex).collect()
        }
    };

    selected
        .into_iter()
        .enumerate()
        .map(|(i, ex)| {
            let (y, m, d) = ex.judgment_date;
            let fields = DecisionFields {
                case_number: ex.case_number.to_string(),
                judgment_date: NaiveDate::from_ymd_opt(y, m, d),
                publication_date: None,
                rapporteur: FALLBACK_RAPPORTEUR.to_string(),
                venue: ex.venue.to_string(),
                judging_body: ex.judging_body.to_string(),
                case_class: ex.case_class.to_string(),
                summary: ex.summary.to_string(),
                pdf_url: None,
            };
            DecisionRecord::new(fields, 0.8 - 0.1 * i as f64, RecordSource::Fallback)
        })
        .collect()
}
