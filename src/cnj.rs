//! CNJ unified case numbers (`NNNNNNN-DD.AAAA.J.TR.OOOO`).
//!
//! Provides extraction of case numbers from free text, the official
//! mod-97 check-digit validation (ISO 7064, as defined by CNJ Resolution
//! 65/2008), decomposition into components, and the deterministic PDF
//! filename derived from a case number and judgment date.

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// The tribunal's unified case-number pattern.
pub const CASE_NUMBER_PATTERN: &str = r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}";

fn case_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CASE_NUMBER_PATTERN).expect("static CNJ pattern compiles"))
}

fn anchored_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{7})-(\d{2})\.(\d{4})\.(\d)\.(\d{2})\.(\d{4})$")
            .expect("static CNJ pattern compiles")
    })
}

/// Return the first CNJ case number found in `text`.
pub fn find_case_number(text: &str) -> Option<&str> {
    case_number_regex().find(text).map(|m| m.as_str())
}

/// Parsed parts of a valid CNJ number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseNumberParts {
    pub number: String,
    pub sequential: String,
    pub check_digits: String,
    pub year: String,
    pub segment: String,
    pub segment_name: &'static str,
    pub tribunal: String,
    pub origin: String,
}

/// Name of the judicial segment (`J` digit).
pub fn segment_name(segment: &str) -> &'static str {
    match segment {
        "1" => "Supremo Tribunal Federal",
        "2" => "Conselho Nacional de Justiça",
        "3" => "Superior Tribunal de Justiça",
        "4" => "Justiça Federal",
        "5" => "Justiça do Trabalho",
        "6" => "Justiça Eleitoral",
        "7" => "Justiça Militar da União",
        "8" => "Justiça dos Estados e do Distrito Federal e Territórios",
        "9" => "Justiça Militar Estadual",
        _ => "Desconhecido",
    }
}

/// Compute the two check digits for the given components.
///
/// `DD = 98 - (NNNNNNN AAAA J TR OOOO 00 mod 97)`.
pub fn check_digits(sequential: &str, year: &str, segment: &str, tribunal: &str, origin: &str) -> Option<String> {
    let joined = format!("{sequential}{year}{segment}{tribunal}{origin}00");
    let value: u128 = joined.parse().ok()?;
    Some(format!("{:02}", 98 - (value % 97)))
}

/// Decompose a formatted CNJ number, returning `None` when the format or the
/// check digits are wrong.
pub fn components(number: &str) -> Option<CaseNumberParts> {
    let number = number.trim();
    let caps = anchored_regex().captures(number)?;
    let (seq, dv, year, seg, tr, origin) = (&caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]);

    if check_digits(seq, year, seg, tr, origin)? != dv {
        return None;
    }

    Some(CaseNumberParts {
        number: number.to_string(),
        sequential: seq.to_string(),
        check_digits: dv.to_string(),
        year: year.to_string(),
        segment: seg.to_string(),
        segment_name: segment_name(seg),
        tribunal: tr.to_string(),
        origin: origin.to_string(),
    })
}

/// Whether `number` is a well-formed CNJ number with correct check digits.
pub fn validate(number: &str) -> bool {
    components(number).is_some()
}

/// Format any string holding exactly 20 digits (punctuation ignored) as a
/// CNJ number.
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 20 {
        return None;
    }
    Some(format!(
        "{}-{}.{}.{}.{}.{}",
        &digits[0..7],
        &digits[7..9],
        &digits[9..13],
        &digits[13..14],
        &digits[14..16],
        &digits[16..20]
    ))
}

/// Deterministic, filesystem-safe PDF filename for a decision.
///
/// `DD-MM-YYYY_<case number with '.' as '_'>.pdf`; `sem-data` replaces the
/// date when it is unknown.
pub fn decision_filename(case_number: &str, judgment_date: Option<NaiveDate>) -> String {
    let date = judgment_date
        .map(|d| d.format("%d-%m-%Y").to_string())
        .unwrap_or_else(|| "sem-data".to_string());
    let case = sanitize_component(&case_number.trim().replace('.', "_"));
    let case = if case.is_empty() { "sem-numero".to_string() } else { case };
    format!("{date}_{case}.pdf")
}

/// Replace everything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
