//! Handlers behind the `juris` subcommands.
//!
//! Each handler prints its result to stdout; diagnostics go through
//! `tracing` to stderr.

use anyhow::{bail, Result};

use crate::acquisition::{self, DownloadReport, Scraper};
use crate::cnj;
use crate::config::Config;
use crate::models::{DecisionRecord, DownloadOutcome};
use crate::search::SearchEngine;

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_records(records: &[DecisionRecord]) {
    if records.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in records.iter().enumerate() {
        let date = r
            .judgment_date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}. [{:.2}] {}  ({}, {})  [{}]",
            i + 1,
            r.relevance,
            r.case_number,
            date,
            r.judging_body,
            r.source
        );
        if !r.rapporteur.is_empty() {
            println!("    relator: {}", r.rapporteur);
        }
        if !r.summary.is_empty() {
            let excerpt: String = r.summary.chars().take(200).collect();
            println!("    > {}", excerpt);
        }
        if let Some(url) = &r.pdf_url {
            println!("    pdf: {}", url);
        }
        println!();
    }
}

fn print_outcome(o: &DownloadOutcome) {
    match &o.local_path {
        Some(path) => println!("ok      {}  ({} bytes)", path.display(), o.byte_size),
        None => println!(
            "failed  {}  ({})",
            o.filename,
            o.failure_reason.as_deref().unwrap_or("unknown")
        ),
    }
}

fn print_report(report: &DownloadReport) {
    for o in &report.outcomes {
        print_outcome(o);
    }
    println!(
        "\n{} succeeded, {} failed in {:.1}s",
        report.succeeded, report.failed, report.elapsed_secs
    );
}

pub async fn run_search(config: &Config, term: &str, max: usize, json: bool) -> Result<()> {
    let mut scraper = Scraper::new(&config.portal, &config.storage)?;
    let records = scraper.search(term, max).await?;

    if json {
        return print_json(&records);
    }
    if !records.is_empty() && !acquisition::all_from_origin(&records) {
        println!("Portal unreachable; showing example decisions (source = fallback).\n");
    }
    print_records(&records);
    Ok(())
}

pub async fn run_download(config: &Config, term: &str, max: usize, json: bool) -> Result<()> {
    let mut scraper = Scraper::new(&config.portal, &config.storage)?;
    let records = scraper.search(term, max).await?;
    let downloadable: Vec<DecisionRecord> = records
        .into_iter()
        .filter(DecisionRecord::is_downloadable)
        .collect();

    if downloadable.is_empty() {
        if json {
            return print_json(&DownloadReport::default());
        }
        println!("No downloadable decisions found.");
        return Ok(());
    }

    if !json {
        println!(
            "Downloading {} decisions into {}\n",
            downloadable.len(),
            scraper.download_dir().display()
        );
    }
    let report = scraper.download_batch(&downloadable).await;
    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

pub async fn run_fetch(config: &Config, url: &str, filename: &str, json: bool) -> Result<()> {
    let mut scraper = Scraper::new(&config.portal, &config.storage)?;
    let outcome = scraper.download_pdf(url, filename).await;

    if json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }
    if !outcome.is_success() {
        bail!(
            "download failed: {}",
            outcome.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

pub async fn run_query(config: &Config, query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let engine = SearchEngine::load(&config.retrieval, &config.embedding).await;
    let results = engine
        .search(query, top_k.unwrap_or(config.retrieval.top_k))
        .await?;

    if json {
        return print_json(&results);
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    println!("mode: {}  corpus: {} chunks\n", engine.mode(), engine.len());
    for r in &results {
        println!("{}. [{:.3}] {} #{}", r.rank, r.score, r.source_file, r.chunk_index);
        let excerpt: String = r.text.chars().take(200).collect();
        println!("    {}\n", excerpt);
    }
    Ok(())
}

pub fn run_cnj(number: &str, json: bool) -> Result<()> {
    let normalized = if cnj::find_case_number(number).is_some() {
        number.trim().to_string()
    } else {
        cnj::normalize(number).unwrap_or_else(|| number.trim().to_string())
    };

    let Some(parts) = cnj::components(&normalized) else {
        bail!("invalid CNJ case number: {}", number.trim());
    };

    if json {
        return print_json(&parts);
    }
    println!("valid       {}", parts.number);
    println!("sequential  {}", parts.sequential);
    println!("year        {}", parts.year);
    println!("segment     {} ({})", parts.segment, parts.segment_name);
    println!("tribunal    {}", parts.tribunal);
    println!("origin      {}", parts.origin);
    Ok(())
}
