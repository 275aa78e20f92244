//! # jurisprudencia
//!
//! Acquisition and retrieval of Brazilian court decisions (acórdãos).
//!
//! Two independent engines share the data model:
//!
//! - the **acquisition engine** ([`acquisition::Scraper`]) searches the TJSP
//!   e-SAJ jurisprudence portal, tolerating throttling, anti-bot blocks and
//!   outages, and downloads decision PDFs with a metadata sidecar;
//! - the **retrieval engine** ([`search::SearchEngine`]) ranks a corpus of
//!   text chunks against a query, semantically when an embedding provider
//!   is available and by keyword otherwise.
//!
//! ```text
//! ┌──────────┐  HTML   ┌──────────┐  records  ┌──────────┐  PDF + JSON
//! │  Portal  │───────▶│ Scraper  │──────────▶│ storage  │───────────▶ disk
//! └──────────┘         └────┬─────┘           └──────────┘
//!                           │ unreachable
//!                           ▼
//!                      ┌──────────┐
//!                      │ fallback │
//!                      └──────────┘
//!
//! ┌──────────┐ chunks ┌──────────────┐ ranked results
//! │  corpus  │───────▶│ SearchEngine │───────────────▶ caller
//! └──────────┘        └──────┬───────┘
//!                            │ optional
//!                            ▼
//!                      ┌───────────┐
//!                      │ embedding │
//!                      └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`acquisition`] | Portal search and PDF download |
//! | [`listing`] | Result-page parsing |
//! | [`fallback`] | Built-in example decisions |
//! | [`storage`] | PDF and metadata files on disk |
//! | [`cnj`] | CNJ case-number validation |
//! | [`corpus`] | Corpus snapshot loading |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Keyword and semantic ranking |
//! | [`commands`] | CLI command handlers |

pub mod acquisition;
pub mod chunk;
pub mod cnj;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod fallback;
pub mod listing;
pub mod models;
pub mod search;
pub mod storage;
