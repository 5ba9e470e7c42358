//! Durable raw-document store.
//!
//! Each company's scraped documents live as markdown files with a small
//! front-matter header under `{data_dir}/{company}/raw/`:
//!
//! ```text
//! ---
//! url: https://acme.com/about
//! title: About Acme
//! source_type: website
//! company: acme
//! scraped_at: 2025-01-31T12:00:00Z
//! ---
//!
//! # About Acme
//! ...
//! ```
//!
//! The first encyclopedia document is `wikipedia.md`; every other document is
//! `{source_type}_{nnn}.md` with a counter per source type starting at 001.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use companyintel_shared::{CompanyIntelError, RawDocument, Result, SourceType};

/// Front-matter fence.
const FENCE: &str = "---";

/// A company present in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyEntry {
    pub company: String,
    /// Number of `*.md` files in its raw directory.
    pub files: usize,
}

/// File-system store rooted at the data directory.
#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{company}/raw`.
    pub fn raw_dir(&self, company: &str) -> Result<PathBuf> {
        validate_company(company)?;
        Ok(self.root.join(company).join("raw"))
    }

    /// Remove the company's raw directory, if present.
    pub fn wipe(&self, company: &str) -> Result<()> {
        let dir = self.raw_dir(company)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| CompanyIntelError::io(&dir, e))?;
            info!(path = %dir.display(), "wiped raw data");
        }
        Ok(())
    }

    /// Write documents in order and return how many were written.
    #[instrument(skip_all, fields(company = %company, documents = documents.len()))]
    pub fn save(&self, company: &str, documents: &[RawDocument]) -> Result<usize> {
        let dir = self.raw_dir(company)?;
        fs::create_dir_all(&dir).map_err(|e| CompanyIntelError::io(&dir, e))?;

        let mut counters: HashMap<SourceType, usize> = HashMap::new();
        let mut wrote_primary_wikipedia = false;

        for doc in documents {
            let filename = if doc.source_type == SourceType::Wikipedia && !wrote_primary_wikipedia {
                wrote_primary_wikipedia = true;
                "wikipedia.md".to_string()
            } else {
                let n = counters.entry(doc.source_type).or_insert(0);
                *n += 1;
                format!("{}_{:03}.md", doc.source_type, n)
            };

            let path = dir.join(&filename);
            fs::write(&path, render(doc)).map_err(|e| CompanyIntelError::io(&path, e))?;
            debug!(file = %filename, url = %doc.url, "saved document");
        }

        info!(path = %dir.display(), saved = documents.len(), "saved raw documents");
        Ok(documents.len())
    }

    /// Read every front-matter document for the company, in filename order.
    /// A missing directory yields no documents.
    #[instrument(skip_all, fields(company = %company))]
    pub fn load(&self, company: &str) -> Result<Vec<RawDocument>> {
        let dir = self.raw_dir(company)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut docs = Vec::new();
        for path in markdown_files(&dir)? {
            let text = fs::read_to_string(&path).map_err(|e| CompanyIntelError::io(&path, e))?;
            match parse(&text, company) {
                Some(doc) => docs.push(doc),
                None => warn!(path = %path.display(), "no front matter, skipping file"),
            }
        }

        info!(loaded = docs.len(), "loaded raw documents");
        Ok(docs)
    }

    /// Companies with a raw directory, sorted by name.
    pub fn list_companies(&self) -> Result<Vec<CompanyEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries =
            fs::read_dir(&self.root).map_err(|e| CompanyIntelError::io(&self.root, e))?;

        let mut companies = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CompanyIntelError::io(&self.root, e))?;
            let raw = entry.path().join("raw");
            if !raw.is_dir() {
                continue;
            }
            companies.push(CompanyEntry {
                company: entry.file_name().to_string_lossy().into_owned(),
                files: markdown_files(&raw)?.len(),
            });
        }

        companies.sort_by(|a, b| a.company.cmp(&b.company));
        Ok(companies)
    }
}

/// Company keys become directory names; keep them to a single path segment.
fn validate_company(company: &str) -> Result<()> {
    if company.trim().is_empty()
        || company.contains(['/', '\\'])
        || company == "."
        || company == ".."
    {
        return Err(CompanyIntelError::validation(format!(
            "invalid company name '{company}'"
        )));
    }
    Ok(())
}

/// Sorted `*.md` files directly inside `dir`.
fn markdown_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| CompanyIntelError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    files.sort();
    Ok(files)
}

// ---------------------------------------------------------------------------
// Front matter
// ---------------------------------------------------------------------------

fn render(doc: &RawDocument) -> String {
    format!(
        "{FENCE}\nurl: {}\ntitle: {}\nsource_type: {}\ncompany: {}\nscraped_at: {}\n{FENCE}\n\n{}",
        single_line(&doc.url),
        single_line(&doc.title),
        doc.source_type,
        single_line(&doc.company),
        doc.scraped_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        doc.content,
    )
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Parse a stored document. `None` when the text has no front matter.
fn parse(text: &str, dir_company: &str) -> Option<RawDocument> {
    let rest = text.strip_prefix(FENCE)?;
    let end = rest.find(&format!("\n{FENCE}"))?;
    let header = &rest[..end];
    let body = rest[end + 1 + FENCE.len()..].trim();

    let mut meta: HashMap<&str, &str> = HashMap::new();
    for line in header.lines() {
        if let Some((key, value)) = line.split_once(':') {
            meta.insert(key.trim(), value.trim());
        }
    }

    let scraped_at = meta
        .get("scraped_at")
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let company = meta
        .get("company")
        .filter(|c| !c.is_empty())
        .map_or_else(|| dir_company.to_string(), |c| c.to_string());

    Some(RawDocument {
        url: meta.get("url").copied().unwrap_or_default().to_string(),
        title: meta.get("title").copied().unwrap_or_default().to_string(),
        content: body.to_string(),
        source_type: SourceType::parse_lenient(meta.get("source_type").copied().unwrap_or("")),
        company,
        scraped_at,
    })
}
