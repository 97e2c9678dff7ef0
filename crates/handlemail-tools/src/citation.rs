//! Per-request citation tracking and references-section rendering.
//!
//! Grounded on `original_source/mxtoai/scripts/citation_manager.py`'s
//! `GlobalCitationManager`, with one deliberate change: this ledger is
//! constructed fresh per request rather than held as a process-wide
//! singleton (see SPEC_FULL.md §9, Open Question 3 — a shared global would
//! leak citations between concurrent requests handled by the same worker).

use handlemail_core::CitationSource;
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Web,
    Attachment,
    Api,
}

#[derive(Debug, Clone)]
pub struct CitationEntry {
    pub id: u32,
    pub kind: SourceKind,
    pub title: String,
    pub url: Option<String>,
    pub filename: Option<String>,
    /// `"visited"`, `"search result"`, `"processed attachment"`, `"API data"`,
    /// or a caller-supplied description.
    pub description: String,
}

static RAPIDAPI_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" via RapidAPI| \(RapidAPI\)").expect("valid regex"));

fn sanitize_api_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return "External Data Source".to_string();
    }
    let sanitized = RAPIDAPI_SUFFIX.replace_all(trimmed, "").trim().to_string();
    if sanitized.len() < 3 { "External Data Source".to_string() } else { sanitized }
}

/// Collects citations for a single request and renders the closing
/// References section. Not thread-shared: one per agent run.
#[derive(Debug, Default)]
pub struct CitationLedger {
    entries: Vec<CitationEntry>,
    next_id: u32,
}

impl CitationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or, for a repeat URL, possibly upgrade) a web source. Returns
    /// its citation id. If the URL was already recorded, the existing
    /// entry's description is upgraded to `"visited"` only when it was
    /// previously falsy (`description.is_empty()`) — matching the source's
    /// `if existing_source and visited and not existing_source.description`.
    pub fn add_web(&mut self, url: &str, title: &str, visited: bool) -> u32 {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.url.as_deref() == Some(url)) {
            if visited && existing.description.is_empty() {
                existing.description = "visited".to_string();
            }
            return existing.id;
        }
        let id = self.next_id();
        let description = if visited { "visited" } else { "search result" }.to_string();
        self.entries.push(CitationEntry {
            id,
            kind: SourceKind::Web,
            title: title.to_string(),
            url: Some(url.to_string()),
            filename: None,
            description,
        });
        id
    }

    /// Add an attachment source, deduped by filename.
    pub fn add_attachment(&mut self, filename: &str) -> u32 {
        if let Some(existing) = self.entries.iter().find(|e| e.filename.as_deref() == Some(filename)) {
            return existing.id;
        }
        let id = self.next_id();
        self.entries.push(CitationEntry {
            id,
            kind: SourceKind::Attachment,
            title: filename.to_string(),
            url: None,
            filename: Some(filename.to_string()),
            description: "processed attachment".to_string(),
        });
        id
    }

    /// Add an API source. Never deduped — each API call is a distinct
    /// citation, matching the source's "API sources are always unique".
    pub fn add_api(&mut self, title: &str) -> u32 {
        let id = self.next_id();
        self.entries.push(CitationEntry {
            id,
            kind: SourceKind::Api,
            title: sanitize_api_title(title),
            url: None,
            filename: None,
            description: "API data".to_string(),
        });
        id
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Merge a tool's returned `CitationSource`s in, applying the same
    /// dedup rules as calling `add_web`/`add_attachment`/`add_api` directly.
    /// This is how the agent loop folds a `ToolOutputWithCitations.citations`
    /// list into the request's ledger.
    pub fn merge(&mut self, sources: &[CitationSource]) {
        for source in sources {
            match source {
                CitationSource::WebPage { url, title, visited } => {
                    self.add_web(url, title, *visited);
                }
                CitationSource::SearchResult { url, title, .. } => {
                    self.add_web(url, title, false);
                }
                CitationSource::Attachment { filename } => {
                    self.add_attachment(filename);
                }
                CitationSource::Api { title, .. } => {
                    self.add_api(title);
                }
            }
        }
    }

    #[must_use]
    pub fn has_citations(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Render the markdown References section, grouped
    /// Visited Pages / Search Results / Attachments / Data Sources, in that
    /// priority order, matching `generate_references_section`.
    #[must_use]
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }

        let visited: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.kind == SourceKind::Web && e.description == "visited")
            .collect();
        let search: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.kind == SourceKind::Web && e.description != "visited")
            .collect();
        let attachments: Vec<_> = self.entries.iter().filter(|e| e.kind == SourceKind::Attachment).collect();
        let api: Vec<_> = self.entries.iter().filter(|e| e.kind == SourceKind::Api).collect();

        let mut lines = vec!["---".to_string(), String::new(), "### References".to_string()];

        if !visited.is_empty() {
            lines.push(String::new());
            lines.push("#### Visited Pages".to_string());
            for e in visited {
                lines.push(format!("{}. [{}]({})", e.id, e.title, e.url.as_deref().unwrap_or_default()));
            }
        }
        if !search.is_empty() {
            lines.push(String::new());
            lines.push("#### Search Results".to_string());
            for e in search {
                lines.push(format!("{}. [{}]({})", e.id, e.title, e.url.as_deref().unwrap_or_default()));
            }
        }
        if !attachments.is_empty() {
            lines.push(String::new());
            lines.push("#### Attachments".to_string());
            for e in attachments {
                lines.push(format!("{}. {}", e.id, e.filename.as_deref().unwrap_or_default()));
            }
        }
        if !api.is_empty() {
            lines.push(String::new());
            lines.push("#### Data Sources".to_string());
            for e in api {
                lines.push(format!("{}. {}", e.id, e.title));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_web_dedupes_by_url_and_returns_same_id() {
        let mut ledger = CitationLedger::new();
        let id1 = ledger.add_web("https://a.com", "A", false);
        let id2 = ledger.add_web("https://a.com", "A again", false);
        assert_eq!(id1, id2);
        assert_eq!(ledger.entries.len(), 1);
    }

    #[test]
    fn visited_upgrade_only_when_description_previously_falsy() {
        let mut ledger = CitationLedger::new();
        ledger.add_web("https://a.com", "A", false);
        assert_eq!(ledger.entries[0].description, "search result");
        ledger.add_web("https://a.com", "A", true);
        assert_eq!(ledger.entries[0].description, "visited");
        // A second "visited" touch with an already-set description is a no-op,
        // not an error — it should stay "visited".
        ledger.add_web("https://a.com", "A", true);
        assert_eq!(ledger.entries[0].description, "visited");
    }

    #[test]
    fn add_attachment_dedupes_by_filename() {
        let mut ledger = CitationLedger::new();
        let id1 = ledger.add_attachment("report.pdf");
        let id2 = ledger.add_attachment("report.pdf");
        assert_eq!(id1, id2);
    }

    #[test]
    fn add_api_never_dedupes() {
        let mut ledger = CitationLedger::new();
        let id1 = ledger.add_api("LinkedIn Profile Data");
        let id2 = ledger.add_api("LinkedIn Profile Data");
        assert_ne!(id1, id2);
    }

    #[test]
    fn api_title_strips_rapidapi_suffix() {
        assert_eq!(sanitize_api_title("LinkedIn Fresh Data API Tool via RapidAPI"), "LinkedIn Fresh Data API Tool");
        assert_eq!(sanitize_api_title("Weather (RapidAPI)"), "Weather");
        assert_eq!(sanitize_api_title("  "), "External Data Source");
        assert_eq!(sanitize_api_title("ab"), "External Data Source");
    }

    #[test]
    fn render_groups_in_priority_order_and_empty_when_no_sources() {
        let empty = CitationLedger::new();
        assert_eq!(empty.render(), "");

        let mut ledger = CitationLedger::new();
        ledger.add_web("https://search.example.com", "Search hit", false);
        ledger.add_web("https://visited.example.com", "Visited page", true);
        ledger.add_attachment("data.csv");
        ledger.add_api("Weather API");

        let rendered = ledger.render();
        let visited_idx = rendered.find("#### Visited Pages").unwrap();
        let search_idx = rendered.find("#### Search Results").unwrap();
        let attach_idx = rendered.find("#### Attachments").unwrap();
        let api_idx = rendered.find("#### Data Sources").unwrap();
        assert!(visited_idx < search_idx);
        assert!(search_idx < attach_idx);
        assert!(attach_idx < api_idx);
    }

    #[test]
    fn merge_applies_same_dedup_rules_as_direct_calls() {
        let mut ledger = CitationLedger::new();
        ledger.add_web("https://a.com", "A", false);
        ledger.merge(&[
            CitationSource::WebPage { url: "https://a.com".into(), title: "A".into(), visited: true },
            CitationSource::Attachment { filename: "report.pdf".into() },
            CitationSource::Api { title: "Weather API".into(), url: None },
        ]);
        assert_eq!(ledger.entries.len(), 3);
        assert_eq!(ledger.entries[0].description, "visited");
    }
}
