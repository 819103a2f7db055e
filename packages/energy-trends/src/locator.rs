//! Locator: find the newest spreadsheet for a search term on a statistics page.
//!
//! Candidate links are anchors pointing at a spreadsheet whose own text,
//! `title`, or enclosing block mentions the search term. Version labels are
//! read from the same context. When no anchor context mentions the term but
//! the page does, every spreadsheet link on the page is a candidate.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FetchError, NotFoundError, Result, TransportError};
use crate::quarter::{LabelFormat, Quarter};
use crate::transport::Transport;

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Elements treated as the "surrounding context" of a link.
const CONTEXT_TAGS: &[&str] = &[
    "li", "p", "section", "article", "div", "td", "tr", "dd", "figure", "details",
];

/// A located spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub url: String,
    pub file_name: String,
    /// Label found on the page, if any
    pub version: Option<Quarter>,
}

#[derive(Debug, Clone)]
struct Candidate {
    url: Url,
    version: Option<Quarter>,
}

/// Finds spreadsheet links for a search term.
#[derive(Debug, Clone)]
pub struct Locator {
    search_term: String,
    label_format: LabelFormat,
    extensions: Vec<String>,
}

impl Locator {
    pub fn new(search_term: impl Into<String>, label_format: LabelFormat) -> Self {
        Self {
            search_term: search_term.into(),
            label_format,
            extensions: vec!["xlsx".to_string(), "xls".to_string(), "ods".to_string()],
        }
    }

    /// Set the file extensions that identify spreadsheet links.
    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Fetch `page_url` and select the newest matching spreadsheet.
    pub async fn locate(&self, transport: &dyn Transport, page_url: &str) -> Result<ResourceReference> {
        info!(url = %page_url, search_term = %self.search_term, "Fetching source page");

        let response = transport.get(page_url).await.map_err(FetchError::from)?;
        if !response.is_success() {
            return Err(FetchError::Status {
                url: page_url.to_string(),
                status: response.status,
            }
            .into());
        }

        let base = Url::parse(&response.final_url)
            .or_else(|_| Url::parse(page_url))
            .map_err(|_| {
                FetchError::from(TransportError::InvalidUrl {
                    url: page_url.to_string(),
                })
            })?;

        let reference = self.find_in_html(&response.text(), &base)?;
        info!(
            url = %reference.url,
            file_name = %reference.file_name,
            version = ?reference.version.map(|v| v.to_string()),
            "Located spreadsheet"
        );
        Ok(reference)
    }

    /// Select the newest matching spreadsheet from already-fetched HTML.
    pub fn find_in_html(&self, html: &str, base: &Url) -> std::result::Result<ResourceReference, NotFoundError> {
        let document = Html::parse_document(html);
        let term = normalize(&self.search_term);

        let page_text = normalize(&document.root_element().text().collect::<Vec<_>>().join(" "));
        if !page_text.contains(&term) {
            warn!(search_term = %self.search_term, "Search term not found on page");
            return Err(NotFoundError::SearchTermAbsent {
                term: self.search_term.clone(),
                url: base.to_string(),
            });
        }

        let mut matched = Vec::new();
        let mut all_links = Vec::new();
        for anchor in document.select(&ANCHORS) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(url) = base.join(href) else {
                debug!(href = %href, "Skipping unresolvable link");
                continue;
            };
            if !self.is_spreadsheet(&url) {
                continue;
            }

            let context = anchor_context(&anchor);
            let version = Quarter::find_all(&format!("{} {}", context, url.path()), self.label_format)
                .into_iter()
                .max();
            let candidate = Candidate { url, version };

            if normalize(&context).contains(&term) {
                matched.push(candidate);
            } else {
                all_links.push(candidate);
            }
        }

        let candidates = if matched.is_empty() {
            // Term is on the page but not next to any link
            debug!(links = all_links.len(), "Falling back to every spreadsheet link on the page");
            all_links
        } else {
            matched
        };

        let chosen = select(candidates, &self.search_term)?;
        Ok(ResourceReference {
            file_name: file_name_of(&chosen.url),
            url: chosen.url.to_string(),
            version: chosen.version,
        })
    }

    fn is_spreadsheet(&self, url: &Url) -> bool {
        let path = url.path().to_lowercase();
        self.extensions
            .iter()
            .any(|ext| path.ends_with(&format!(".{ext}")))
    }
}

/// Newest labelled candidate wins; with no labels, the first link does.
fn select(candidates: Vec<Candidate>, term: &str) -> std::result::Result<Candidate, NotFoundError> {
    let Some(first) = candidates.first().cloned() else {
        return Err(NotFoundError::NoSpreadsheetLink {
            term: term.to_string(),
        });
    };

    let Some(best) = candidates.iter().filter_map(|c| c.version).max() else {
        if candidates.len() > 1 {
            debug!(count = candidates.len(), "No version labels on page, taking first link");
        }
        return Ok(first);
    };

    let mut tied: Vec<&Candidate> = Vec::new();
    for candidate in candidates.iter().filter(|c| c.version == Some(best)) {
        if !tied.iter().any(|t| t.url == candidate.url) {
            tied.push(candidate);
        }
    }

    if tied.len() > 1 {
        return Err(NotFoundError::AmbiguousVersion {
            version: best.to_string(),
            urls: tied.iter().map(|c| c.url.to_string()).collect(),
        });
    }
    Ok(tied[0].clone())
}

/// Anchor text, title, and the text of its nearest block-level ancestor.
fn anchor_context(anchor: &ElementRef<'_>) -> String {
    let mut parts: Vec<String> = vec![anchor.text().collect::<Vec<_>>().join(" ")];
    if let Some(title) = anchor.value().attr("title") {
        parts.push(title.to_string());
    }

    let block = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| CONTEXT_TAGS.contains(&el.value().name()));
    if let Some(block) = block {
        parts.push(block.text().collect::<Vec<_>>().join(" "));
    }

    parts.join(" ")
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn file_name_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| "download.xlsx".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::MockTransport;

    const BASE: &str = "https://www.gov.uk/government/statistics/oil-section-3";

    fn base() -> Url {
        Url::parse(BASE).unwrap()
    }

    fn locator() -> Locator {
        Locator::new("Supply and use of crude oil", LabelFormat::Ordinal)
    }

    fn q(year: u16, number: u8) -> Quarter {
        Quarter::new(year, number).unwrap()
    }

    #[test]
    fn resolves_relative_link_and_file_name() {
        let html = r#"<html><body>
            <section><h3><a href="/media/abc/ET_3.1_DEC_24.xlsx">Supply and use of crude oil (ET 3.1)</a></h3></section>
        </body></html>"#;

        let found = locator().find_in_html(html, &base()).unwrap();
        assert_eq!(found.url, "https://www.gov.uk/media/abc/ET_3.1_DEC_24.xlsx");
        assert_eq!(found.file_name, "ET_3.1_DEC_24.xlsx");
        assert_eq!(found.version, None);
    }

    #[test]
    fn picks_latest_labelled_link() {
        let html = r#"<ul>
            <li><a href="/a.xlsx">Supply and use of crude oil</a> covering 2024 1st quarter</li>
            <li><a href="/b.xlsx">Supply and use of crude oil</a> covering 2024 3rd quarter</li>
            <li><a href="/c.xlsx">Supply and use of crude oil</a> covering 2023 4th quarter</li>
        </ul>"#;

        let found = locator().find_in_html(html, &base()).unwrap();
        assert_eq!(found.url, "https://www.gov.uk/b.xlsx");
        assert_eq!(found.version, Some(q(2024, 3)));
    }

    #[test]
    fn ignores_links_for_other_tables() {
        let html = r#"<ul>
            <li><a href="/gas.xlsx">Natural gas supply, 2025 1st quarter</a></li>
            <li><a href="/oil.xlsx">Supply and use of crude oil, 2024 4th quarter</a></li>
        </ul>"#;

        let found = locator().find_in_html(html, &base()).unwrap();
        assert_eq!(found.url, "https://www.gov.uk/oil.xlsx");
        assert_eq!(found.version, Some(q(2024, 4)));
    }

    #[test]
    fn equal_labels_on_different_links_are_ambiguous() {
        let html = r#"<ul>
            <li><a href="/a.xlsx">Supply and use of crude oil 2024 2nd quarter</a></li>
            <li><a href="/b.xlsx">Supply and use of crude oil 2024 2nd quarter</a></li>
        </ul>"#;

        let err = locator().find_in_html(html, &base()).unwrap_err();
        assert!(matches!(err, NotFoundError::AmbiguousVersion { ref urls, .. } if urls.len() == 2));
    }

    #[test]
    fn same_link_twice_is_not_ambiguous() {
        let html = r#"<div>
            <p><a href="/a.xlsx">Supply and use of crude oil 2024 2nd quarter</a></p>
            <p><a href="/a.xlsx">Download (2024 2nd quarter) supply and use of crude oil</a></p>
        </div>"#;

        let found = locator().find_in_html(html, &base()).unwrap();
        assert_eq!(found.url, "https://www.gov.uk/a.xlsx");
    }

    #[test]
    fn falls_back_to_page_level_match() {
        let html = r#"<html><body>
            <h1>Supply and use of crude oil</h1>
            <a href="https://assets.example.org/files/table.xls">Download</a>
            <a href="/page.html">Other</a>
        </body></html>"#;

        let found = locator().find_in_html(html, &base()).unwrap();
        assert_eq!(found.url, "https://assets.example.org/files/table.xls");
    }

    #[test]
    fn missing_term_and_missing_link() {
        let err = locator()
            .find_in_html("<html>No Excel files here</html>", &base())
            .unwrap_err();
        assert!(matches!(err, NotFoundError::SearchTermAbsent { .. }));

        let err = locator()
            .find_in_html("<p>Supply and use of crude oil <a href='/x.pdf'>pdf</a></p>", &base())
            .unwrap_err();
        assert!(matches!(err, NotFoundError::NoSpreadsheetLink { .. }));
    }

    #[test]
    fn custom_extensions() {
        let html = r#"<p><a href="/data.csv">Supply and use of crude oil</a></p>"#;
        let found = locator()
            .with_extensions([".CSV"])
            .find_in_html(html, &base())
            .unwrap();
        assert_eq!(found.file_name, "data.csv");
    }

    #[tokio::test]
    async fn locate_reports_http_failure() {
        let transport = MockTransport::new().with_status(BASE, 503);
        let err = locator().locate(&transport, BASE).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Fetch(FetchError::Status { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn locate_reports_timeout() {
        let transport = MockTransport::new().with_error(
            BASE,
            TransportError::Timeout {
                url: BASE.to_string(),
            },
        );
        let err = locator().locate(&transport, BASE).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Fetch(FetchError::Transport(TransportError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn locate_fetches_and_parses() {
        let transport = MockTransport::new().with_html(
            BASE,
            r#"<p><a href="/path/to/file.xlsx">Supply and use of crude oil</a></p>"#,
        );
        let found = locator().locate(&transport, BASE).await.unwrap();

        assert_eq!(found.url, "https://www.gov.uk/path/to/file.xlsx");
        assert_eq!(transport.calls(), vec![BASE.to_string()]);
    }
}
