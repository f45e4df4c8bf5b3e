//! Sitemap discovery: robots.txt hints, XML parsing, index recursion,
//! and URL filtering.
//!
//! Failures while fetching or parsing a single sitemap downgrade to a
//! warning and an empty result so discovery can continue with the next
//! candidate.

use crate::client::HttpClient;
use pagemill_types::{Error, ErrorKind, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use url::Url;

/// One `<url>` entry from a sitemap.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
}

/// Filtering options for discovered URLs.
#[derive(Debug, Clone, Default)]
pub struct UrlFilters {
    /// Minimum priority; entries without a priority always pass.
    pub min_priority: Option<f64>,
    /// Keep URLs matching ANY of these patterns (empty = keep all).
    pub include: Vec<String>,
    /// Drop URLs matching ANY of these patterns; wins over include.
    pub exclude: Vec<String>,
    /// Truncate after filtering, preserving input order.
    pub limit: Option<usize>,
}

/// Discovers and parses sitemaps for a site.
pub struct SitemapParser<'c> {
    client: &'c HttpClient,
    respect_robots_txt: bool,
    visited: HashSet<String>,
    discovered: Vec<SitemapUrl>,
}

impl<'c> SitemapParser<'c> {
    #[must_use]
    pub fn new(client: &'c HttpClient) -> Self {
        Self {
            client,
            respect_robots_txt: client.config().respect_robots_txt,
            visited: HashSet::new(),
            discovered: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_robots(mut self, respect_robots_txt: bool) -> Self {
        self.respect_robots_txt = respect_robots_txt;
        self
    }

    /// URLs discovered by the last call to [`discover`](Self::discover).
    #[must_use]
    pub fn discovered(&self) -> &[SitemapUrl] {
        &self.discovered
    }

    /// Locate and parse sitemaps for `base_url`, returning every URL found.
    ///
    /// Candidates come from robots.txt `Sitemap:` directives when enabled,
    /// otherwise from a short list of conventional locations. The first
    /// candidate yielding URLs wins. Results are deduplicated by `loc`.
    pub async fn discover(&mut self, base_url: &str) -> Result<Vec<SitemapUrl>> {
        self.visited.clear();
        self.discovered.clear();

        let base = Url::parse(base_url).map_err(|e| {
            Error::new(ErrorKind::ConnectionFailed, format!("invalid base URL: {e}"))
                .retryable(false)
                .with_context("url", base_url)
                .with_source(e)
        })?;
        let origin = origin_of(&base)?;

        let mut candidates = Vec::new();
        if self.respect_robots_txt {
            candidates.extend(self.sitemaps_from_robots(&origin).await);
        }
        if candidates.is_empty() {
            candidates.extend([
                format!("{origin}/sitemap.xml"),
                format!("{origin}/sitemap_index.xml"),
                format!("{origin}/sitemap/sitemap.xml"),
                format!("{origin}/sitemaps/sitemap.xml"),
            ]);
        }

        for candidate in candidates {
            let urls = self.process_sitemap(&candidate).await;
            if !urls.is_empty() {
                tracing::info!(sitemap = candidate.as_str(), count = urls.len(), "sitemap yielded URLs");
                self.discovered = dedup_by_loc(urls);
                break;
            }
        }

        tracing::info!(total = self.discovered.len(), "sitemap discovery finished");
        Ok(self.discovered.clone())
    }

    /// Apply [`UrlFilters`] to the discovered URLs.
    pub fn filter_urls(&self, filters: &UrlFilters) -> Result<Vec<SitemapUrl>> {
        filter_urls(&self.discovered, filters)
    }

    async fn sitemaps_from_robots(&self, origin: &str) -> Vec<String> {
        let robots_url = format!("{origin}/robots.txt");
        tracing::debug!(url = robots_url.as_str(), "checking robots.txt for sitemaps");
        match self.client.get(&robots_url, true).await {
            Ok(content) => {
                let found = sitemaps_in_robots(&content);
                if found.is_empty() {
                    tracing::info!("no sitemaps listed in robots.txt");
                } else {
                    tracing::info!(count = found.len(), "found sitemaps in robots.txt");
                }
                found
            }
            Err(err) => {
                tracing::warn!(url = robots_url.as_str(), error = %err, "could not retrieve robots.txt");
                Vec::new()
            }
        }
    }

    /// Fetch and parse one sitemap, recursing into index children.
    /// A visited set prevents cycles between self-referencing indices.
    async fn process_sitemap(&mut self, sitemap_url: &str) -> Vec<SitemapUrl> {
        if !self.visited.insert(sitemap_url.to_string()) {
            tracing::debug!(url = sitemap_url, "sitemap already processed");
            return Vec::new();
        }

        let content = match self.client.get(sitemap_url, true).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(url = sitemap_url, error = %err, "could not retrieve sitemap");
                return Vec::new();
            }
        };

        let (mut urls, children) = match parse_sitemap_xml(&content) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(url = sitemap_url, error = %err, "could not parse sitemap");
                return Vec::new();
            }
        };

        for child in children {
            let nested = Box::pin(self.process_sitemap(&child)).await;
            urls.extend(nested);
        }

        urls
    }
}

/// Write `loc[,priority][,lastmod]` lines to a file.
pub fn export_urls(urls: &[SitemapUrl], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| export_error(path, e))?;
    }
    let mut out = String::new();
    for url in urls {
        out.push_str(&url.loc);
        if let Some(priority) = url.priority {
            out.push_str(&format!(",{priority}"));
        }
        if let Some(lastmod) = &url.lastmod {
            out.push_str(&format!(",{lastmod}"));
        }
        out.push('\n');
    }
    std::fs::write(path, out).map_err(|e| export_error(path, e))
}

fn export_error(path: &Path, e: std::io::Error) -> Error {
    Error::new(ErrorKind::CacheIo, format!("failed to export URLs: {e}"))
        .with_context("path", path.display().to_string())
        .with_source(e)
}

fn origin_of(url: &Url) -> Result<String> {
    let host = url.host_str().ok_or_else(|| {
        Error::new(ErrorKind::ConnectionFailed, "base URL has no host")
            .retryable(false)
            .with_context("url", url.as_str())
    })?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

fn dedup_by_loc(urls: Vec<SitemapUrl>) -> Vec<SitemapUrl> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|u| seen.insert(u.loc.clone()))
        .collect()
}

/// Collect `Sitemap:` directives, line-wise and case-insensitive.
/// Other directives are ignored.
pub fn sitemaps_in_robots(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let lowered = line.to_ascii_lowercase();
            lowered
                .starts_with("sitemap:")
                .then(|| line[8..].trim().to_string())
        })
        .filter(|url| !url.is_empty())
        .collect()
}

enum RootKind {
    UrlSet,
    Index,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Loc,
    Lastmod,
    Changefreq,
    Priority,
}

/// Parse sitemap XML into `(urls, child sitemap locations)`.
///
/// Detects `urlset` vs `sitemapindex` by the root tag. Namespaces are
/// honored by matching local names. A `priority` that does not parse as a
/// real number becomes `None`, never an error.
pub fn parse_sitemap_xml(content: &str) -> Result<(Vec<SitemapUrl>, Vec<String>)> {
    let mut reader = Reader::from_str(content);
    let mut root: Option<RootKind> = None;
    let mut urls = Vec::new();
    let mut children = Vec::new();

    let mut in_entry = false;
    let mut field: Option<Field> = None;
    let mut loc = String::new();
    let mut lastmod = String::new();
    let mut changefreq = String::new();
    let mut priority = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "urlset" if root.is_none() => root = Some(RootKind::UrlSet),
                    "sitemapindex" if root.is_none() => root = Some(RootKind::Index),
                    _ if root.is_none() => {
                        return Err(Error::new(
                            ErrorKind::ParsingFailed,
                            format!("unexpected sitemap root element '{name}'"),
                        )
                        .with_context("element", name));
                    }
                    "url" | "sitemap" => {
                        in_entry = true;
                        loc.clear();
                        lastmod.clear();
                        changefreq.clear();
                        priority.clear();
                    }
                    "loc" => field = Some(Field::Loc),
                    "lastmod" => field = Some(Field::Lastmod),
                    "changefreq" => field = Some(Field::Changefreq),
                    "priority" => field = Some(Field::Priority),
                    _ => field = None,
                }
            }
            Ok(Event::Text(t)) => {
                if in_entry && let Some(field) = field {
                    let text = t.unescape().map_err(|e| xml_error(&e))?;
                    let target = match field {
                        Field::Loc => &mut loc,
                        Field::Lastmod => &mut lastmod,
                        Field::Changefreq => &mut changefreq,
                        Field::Priority => &mut priority,
                    };
                    target.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"url" => {
                        in_entry = false;
                        if !loc.is_empty() {
                            urls.push(SitemapUrl {
                                loc: loc.clone(),
                                lastmod: non_empty(&lastmod),
                                changefreq: non_empty(&changefreq),
                                priority: priority.trim().parse().ok(),
                            });
                        }
                    }
                    b"sitemap" => {
                        in_entry = false;
                        if !loc.is_empty() {
                            children.push(loc.clone());
                        }
                    }
                    _ => field = None,
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&e)),
            Ok(_) => {}
        }
    }

    match root {
        Some(RootKind::UrlSet) => Ok((urls, Vec::new())),
        Some(RootKind::Index) => Ok((Vec::new(), children)),
        None => Ok((Vec::new(), Vec::new())),
    }
}

fn xml_error(e: &dyn std::fmt::Display) -> Error {
    Error::new(ErrorKind::ParsingFailed, format!("sitemap XML error: {e}"))
        .with_context("parser", "sitemap")
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Apply filters: include is ANY-match, exclude is ANY-match and wins,
/// `priority == None` passes the `min_priority` gate, and `limit`
/// truncates after filtering in input order.
pub fn filter_urls(urls: &[SitemapUrl], filters: &UrlFilters) -> Result<Vec<SitemapUrl>> {
    let include = compile_patterns(&filters.include)?;
    let exclude = compile_patterns(&filters.exclude)?;

    let mut filtered: Vec<SitemapUrl> = urls
        .iter()
        .filter(|url| {
            if let Some(min) = filters.min_priority
                && let Some(priority) = url.priority
                && priority < min
            {
                return false;
            }
            if !include.is_empty() && !include.iter().any(|re| re.is_match(&url.loc)) {
                return false;
            }
            if exclude.iter().any(|re| re.is_match(&url.loc)) {
                return false;
            }
            true
        })
        .cloned()
        .collect();

    if let Some(limit) = filters.limit {
        filtered.truncate(limit);
    }

    tracing::info!(before = urls.len(), after = filtered.len(), "filtered sitemap URLs");
    Ok(filtered)
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                Error::new(ErrorKind::ConfigInvalid, format!("invalid URL pattern: {e}"))
                    .with_context("pattern", p)
                    .with_source(e)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        SitemapUrl, UrlFilters, filter_urls, parse_sitemap_xml, sitemaps_in_robots,
    };

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/a</loc>
    <lastmod>2024-01-15</lastmod>
    <changefreq>weekly</changefreq>
    <priority>0.8</priority>
  </url>
  <url>
    <loc>https://example.com/b</loc>
    <priority>not-a-number</priority>
  </url>
</urlset>"#;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-a.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemap-b.xml</loc></sitemap>
</sitemapindex>"#;

    fn entry(loc: &str, priority: Option<f64>) -> SitemapUrl {
        SitemapUrl {
            loc: loc.to_string(),
            lastmod: None,
            changefreq: None,
            priority,
        }
    }

    #[test]
    fn test_parse_urlset() {
        let (urls, children) = parse_sitemap_xml(URLSET).unwrap();
        assert!(children.is_empty());
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].loc, "https://example.com/a");
        assert_eq!(urls[0].lastmod.as_deref(), Some("2024-01-15"));
        assert_eq!(urls[0].changefreq.as_deref(), Some("weekly"));
        assert_eq!(urls[0].priority, Some(0.8));
    }

    #[test]
    fn test_unparseable_priority_becomes_none() {
        let (urls, _) = parse_sitemap_xml(URLSET).unwrap();
        assert_eq!(urls[1].priority, None);
    }

    #[test]
    fn test_parse_sitemap_index() {
        let (urls, children) = parse_sitemap_xml(INDEX).unwrap();
        assert!(urls.is_empty());
        assert_eq!(
            children,
            vec![
                "https://example.com/sitemap-a.xml",
                "https://example.com/sitemap-b.xml"
            ]
        );
    }

    #[test]
    fn test_parse_without_namespace() {
        let xml = "<urlset><url><loc>https://example.com/x</loc></url></urlset>";
        let (urls, _) = parse_sitemap_xml(xml).unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].loc, "https://example.com/x");
    }

    #[test]
    fn test_unexpected_root_is_error() {
        assert!(parse_sitemap_xml("<html><body/></html>").is_err());
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_sitemap_xml("<urlset><url><loc>x</url>").is_err());
    }

    #[test]
    fn test_robots_sitemap_directives() {
        let robots = "User-agent: *\nDisallow: /private\nSitemap: https://example.com/sitemap.xml\nSITEMAP: https://example.com/other.xml\n";
        assert_eq!(
            sitemaps_in_robots(robots),
            vec![
                "https://example.com/sitemap.xml",
                "https://example.com/other.xml"
            ]
        );
    }

    #[test]
    fn test_filter_min_priority_none_passes() {
        let urls = vec![
            entry("https://example.com/high", Some(0.9)),
            entry("https://example.com/low", Some(0.1)),
            entry("https://example.com/none", None),
        ];
        let filters = UrlFilters {
            min_priority: Some(0.5),
            ..Default::default()
        };
        let filtered = filter_urls(&urls, &filters).unwrap();
        let locs: Vec<&str> = filtered.iter().map(|u| u.loc.as_str()).collect();
        assert_eq!(locs, vec!["https://example.com/high", "https://example.com/none"]);
    }

    #[test]
    fn test_filter_exclude_wins_over_include() {
        let urls = vec![
            entry("https://example.com/blog/post", None),
            entry("https://example.com/blog/draft", None),
        ];
        let filters = UrlFilters {
            include: vec!["/blog/".to_string()],
            exclude: vec!["draft".to_string()],
            ..Default::default()
        };
        let filtered = filter_urls(&urls, &filters).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].loc, "https://example.com/blog/post");
    }

    #[test]
    fn test_filter_include_any_match() {
        let urls = vec![
            entry("https://example.com/docs/x", None),
            entry("https://example.com/blog/y", None),
            entry("https://example.com/shop/z", None),
        ];
        let filters = UrlFilters {
            include: vec!["/docs/".to_string(), "/blog/".to_string()],
            ..Default::default()
        };
        let filtered = filter_urls(&urls, &filters).unwrap();
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_filter_limit_preserves_order() {
        let urls: Vec<SitemapUrl> = (0..5)
            .map(|i| entry(&format!("https://example.com/{i}"), None))
            .collect();
        let filters = UrlFilters {
            limit: Some(2),
            ..Default::default()
        };
        let filtered = filter_urls(&urls, &filters).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].loc, "https://example.com/0");
        assert_eq!(filtered[1].loc, "https://example.com/1");
    }

    #[test]
    fn test_filter_invalid_regex_is_config_error() {
        let filters = UrlFilters {
            include: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        let err = filter_urls(&[], &filters).unwrap_err();
        assert_eq!(err.kind(), pagemill_types::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_export_urls_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        let urls = vec![
            SitemapUrl {
                loc: "https://example.com/a".to_string(),
                lastmod: Some("2024-01-15".to_string()),
                changefreq: None,
                priority: Some(0.8),
            },
            entry("https://example.com/b", None),
        ];
        super::export_urls(&urls, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "https://example.com/a,0.8,2024-01-15\nhttps://example.com/b\n"
        );
    }
}
