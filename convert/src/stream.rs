//! Streaming HTML parsing into lightweight element records.
//!
//! The fast path is a hand-rolled incremental tokenizer that walks the
//! input once and tolerates broken markup: unclosed tags, truncated
//! input, NUL bytes, attribute garbage, and deep nesting. When it fails
//! and the configuration allows, a lenient full parser (scraper) takes
//! over; both sit behind the same backend boundary and produce identical
//! record shapes.

use pagemill_net::HttpClient;
use pagemill_types::{Error, ErrorKind, Result};
use scraper::{ElementRef, Html, Node};
use std::collections::HashMap;

/// Tags whose aggregated text counts as document content.
const CONTENT_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "td", "th", "blockquote", "pre", "code",
];

/// Elements that never have closing tags.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose content is raw text, not markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Lightweight element record, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamElement {
    pub tag: String,
    /// Text between the start tag and the first child.
    pub text: Option<String>,
    /// Text between this element's end tag and the next sibling.
    pub tail: Option<String>,
    pub attributes: HashMap<String, String>,
}

/// An extracted `<a href>` record.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub href: String,
    pub text: String,
}

/// Parsed page: element records plus per-element descendant text.
#[derive(Debug, Default)]
pub struct ParsedHtml {
    elements: Vec<StreamElement>,
    subtree_text: Vec<String>,
}

impl ParsedHtml {
    /// Elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &StreamElement> {
        self.elements.iter()
    }

    /// Count of each tag in the document.
    #[must_use]
    pub fn tag_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for element in &self.elements {
            *counts.entry(element.tag.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// `(tag, text)` pairs for content-bearing elements, where text is
    /// the concatenated descendant text with whitespace runs collapsed.
    pub fn content_blocks(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.elements
            .iter()
            .zip(&self.subtree_text)
            .filter(|(element, _)| CONTENT_TAGS.contains(&element.tag.as_str()))
            .filter_map(|(element, subtree)| {
                let text = normalize_spaces(subtree);
                (!text.is_empty()).then(|| (element.tag.clone(), text))
            })
    }

    /// Elements whose `class` attribute contains the given token.
    pub fn find_by_class(&self, class_name: &str) -> impl Iterator<Item = &StreamElement> {
        self.elements.iter().filter(move |element| {
            element
                .attributes
                .get("class")
                .is_some_and(|classes| classes.split_whitespace().any(|c| c == class_name))
        })
    }

    /// `{href, text}` records for anchor elements carrying an href.
    pub fn links(&self) -> impl Iterator<Item = LinkRecord> + '_ {
        self.elements
            .iter()
            .zip(&self.subtree_text)
            .filter(|(element, _)| element.tag == "a")
            .filter_map(|(element, subtree)| {
                let href = element.attributes.get("href")?;
                let mut text = normalize_spaces(subtree);
                if text.is_empty()
                    && let Some(title) = element.attributes.get("title")
                {
                    text = normalize_spaces(title);
                }
                Some(LinkRecord {
                    href: href.clone(),
                    text,
                })
            })
    }
}

/// Parse possibly-broken HTML bytes.
///
/// Undecodable sequences are replaced and NUL bytes stripped before
/// parsing. On streaming-parser failure the lenient full parser runs
/// when `fallback` is set; if that also fails the error is
/// `ParsingFailed` with the parser kind in context.
pub fn parse_html(bytes: &[u8], fallback: bool) -> Result<ParsedHtml> {
    let text = decode_bytes(bytes);
    match StreamingBackend.parse(&text) {
        Ok(parsed) => Ok(parsed),
        Err(err) if fallback => {
            tracing::warn!(error = %err, "streaming parse failed, trying full parser");
            FullParserBackend.parse(&text)
        }
        Err(err) => Err(err),
    }
}

fn decode_bytes(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.contains('\0') {
        text.replace('\0', "")
    } else {
        text.into_owned()
    }
}

/// The strict/lenient parser boundary: exactly two implementations.
trait ParserBackend {
    fn parse(&self, html: &str) -> Result<ParsedHtml>;
}

struct StreamingBackend;

impl ParserBackend for StreamingBackend {
    fn parse(&self, html: &str) -> Result<ParsedHtml> {
        let events = tokenize(html);
        let parsed = assemble(events);
        if parsed.elements.is_empty() && !html.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::ParsingFailed,
                "streaming parser produced no elements",
            )
            .with_context("parser", "streaming"));
        }
        Ok(parsed)
    }
}

struct FullParserBackend;

impl ParserBackend for FullParserBackend {
    fn parse(&self, html: &str) -> Result<ParsedHtml> {
        let document = Html::parse_document(html);
        let mut parsed = ParsedHtml::default();
        walk_dom(document.root_element(), None, &mut parsed);
        if parsed.elements.is_empty() && !html.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::ParsingFailed,
                "recovery parser produced no elements",
            )
            .with_context("parser", "full"));
        }
        Ok(parsed)
    }
}

fn walk_dom(element: ElementRef<'_>, tail: Option<String>, parsed: &mut ParsedHtml) {
    let value = element.value();
    let attributes: HashMap<String, String> = value
        .attrs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect();

    let text = element.children().next().and_then(|first| match first.value() {
        Node::Text(text) => Some(text.to_string()),
        _ => None,
    });

    parsed.elements.push(StreamElement {
        tag: value.name().to_ascii_lowercase(),
        text,
        tail,
        attributes,
    });
    let subtree: String = element.text().collect::<Vec<_>>().join(" ");
    parsed.subtree_text.push(subtree);

    // Pair each child element with the text that follows it.
    let children: Vec<_> = element.children().collect();
    for (i, child) in children.iter().enumerate() {
        if let Some(el) = ElementRef::wrap(*child) {
            let mut tail_text = String::new();
            for sibling in &children[i + 1..] {
                match sibling.value() {
                    Node::Text(text) => tail_text.push_str(text),
                    Node::Element(_) => break,
                    _ => {}
                }
            }
            let tail = (!tail_text.is_empty()).then_some(tail_text);
            walk_dom(el, tail, parsed);
        }
    }
}

enum RawEvent {
    Open {
        tag: String,
        attributes: HashMap<String, String>,
        self_closing: bool,
    },
    Close(String),
    Text(String),
}

/// Single-pass tokenizer. Comments, doctype, and processing
/// instructions are skipped; raw-text element content is captured
/// verbatim; truncated constructs are dropped rather than failing.
fn tokenize(html: &str) -> Vec<RawEvent> {
    let bytes = html.as_bytes();
    let mut events = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let Some(lt) = find(bytes, b'<', i) else {
            push_text(&mut events, &html[i..]);
            break;
        };
        if lt > i {
            push_text(&mut events, &html[i..lt]);
        }
        i = lt;

        let rest = &bytes[i..];
        if rest.starts_with(b"<!--") {
            i = match find_sub(bytes, b"-->", i + 4) {
                Some(end) => end + 3,
                None => bytes.len(),
            };
        } else if rest.starts_with(b"<!") || rest.starts_with(b"<?") {
            i = match find(bytes, b'>', i + 2) {
                Some(end) => end + 1,
                None => bytes.len(),
            };
        } else if rest.starts_with(b"</") {
            let (name, next) = read_name(bytes, i + 2);
            i = match find(bytes, b'>', next) {
                Some(end) => end + 1,
                None => bytes.len(),
            };
            if !name.is_empty() {
                events.push(RawEvent::Close(name));
            }
        } else if rest.len() > 1 && rest[1].is_ascii_alphabetic() {
            match read_tag(html, bytes, i) {
                Some((tag, attributes, self_closing, next)) => {
                    i = next;
                    let raw_text = RAW_TEXT_ELEMENTS.contains(&tag.as_str()) && !self_closing;
                    events.push(RawEvent::Open {
                        tag: tag.clone(),
                        attributes,
                        self_closing,
                    });
                    if raw_text {
                        i = capture_raw_text(html, bytes, i, &tag, &mut events);
                    }
                }
                None => break, // truncated open tag at EOF
            }
        } else {
            // Literal '<' in text.
            push_text(&mut events, "<");
            i += 1;
        }
    }

    events
}

fn push_text(events: &mut Vec<RawEvent>, text: &str) {
    if !text.is_empty() {
        events.push(RawEvent::Text(decode_entities(text)));
    }
}

fn find(bytes: &[u8], needle: u8, from: usize) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|b| *b == needle)
        .map(|pos| from + pos)
}

fn find_sub(bytes: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    let start = from.min(bytes.len());
    bytes[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| start + pos)
}

fn read_name(bytes: &[u8], from: usize) -> (String, usize) {
    let mut i = from;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    (
        String::from_utf8_lossy(&bytes[from..i]).to_ascii_lowercase(),
        i,
    )
}

type OpenTag = (String, HashMap<String, String>, bool, usize);

/// Parse `<name attr=value ...>` starting at `<`. Returns `None` only
/// when the input ends before the tag closes.
fn read_tag(html: &str, bytes: &[u8], start: usize) -> Option<OpenTag> {
    let (tag, mut i) = read_name(bytes, start + 1);
    let mut attributes = HashMap::new();
    let mut self_closing = false;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                self_closing = true;
                i += 1;
            }
            _ => {
                let name_start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'=' | b'>' | b'/')
                {
                    i += 1;
                }
                let name = html[name_start..i].to_ascii_lowercase();
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                let value = if i < bytes.len() && bytes[i] == b'=' {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                        let quote = bytes[i];
                        let value_start = i + 1;
                        i = find(bytes, quote, value_start).unwrap_or(bytes.len());
                        let value = &html[value_start..i];
                        i = (i + 1).min(bytes.len());
                        decode_entities(value)
                    } else {
                        let value_start = i;
                        while i < bytes.len()
                            && !bytes[i].is_ascii_whitespace()
                            && bytes[i] != b'>'
                        {
                            i += 1;
                        }
                        decode_entities(&html[value_start..i])
                    }
                } else {
                    String::new()
                };
                if !name.is_empty() {
                    attributes.entry(name).or_insert(value);
                }
            }
        }
    }

    let self_closing = self_closing || VOID_ELEMENTS.contains(&tag.as_str());
    Some((tag, attributes, self_closing, i))
}

/// Capture script/style content verbatim until the matching close tag.
/// An unterminated element swallows the rest of the input as its text.
fn capture_raw_text(
    html: &str,
    bytes: &[u8],
    from: usize,
    tag: &str,
    events: &mut Vec<RawEvent>,
) -> usize {
    let closer = format!("</{tag}");
    let end = html[from..]
        .to_ascii_lowercase()
        .find(&closer)
        .map(|pos| from + pos);

    match end {
        Some(end) => {
            if end > from {
                events.push(RawEvent::Text(html[from..end].to_string()));
            }
            events.push(RawEvent::Close(tag.to_string()));
            match find(bytes, b'>', end) {
                Some(gt) => gt + 1,
                None => bytes.len(),
            }
        }
        None => {
            if from < html.len() {
                events.push(RawEvent::Text(html[from..].to_string()));
            }
            events.push(RawEvent::Close(tag.to_string()));
            bytes.len()
        }
    }
}

/// Assemble events into element records with lxml-style text/tail
/// semantics. Stray close tags are ignored; elements left open at EOF
/// are implicitly closed.
fn assemble(events: Vec<RawEvent>) -> ParsedHtml {
    let mut parsed = ParsedHtml::default();
    let mut stack: Vec<usize> = Vec::new();
    // Where trailing text attaches: the just-opened element's text, or
    // the just-closed element's tail.
    let mut last: Option<(usize, bool)> = None;

    for event in events {
        match event {
            RawEvent::Open {
                tag,
                attributes,
                self_closing,
            } => {
                let idx = parsed.elements.len();
                parsed.elements.push(StreamElement {
                    tag,
                    text: None,
                    tail: None,
                    attributes,
                });
                parsed.subtree_text.push(String::new());
                if self_closing {
                    last = Some((idx, false));
                } else {
                    stack.push(idx);
                    last = Some((idx, true));
                }
            }
            RawEvent::Close(tag) => {
                if let Some(pos) = stack
                    .iter()
                    .rposition(|idx| parsed.elements[*idx].tag == tag)
                {
                    let idx = stack[pos];
                    stack.truncate(pos);
                    last = Some((idx, false));
                }
                // No matching open tag: stray close, ignored.
            }
            RawEvent::Text(text) => {
                // Fragments are space-joined so element boundaries keep
                // word boundaries; normalization collapses the doubles.
                for idx in &stack {
                    let subtree = &mut parsed.subtree_text[*idx];
                    if !subtree.is_empty() {
                        subtree.push(' ');
                    }
                    subtree.push_str(&text);
                }
                match last {
                    Some((idx, true)) => {
                        append(&mut parsed.elements[idx].text, &text);
                    }
                    Some((idx, false)) => {
                        append(&mut parsed.elements[idx].tail, &text);
                    }
                    None => {}
                }
            }
        }
    }

    parsed
}

fn append(slot: &mut Option<String>, text: &str) {
    slot.get_or_insert_with(String::new).push_str(text);
}

fn normalize_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the common HTML entities; unknown entities pass through.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.bytes().take(10).position(|b| b == b';') else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix('#')
                .and_then(|num| {
                    if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        num.parse().ok()
                    }
                })
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// URL-level parsing operations backed by the shared HTTP client.
pub struct StreamingHtmlParser<'c> {
    client: &'c HttpClient,
    fallback_to_full_parser: bool,
}

impl<'c> StreamingHtmlParser<'c> {
    #[must_use]
    pub fn new(client: &'c HttpClient) -> Self {
        Self {
            client,
            fallback_to_full_parser: client.config().fallback_to_full_parser,
        }
    }

    async fn fetch_parsed(&self, url: &str) -> Result<ParsedHtml> {
        let body = self.client.get(url, true).await?;
        parse_html(body.as_bytes(), self.fallback_to_full_parser)
            .map_err(|e| e.with_context("url", url))
    }

    /// Count occurrences of each tag in the document.
    pub async fn count_elements(&self, url: &str) -> Result<HashMap<String, usize>> {
        Ok(self.fetch_parsed(url).await?.tag_counts())
    }

    /// Extract `(tag, text)` content blocks in document order.
    pub async fn extract_content_blocks(&self, url: &str) -> Result<Vec<(String, String)>> {
        Ok(self.fetch_parsed(url).await?.content_blocks().collect())
    }

    /// Find elements carrying the given class token.
    pub async fn find_by_class(&self, url: &str, class_name: &str) -> Result<Vec<StreamElement>> {
        Ok(self
            .fetch_parsed(url)
            .await?
            .find_by_class(class_name)
            .cloned()
            .collect())
    }

    /// Extract `{href, text}` link records.
    pub async fn extract_links(&self, url: &str) -> Result<Vec<LinkRecord>> {
        Ok(self.fetch_parsed(url).await?.links().collect())
    }
}
