//! HTML to `Document` construction.
//!
//! Walks the main content region of a parsed page and emits recognized
//! block elements in document order. Loose inline content at block level
//! is wrapped into an implicit paragraph; a lone image becomes a block
//! image.

use crate::document::{Block, Document, Inline};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

/// Tags treated as phrase-level when encountered at block position.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "br", "cite", "em", "i", "img", "kbd", "label", "mark", "q", "s", "small",
    "span", "strong", "sub", "sup", "time", "u",
];

/// Tags whose content never reaches the document.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Build the canonical document for an HTML page fetched from `fetch_url`.
///
/// Title falls back from `<title>` to the first `<h1>` to `"No Title"`;
/// the base URL comes from `<base href>` when present, otherwise the
/// fetch URL. Empty input yields a document with no blocks.
#[must_use]
pub fn build_document(html: &str, fetch_url: &Url) -> Document {
    let parsed = Html::parse_document(html);

    let title = extract_title(&parsed);
    let base_url = extract_base_url(&parsed, fetch_url);

    let mut blocks = Vec::new();
    if let Some(root) = find_content_root(&parsed) {
        let mut walker = BlockWalker::new(&base_url);
        walker.walk(root, &mut blocks);
        walker.flush(&mut blocks);
    }

    Document {
        title,
        base_url,
        blocks,
    }
}

fn extract_title(document: &Html) -> String {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str)
            && let Some(element) = document.select(&selector).next()
        {
            let text = collapse_whitespace(&element.text().collect::<String>());
            if !text.is_empty() {
                return text;
            }
        }
    }
    "No Title".to_string()
}

fn extract_base_url(document: &Html, fetch_url: &Url) -> Url {
    let Ok(selector) = Selector::parse("base[href]") else {
        return fetch_url.clone();
    };
    document
        .select(&selector)
        .next()
        .and_then(|e| e.value().attr("href"))
        .and_then(|href| fetch_url.join(href).ok())
        .unwrap_or_else(|| fetch_url.clone())
}

/// Preference order: `<main>`, `<article>`, `#content`, `.content`, `<body>`.
fn find_content_root(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in ["main", "article", "#content", ".content", "body"] {
        if let Ok(selector) = Selector::parse(selector_str)
            && let Some(element) = document.select(&selector).next()
        {
            return Some(element);
        }
    }
    None
}

struct BlockWalker<'a> {
    base_url: &'a Url,
    pending: Vec<Inline>,
}

impl<'a> BlockWalker<'a> {
    fn new(base_url: &'a Url) -> Self {
        Self {
            base_url,
            pending: Vec::new(),
        }
    }

    fn walk(&mut self, element: ElementRef<'_>, blocks: &mut Vec<Block>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => {
                    if !text.trim().is_empty() || !self.pending.is_empty() {
                        self.pending.push(Inline::Text(collapse_inline(text)));
                    }
                }
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.element(el, blocks);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, element: ElementRef<'_>, blocks: &mut Vec<Block>) {
        let tag = element.value().name();

        if SKIPPED_TAGS.contains(&tag) {
            return;
        }

        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush(blocks);
                let level = tag.as_bytes()[1] - b'0';
                blocks.push(Block::Heading {
                    level,
                    inline: self.inline_children(element),
                });
            }
            "p" => {
                self.flush(blocks);
                let inline = self.inline_children(element);
                if !inline.is_empty() {
                    blocks.push(Block::Paragraph(inline));
                }
            }
            "ul" | "ol" => {
                self.flush(blocks);
                let items = self.list_items(element);
                if !items.is_empty() {
                    blocks.push(if tag == "ul" {
                        Block::UnorderedList(items)
                    } else {
                        Block::OrderedList(items)
                    });
                }
            }
            "blockquote" => {
                self.flush(blocks);
                let inline = self.inline_children(element);
                if !inline.is_empty() {
                    blocks.push(Block::Blockquote(inline));
                }
            }
            "pre" => {
                self.flush(blocks);
                blocks.push(code_block_from_pre(element));
            }
            "code" if self.pending.is_empty() => {
                // A code element alone at block position is a code block;
                // mixed into a text run it stays inline.
                self.flush(blocks);
                blocks.push(Block::CodeBlock {
                    language: language_of(element),
                    text: raw_text(element),
                });
            }
            "img" => {
                let (src, alt) = self.image_parts(element);
                self.pending.push(Inline::Image { src, alt });
            }
            "br" => self.pending.push(Inline::Text(" ".to_string())),
            _ if INLINE_TAGS.contains(&tag) || tag == "code" => {
                let mut run = Vec::new();
                self.inline_element(element, &mut run);
                self.pending.extend(run);
            }
            _ => {
                // Container (div, section, table, ...): recurse for nested blocks.
                self.flush(blocks);
                self.walk(element, blocks);
                self.flush(blocks);
            }
        }
    }

    /// Emit any accumulated loose inline content as an implicit block.
    fn flush(&mut self, blocks: &mut Vec<Block>) {
        let run = normalize_inline(std::mem::take(&mut self.pending));
        if run.is_empty() {
            return;
        }
        // A run that is a single image stands alone as a block image.
        if let [Inline::Image { src, alt }] = run.as_slice() {
            blocks.push(Block::Image {
                src: src.clone(),
                alt: alt.clone(),
            });
        } else {
            blocks.push(Block::Paragraph(run));
        }
    }

    fn list_items(&mut self, element: ElementRef<'_>) -> Vec<Vec<Inline>> {
        let mut items = Vec::new();
        for child in element.children() {
            if let Some(el) = ElementRef::wrap(child)
                && el.value().name() == "li"
            {
                let inline = self.inline_children(el);
                if !inline.is_empty() {
                    items.push(inline);
                }
            }
        }
        items
    }

    fn inline_children(&mut self, element: ElementRef<'_>) -> Vec<Inline> {
        let mut run = Vec::new();
        self.inline_nodes(element, &mut run);
        normalize_inline(run)
    }

    fn inline_nodes(&mut self, element: ElementRef<'_>, run: &mut Vec<Inline>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => run.push(Inline::Text(collapse_inline(text))),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.inline_element(el, run);
                    }
                }
                _ => {}
            }
        }
    }

    fn inline_element(&mut self, element: ElementRef<'_>, run: &mut Vec<Inline>) {
        let tag = element.value().name();

        if SKIPPED_TAGS.contains(&tag) {
            return;
        }

        match tag {
            "a" => {
                let href = element.value().attr("href").unwrap_or_default();
                let mut children = Vec::new();
                self.inline_nodes(element, &mut children);
                run.push(Inline::Link {
                    href: self.resolve_url(href),
                    children: normalize_inline(children),
                });
            }
            "img" => {
                let (src, alt) = self.image_parts(element);
                run.push(Inline::Image { src, alt });
            }
            "code" => run.push(Inline::Code(collapse_whitespace(&raw_text(element)))),
            "strong" | "b" => {
                let mut children = Vec::new();
                self.inline_nodes(element, &mut children);
                run.push(Inline::Strong(normalize_inline(children)));
            }
            "em" | "i" => {
                let mut children = Vec::new();
                self.inline_nodes(element, &mut children);
                run.push(Inline::Emphasis(normalize_inline(children)));
            }
            "br" => run.push(Inline::Text(" ".to_string())),
            _ => {
                // Unknown inline tags flatten to their content. Nested
                // lists inside list items land here and become item text.
                run.push(Inline::Text(" ".to_string()));
                self.inline_nodes(element, run);
                run.push(Inline::Text(" ".to_string()));
            }
        }
    }

    fn image_parts(&self, element: ElementRef<'_>) -> (String, String) {
        let src = element.value().attr("src").unwrap_or_default();
        let alt = element.value().attr("alt").unwrap_or_default();
        (self.resolve_url(src), collapse_whitespace(alt))
    }

    /// Resolve against the base URL; failures preserve the input verbatim.
    fn resolve_url(&self, href: &str) -> String {
        match self.base_url.join(href.trim()) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => href.to_string(),
        }
    }
}

fn code_block_from_pre(element: ElementRef<'_>) -> Block {
    // <pre><code class="language-X"> carries the language tag.
    let code_child = element.children().find_map(|child| {
        ElementRef::wrap(child).filter(|el| el.value().name() == "code")
    });
    match code_child {
        Some(code) => Block::CodeBlock {
            language: language_of(code),
            text: raw_text(code),
        },
        None => Block::CodeBlock {
            language: None,
            text: raw_text(element),
        },
    }
}

fn language_of(element: ElementRef<'_>) -> Option<String> {
    element
        .value()
        .attr("class")?
        .split_whitespace()
        .find_map(|token| token.strip_prefix("language-"))
        .map(str::to_string)
}

/// Descendant text with original whitespace, for code blocks.
fn raw_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.trim_matches('\n').to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace runs to single spaces, keeping boundary spaces.
fn collapse_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

/// Merge adjacent text nodes, re-collapse whitespace, trim run edges,
/// and drop empty fragments.
fn normalize_inline(run: Vec<Inline>) -> Vec<Inline> {
    let mut merged: Vec<Inline> = Vec::with_capacity(run.len());
    for node in run {
        if let Inline::Text(text) = &node
            && let Some(Inline::Text(last)) = merged.last_mut()
        {
            last.push_str(text);
            *last = collapse_inline(last);
            continue;
        }
        merged.push(node);
    }

    if let Some(Inline::Text(first)) = merged.first_mut() {
        *first = first.trim_start().to_string();
    }
    if let Some(Inline::Text(last)) = merged.last_mut() {
        *last = last.trim_end().to_string();
    }

    merged.retain(|node| !matches!(node, Inline::Text(text) if text.is_empty()));
    merged
}
