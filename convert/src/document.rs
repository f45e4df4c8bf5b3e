//! Canonical document model.
//!
//! A `Document` is a titled, base-URL-anchored sequence of block nodes.
//! All URLs in the tree are absolute: the builder resolves relative
//! hrefs/srcs against the document base URL before they land here.

use chrono::{SecondsFormat, Utc};
use url::Url;

/// Root of the canonical tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub title: String,
    pub base_url: Url,
    pub blocks: Vec<Block>,
}

/// Top-level document elements, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, inline: Vec<Inline> },
    Paragraph(Vec<Inline>),
    UnorderedList(Vec<Vec<Inline>>),
    OrderedList(Vec<Vec<Inline>>),
    Blockquote(Vec<Inline>),
    CodeBlock { language: Option<String>, text: String },
    /// Standalone image.
    Image { src: String, alt: String },
    /// Escape hatch for content that fits no other variant.
    Raw(String),
}

/// Phrase-level elements nested inside blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text(String),
    Link { href: String, children: Vec<Inline> },
    Image { src: String, alt: String },
    Code(String),
    Strong(Vec<Inline>),
    Emphasis(Vec<Inline>),
}

/// Plain text of an inline run, formatting stripped.
#[must_use]
pub fn inline_text(inline: &[Inline]) -> String {
    let mut out = String::new();
    collect_text(inline, &mut out);
    out
}

fn collect_text(inline: &[Inline], out: &mut String) {
    for node in inline {
        match node {
            Inline::Text(text) | Inline::Code(text) => out.push_str(text),
            Inline::Link { children, .. } => collect_text(children, out),
            Inline::Image { alt, .. } => out.push_str(alt),
            Inline::Strong(children) | Inline::Emphasis(children) => collect_text(children, out),
        }
    }
}

/// Optional serializer metadata, attached when the caller requests it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocMetadata {
    pub source_url: String,
    pub generated_at: String,
}

impl DocMetadata {
    /// Metadata stamped with the current time.
    #[must_use]
    pub fn now(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Inline, inline_text};

    #[test]
    fn test_inline_text_strips_formatting() {
        let run = vec![
            Inline::Text("see ".to_string()),
            Inline::Link {
                href: "https://example.com".to_string(),
                children: vec![Inline::Strong(vec![Inline::Text("the docs".to_string())])],
            },
            Inline::Text(" and ".to_string()),
            Inline::Code("run()".to_string()),
        ];
        assert_eq!(inline_text(&run), "see the docs and run()");
    }

    #[test]
    fn test_inline_image_contributes_alt() {
        let run = vec![Inline::Image {
            src: "https://example.com/x.png".to_string(),
            alt: "diagram".to_string(),
        }];
        assert_eq!(inline_text(&run), "diagram");
    }
}
