//! Markdown serializer.

use crate::document::{Block, DocMetadata, Document, Inline};

/// Render a document as Markdown. The metadata header (source URL and
/// generation timestamp) is included iff `metadata` is provided.
#[must_use]
pub fn to_markdown(doc: &Document, metadata: Option<&DocMetadata>) -> String {
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", doc.title));
    if let Some(meta) = metadata {
        out.push_str(&format!("*Source: {}*\n", meta.source_url));
        out.push_str(&format!("*Generated: {}*\n\n", meta.generated_at));
    }

    let rendered: Vec<String> = doc.blocks.iter().map(render_block).collect();
    out.push_str(&rendered.join("\n\n"));

    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn render_block(block: &Block) -> String {
    match block {
        Block::Heading { level, inline } => {
            format!("{} {}", "#".repeat(usize::from(*level)), render_inline(inline))
        }
        Block::Paragraph(inline) => render_inline(inline),
        Block::UnorderedList(items) => items
            .iter()
            .map(|item| format!("- {}", render_inline(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Block::OrderedList(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, render_inline(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Block::Blockquote(inline) => render_inline(inline)
            .lines()
            .map(|line| format!("> {line}"))
            .collect::<Vec<_>>()
            .join("\n"),
        Block::CodeBlock { language, text } => {
            format!("```{}\n{text}\n```", language.as_deref().unwrap_or(""))
        }
        Block::Image { src, alt } => format!("![{alt}]({src})"),
        Block::Raw(text) => text.clone(),
    }
}

fn render_inline(inline: &[Inline]) -> String {
    let mut out = String::new();
    for node in inline {
        match node {
            Inline::Text(text) => out.push_str(text),
            Inline::Link { href, children } => {
                out.push_str(&format!("[{}]({href})", render_inline(children)));
            }
            Inline::Image { src, alt } => out.push_str(&format!("![{alt}]({src})")),
            Inline::Code(code) => out.push_str(&format!("`{code}`")),
            Inline::Strong(children) => {
                out.push_str(&format!("**{}**", render_inline(children)));
            }
            Inline::Emphasis(children) => {
                out.push_str(&format!("*{}*", render_inline(children)));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::to_markdown;
    use crate::builder::build_document;
    use crate::document::{Block, DocMetadata, Document, Inline};
    use pretty_assertions::assert_eq;
    use url::Url;

    fn doc_with(blocks: Vec<Block>) -> Document {
        Document {
            title: "Title".to_string(),
            base_url: Url::parse("https://example.com/").unwrap(),
            blocks,
        }
    }

    #[test]
    fn test_tiny_html_scenario() {
        let doc = build_document(
            "<html><head><title>T</title></head><body><h1>H1</h1><p>Hello</p></body></html>",
            &Url::parse("https://example.com/").unwrap(),
        );
        let markdown = to_markdown(&doc, None);
        assert!(markdown.starts_with("# T\n"));
        assert!(markdown.contains("# H1"));
        assert!(markdown.lines().any(|line| line == "Hello"));
        assert!(!markdown.contains("]("));
        assert!(!markdown.contains("!["));
    }

    #[test]
    fn test_base_url_resolution_scenario() {
        let doc = build_document(
            r#"<html><body><a href="/a">L</a><img src="../img.png"></body></html>"#,
            &Url::parse("https://x.test/path/").unwrap(),
        );
        let markdown = to_markdown(&doc, None);
        assert!(markdown.contains("[L](https://x.test/a)"));
        assert!(markdown.contains("![](https://x.test/img.png)"));
    }

    #[test]
    fn test_blocks_separated_by_blank_line() {
        let doc = doc_with(vec![
            Block::Paragraph(vec![Inline::Text("one".to_string())]),
            Block::Paragraph(vec![Inline::Text("two".to_string())]),
        ]);
        assert_eq!(to_markdown(&doc, None), "# Title\n\none\n\ntwo\n");
    }

    #[test]
    fn test_list_rendering() {
        let doc = doc_with(vec![
            Block::UnorderedList(vec![
                vec![Inline::Text("a".to_string())],
                vec![Inline::Text("b".to_string())],
            ]),
            Block::OrderedList(vec![
                vec![Inline::Text("x".to_string())],
                vec![Inline::Text("y".to_string())],
            ]),
        ]);
        let markdown = to_markdown(&doc, None);
        assert!(markdown.contains("- a\n- b"));
        assert!(markdown.contains("1. x\n2. y"));
    }

    #[test]
    fn test_blockquote_prefixes_every_line() {
        let doc = doc_with(vec![Block::Blockquote(vec![Inline::Text(
            "quoted".to_string(),
        )])]);
        assert!(to_markdown(&doc, None).contains("> quoted"));
    }

    #[test]
    fn test_code_block_fencing() {
        let doc = doc_with(vec![Block::CodeBlock {
            language: Some("rust".to_string()),
            text: "fn main() {}".to_string(),
        }]);
        assert!(to_markdown(&doc, None).contains("```rust\nfn main() {}\n```"));

        let doc = doc_with(vec![Block::CodeBlock {
            language: None,
            text: "plain".to_string(),
        }]);
        assert!(to_markdown(&doc, None).contains("```\nplain\n```"));
    }

    #[test]
    fn test_strong_and_emphasis() {
        let doc = doc_with(vec![Block::Paragraph(vec![
            Inline::Strong(vec![Inline::Text("bold".to_string())]),
            Inline::Text(" ".to_string()),
            Inline::Emphasis(vec![Inline::Text("soft".to_string())]),
        ])]);
        let markdown = to_markdown(&doc, None);
        assert!(markdown.contains("**bold** *soft*"));
    }

    #[test]
    fn test_metadata_header_only_when_requested() {
        let doc = doc_with(vec![]);
        let meta = DocMetadata {
            source_url: "https://example.com/page".to_string(),
            generated_at: "2024-06-01T00:00:00Z".to_string(),
        };

        let with_meta = to_markdown(&doc, Some(&meta));
        assert!(with_meta.contains("*Source: https://example.com/page*"));
        assert!(with_meta.contains("*Generated: 2024-06-01T00:00:00Z*"));

        let without = to_markdown(&doc, None);
        assert!(!without.contains("*Source:"));
    }

    #[test]
    fn test_roundtrip_preserves_structure() {
        // parse(html) -> document -> markdown: headings, paragraphs,
        // links, and images all survive into the Markdown text.
        let html = r#"<html><head><title>Guide</title></head><body>
            <h2>Install</h2>
            <p>Get it from <a href="/dl">downloads</a>.</p>
            <img src="/shot.png" alt="screenshot">
        </body></html>"#;
        let doc = build_document(html, &Url::parse("https://example.com/").unwrap());
        let markdown = to_markdown(&doc, None);
        assert!(markdown.contains("## Install"));
        assert!(markdown.contains("[downloads](https://example.com/dl)"));
        assert!(markdown.contains("![screenshot](https://example.com/shot.png)"));
    }
}
