//! JSON serializer.

use crate::document::{Block, DocMetadata, Document, Inline, inline_text};
use serde::Serialize;

#[derive(Serialize)]
struct JsonDocument<'a> {
    title: &'a str,
    base_url: &'a str,
    headings: Vec<JsonHeading>,
    paragraphs: Vec<String>,
    links: Vec<JsonLink>,
    images: Vec<JsonImage>,
    lists: Vec<JsonList>,
    code_blocks: Vec<JsonCodeBlock>,
    blockquotes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<JsonMetadata<'a>>,
}

#[derive(Serialize)]
struct JsonHeading {
    level: u8,
    text: String,
}

#[derive(Serialize)]
struct JsonLink {
    href: String,
    text: String,
}

#[derive(Serialize)]
struct JsonImage {
    src: String,
    alt: String,
}

#[derive(Serialize)]
struct JsonList {
    ordered: bool,
    items: Vec<String>,
}

#[derive(Serialize)]
struct JsonCodeBlock {
    language: Option<String>,
    code: String,
}

#[derive(Serialize)]
struct JsonMetadata<'a> {
    source_url: &'a str,
    generated_at: &'a str,
    format: &'static str,
}

/// Render a document as JSON with the given indent width. Arrays
/// preserve document order. Never raises: an internal serialization
/// failure produces an error-wrapping object instead.
#[must_use]
pub fn to_json(doc: &Document, metadata: Option<&DocMetadata>, indent: usize) -> String {
    let json_doc = collect(doc, metadata);
    match serialize_pretty(&json_doc, indent) {
        Ok(out) => out,
        Err(err) => error_object(doc, &err.to_string()),
    }
}

fn collect<'a>(doc: &'a Document, metadata: Option<&'a DocMetadata>) -> JsonDocument<'a> {
    let mut headings = Vec::new();
    let mut paragraphs = Vec::new();
    let mut links = Vec::new();
    let mut images = Vec::new();
    let mut lists = Vec::new();
    let mut code_blocks = Vec::new();
    let mut blockquotes = Vec::new();

    for block in &doc.blocks {
        match block {
            Block::Heading { level, inline } => {
                headings.push(JsonHeading {
                    level: *level,
                    text: inline_text(inline),
                });
                collect_inline(inline, &mut links, &mut images);
            }
            Block::Paragraph(inline) => {
                paragraphs.push(inline_text(inline));
                collect_inline(inline, &mut links, &mut images);
            }
            Block::UnorderedList(items) | Block::OrderedList(items) => {
                lists.push(JsonList {
                    ordered: matches!(block, Block::OrderedList(_)),
                    items: items.iter().map(|item| inline_text(item)).collect(),
                });
                for item in items {
                    collect_inline(item, &mut links, &mut images);
                }
            }
            Block::Blockquote(inline) => {
                blockquotes.push(inline_text(inline));
                collect_inline(inline, &mut links, &mut images);
            }
            Block::CodeBlock { language, text } => {
                code_blocks.push(JsonCodeBlock {
                    language: language.clone(),
                    code: text.clone(),
                });
            }
            Block::Image { src, alt } => {
                images.push(JsonImage {
                    src: src.clone(),
                    alt: alt.clone(),
                });
            }
            Block::Raw(_) => {}
        }
    }

    JsonDocument {
        title: &doc.title,
        base_url: doc.base_url.as_str(),
        headings,
        paragraphs,
        links,
        images,
        lists,
        code_blocks,
        blockquotes,
        metadata: metadata.map(|meta| JsonMetadata {
            source_url: &meta.source_url,
            generated_at: &meta.generated_at,
            format: "json",
        }),
    }
}

fn collect_inline(inline: &[Inline], links: &mut Vec<JsonLink>, images: &mut Vec<JsonImage>) {
    for node in inline {
        match node {
            Inline::Link { href, children } => {
                links.push(JsonLink {
                    href: href.clone(),
                    text: inline_text(children),
                });
                collect_inline(children, links, images);
            }
            Inline::Image { src, alt } => {
                images.push(JsonImage {
                    src: src.clone(),
                    alt: alt.clone(),
                });
            }
            Inline::Strong(children) | Inline::Emphasis(children) => {
                collect_inline(children, links, images);
            }
            Inline::Text(_) | Inline::Code(_) => {}
        }
    }
}

fn serialize_pretty<T: Serialize>(value: &T, indent: usize) -> serde_json::Result<String> {
    let indent_bytes = vec![b' '; indent];
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent_bytes);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn error_object(doc: &Document, message: &str) -> String {
    let wrapped = serde_json::json!({
        "error": message,
        "raw_content": format!("{doc:?}"),
    });
    serde_json::to_string_pretty(&wrapped)
        .unwrap_or_else(|_| format!("{{\"error\": \"{message}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::to_json;
    use crate::builder::build_document;
    use crate::document::DocMetadata;
    use url::Url;

    fn parse(json: &str) -> serde_json::Value {
        serde_json::from_str(json).expect("serializer must emit valid JSON")
    }

    fn sample() -> crate::document::Document {
        build_document(
            r#"<html><head><title>Sample</title></head><body>
                <h1>Top</h1>
                <h2>Sub</h2>
                <p>First paragraph with <a href="/link">a link</a>.</p>
                <ul><li>alpha</li><li>beta</li></ul>
                <ol><li>one</li></ol>
                <blockquote>quoted</blockquote>
                <pre><code class="language-py">print(1)</code></pre>
                <img src="/i.png" alt="icon">
            </body></html>"#,
            &Url::parse("https://example.com/").unwrap(),
        )
    }

    #[test]
    fn test_field_structure() {
        let value = parse(&to_json(&sample(), None, 2));
        assert_eq!(value["title"], "Sample");
        assert_eq!(value["base_url"], "https://example.com/");
        assert_eq!(value["headings"][0]["level"], 1);
        assert_eq!(value["headings"][0]["text"], "Top");
        assert_eq!(value["headings"][1]["level"], 2);
        assert_eq!(value["paragraphs"][0], "First paragraph with a link.");
        assert_eq!(value["links"][0]["href"], "https://example.com/link");
        assert_eq!(value["links"][0]["text"], "a link");
        assert_eq!(value["images"][0]["src"], "https://example.com/i.png");
        assert_eq!(value["code_blocks"][0]["language"], "py");
        assert_eq!(value["code_blocks"][0]["code"], "print(1)");
        assert_eq!(value["blockquotes"][0], "quoted");
    }

    #[test]
    fn test_lists_preserve_order_and_kind() {
        let value = parse(&to_json(&sample(), None, 2));
        assert_eq!(value["lists"][0]["ordered"], false);
        assert_eq!(value["lists"][0]["items"][0], "alpha");
        assert_eq!(value["lists"][0]["items"][1], "beta");
        assert_eq!(value["lists"][1]["ordered"], true);
    }

    #[test]
    fn test_metadata_optional() {
        let doc = sample();
        let without = parse(&to_json(&doc, None, 2));
        assert!(without.get("metadata").is_none());

        let meta = DocMetadata {
            source_url: "https://example.com/".to_string(),
            generated_at: "2024-06-01T00:00:00Z".to_string(),
        };
        let with = parse(&to_json(&doc, Some(&meta), 2));
        assert_eq!(with["metadata"]["format"], "json");
        assert_eq!(with["metadata"]["source_url"], "https://example.com/");
    }

    #[test]
    fn test_indent_configurable() {
        let doc = sample();
        let four = to_json(&doc, None, 4);
        assert!(four.contains("\n    \"title\""));
        let two = to_json(&doc, None, 2);
        assert!(two.contains("\n  \"title\""));
    }

    #[test]
    fn test_empty_document_serializes() {
        let doc = build_document("", &Url::parse("https://example.com/").unwrap());
        let value = parse(&to_json(&doc, None, 2));
        assert_eq!(value["title"], "No Title");
        assert_eq!(value["paragraphs"].as_array().unwrap().len(), 0);
    }
}
