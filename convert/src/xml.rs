//! XML serializer.
//!
//! Output begins with an XML declaration; the root element is `Document`.
//! Text content is escaped by the writer. A malformed tree never raises:
//! the serializer falls back to a root document wrapping `error` and
//! `raw_content` elements.

use crate::document::{Block, DocMetadata, Document, Inline, inline_text};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

/// Render a document as XML, pretty-printed with two-space indentation
/// when `pretty` is set.
#[must_use]
pub fn to_xml(doc: &Document, metadata: Option<&DocMetadata>, pretty: bool) -> String {
    match write_document(doc, metadata, pretty) {
        Ok(out) => out,
        Err(err) => {
            tracing::warn!(error = %err, "XML serialization failed, emitting error document");
            error_document(&format!("{doc:?}"), &err.to_string())
        }
    }
}

/// Root document wrapping an error and the offending input, used when
/// serialization fails.
#[must_use]
pub fn error_document(raw_content: &str, message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Document>\n  <error>{}</error>\n  <raw_content>{}</raw_content>\n</Document>",
        escape_text(message),
        escape_text(raw_content)
    )
}

fn write_document(
    doc: &Document,
    metadata: Option<&DocMetadata>,
    pretty: bool,
) -> quick_xml::Result<String> {
    let mut writer = if pretty {
        Writer::new_with_indent(Vec::new(), b' ', 2)
    } else {
        Writer::new(Vec::new())
    };

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("Document")))?;

    text_element(&mut writer, "title", &doc.title)?;
    text_element(&mut writer, "base_url", doc.base_url.as_str())?;

    writer.write_event(Event::Start(BytesStart::new("headings")))?;
    for block in &doc.blocks {
        if let Block::Heading { level, inline } = block {
            let level_attr = level.to_string();
            let mut start = BytesStart::new("heading");
            start.push_attribute(("level", level_attr.as_str()));
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(&inline_text(inline))))?;
            writer.write_event(Event::End(BytesEnd::new("heading")))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("headings")))?;

    writer.write_event(Event::Start(BytesStart::new("paragraphs")))?;
    for block in &doc.blocks {
        if let Block::Paragraph(inline) = block {
            text_element(&mut writer, "paragraph", &inline_text(inline))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("paragraphs")))?;

    writer.write_event(Event::Start(BytesStart::new("links")))?;
    for (href, text) in collect_links(doc) {
        let mut start = BytesStart::new("link");
        start.push_attribute(("href", href.as_str()));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&text)))?;
        writer.write_event(Event::End(BytesEnd::new("link")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("links")))?;

    writer.write_event(Event::Start(BytesStart::new("images")))?;
    for (src, alt) in collect_images(doc) {
        let mut start = BytesStart::new("image");
        start.push_attribute(("src", src.as_str()));
        start.push_attribute(("alt", alt.as_str()));
        writer.write_event(Event::Empty(start))?;
    }
    writer.write_event(Event::End(BytesEnd::new("images")))?;

    writer.write_event(Event::Start(BytesStart::new("lists")))?;
    for block in &doc.blocks {
        let (ordered, items) = match block {
            Block::UnorderedList(items) => (false, items),
            Block::OrderedList(items) => (true, items),
            _ => continue,
        };
        let mut start = BytesStart::new("list");
        start.push_attribute(("ordered", if ordered { "true" } else { "false" }));
        writer.write_event(Event::Start(start))?;
        for item in items {
            text_element(&mut writer, "item", &inline_text(item))?;
        }
        writer.write_event(Event::End(BytesEnd::new("list")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("lists")))?;

    writer.write_event(Event::Start(BytesStart::new("code_blocks")))?;
    for block in &doc.blocks {
        if let Block::CodeBlock { language, text } = block {
            let mut start = BytesStart::new("code_block");
            if let Some(language) = language {
                start.push_attribute(("language", language.as_str()));
            }
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new("code_block")))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("code_blocks")))?;

    writer.write_event(Event::Start(BytesStart::new("blockquotes")))?;
    for block in &doc.blocks {
        if let Block::Blockquote(inline) = block {
            text_element(&mut writer, "blockquote", &inline_text(inline))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("blockquotes")))?;

    if let Some(meta) = metadata {
        writer.write_event(Event::Start(BytesStart::new("metadata")))?;
        text_element(&mut writer, "source_url", &meta.source_url)?;
        text_element(&mut writer, "generated_at", &meta.generated_at)?;
        text_element(&mut writer, "format", "xml")?;
        writer.write_event(Event::End(BytesEnd::new("metadata")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("Document")))?;

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

fn text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn collect_links(doc: &Document) -> Vec<(String, String)> {
    let mut links = Vec::new();
    for block in &doc.blocks {
        for_each_inline(block, &mut |node| {
            if let Inline::Link { href, children } = node {
                links.push((href.clone(), inline_text(children)));
            }
        });
    }
    links
}

fn collect_images(doc: &Document) -> Vec<(String, String)> {
    let mut images = Vec::new();
    for block in &doc.blocks {
        if let Block::Image { src, alt } = block {
            images.push((src.clone(), alt.clone()));
            continue;
        }
        for_each_inline(block, &mut |node| {
            if let Inline::Image { src, alt } = node {
                images.push((src.clone(), alt.clone()));
            }
        });
    }
    images
}

fn for_each_inline(block: &Block, visit: &mut impl FnMut(&Inline)) {
    let runs: Vec<&Vec<Inline>> = match block {
        Block::Heading { inline, .. } | Block::Paragraph(inline) | Block::Blockquote(inline) => {
            vec![inline]
        }
        Block::UnorderedList(items) | Block::OrderedList(items) => items.iter().collect(),
        _ => return,
    };
    for run in runs {
        walk_inline(run, visit);
    }
}

fn walk_inline(run: &[Inline], visit: &mut impl FnMut(&Inline)) {
    for node in run {
        visit(node);
        match node {
            Inline::Link { children, .. } | Inline::Strong(children) | Inline::Emphasis(children) => {
                walk_inline(children, visit);
            }
            Inline::Text(_) | Inline::Code(_) | Inline::Image { .. } => {}
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
