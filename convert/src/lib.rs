//! HTML to structured-document conversion: parsing, document model,
//! serializers, and semantic chunking.

mod builder;
mod chunker;
mod document;
mod json;
mod markdown;
mod stream;
mod xml;

pub use builder::build_document;
pub use chunker::{Chunk, ChunkKind, chunk_content, write_chunks};
pub use document::{Block, DocMetadata, Document, Inline, inline_text};
pub use json::to_json;
pub use markdown::to_markdown;
pub use stream::{LinkRecord, ParsedHtml, StreamElement, StreamingHtmlParser, parse_html};
pub use xml::{error_document, to_xml};
