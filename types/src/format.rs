//! Output and chunk format enums.

use crate::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target representation for a converted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Xml,
}

impl OutputFormat {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Xml => "xml",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Xml => "xml",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            "xml" => Ok(OutputFormat::Xml),
            other => Err(Error::new(
                ErrorKind::ConfigInvalid,
                format!("unknown output format '{other}'"),
            )
            .with_context("field", "output_format")
            .with_context("value", other)),
        }
    }
}

/// On-disk layout for persisted chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFormat {
    /// One `chunks.jsonl` file, one chunk per line.
    #[default]
    Jsonl,
    /// One pretty-printed `{id}.json` file per chunk.
    Json,
}

impl fmt::Display for ChunkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkFormat::Jsonl => f.write_str("jsonl"),
            ChunkFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for ChunkFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" => Ok(ChunkFormat::Jsonl),
            "json" => Ok(ChunkFormat::Json),
            other => Err(Error::new(
                ErrorKind::ConfigInvalid,
                format!("unknown chunk format '{other}'"),
            )
            .with_context("field", "chunk_format")
            .with_context("value", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkFormat, OutputFormat};

    #[test]
    fn test_output_format_parse() {
        assert_eq!("markdown".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("xml".parse::<OutputFormat>().unwrap(), OutputFormat::Xml);
        assert!("html".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_extensions() {
        assert_eq!(OutputFormat::Markdown.extension(), "md");
        assert_eq!(OutputFormat::Json.extension(), "json");
        assert_eq!(OutputFormat::Xml.extension(), "xml");
    }

    #[test]
    fn test_chunk_format_parse() {
        assert_eq!("jsonl".parse::<ChunkFormat>().unwrap(), ChunkFormat::Jsonl);
        assert_eq!("json".parse::<ChunkFormat>().unwrap(), ChunkFormat::Json);
        assert!("csv".parse::<ChunkFormat>().is_err());
    }
}
