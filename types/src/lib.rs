//! Core domain types for pagemill - no IO, no async.

mod error;
mod format;

pub use error::{Error, ErrorKind, Result};
pub use format::{ChunkFormat, OutputFormat};
