//! Pipeline orchestration: fetch, convert, persist, chunk.
//!
//! Four entry points share one per-URL worker: single URL, sequential
//! list, parallel list, and sitemap-driven conversion. A failure in one
//! URL is logged with its stage and skipped; the returned success list
//! preserves input order.

mod naming;

pub use naming::filename_from_url;

use pagemill_config::Config;
use pagemill_convert::{DocMetadata, build_document, chunk_content, to_json, to_markdown, to_xml, write_chunks};
use pagemill_net::{HttpClient, SitemapParser, UrlFilters};
use pagemill_types::{ChunkFormat, Error, ErrorKind, OutputFormat, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::Url;

/// Per-conversion options shared by every entry point.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub format: OutputFormat,
    /// Attach source URL and generation timestamp to the output.
    pub include_metadata: bool,
    pub save_chunks: bool,
    /// Chunk root; defaults to `{output_dir}/chunks`.
    pub chunk_dir: Option<PathBuf>,
    pub chunk_format: ChunkFormat,
    pub use_cache: bool,
}

impl ConvertOptions {
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            include_metadata: true,
            save_chunks: false,
            chunk_dir: None,
            chunk_format: ChunkFormat::Jsonl,
            use_cache: true,
        }
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::new(OutputFormat::Markdown)
    }
}

/// Wires fetch, conversion, persistence, and chunking together.
pub struct Pipeline {
    config: Config,
    client: HttpClient,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let config = config.validated()?;
        let client = HttpClient::new(&config)?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Convert one URL and write the result, deriving a filename in the
    /// current directory when `output` is not given. Returns the output
    /// path.
    pub async fn convert_url(
        &self,
        url: &str,
        output: Option<&Path>,
        opts: &ConvertOptions,
    ) -> Result<PathBuf> {
        let output_file = match output {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(filename_from_url(url, opts.format)),
        };
        let chunk_root = self.chunk_root(
            output_file.parent().unwrap_or_else(|| Path::new(".")),
            opts,
        );
        self.process_single(url, &output_file, chunk_root.as_deref(), opts)
            .await?;
        Ok(output_file)
    }

    /// Convert already-fetched HTML. Returns `(content, markdown)`:
    /// the requested serialization plus the Markdown rendition used for
    /// chunking.
    pub fn convert_html(
        &self,
        html: &str,
        url: &str,
        format: OutputFormat,
        include_metadata: bool,
    ) -> Result<(String, String)> {
        let fetch_url = Url::parse(url).map_err(|e| {
            Error::new(ErrorKind::ConversionFailed, format!("invalid document URL: {e}"))
                .with_context("url", url)
                .with_source(e)
        })?;
        let doc = build_document(html, &fetch_url);
        let metadata = include_metadata.then(|| DocMetadata::now(url));

        let markdown = to_markdown(&doc, metadata.as_ref());
        let content = match format {
            OutputFormat::Markdown => markdown.clone(),
            OutputFormat::Json => to_json(&doc, metadata.as_ref(), 2),
            OutputFormat::Xml => to_xml(&doc, metadata.as_ref(), true),
        };
        Ok((content, markdown))
    }

    /// Sequential conversion of a URL list into `output_dir`. Returns
    /// the successfully processed URLs in input order.
    pub async fn convert_url_list(
        &self,
        urls: &[String],
        output_dir: &Path,
        opts: &ConvertOptions,
    ) -> Result<Vec<String>> {
        let chunk_root = self.prepare_dirs(output_dir, opts)?;

        let mut succeeded = Vec::new();
        for (i, url) in urls.iter().enumerate() {
            tracing::info!(url = url.as_str(), index = i + 1, total = urls.len(), "processing URL");
            let output_file = output_dir.join(filename_from_url(url, opts.format));
            match self
                .process_single(url, &output_file, chunk_root.as_deref(), opts)
                .await
            {
                Ok(()) => succeeded.push(url.clone()),
                Err(err) => {
                    tracing::error!(url = url.as_str(), error = %err, "failed to process URL, skipping");
                }
            }
        }

        tracing::info!(
            succeeded = succeeded.len(),
            total = urls.len(),
            "finished URL list"
        );
        Ok(succeeded)
    }

    /// Parallel conversion bounded by `max_workers` (defaulting to
    /// `max_concurrent_requests`). Returns the successfully processed
    /// URLs in input order.
    pub async fn convert_url_list_parallel(
        &self,
        urls: &[String],
        output_dir: &Path,
        opts: &ConvertOptions,
        max_workers: Option<usize>,
    ) -> Result<Vec<String>> {
        let chunk_root = self.prepare_dirs(output_dir, opts)?;
        let workers = max_workers
            .unwrap_or(self.config.max_concurrent_requests)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        let tasks = urls.iter().map(|url| {
            let semaphore = Arc::clone(&semaphore);
            let output_file = output_dir.join(filename_from_url(url, opts.format));
            let chunk_root = chunk_root.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = self
                    .process_single(url, &output_file, chunk_root.as_deref(), opts)
                    .await;
                if let Err(err) = &outcome {
                    tracing::error!(url = url.as_str(), error = %err, "failed to process URL, skipping");
                }
                outcome.is_ok()
            }
        });

        let outcomes = futures_util::future::join_all(tasks).await;
        let succeeded: Vec<String> = urls
            .iter()
            .zip(outcomes)
            .filter_map(|(url, ok)| ok.then(|| url.clone()))
            .collect();

        tracing::info!(
            succeeded = succeeded.len(),
            total = urls.len(),
            "finished parallel URL list"
        );
        Ok(succeeded)
    }

    /// Discover URLs from a site's sitemaps, filter them, and convert
    /// the survivors.
    pub async fn convert_sitemap(
        &self,
        base_url: &str,
        output_dir: &Path,
        opts: &ConvertOptions,
        filters: &UrlFilters,
        parallel: bool,
    ) -> Result<Vec<String>> {
        tracing::info!(base_url, "discovering sitemap URLs");
        let mut parser = SitemapParser::new(&self.client);
        parser.discover(base_url).await?;
        let filtered = parser.filter_urls(filters)?;

        if filtered.is_empty() {
            tracing::warn!(base_url, "no sitemap URLs to process");
            return Ok(Vec::new());
        }

        let urls: Vec<String> = filtered.into_iter().map(|u| u.loc).collect();
        tracing::info!(count = urls.len(), "converting sitemap URLs");
        if parallel {
            self.convert_url_list_parallel(&urls, output_dir, opts, None)
                .await
        } else {
            self.convert_url_list(&urls, output_dir, opts).await
        }
    }

    /// The per-URL worker: fetch, build, serialize, write, chunk.
    async fn process_single(
        &self,
        url: &str,
        output_file: &Path,
        chunk_root: Option<&Path>,
        opts: &ConvertOptions,
    ) -> Result<()> {
        let html = self.client.get(url, opts.use_cache).await?;
        let (content, markdown) =
            self.convert_html(&html, url, opts.format, opts.include_metadata)?;

        write_atomic(output_file, &content)?;
        tracing::info!(url, output = %output_file.display(), "wrote converted document");

        if let Some(chunk_root) = chunk_root {
            // Chunk the Markdown rendition even when the primary output
            // is JSON/XML; one subdirectory per URL avoids collisions.
            let stem = output_file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output");
            let chunk_dir = chunk_root.join(stem);
            let chunks = match chunk_content(
                &markdown,
                url,
                self.config.chunk_size,
                self.config.chunk_overlap,
            ) {
                Ok(chunks) => chunks,
                Err(err) => {
                    tracing::error!(url, error = %err, "chunking failed, skipping chunks");
                    Vec::new()
                }
            };
            if !chunks.is_empty() {
                write_chunks(&chunks, &chunk_dir, opts.chunk_format)?;
                tracing::info!(url, count = chunks.len(), dir = %chunk_dir.display(), "wrote chunks");
            }
        }

        Ok(())
    }

    fn prepare_dirs(&self, output_dir: &Path, opts: &ConvertOptions) -> Result<Option<PathBuf>> {
        std::fs::create_dir_all(output_dir).map_err(|e| io_error("create output directory", output_dir, e))?;
        let chunk_root = self.chunk_root(output_dir, opts);
        if let Some(dir) = &chunk_root {
            std::fs::create_dir_all(dir).map_err(|e| io_error("create chunk directory", dir, e))?;
        }
        Ok(chunk_root)
    }

    fn chunk_root(&self, output_dir: &Path, opts: &ConvertOptions) -> Option<PathBuf> {
        opts.save_chunks.then(|| {
            opts.chunk_dir
                .clone()
                .unwrap_or_else(|| output_dir.join("chunks"))
        })
    }
}

/// Write through a temp file and rename, so cancellation never leaves a
/// partially written output behind.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create output directory", parent, e))?;
    }
    let temp = path.with_extension("tmp");
    std::fs::write(&temp, content).map_err(|e| io_error("write output", &temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| io_error("commit output", path, e))?;
    Ok(())
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::new(ErrorKind::ConversionFailed, format!("failed to {action}: {e}"))
        .with_context("path", path.display().to_string())
        .with_source(e)
}
