//! Command-line driver for pagemill.
//!
//! Thin wrapper over the pipeline: argument parsing, configuration
//! layering (defaults, optional file, environment, flags), logging
//! setup, and Ctrl-C handling. Exit code 0 on success, 1 on any
//! user-visible failure.

use clap::{Args, Parser, Subcommand};
use pagemill_config::Config;
use pagemill_net::UrlFilters;
use pagemill_pipeline::{ConvertOptions, Pipeline};
use pagemill_types::{ChunkFormat, Error, ErrorKind, OutputFormat, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagemill", version, about = "Convert web content into structured documents")]
struct Cli {
    /// Configuration file (.json, .yaml, or .yml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a single URL.
    Convert {
        url: String,

        /// Output file; derived from the URL path when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        format: Option<String>,

        /// Bypass the cache for this request only.
        #[arg(long)]
        skip_cache: bool,

        #[command(flatten)]
        chunking: ChunkArgs,

        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Convert every URL listed in a file (one per line, # comments).
    Batch {
        links_file: PathBuf,

        /// Output directory.
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        #[arg(short, long)]
        format: Option<String>,

        /// Fan out across concurrent workers.
        #[arg(long)]
        parallel: bool,

        #[arg(long)]
        max_workers: Option<usize>,

        #[command(flatten)]
        chunking: ChunkArgs,

        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Discover URLs from a site's sitemap and convert them.
    Sitemap {
        base_url: String,

        /// Output directory.
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        #[arg(short, long)]
        format: Option<String>,

        /// Minimum sitemap priority (0.0-1.0).
        #[arg(long)]
        min_priority: Option<f64>,

        /// Regex patterns for URLs to include (repeatable).
        #[arg(long)]
        include: Vec<String>,

        /// Regex patterns for URLs to exclude (repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Maximum number of URLs to process.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        parallel: bool,

        #[command(flatten)]
        chunking: ChunkArgs,

        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Show rate-limiter and cache state.
    Status,

    /// Show the effective configuration.
    Config,
}

#[derive(Args)]
struct ChunkArgs {
    /// Also write semantic chunks for RAG indexing.
    #[arg(long)]
    chunks: bool,

    /// Chunk output root; defaults to a `chunks` subdirectory.
    #[arg(long)]
    chunk_dir: Option<PathBuf>,

    /// `jsonl` (one file per URL) or `json` (one file per chunk).
    #[arg(long)]
    chunk_format: Option<String>,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    chunk_overlap: Option<usize>,
}

#[derive(Args)]
struct NetworkArgs {
    #[arg(long)]
    requests_per_second: Option<f64>,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Disable the request cache entirely.
    #[arg(long)]
    no_cache: bool,

    /// Cache entry lifetime in seconds.
    #[arg(long)]
    cache_ttl: Option<u64>,
}

impl NetworkArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(rps) = self.requests_per_second {
            config.requests_per_second = rps;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if self.no_cache {
            config.cache_enabled = false;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl = ttl;
        }
    }
}

impl ChunkArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunk_overlap = overlap;
        }
    }

    fn options(&self, format: OutputFormat) -> Result<ConvertOptions> {
        let chunk_format = match &self.chunk_format {
            Some(s) => ChunkFormat::from_str(s)?,
            None => ChunkFormat::Jsonl,
        };
        Ok(ConvertOptions {
            format,
            include_metadata: true,
            save_chunks: self.chunks,
            chunk_dir: self.chunk_dir.clone(),
            chunk_format,
            use_cache: true,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PAGEMILL_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    tokio::select! {
        outcome = run(cli) => match outcome {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("cancelled");
            ExitCode::FAILURE
        }
    }
}

fn load_config(file: Option<&PathBuf>) -> Result<Config> {
    match file {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
}

fn parse_format(config: &Config, flag: Option<&String>) -> Result<OutputFormat> {
    match flag {
        Some(s) => OutputFormat::from_str(s),
        None => Ok(config.default_output_format),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Convert {
            url,
            output,
            format,
            skip_cache,
            chunking,
            network,
        } => {
            network.apply(&mut config);
            chunking.apply(&mut config);
            let format = parse_format(&config, format.as_ref())?;
            let mut opts = chunking.options(format)?;
            opts.use_cache = !skip_cache;

            let pipeline = Pipeline::new(config)?;
            let written = pipeline.convert_url(&url, output.as_deref(), &opts).await?;
            println!("{}", written.display());
            Ok(())
        }

        Command::Batch {
            links_file,
            output,
            format,
            parallel,
            max_workers,
            chunking,
            network,
        } => {
            network.apply(&mut config);
            chunking.apply(&mut config);
            let format = parse_format(&config, format.as_ref())?;
            let opts = chunking.options(format)?;
            let urls = read_links_file(&links_file)?;

            let pipeline = Pipeline::new(config)?;
            let succeeded = if parallel {
                pipeline
                    .convert_url_list_parallel(&urls, &output, &opts, max_workers)
                    .await?
            } else {
                pipeline.convert_url_list(&urls, &output, &opts).await?
            };

            println!("processed {}/{} URLs", succeeded.len(), urls.len());
            if succeeded.is_empty() {
                return Err(Error::new(ErrorKind::HttpError, "no URLs were processed successfully"));
            }
            Ok(())
        }

        Command::Sitemap {
            base_url,
            output,
            format,
            min_priority,
            include,
            exclude,
            limit,
            parallel,
            chunking,
            network,
        } => {
            network.apply(&mut config);
            chunking.apply(&mut config);
            let format = parse_format(&config, format.as_ref())?;
            let opts = chunking.options(format)?;
            let filters = UrlFilters {
                min_priority,
                include,
                exclude,
                limit,
            };

            let pipeline = Pipeline::new(config)?;
            let succeeded = pipeline
                .convert_sitemap(&base_url, &output, &opts, &filters, parallel)
                .await?;
            println!("processed {} URLs", succeeded.len());
            Ok(())
        }

        Command::Status => {
            let pipeline = Pipeline::new(config)?;
            println!("rate limiter:");
            for bucket in pipeline.client().limiter().snapshot() {
                println!(
                    "  {}: {:.1}/{:.0} tokens ({:.0}% used, {} req/s)",
                    bucket.name,
                    bucket.available,
                    bucket.capacity,
                    bucket.utilization * 100.0,
                    bucket.rate
                );
            }
            match pipeline.client().cache() {
                Some(cache) => println!(
                    "cache: enabled at {} ({} hot items, {} cold bytes)",
                    cache.dir().display(),
                    cache.hot_items(),
                    cache.cold_bytes()
                ),
                None => println!("cache: disabled"),
            }
            Ok(())
        }

        Command::Config => {
            let config = config.validated()?;
            let rendered = serde_json::to_string_pretty(&config).map_err(|e| {
                Error::new(ErrorKind::ConversionFailed, format!("cannot render config: {e}"))
                    .with_source(e)
            })?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn read_links_file(path: &PathBuf) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::new(
            ErrorKind::ConfigInvalid,
            format!("cannot read links file: {e}"),
        )
        .with_context("path", path.display().to_string())
        .with_source(e)
    })?;
    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if urls.is_empty() {
        return Err(Error::new(ErrorKind::ConfigInvalid, "links file contains no URLs")
            .with_context("path", path.display().to_string()));
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::read_links_file;

    #[test]
    fn test_read_links_file_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.txt");
        std::fs::write(
            &path,
            "# heading\nhttps://a.test/\n\n  https://b.test/  \n# trailing\n",
        )
        .unwrap();

        let urls = read_links_file(&path).unwrap();
        assert_eq!(urls, vec!["https://a.test/", "https://b.test/"]);
    }

    #[test]
    fn test_read_links_file_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.txt");
        std::fs::write(&path, "# only comments\n").unwrap();
        assert!(read_links_file(&path).is_err());
    }

    #[test]
    fn test_read_links_file_missing_is_error() {
        let path = std::path::PathBuf::from("/nonexistent/links.txt");
        assert!(read_links_file(&path).is_err());
    }
}
