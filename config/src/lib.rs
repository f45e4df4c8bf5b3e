//! Validated configuration for pagemill.
//!
//! The configuration is an immutable record constructed once per process.
//! Values come from built-in defaults, an optional JSON/YAML file, and
//! `PAGEMILL_*` environment overrides, in that order; every constructor
//! re-validates the full record before handing it out.

use pagemill_types::{Error, ErrorKind, OutputFormat, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable prefix for field overrides.
pub const ENV_PREFIX: &str = "PAGEMILL_";

/// Validated configuration record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Config {
    /// Global token-bucket refill rate, requests per second.
    pub requests_per_second: f64,
    /// Token-bucket capacity (burst allowance).
    pub burst_size: u32,
    /// Optional per-domain bucket rate; inherits the global rate when unset.
    pub per_domain_rps: Option<f64>,
    /// Request deadline in seconds.
    pub timeout: u64,
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Global fan-out ceiling for parallel fetches.
    pub max_concurrent_requests: usize,
    /// Chunk character budget.
    pub chunk_size: usize,
    /// Cross-chunk overlap in characters.
    pub chunk_overlap: usize,
    /// Master switch for the request cache.
    pub cache_enabled: bool,
    /// Cold-tier root directory.
    pub cache_dir: PathBuf,
    /// Hot-tier item cap.
    pub cache_memory_max_items: usize,
    /// Cold-tier byte cap.
    pub cache_disk_max_bytes: u64,
    /// Entry lifetime in seconds.
    pub cache_ttl: u64,
    /// Per-response size budget in bytes.
    pub max_file_size: u64,
    /// User-Agent request header.
    pub user_agent: String,
    /// Serializer used when the caller does not pick one.
    pub default_output_format: OutputFormat,
    /// Whether sitemap discovery probes /robots.txt first.
    pub respect_robots_txt: bool,
    /// Allow the lenient full parser when the streaming parser fails.
    pub fallback_to_full_parser: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            burst_size: 10,
            per_domain_rps: None,
            timeout: 30,
            max_retries: 3,
            max_concurrent_requests: 10,
            chunk_size: 1500,
            chunk_overlap: 200,
            cache_enabled: true,
            cache_dir: default_cache_dir(),
            cache_memory_max_items: 1000,
            cache_disk_max_bytes: 500 * 1024 * 1024,
            cache_ttl: 3600,
            max_file_size: 10 * 1024 * 1024,
            user_agent: "Mozilla/5.0 (compatible; pagemill/0.1)".to_string(),
            default_output_format: OutputFormat::Markdown,
            respect_robots_txt: true,
            fallback_to_full_parser: true,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pagemill")
}

impl Config {
    /// Defaults plus environment overrides, validated.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON or YAML file, then apply environment overrides.
    ///
    /// A missing file, an unsupported extension, and unknown keys are all
    /// errors.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::new(
                ErrorKind::ConfigInvalid,
                format!("cannot read configuration file: {e}"),
            )
            .with_context("path", path.display().to_string())
            .with_source(e)
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let overlay: ConfigFile = match extension.as_deref() {
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                Error::new(ErrorKind::ConfigInvalid, format!("invalid JSON config: {e}"))
                    .with_context("path", path.display().to_string())
                    .with_source(e)
            })?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(|e| {
                Error::new(ErrorKind::ConfigInvalid, format!("invalid YAML config: {e}"))
                    .with_context("path", path.display().to_string())
                    .with_source(e)
            })?,
            other => {
                return Err(Error::new(
                    ErrorKind::ConfigInvalid,
                    "unsupported configuration file extension",
                )
                .with_context("path", path.display().to_string())
                .with_context("extension", other.unwrap_or("none")));
            }
        };

        let mut config = Self::default();
        overlay.apply(&mut config);
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PAGEMILL_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let vars: Vec<(String, String)> = ENV_OVERRIDES
            .iter()
            .filter_map(|(suffix, _)| {
                let key = format!("{ENV_PREFIX}{suffix}");
                std::env::var(&key).ok().map(|v| ((*suffix).to_string(), v))
            })
            .collect();
        self.apply_overrides(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Apply overrides keyed by env-var suffix (`TIMEOUT`, not `PAGEMILL_TIMEOUT`).
    pub fn apply_overrides<'a>(
        &mut self,
        overrides: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<()> {
        for (suffix, value) in overrides {
            let Some((_, setter)) = ENV_OVERRIDES.iter().find(|(s, _)| *s == suffix) else {
                return Err(Error::new(
                    ErrorKind::ConfigInvalid,
                    format!("unrecognized configuration override '{suffix}'"),
                )
                .with_context("field", suffix));
            };
            setter(self, value)?;
        }
        Ok(())
    }

    /// Check every field against its domain.
    pub fn validate(&self) -> Result<()> {
        if !(self.requests_per_second > 0.0 && self.requests_per_second <= 1000.0) {
            return Err(invalid(
                "requests_per_second",
                self.requests_per_second.to_string(),
                "must be in (0, 1000]",
            ));
        }
        if self.burst_size == 0 {
            return Err(invalid("burst_size", "0".to_string(), "must be positive"));
        }
        if let Some(rps) = self.per_domain_rps
            && rps <= 0.0
        {
            return Err(invalid("per_domain_rps", rps.to_string(), "must be positive"));
        }
        if !(1..=300).contains(&self.timeout) {
            return Err(invalid(
                "timeout",
                self.timeout.to_string(),
                "must be in [1, 300] seconds",
            ));
        }
        if self.max_retries > 10 {
            return Err(invalid(
                "max_retries",
                self.max_retries.to_string(),
                "must be in [0, 10]",
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(invalid("max_concurrent_requests", "0".to_string(), "must be positive"));
        }
        if self.chunk_size < 100 {
            return Err(invalid(
                "chunk_size",
                self.chunk_size.to_string(),
                "must be at least 100 characters",
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(invalid(
                "chunk_overlap",
                self.chunk_overlap.to_string(),
                "must be smaller than chunk_size",
            ));
        }
        if self.cache_memory_max_items == 0 {
            return Err(invalid("cache_memory_max_items", "0".to_string(), "must be positive"));
        }
        if self.cache_disk_max_bytes == 0 {
            return Err(invalid("cache_disk_max_bytes", "0".to_string(), "must be positive"));
        }
        if self.cache_ttl == 0 {
            return Err(invalid("cache_ttl", "0".to_string(), "must be positive"));
        }
        if self.max_file_size == 0 {
            return Err(invalid("max_file_size", "0".to_string(), "must be positive"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", String::new(), "must not be empty"));
        }
        Ok(())
    }

    /// Validate and return the record, consuming the builder-style value.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

fn invalid(field: &str, value: String, reason: &str) -> Error {
    Error::new(
        ErrorKind::ConfigInvalid,
        format!("invalid configuration for '{field}': {reason}"),
    )
    .with_context("field", field)
    .with_context("value", value)
}

/// Partial overlay used for file loading; unknown keys are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    requests_per_second: Option<f64>,
    burst_size: Option<u32>,
    per_domain_rps: Option<f64>,
    timeout: Option<u64>,
    max_retries: Option<u32>,
    max_concurrent_requests: Option<usize>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    cache_enabled: Option<bool>,
    cache_dir: Option<PathBuf>,
    cache_memory_max_items: Option<usize>,
    cache_disk_max_bytes: Option<u64>,
    cache_ttl: Option<u64>,
    max_file_size: Option<u64>,
    user_agent: Option<String>,
    default_output_format: Option<OutputFormat>,
    respect_robots_txt: Option<bool>,
    fallback_to_full_parser: Option<bool>,
}

impl ConfigFile {
    fn apply(self, config: &mut Config) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        overlay!(
            requests_per_second,
            burst_size,
            timeout,
            max_retries,
            max_concurrent_requests,
            chunk_size,
            chunk_overlap,
            cache_enabled,
            cache_dir,
            cache_memory_max_items,
            cache_disk_max_bytes,
            cache_ttl,
            max_file_size,
            user_agent,
            default_output_format,
            respect_robots_txt,
            fallback_to_full_parser,
        );
        if self.per_domain_rps.is_some() {
            config.per_domain_rps = self.per_domain_rps;
        }
    }
}

type Setter = fn(&mut Config, &str) -> Result<()>;

/// Env-var suffix to typed field setter.
static ENV_OVERRIDES: &[(&str, Setter)] = &[
    ("REQUESTS_PER_SECOND", |c, v| {
        c.requests_per_second = parse_field("requests_per_second", v)?;
        Ok(())
    }),
    ("BURST_SIZE", |c, v| {
        c.burst_size = parse_field("burst_size", v)?;
        Ok(())
    }),
    ("PER_DOMAIN_RPS", |c, v| {
        c.per_domain_rps = Some(parse_field("per_domain_rps", v)?);
        Ok(())
    }),
    ("TIMEOUT", |c, v| {
        c.timeout = parse_field("timeout", v)?;
        Ok(())
    }),
    ("MAX_RETRIES", |c, v| {
        c.max_retries = parse_field("max_retries", v)?;
        Ok(())
    }),
    ("MAX_CONCURRENT_REQUESTS", |c, v| {
        c.max_concurrent_requests = parse_field("max_concurrent_requests", v)?;
        Ok(())
    }),
    ("CHUNK_SIZE", |c, v| {
        c.chunk_size = parse_field("chunk_size", v)?;
        Ok(())
    }),
    ("CHUNK_OVERLAP", |c, v| {
        c.chunk_overlap = parse_field("chunk_overlap", v)?;
        Ok(())
    }),
    ("CACHE_ENABLED", |c, v| {
        c.cache_enabled = parse_bool("cache_enabled", v)?;
        Ok(())
    }),
    ("CACHE_DIR", |c, v| {
        c.cache_dir = PathBuf::from(v);
        Ok(())
    }),
    ("CACHE_MEMORY_MAX_ITEMS", |c, v| {
        c.cache_memory_max_items = parse_field("cache_memory_max_items", v)?;
        Ok(())
    }),
    ("CACHE_DISK_MAX_BYTES", |c, v| {
        c.cache_disk_max_bytes = parse_field("cache_disk_max_bytes", v)?;
        Ok(())
    }),
    ("CACHE_TTL", |c, v| {
        c.cache_ttl = parse_field("cache_ttl", v)?;
        Ok(())
    }),
    ("MAX_FILE_SIZE", |c, v| {
        c.max_file_size = parse_field("max_file_size", v)?;
        Ok(())
    }),
    ("USER_AGENT", |c, v| {
        c.user_agent = v.to_string();
        Ok(())
    }),
    ("DEFAULT_OUTPUT_FORMAT", |c, v| {
        c.default_output_format = OutputFormat::from_str(v)?;
        Ok(())
    }),
    ("RESPECT_ROBOTS_TXT", |c, v| {
        c.respect_robots_txt = parse_bool("respect_robots_txt", v)?;
        Ok(())
    }),
    ("FALLBACK_TO_FULL_PARSER", |c, v| {
        c.fallback_to_full_parser = parse_bool("fallback_to_full_parser", v)?;
        Ok(())
    }),
];

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::new(
            ErrorKind::ConfigInvalid,
            format!("cannot parse override for '{field}'"),
        )
        .with_context("field", field)
        .with_context("value", value)
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::new(
            ErrorKind::ConfigInvalid,
            format!("cannot parse boolean override for '{field}'"),
        )
        .with_context("field", field)
        .with_context("value", value)),
    }
}

/// Process-wide default configuration.
///
/// Initialized once from defaults plus environment overrides. Library
/// consumers that need fail-fast semantics should call [`Config::load`]
/// instead and handle the error; this accessor degrades to built-in
/// defaults if the environment is unusable.
pub fn default_config() -> &'static Config {
    static DEFAULT: OnceLock<Config> = OnceLock::new();
    DEFAULT.get_or_init(|| match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid environment overrides, using built-in defaults");
            Config::default()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigFile};
    use pagemill_types::{ErrorKind, OutputFormat};
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().expect("defaults validate");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let config = Config {
            chunk_size: 200,
            chunk_overlap: 200,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("field"), Some("chunk_overlap"));
    }

    #[test]
    fn test_rate_bounds() {
        let config = Config {
            requests_per_second: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            requests_per_second: 1000.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_bounds() {
        for timeout in [0u64, 301] {
            let config = Config {
                timeout,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "timeout {timeout} should fail");
        }
        let config = Config {
            timeout: 300,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_overrides_typed() {
        let mut config = Config::default();
        config
            .apply_overrides([
                ("TIMEOUT", "60"),
                ("REQUESTS_PER_SECOND", "5.5"),
                ("CACHE_ENABLED", "false"),
                ("DEFAULT_OUTPUT_FORMAT", "xml"),
            ])
            .expect("overrides apply");
        assert_eq!(config.timeout, 60);
        assert!((config.requests_per_second - 5.5).abs() < f64::EPSILON);
        assert!(!config.cache_enabled);
        assert_eq!(config.default_output_format, OutputFormat::Xml);
    }

    #[test]
    fn test_apply_overrides_bad_value() {
        let mut config = Config::default();
        let err = config
            .apply_overrides([("TIMEOUT", "not-a-number")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("field"), Some("timeout"));
    }

    #[test]
    fn test_apply_overrides_unknown_field() {
        let mut config = Config::default();
        let err = config.apply_overrides([("BOGUS", "1")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_from_file_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"timeout": 45, "chunk_size": 800}}"#).unwrap();

        let config = Config::from_file(&path).expect("load json");
        assert_eq!(config.timeout, 45);
        assert_eq!(config.chunk_size, 800);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_from_file_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "timeout: 12\nuser_agent: test-agent\n").unwrap();

        let config = Config::from_file(&path).expect("load yaml");
        assert_eq!(config.timeout, 12);
        assert_eq!(config.user_agent, "test-agent");
    }

    #[test]
    fn test_from_file_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"timout": 45}"#).unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/config.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "timeout = 45").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("extension"), Some("toml"));
    }

    #[test]
    fn test_file_values_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"chunk_size": 10}"#).unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("field"), Some("chunk_size"));
    }

    #[test]
    fn test_config_file_overlay_partial() {
        let overlay: ConfigFile = serde_json::from_str(r#"{"per_domain_rps": 0.5}"#).unwrap();
        let mut config = Config::default();
        overlay.apply(&mut config);
        assert_eq!(config.per_domain_rps, Some(0.5));
    }
}
