//! Runtime configuration
//!
//! Configuration is an explicit value: build it once (usually with
//! [`Config::from_env`]) and hand the relevant pieces to the components that
//! need them. Nothing in the crate reads the environment on its own.
//!
//! Environment variables:
//! - `RECIBO_DB`: SQLite database path (default: `recibo.db`)
//! - `RECIBO_UPLOAD_DIR`: Directory for stored attachments (default: `./uploads`)
//! - `RECIBO_ANALYZER`: `jsonrpc` (default) or `mock`
//! - `RECIBO_AGENT_URL`: Remote analyzer JSON-RPC endpoint
//! - `RECIBO_AGENT_TIMEOUT_SECS`: Per-attempt timeout (default: 25)
//! - `RECIBO_AGENT_RETRIES`: Retries after the first attempt (default: 2)
//! - `RECIBO_AGENT_BACKOFF_MS`: Linear backoff base delay (default: 500)
//! - `RECIBO_MAX_UPLOAD_BYTES`: Upload size limit (default: 8 MiB)
//! - `RECIBO_ALLOWED_EXTENSIONS`: Comma-separated extension allow-list
//! - `RECIBO_ALLOWED_MIME_TYPES`: Comma-separated MIME allow-list
//! - `RECIBO_CORS_ORIGINS`: Comma-separated CORS origins for the server

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8100/rpc";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_EXTENSIONS: &str = ".pdf,.png,.jpg,.jpeg,.txt,.csv";
const DEFAULT_MIME_TYPES: &str =
    "application/pdf,image/png,image/jpeg,image/jpg,text/plain,text/csv,application/octet-stream";

/// Which analyzer implementation the orchestrator talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalyzerBackend {
    /// Remote JSON-RPC analyzer over HTTP
    #[default]
    JsonRpc,
    /// In-process rule-based analyzer (development and tests)
    Mock,
}

impl FromStr for AnalyzerBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonrpc" | "rpc" | "remote" => Ok(Self::JsonRpc),
            "mock" => Ok(Self::Mock),
            _ => Err(format!("Unknown analyzer backend: {}", s)),
        }
    }
}

/// Remote analyzer call policy
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub backend: AnalyzerBackend,
    pub url: String,
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt; total attempts = retries + 1
    pub retries: u32,
    /// Linear backoff base: the n-th retry waits `backoff * n`
    pub backoff: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            backend: AnalyzerBackend::JsonRpc,
            url: DEFAULT_AGENT_URL.to_string(),
            timeout: Duration::from_secs(25),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Limits applied to uploaded files before anything is persisted
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    /// Lower-cased extensions including the leading dot
    pub allowed_extensions: Vec<String>,
    /// Lower-cased MIME types
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: split_list(DEFAULT_EXTENSIONS),
            allowed_mime_types: split_list(DEFAULT_MIME_TYPES),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub analyzer: AnalyzerConfig,
    pub uploads: UploadPolicy,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("recibo.db"),
            upload_dir: PathBuf::from("./uploads"),
            analyzer: AnalyzerConfig::default(),
            uploads: UploadPolicy::default(),
            cors_origins: vec![],
        }
    }
}

impl Config {
    /// Build configuration from `RECIBO_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RECIBO_DB") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("RECIBO_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }

        if let Ok(backend) = std::env::var("RECIBO_ANALYZER") {
            config.analyzer.backend = backend.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "Unknown RECIBO_ANALYZER, falling back to jsonrpc");
                AnalyzerBackend::JsonRpc
            });
        }
        if let Ok(url) = std::env::var("RECIBO_AGENT_URL") {
            config.analyzer.url = url;
        }
        if let Some(secs) = parse_env::<u64>("RECIBO_AGENT_TIMEOUT_SECS")? {
            // A zero deadline would fail every call immediately
            config.analyzer.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(retries) = parse_env::<u32>("RECIBO_AGENT_RETRIES")? {
            config.analyzer.retries = retries;
        }
        if let Some(ms) = parse_env::<u64>("RECIBO_AGENT_BACKOFF_MS")? {
            config.analyzer.backoff = Duration::from_millis(ms);
        }

        if let Some(max) = parse_env::<usize>("RECIBO_MAX_UPLOAD_BYTES")? {
            config.uploads.max_bytes = max;
        }
        if let Ok(list) = std::env::var("RECIBO_ALLOWED_EXTENSIONS") {
            config.uploads.allowed_extensions = split_list(&list);
        }
        if let Ok(list) = std::env::var("RECIBO_ALLOWED_MIME_TYPES") {
            config.uploads.allowed_mime_types = split_list(&list);
        }
        if let Ok(list) = std::env::var("RECIBO_CORS_ORIGINS") {
            config.cors_origins = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, value))),
        Err(_) => Ok(None),
    }
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
