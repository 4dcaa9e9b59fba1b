use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::schedule::retry::DEFAULT_MAX_RETRIES;
use crate::translate::gemini::DEFAULT_BASE_URL as GEMINI_BASE_URL;

const DATABASE_URL: &str = "sqlite://./polyglot_data/database/storage.db?mode=rwc";
const BLOB_ROOT: &str = "./polyglot_data/blobs";
const LOG_DIR: &str = "./logs";
const HTTP_ADDR: &str = "127.0.0.1:7300";
const WHISPER_BASE_URL: &str = "http://127.0.0.1:9000";
const GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Inline check refuses a notification above this memory ratio.
    pub admit_ceiling: f64,
    /// Monitor pauses intake above this ratio and resumes at or below it.
    pub resume_below: f64,
    pub monitor_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            admit_ceiling: 0.90,
            resume_below: 0.85,
            monitor_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub blob_root: PathBuf,
    pub log_dir: String,
    pub http_addr: SocketAddr,
    pub workers: usize,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub whisper_base_url: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    /// Upper bound for one STT or translation request.
    pub request_timeout: Duration,
    pub admission: AdmissionConfig,
}

/// Reads a variable from the process environment (after `.env` has been loaded).
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

impl WorkerConfig {
    /// Loads `.env` (if present) and builds the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars()
    }

    fn from_vars() -> Result<Self> {
        let defaults = AdmissionConfig::default();
        let admission = AdmissionConfig {
            admit_ceiling: parse_var("POLYGLOT_ADMIT_CEILING", defaults.admit_ceiling)?,
            resume_below: parse_var("POLYGLOT_RESUME_BELOW", defaults.resume_below)?,
            monitor_interval: Duration::from_secs(parse_var(
                "POLYGLOT_MONITOR_INTERVAL_SECS",
                defaults.monitor_interval.as_secs(),
            )?),
        };
        for (key, ratio) in [
            ("POLYGLOT_ADMIT_CEILING", admission.admit_ceiling),
            ("POLYGLOT_RESUME_BELOW", admission.resume_below),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(anyhow::anyhow!("{} must be within [0, 1], got {}", key, ratio));
            }
        }

        let workers: usize = parse_var("POLYGLOT_WORKERS", 2)?;
        if workers == 0 {
            return Err(anyhow::anyhow!("POLYGLOT_WORKERS must be at least 1"));
        }

        let request_timeout: u64 = parse_var("POLYGLOT_REQUEST_TIMEOUT_SECS", 300)?;
        if request_timeout == 0 {
            return Err(anyhow::anyhow!("POLYGLOT_REQUEST_TIMEOUT_SECS must be at least 1"));
        }

        Ok(Self {
            database_url: var("POLYGLOT_DATABASE_URL").unwrap_or_else(|| DATABASE_URL.to_string()),
            blob_root: PathBuf::from(var("POLYGLOT_BLOB_ROOT").unwrap_or_else(|| BLOB_ROOT.to_string())),
            log_dir: var("POLYGLOT_LOG_DIR").unwrap_or_else(|| LOG_DIR.to_string()),
            http_addr: parse_var("POLYGLOT_HTTP_ADDR", SocketAddr::from_str(HTTP_ADDR)?)?,
            workers,
            poll_interval: Duration::from_millis(parse_var("POLYGLOT_POLL_INTERVAL_MS", 1000)?),
            max_retries: parse_var("POLYGLOT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            whisper_base_url: var("WHISPER_BASE_URL").unwrap_or_else(|| WHISPER_BASE_URL.to_string()),
            gemini_api_key: var("GEMINI_API_KEY")
                .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY is not set"))?,
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| GEMINI_MODEL.to_string()),
            gemini_base_url: var("GEMINI_BASE_URL").unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(request_timeout),
            admission,
        })
    }

    /// Directory of the SQLite file, if the database lives on disk.
    pub fn database_dir(&self) -> Option<PathBuf> {
        let path = self.database_url.strip_prefix("sqlite://")?;
        let path = path.split('?').next()?;
        if path.contains(":memory:") {
            return None;
        }
        std::path::Path::new(path).parent().map(PathBuf::from)
    }
}
