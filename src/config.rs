//! Configuration Module
//!
//! This module reads configuration values from environment variables, provides
//! sensible defaults, and validates key security parameters such as maximum file
//! sizes, decompression limits and the reverse-DNS timeout.

use anyhow::Result;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: Option<String>,
    pub webhook_timeout: u64,
    pub webhook_retries: u32,
    pub dns_timeout: u64,
    pub max_file_size: usize,
    pub max_decompressed_size: usize,
    pub max_files_in_zip: usize,
    pub max_compression_ratio: f64,
    pub max_filename_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            webhook_url: None,
            webhook_timeout: 30,
            webhook_retries: 3,
            dns_timeout: 3,
            max_file_size: 10 * 1024 * 1024,
            max_decompressed_size: 100 * 1024 * 1024,
            max_files_in_zip: 1000,
            max_compression_ratio: 1000.0,
            max_filename_length: 256,
        }
    }
}

/// Reads `name` and parses it, treating a missing or malformed value as absent.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Creates a new configuration by reading environment variables.
    /// If a variable is missing or empty, a default value is used.
    pub fn new() -> Result<Self> {
        let defaults = Config::default();

        let max_file_size = env_parse("DMARC_MAX_FILE_SIZE").unwrap_or(defaults.max_file_size);
        if max_file_size > 500_000_000 {
            return Err(anyhow::anyhow!("Max file size too large (500MB limit)"));
        }

        // For the timeouts, try the *_SECS name first, then the short alias.
        let webhook_timeout = env_parse("DMARC_WEBHOOK_TIMEOUT_SECS")
            .or_else(|| env_parse("DMARC_WEBHOOK_TIMEOUT"))
            .unwrap_or(defaults.webhook_timeout);

        let dns_timeout = env_parse("DMARC_DNS_TIMEOUT_SECS")
            .or_else(|| env_parse("DMARC_DNS_TIMEOUT"))
            .unwrap_or(defaults.dns_timeout);
        if dns_timeout == 0 {
            return Err(anyhow::anyhow!("DNS timeout must be at least one second"));
        }

        let webhook_retries =
            env_parse("DMARC_WEBHOOK_RETRIES").unwrap_or(defaults.webhook_retries);

        let max_decompressed_size = env_parse("DMARC_MAX_DECOMPRESSED_SIZE")
            .unwrap_or(defaults.max_decompressed_size);

        let max_files_in_zip =
            env_parse("DMARC_MAX_FILES_IN_ZIP").unwrap_or(defaults.max_files_in_zip);

        let max_compression_ratio = env_parse("DMARC_MAX_COMPRESSION_RATIO")
            .unwrap_or(defaults.max_compression_ratio);

        let max_filename_length =
            env_parse("DMARC_MAX_FILENAME_LENGTH").unwrap_or(defaults.max_filename_length);

        // Trim the webhook URL before checking for emptiness.
        let webhook_url = env::var("DMARC_WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Config {
            webhook_url,
            webhook_timeout,
            webhook_retries,
            dns_timeout,
            max_file_size,
            max_decompressed_size,
            max_files_in_zip,
            max_compression_ratio,
            max_filename_length,
        })
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout)
    }
}
