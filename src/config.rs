//! Configuration management for Evidence Intake

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::upload::{HashAlgorithm, RetryPolicy, UploadSettings, SESSION_IDLE_TIMEOUT};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base folder uploads are placed under
    pub upload_folder: Option<PathBuf>,
    pub max_file_size_gb: u64,
    /// Largest request body accepted, in MiB
    pub max_chunk_size_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub hash_algorithm: HashAlgorithm,
    pub session_timeout_secs: u64,
    pub session_sweep_secs: u64,
    pub chunk_write_retries: u32,
    pub chunk_write_backoff_ms: u64,
    pub rename_retries: u32,
    pub rename_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
            },
            storage: StorageConfig {
                upload_folder: None,
                max_file_size_gb: 100,
                max_chunk_size_mb: 64,
            },
            uploads: UploadConfig {
                hash_algorithm: HashAlgorithm::Md5,
                session_timeout_secs: SESSION_IDLE_TIMEOUT.as_secs(),
                session_sweep_secs: 60,
                chunk_write_retries: 3,
                chunk_write_backoff_ms: 1000,
                rename_retries: 3,
                rename_delay_ms: 5000,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                upload_folder: env::var("UPLOAD_FOLDER")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from),
                max_file_size_gb: parse_var("MAX_FILE_SIZE_GB", defaults.storage.max_file_size_gb)?,
                max_chunk_size_mb: parse_var("MAX_CHUNK_SIZE_MB", defaults.storage.max_chunk_size_mb)?,
            },
            uploads: UploadConfig {
                hash_algorithm: parse_var("HASH_ALGORITHM", defaults.uploads.hash_algorithm)?,
                session_timeout_secs: parse_var("SESSION_TIMEOUT_SECS", defaults.uploads.session_timeout_secs)?,
                session_sweep_secs: parse_var("SESSION_SWEEP_SECS", defaults.uploads.session_sweep_secs)?,
                chunk_write_retries: parse_var("CHUNK_WRITE_RETRIES", defaults.uploads.chunk_write_retries)?,
                chunk_write_backoff_ms: parse_var(
                    "CHUNK_WRITE_BACKOFF_MS",
                    defaults.uploads.chunk_write_backoff_ms,
                )?,
                rename_retries: parse_var("RENAME_RETRIES", defaults.uploads.rename_retries)?,
                rename_delay_ms: parse_var("RENAME_DELAY_MS", defaults.uploads.rename_delay_ms)?,
            },
        })
    }

    pub fn max_file_size(&self) -> u64 {
        self.storage.max_file_size_gb.saturating_mul(GIB)
    }

    pub fn max_chunk_bytes(&self) -> usize {
        usize::try_from(self.storage.max_chunk_size_mb.saturating_mul(MIB)).unwrap_or(usize::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.uploads.session_sweep_secs.max(1))
    }

    /// Engine settings derived from this configuration
    pub fn upload_settings(&self) -> UploadSettings {
        let uploads = &self.uploads;
        UploadSettings {
            storage_root: self.storage.upload_folder.clone(),
            max_file_size: self.max_file_size(),
            hash_algorithm: uploads.hash_algorithm,
            idle_timeout: Duration::from_secs(uploads.session_timeout_secs),
            chunk_write_retry: RetryPolicy::exponential(
                uploads.chunk_write_retries,
                Duration::from_millis(uploads.chunk_write_backoff_ms),
            ),
            rename_retry: RetryPolicy::fixed(uploads.rename_retries, Duration::from_millis(uploads.rename_delay_ms)),
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_constants() {
        let config = Config::default();
        let settings = config.upload_settings();

        assert_eq!(config.max_file_size(), crate::upload::DEFAULT_MAX_FILE_SIZE);
        assert_eq!(settings.idle_timeout, SESSION_IDLE_TIMEOUT);
        assert_eq!(settings.chunk_write_retry, RetryPolicy::chunk_write());
        assert_eq!(settings.rename_retry, RetryPolicy::rename());
        assert!(settings.storage_root.is_none());
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        // a key no other test touches
        env::set_var("EVIDENCE_INTAKE_TEST_PORT", "not-a-port");
        let result: Result<u16, _> = parse_var("EVIDENCE_INTAKE_TEST_PORT", 1);
        assert!(matches!(result, Err(ConfigError::Invalid { key: "EVIDENCE_INTAKE_TEST_PORT", .. })));

        let missing: u16 = parse_var("EVIDENCE_INTAKE_TEST_UNSET", 7).unwrap();
        assert_eq!(missing, 7);
    }
}
