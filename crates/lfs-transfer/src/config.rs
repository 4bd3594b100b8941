use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use lfs_api::{ApiError, HttpConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TransferError};

/// Settings snapshot for one transfer queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Adapter worker count.
    pub concurrent_transfers: usize,
    /// Maximum objects per negotiation call.
    pub batch_size: usize,
    /// Capacity of the channel behind `add()`.
    pub buffer_depth: usize,
    /// Attempts per object, counting the first.
    pub max_attempts: u32,
    pub basic_transfers_only: bool,
    /// Enabled adapters in preference order. Empty enables every
    /// registered adapter.
    pub adapters: Vec<String>,
    pub dry_run: bool,
    /// Caller policy: terminal download errors are tolerated. The queue
    /// reports them either way.
    pub skip_download_errors: bool,
    pub retry: RetryConfig,
    pub http: HttpConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrent_transfers: 3,
            batch_size: 100,
            buffer_depth: 100,
            max_attempts: 2,
            basic_transfers_only: false,
            adapters: Vec::new(),
            dry_run: false,
            skip_download_errors: false,
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        Ok(config.normalized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TransferError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Coerce out-of-range values to their minimum.
    pub fn normalized(mut self) -> Self {
        if self.concurrent_transfers < 1 {
            warn!(value = self.concurrent_transfers, "concurrent_transfers < 1, using 1");
            self.concurrent_transfers = 1;
        }
        if self.batch_size < 1 {
            warn!(value = self.batch_size, "batch_size < 1, using 1");
            self.batch_size = 1;
        }
        if self.buffer_depth < 1 {
            warn!(value = self.buffer_depth, "buffer_depth < 1, using 1");
            self.buffer_depth = 1;
        }
        if self.max_attempts < 1 {
            warn!(value = self.max_attempts, "max_attempts < 1, using 1");
            self.max_attempts = 1;
        }
        self
    }
}

/// Which failed negotiation calls may be retried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retriable_statuses: Vec<u16>,
    pub retry_transport_errors: bool,
    pub retry_malformed_responses: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retriable_statuses: vec![408, 429, 500, 502, 503, 504],
            retry_transport_errors: true,
            retry_malformed_responses: false,
        }
    }
}

/// Decides whether a failed negotiation call leaves its objects eligible
/// for another attempt.
#[derive(Clone, Debug)]
pub struct RetryClassifier {
    statuses: BTreeSet<u16>,
    transport: bool,
    malformed: bool,
}

impl RetryClassifier {
    pub fn is_retriable(&self, err: &ApiError) -> bool {
        match err {
            ApiError::Malformed(_) => self.malformed,
            ApiError::InvalidEndpoint(_) | ApiError::InvalidHeader(_) => false,
            _ if err.is_transport() => self.transport,
            _ => err.status().is_some_and(|s| self.statuses.contains(&s)),
        }
    }
}

impl From<&RetryConfig> for RetryClassifier {
    fn from(config: &RetryConfig) -> Self {
        Self {
            statuses: config.retriable_statuses.iter().copied().collect(),
            transport: config.retry_transport_errors,
            malformed: config.retry_malformed_responses,
        }
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> ApiError {
        ApiError::Status {
            status,
            url: "http://host/objects/batch".into(),
            body: String::new(),
        }
    }

    #[test]
    fn defaults() {
        let c = TransferConfig::default();
        assert_eq!(c.concurrent_transfers, 3);
        assert_eq!(c.batch_size, 100);
        assert_eq!(c.max_attempts, 2);
        assert!(c.adapters.is_empty());
        assert!(!c.dry_run);
        assert_eq!(c.http.timeout_secs, 30);
    }

    #[test]
    fn parses_partial_toml() {
        let c = TransferConfig::from_toml_str(
            r#"
            concurrent_transfers = 8
            adapters = ["tus", "basic"]

            [retry]
            retriable_statuses = [503]

            [http]
            timeout_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(c.concurrent_transfers, 8);
        assert_eq!(c.batch_size, 100);
        assert_eq!(c.adapters, vec!["tus", "basic"]);
        assert_eq!(c.retry.retriable_statuses, vec![503]);
        assert!(c.retry.retry_transport_errors);
        assert_eq!(c.http.timeout_secs, 10);
        assert_eq!(c.http.connect_timeout_secs, 5);
    }

    #[test]
    fn zero_values_are_coerced() {
        let c = TransferConfig::from_toml_str(
            "max_attempts = 0\nconcurrent_transfers = 0\nbatch_size = 0\nbuffer_depth = 0",
        )
        .unwrap();
        assert_eq!(c.max_attempts, 1);
        assert_eq!(c.concurrent_transfers, 1);
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.buffer_depth, 1);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = TransferConfig::from_toml_str("batch_size = \"lots\"").unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.toml");
        fs::write(&path, "dry_run = true").unwrap();
        assert!(TransferConfig::load(&path).unwrap().dry_run);

        let missing = TransferConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, TransferError::ConfigRead { .. }));
    }

    #[test]
    fn classifier_follows_status_list() {
        let classifier = RetryClassifier::default();
        assert!(classifier.is_retriable(&status(503)));
        assert!(classifier.is_retriable(&status(429)));
        assert!(!classifier.is_retriable(&status(404)));
        assert!(!classifier.is_retriable(&status(501)));

        let custom = RetryClassifier::from(&RetryConfig {
            retriable_statuses: vec![501],
            ..Default::default()
        });
        assert!(custom.is_retriable(&status(501)));
        assert!(!custom.is_retriable(&status(503)));
    }

    #[test]
    fn classifier_malformed_and_endpoint_errors() {
        let malformed = ApiError::Malformed(serde_json::from_str::<u8>("x").unwrap_err());
        assert!(!RetryClassifier::default().is_retriable(&malformed));

        let lenient = RetryClassifier::from(&RetryConfig {
            retry_malformed_responses: true,
            ..Default::default()
        });
        assert!(lenient.is_retriable(&malformed));
        assert!(!lenient.is_retriable(&ApiError::InvalidEndpoint("ssh://x".into())));
    }
}
