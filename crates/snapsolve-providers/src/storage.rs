use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::sigv4::{encode_path, sign_get, Credentials};
use crate::{is_placeholder_value, truncate_for_error};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("storage request failed: {0}")]
    Transport(String),

    #[error("storage is not configured: {0}")]
    NotConfigured(String),

    #[error("storage request could not be signed: {0}")]
    Signing(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Fetches raw object bytes by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Custom endpoint (MinIO, LocalStack). Switches to path-style addressing.
    pub endpoint: Option<String>,
}

impl S3Config {
    pub fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !is_placeholder_value(v))
        };
        Self {
            region: non_empty("AWS_REGION")
                .or_else(|| non_empty("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|| "us-east-1".to_string()),
            access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
            session_token: non_empty("AWS_SESSION_TOKEN"),
            endpoint: non_empty("SNAPSOLVE_S3_ENDPOINT"),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

pub struct S3ObjectStore {
    config: S3Config,
    client: Client,
}

impl S3ObjectStore {
    pub fn new(config: S3Config) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Returns `(url, host, canonical_uri)` for a GetObject call.
    fn object_location(&self, bucket: &str, key: &str) -> (String, String, String) {
        let key = key.trim_start_matches('/');
        match self.config.endpoint.as_deref() {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let (scheme, host) = endpoint
                    .split_once("://")
                    .unwrap_or(("https", endpoint));
                let uri = encode_path(&format!("/{bucket}/{key}"));
                (format!("{scheme}://{host}{uri}"), host.to_string(), uri)
            }
            None => {
                let host = format!("{bucket}.s3.{}.amazonaws.com", self.config.region);
                let uri = encode_path(&format!("/{key}"));
                (format!("https://{host}{uri}"), host, uri)
            }
        }
    }

    fn credentials(&self) -> Result<Credentials, StorageError> {
        match (
            self.config.access_key_id.clone(),
            self.config.secret_access_key.clone(),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Credentials {
                access_key_id,
                secret_access_key,
                session_token: self.config.session_token.clone(),
            }),
            _ => Err(StorageError::NotConfigured(
                "set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let credentials = self.credentials()?;
        let (url, host, canonical_uri) = self.object_location(bucket, key);
        let signed = sign_get(
            &credentials,
            &self.config.region,
            &host,
            &canonical_uri,
            chrono::Utc::now(),
        )
        .map_err(|e| StorageError::Signing(e.to_string()))?;

        info!("Downloading s3://{bucket}/{key}...");
        let mut req = self.client.get(&url);
        for (name, value) in &signed.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Transport(format!(
                "GetObject failed ({status}): {}",
                truncate_for_error(&body, 300)
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        debug!("Downloaded {} bytes from S3.", bytes.len());
        Ok(bytes.to_vec())
    }
}
