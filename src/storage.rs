//! Result storage.
//!
//! Generated documents and overview diagrams are written through the
//! [`Storer`] trait under keys derived from the repository name:
//!
//! | Artifact | Key | Content type |
//! |----------|-----|--------------|
//! | Documentation | `docs/<repo>.md` | `text/markdown` |
//! | Overview diagram | `overview/<repo>.mmd` | `text/plain` |
//!
//! Three backends are available:
//!
//! - [`LocalStorer`] writes files under a directory.
//! - [`S3Storer`] issues `PutObject`/`GetObject` requests against the S3
//!   REST API, signed with AWS Signature Version 4.
//! - [`MemoryStorer`] keeps everything in a map (tests, dry runs).
//!
//! # S3 Authentication
//!
//! Credentials come from the standard environment variables:
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! A custom `endpoint_url` (MinIO, LocalStack) switches to path-style
//! addressing: `<endpoint>/<bucket>/<key>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::StorageConfig;
use crate::error::{PipelineError, Result};

const SERVICE: &str = "storage";

pub const MARKDOWN: &str = "text/markdown";
pub const PLAIN_TEXT: &str = "text/plain";

/// Key of the generated documentation for `repo`.
pub fn document_key(repo: &str) -> String {
    format!("docs/{}.md", repo)
}

/// Key of the overview diagram for `repo`.
pub fn overview_key(repo: &str) -> String {
    format!("overview/{}.mmd", repo)
}

/// Reject keys that could escape the store: empty, absolute, or containing
/// `.`/`..`/empty segments or backslashes.
pub fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(PipelineError::backend(
            SERVICE,
            format!("invalid object key '{}'", key),
        ));
    }
    Ok(())
}

#[async_trait]
pub trait Storer: Send + Sync {
    async fn put(&self, key: &str, content: &str, content_type: &str) -> Result<()>;

    /// Fetch a stored object. `Ok(None)` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Short description for logs and `docgen check`.
    fn describe(&self) -> String;
}

/// Build the configured storage backend.
pub fn storer_from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn Storer>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(LocalStorer::new(config.dir.clone()))),
        "memory" => Ok(Arc::new(MemoryStorer::new())),
        "s3" => Ok(Arc::new(S3Storer::from_config(config)?)),
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be local, s3, or memory.",
            other
        ),
    }
}

// ============ Local directory ============

pub struct LocalStorer {
    dir: PathBuf,
}

impl LocalStorer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Storer for LocalStorer {
    async fn put(&self, key: &str, content: &str, _content_type: &str) -> Result<()> {
        validate_key(key)?;
        let path = self.dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::filesystem(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| PipelineError::filesystem(&path, e))?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let path = self.dir.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::filesystem(&path, e)),
        }
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.dir.display())
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct MemoryStorer {
    objects: Mutex<HashMap<String, (String, String)>>,
}

impl MemoryStorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded for `key`.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|(_, ct)| ct.clone()))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Storer for MemoryStorer {
    async fn put(&self, key: &str, content: &str, content_type: &str) -> Result<()> {
        validate_key(key)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| PipelineError::backend(SERVICE, "memory store poisoned"))?;
        objects.insert(
            key.to_string(),
            (content.to_string(), content_type.to_string()),
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let objects = self
            .objects
            .lock()
            .map_err(|_| PipelineError::backend(SERVICE, "memory store poisoned"))?;
        Ok(objects.get(key).map(|(content, _)| content.clone()))
    }

    fn describe(&self) -> String {
        "in-memory store".to_string()
    }
}

// ============ S3 ============

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3Storer {
    client: reqwest::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
}

impl S3Storer {
    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let bucket = match config.bucket.as_deref() {
            Some(b) if !b.is_empty() => b.to_string(),
            _ => anyhow::bail!("storage.bucket must be set when backend is 's3'"),
        };
        let creds = AwsCredentials::from_env()?;

        Ok(Self {
            client: reqwest::Client::new(),
            bucket,
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds,
        })
    }

    /// Scheme, host, and canonical URI for `key`.
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match self.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let uri = format!("/{}/{}", uri_encode(&self.bucket), encoded_key);
                (scheme.to_string(), host, uri)
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", encoded_key),
            ),
        }
    }

    /// Build a signed request for `method` on `key` with the given payload.
    fn signed_request(
        &self,
        method: reqwest::Method,
        key: &str,
        payload: &[u8],
        content_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<reqwest::RequestBuilder> {
        let (scheme, host, canonical_uri) = self.locate(key);
        let url = format!("{}://{}{}", scheme, host, canonical_uri);

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let authorization = authorization_header(
            &self.creds,
            method.as_str(),
            &canonical_uri,
            &headers,
            &payload_hash,
            &self.region,
            &date_stamp,
            &amz_date,
        )?;

        let mut req_builder = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ct) = content_type {
            req_builder = req_builder.header("Content-Type", ct);
        }
        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        Ok(req_builder)
    }
}

#[async_trait]
impl Storer for S3Storer {
    async fn put(&self, key: &str, content: &str, content_type: &str) -> Result<()> {
        validate_key(key)?;
        let req = self.signed_request(
            reqwest::Method::PUT,
            key,
            content.as_bytes(),
            Some(content_type),
            Utc::now(),
        )?;

        let resp = req.body(content.to_string()).send().await.map_err(|e| {
            PipelineError::backend(
                SERVICE,
                format!("failed to put s3://{}/{}: {}", self.bucket, key, e),
            )
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::backend(
                SERVICE,
                format!(
                    "S3 PutObject failed (HTTP {}) for key '{}': {}",
                    status, key, body
                ),
            ));
        }

        tracing::info!(bucket = %self.bucket, key, "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let req = self.signed_request(reqwest::Method::GET, key, b"", None, Utc::now())?;

        let resp = req.send().await.map_err(|e| {
            PipelineError::backend(
                SERVICE,
                format!("failed to get s3://{}/{}: {}", self.bucket, key, e),
            )
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PipelineError::backend(
                SERVICE,
                format!("S3 GetObject failed (HTTP {}) for key '{}'", status, key),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::backend(SERVICE, e.to_string()))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn describe(&self) -> String {
        format!("s3://{} ({})", self.bucket, self.region)
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the `Authorization` header value for a request with no query
/// string. `headers` must be lowercase and sorted by name.
#[allow(clippy::too_many_arguments)]
fn authorization_header(
    creds: &AwsCredentials,
    method: &str,
    canonical_uri: &str,
    headers: &[(String, String)],
    payload_hash: &str,
    region: &str,
    date_stamp: &str,
    amz_date: &str,
) -> Result<String> {
    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, date_stamp, region, "s3")?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    ))
}

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PipelineError::backend(SERVICE, format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~`.
pub(crate) fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
