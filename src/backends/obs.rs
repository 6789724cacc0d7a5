use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, DATE, ETAG};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, info};

use super::object_store::{ObjectStore, UploadReceipt};
use super::obs_signer::{http_date, ObsSigner};
use super::snapshot_source::Snapshot;
use crate::config::{IdentityConfig, ObsConfig};
use crate::error::BackupError;
use crate::identity::{self, CloudContext};

/// Canned ACL applied to every uploaded object
pub const OBS_ACL: &str = "private";

const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// OTC Object Storage Service client
pub struct ObsClient {
    client: Client,
    endpoint: Url,
    signer: ObsSigner,
}

/// Region-scoped OBS endpoint: the explicit override, or `obs.{region}.` in
/// front of the cloud domain taken from the `iam.` host of the auth URL.
pub fn resolve_endpoint(context: &CloudContext, explicit: Option<&str>) -> Result<Url> {
    if let Some(endpoint) = explicit {
        return Url::parse(endpoint).with_context(|| format!("Invalid OBS endpoint: {}", endpoint));
    }

    let auth_url = Url::parse(&context.auth_url)
        .with_context(|| format!("Invalid auth URL: {}", context.auth_url))?;
    let host = auth_url
        .host_str()
        .ok_or_else(|| anyhow!("Auth URL has no host: {}", context.auth_url))?;
    let rest = host.strip_prefix("iam.").ok_or_else(|| {
        anyhow!(
            "Cannot derive OBS endpoint from auth URL host {}; set --obs-endpoint",
            host
        )
    })?;
    // Regional IAM hosts carry their own region label, e.g. iam.eu-de.otc.t-systems.com
    let cloud_domain = match rest.split_once('.') {
        Some((label, domain)) if label.contains('-') && domain.contains('.') => domain,
        _ => rest,
    };

    let endpoint = format!("https://obs.{}.{}", context.region, cloud_domain);
    Url::parse(&endpoint).with_context(|| format!("Invalid OBS endpoint: {}", endpoint))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

impl ObsClient {
    /// Authenticate against the identity service and build a signed client
    pub async fn init(identity_config: &IdentityConfig, obs: &ObsConfig) -> Result<Self, BackupError> {
        let mut context = identity::obtain_authenticated_context(identity_config)
            .await
            .map_err(|e| BackupError::client_init("OBS", e))?;

        identity::ensure_temporary_credential(&mut context)
            .await
            .map_err(|e| BackupError::client_init("OBS", e))?;

        let endpoint = resolve_endpoint(&context, obs.endpoint.as_deref())
            .map_err(|e| BackupError::client_init("OBS", e))?;

        Self::new(&context, endpoint, obs.timeout).map_err(|e| BackupError::client_init("OBS", e))
    }

    /// Build a client signing with the credentials held by `context`
    pub fn new(context: &CloudContext, endpoint: Url, timeout: Duration) -> Result<Self> {
        if context.credentials.access_key.is_empty() {
            anyhow::bail!("No AK/SK available to sign OBS requests");
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!("OBS client ready for {} (region {})", endpoint, context.region);
        Ok(Self {
            client,
            endpoint,
            signer: ObsSigner::new(context.credentials.clone()),
        })
    }

    /// Path-style object URL. Empty key segments (`/a//b`) are dropped.
    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            anyhow::bail!("Invalid OBS object name: {:?}", key);
        }

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("OBS endpoint cannot be a base: {}", self.endpoint))?
            .pop_if_empty()
            .push(bucket)
            .extend(segments);
        Ok(url)
    }

    /// Put one object with a private ACL
    pub async fn put_object(
        &self,
        snapshot: Snapshot,
        bucket: &str,
        key: &str,
    ) -> Result<UploadReceipt> {
        let url = self.object_url(bucket, key)?;
        let size = snapshot.len();
        debug!("Uploading {} bytes to: {}", size, url);

        let date = http_date(Utc::now());
        let mut obs_headers = vec![("x-obs-acl", OBS_ACL)];
        if let Some(token) = self.signer.security_token() {
            obs_headers.push(("x-obs-security-token", token));
        }

        let string_to_sign = ObsSigner::string_to_sign(
            "PUT",
            "",
            CONTENT_TYPE_OCTET_STREAM,
            &date,
            &obs_headers,
            url.path(),
        );
        let authorization = self.signer.authorization(&string_to_sign)?;

        let mut request = self
            .client
            .put(url.clone())
            .header(DATE, &date)
            .header(CONTENT_TYPE, CONTENT_TYPE_OCTET_STREAM)
            .header(AUTHORIZATION, authorization);
        for (name, value) in &obs_headers {
            request = request.header(*name, *value);
        }

        let response = request
            .body(snapshot.into_bytes())
            .send()
            .await
            .context("Failed to send PUT object request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OBS upload failed with status {}: {}", status, body);
        }

        let headers = response.headers();
        Ok(UploadReceipt {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            etag: header_value(headers, ETAG.as_str()),
            request_id: header_value(headers, "x-obs-request-id"),
            version_id: header_value(headers, "x-obs-version-id"),
        })
    }
}

#[async_trait::async_trait]
impl ObjectStore for ObsClient {
    async fn upload(
        &self,
        snapshot: Snapshot,
        bucket: &str,
        key: &str,
    ) -> Result<UploadReceipt, BackupError> {
        let receipt = self
            .put_object(snapshot, bucket, key)
            .await
            .map_err(BackupError::Upload)?;
        info!("Upload to OBS successful: {}", receipt);
        Ok(receipt)
    }

    fn store_type(&self) -> &'static str {
        "OTC OBS"
    }
}
