use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{debug, info};

use super::snapshot_source::{Snapshot, SnapshotSource};
use crate::config::VaultConfig;
use crate::error::BackupError;

const APPROLE_LOGIN_PATH: &str = "auth/approle/login";
const RAFT_SNAPSHOT_PATH: &str = "sys/storage/raft/snapshot";

/// HashiCorp Vault client
pub struct VaultClient {
    client: Client,
    address: String,
    namespace: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct AppRoleLoginRequest<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

impl VaultClient {
    /// Create a new Vault client bound to the configured address and timeout
    pub fn new(config: &VaultConfig) -> Result<Self, BackupError> {
        Self::build(config).map_err(|e| BackupError::client_init("Vault", e))
    }

    fn build(config: &VaultConfig) -> Result<Self> {
        let url = Url::parse(&config.address)
            .with_context(|| format!("Invalid Vault address: {}", config.address))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Unsupported Vault address scheme: {}", url.scheme());
        }

        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(path) = &config.ca_cert {
            let pem = fs::read(path)
                .with_context(|| format!("Failed to read Vault CA certificate: {:?}", path))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .or_else(|_| reqwest::Certificate::from_der(&pem))
                .context("Failed to parse Vault CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            address: config.address.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            token: None,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path)
    }

    fn with_namespace(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.namespace {
            Some(namespace) => request.header("X-Vault-Namespace", namespace),
            None => request,
        }
    }

    /// Token obtained by the last successful login
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Authenticate with AppRole and keep the client token
    pub async fn login_approle(&mut self, role_id: &str, secret_id: &str) -> Result<()> {
        let url = self.url(APPROLE_LOGIN_PATH);
        debug!("Logging in with AppRole at: {}", url);

        let response = self
            .with_namespace(self.client.post(&url))
            .json(&AppRoleLoginRequest { role_id, secret_id })
            .send()
            .await
            .context("Failed to send AppRole login request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Vault login failed with status {}: {}", status, body);
        }

        let login: LoginResponse = response
            .json()
            .await
            .context("Failed to parse Vault login response")?;
        let auth = login
            .auth
            .ok_or_else(|| anyhow!("Vault login response has no auth data"))?;

        info!(
            "Logged in to Vault with AppRole (lease {}s)",
            auth.lease_duration
        );
        self.token = Some(auth.client_token);
        Ok(())
    }

    /// Stream a snapshot of the Raft storage backend into memory
    pub async fn create_raft_snapshot(&self) -> Result<Snapshot> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("Vault client is not authenticated"))?;

        let url = self.url(RAFT_SNAPSHOT_PATH);
        debug!("Requesting Raft snapshot from: {}", url);

        let response = self
            .with_namespace(self.client.get(&url))
            .header("X-Vault-Token", token)
            .send()
            .await
            .context("Failed to request Raft snapshot")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Vault snapshot request failed with status {}: {}", status, body);
        }

        let data = response
            .bytes()
            .await
            .context("Failed to read Raft snapshot body")?;

        info!("Captured Raft snapshot ({} bytes)", data.len());
        Ok(Snapshot::new(data))
    }
}

#[async_trait::async_trait]
impl SnapshotSource for VaultClient {
    async fn login(&mut self, role_id: &str, secret_id: &str) -> Result<(), BackupError> {
        self.login_approle(role_id, secret_id)
            .await
            .map_err(BackupError::Authentication)
    }

    async fn create_snapshot(&self) -> Result<Snapshot, BackupError> {
        self.create_raft_snapshot()
            .await
            .map_err(BackupError::Snapshot)
    }

    fn source_type(&self) -> &'static str {
        "HashiCorp Vault"
    }
}
