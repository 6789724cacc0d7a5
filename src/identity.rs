//! Cloud identity and temporary credentials
//!
//! Builds an authenticated [`CloudContext`] from an [`IdentityConfig`] and, when
//! no static access key is configured, trades the session token for a
//! temporary AK/SK/security-token triple used to sign OBS requests.

use anyhow::{anyhow, Context};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::IdentityConfig;
use crate::error::BackupError;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Deadline for each token request and credential exchange
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Credential triple used to sign storage requests
#[derive(Clone, Default)]
pub struct AkSk {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: Option<String>,
}

impl std::fmt::Debug for AkSk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AkSk")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("security_token", &self.security_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Authenticated identity for one backup run
#[derive(Debug)]
pub struct CloudContext {
    pub region: String,
    pub auth_url: String,
    pub domain_name: String,
    pub project_name: String,
    pub credentials: AkSk,
    session_token: Option<String>,
    http: Client,
}

/// Temporary credential as returned by the identity service
#[derive(Debug, Deserialize)]
pub struct TemporaryCredential {
    pub access: String,
    pub secret: String,
    pub securitytoken: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    credential: TemporaryCredential,
}

#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    auth: TokenExchangeAuth<'a>,
}

#[derive(Serialize)]
struct TokenExchangeAuth<'a> {
    identity: TokenExchangeIdentity<'a>,
}

#[derive(Serialize)]
struct TokenExchangeIdentity<'a> {
    methods: [&'static str; 1],
    token: TokenId<'a>,
}

#[derive(Serialize)]
struct TokenId<'a> {
    id: &'a str,
}

impl CloudContext {
    /// Session token when the context was authenticated with username/password
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// IAM base URL without the API version suffix
    fn iam_base(&self) -> &str {
        let trimmed = self.auth_url.trim_end_matches('/');
        trimmed.strip_suffix("/v3").unwrap_or(trimmed)
    }

    /// Endpoint issuing temporary AK/SK
    pub fn credential_endpoint(&self) -> String {
        format!("{}/v3.0/OS-CREDENTIAL/securitytokens", self.iam_base())
    }
}

/// Region encoded in an OTC project name, e.g. `eu-de_backups` -> `eu-de`
pub fn region_from_project(project_name: &str) -> &str {
    project_name.split('_').next().unwrap_or(project_name)
}

fn validate(config: &IdentityConfig) -> Result<(), BackupError> {
    if config.domain_name.is_empty() {
        return Err(BackupError::Configuration(
            "OTC domain name is not set".to_string(),
        ));
    }
    if config.project_name.is_empty() {
        return Err(BackupError::Configuration(
            "OTC project name is not set".to_string(),
        ));
    }

    let has_aksk = config.access_key.is_some() && config.secret_key.is_some();
    let has_password = config.username.is_some() && config.password.is_some();
    if config.access_key.is_some() != config.secret_key.is_some() {
        return Err(BackupError::Configuration(
            "OTC access key and secret key must be set together".to_string(),
        ));
    }
    if !has_aksk && !has_password {
        return Err(BackupError::Configuration(
            "OTC access key/secret key or username/password must be set".to_string(),
        ));
    }
    Ok(())
}

/// Build an authenticated context from the identity settings.
///
/// A static AK/SK pair authenticates requests on its own and needs no network
/// call. Otherwise a project-scoped token is requested with username/password.
pub async fn obtain_authenticated_context(
    config: &IdentityConfig,
) -> Result<CloudContext, BackupError> {
    validate(config)?;

    let http =
        http_client(IDENTITY_TIMEOUT).map_err(|e| BackupError::client_init("identity", e))?;

    let region = region_from_project(&config.project_name).to_string();
    let mut context = CloudContext {
        region,
        auth_url: config.auth_url.clone(),
        domain_name: config.domain_name.clone(),
        project_name: config.project_name.clone(),
        credentials: AkSk::default(),
        session_token: None,
        http,
    };

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        debug!("Using static AK/SK for domain {}", config.domain_name);
        context.credentials = AkSk {
            access_key: access_key.clone(),
            secret_key: secret_key.clone(),
            security_token: None,
        };
        return Ok(context);
    }

    // validate() guarantees the password pair here
    let username = config.username.as_deref().unwrap_or_default();
    let password = config.password.as_deref().unwrap_or_default();
    let token = request_password_token(&context, username, password)
        .await
        .map_err(|e| BackupError::client_init("identity", e))?;
    context.session_token = Some(token);

    info!(
        "Authenticated to {} as {} (project {})",
        context.auth_url, username, context.project_name
    );
    Ok(context)
}

fn http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

async fn request_password_token(
    context: &CloudContext,
    username: &str,
    password: &str,
) -> anyhow::Result<String> {
    let url = format!("{}/auth/tokens", context.auth_url.trim_end_matches('/'));
    debug!("Requesting token from: {}", url);

    let body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": username,
                        "password": password,
                        "domain": { "name": context.domain_name },
                    }
                }
            },
            "scope": {
                "project": {
                    "name": context.project_name,
                    "domain": { "name": context.domain_name },
                }
            }
        }
    });

    let response = context
        .http
        .post(&url)
        .json(&body)
        .send()
        .await
        .context("Failed to request token from identity service")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Token request failed with status {}: {}", status, body);
    }

    response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Token response has no {} header", SUBJECT_TOKEN_HEADER))
}

/// Make sure the context carries an access key.
///
/// Does nothing when one is already present, so repeated calls are free.
/// Otherwise exchanges the session token for a temporary credential and writes
/// it onto the context.
pub async fn ensure_temporary_credential(context: &mut CloudContext) -> Result<(), BackupError> {
    if !context.credentials.access_key.is_empty() {
        return Ok(());
    }

    let token = context
        .session_token
        .clone()
        .ok_or_else(|| BackupError::CredentialExchange(anyhow!("identity client is not initialized")))?;

    let credential = request_temporary_credential(context, &token)
        .await
        .map_err(BackupError::CredentialExchange)?;

    if let Some(expires_at) = &credential.expires_at {
        info!("Obtained temporary AK/SK valid until {}", expires_at);
    } else {
        info!("Obtained temporary AK/SK");
    }

    context.credentials = AkSk {
        access_key: credential.access,
        secret_key: credential.secret,
        security_token: Some(credential.securitytoken),
    };
    Ok(())
}

async fn request_temporary_credential(
    context: &CloudContext,
    token: &str,
) -> anyhow::Result<TemporaryCredential> {
    let url = context.credential_endpoint();
    debug!("Requesting temporary AK/SK from: {}", url);

    let request = TokenExchangeRequest {
        auth: TokenExchangeAuth {
            identity: TokenExchangeIdentity {
                methods: ["token"],
                token: TokenId { id: token },
            },
        },
    };

    let response = context
        .http
        .post(&url)
        .header("X-Auth-Token", token)
        .json(&request)
        .send()
        .await
        .context("Failed to request temporary AK/SK")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Temporary AK/SK request failed with status {}: {}", status, body);
    }

    let parsed: CredentialResponse = response
        .json()
        .await
        .context("Failed to parse temporary AK/SK response")?;
    Ok(parsed.credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn password_config(auth_url: String) -> IdentityConfig {
        IdentityConfig {
            auth_url,
            domain_name: "OTC00000".to_string(),
            project_name: "eu-de".to_string(),
            access_key: None,
            secret_key: None,
            username: Some("backup".to_string()),
            password: Some("pw".to_string()),
        }
    }

    fn aksk_config(auth_url: String) -> IdentityConfig {
        IdentityConfig {
            access_key: Some("AK".to_string()),
            secret_key: Some("SK".to_string()),
            username: None,
            password: None,
            ..password_config(auth_url)
        }
    }

    #[test]
    fn test_region_from_project() {
        assert_eq!(region_from_project("eu-de"), "eu-de");
        assert_eq!(region_from_project("eu-nl_backups"), "eu-nl");
    }

    #[tokio::test]
    async fn test_missing_domain_is_configuration_error() {
        let mut config = aksk_config("https://iam.example/v3".to_string());
        config.domain_name = String::new();

        let err = obtain_authenticated_context(&config).await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_configuration_error() {
        let mut config = aksk_config("https://iam.example/v3".to_string());
        config.access_key = None;
        config.secret_key = None;

        let err = obtain_authenticated_context(&config).await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_half_key_pair_is_configuration_error() {
        let mut config = aksk_config("https://iam.example/v3".to_string());
        config.secret_key = None;

        let err = obtain_authenticated_context(&config).await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_static_aksk_skips_network() {
        let mut server = mockito::Server::new_async().await;
        let tokens = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let config = aksk_config(format!("{}/v3", server.url()));
        let mut context = obtain_authenticated_context(&config).await.unwrap();
        ensure_temporary_credential(&mut context).await.unwrap();
        ensure_temporary_credential(&mut context).await.unwrap();

        assert_eq!(context.credentials.access_key, "AK");
        assert_eq!(context.credentials.secret_key, "SK");
        assert!(context.credentials.security_token.is_none());
        assert!(context.session_token().is_none());
        tokens.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_exchange_populates_context() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/v3/auth/tokens")
            .match_body(Matcher::PartialJson(json!({
                "auth": {
                    "identity": { "methods": ["password"] },
                    "scope": { "project": { "name": "eu-de", "domain": { "name": "OTC00000" } } }
                }
            })))
            .with_status(201)
            .with_header("X-Subject-Token", "session-token")
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let exchange = server
            .mock("POST", "/v3.0/OS-CREDENTIAL/securitytokens")
            .match_header("x-auth-token", "session-token")
            .match_body(Matcher::Json(json!({
                "auth": {
                    "identity": {
                        "methods": ["token"],
                        "token": { "id": "session-token" }
                    }
                }
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"credential":{"access":"TMPAK","secret":"TMPSK","securitytoken":"STS","expires_at":"2026-10-16T00:00:00.000000Z"}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let config = password_config(format!("{}/v3", server.url()));
        let mut context = obtain_authenticated_context(&config).await.unwrap();
        assert_eq!(context.session_token(), Some("session-token"));
        assert_eq!(context.region, "eu-de");

        ensure_temporary_credential(&mut context).await.unwrap();
        // Second call must not hit the exchange endpoint again
        ensure_temporary_credential(&mut context).await.unwrap();

        assert_eq!(context.credentials.access_key, "TMPAK");
        assert_eq!(context.credentials.secret_key, "TMPSK");
        assert_eq!(context.credentials.security_token.as_deref(), Some("STS"));
        token.assert_async().await;
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_exchange_is_credential_error() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/v3/auth/tokens")
            .with_status(201)
            .with_header("X-Subject-Token", "session-token")
            .create_async()
            .await;
        let _exchange = server
            .mock("POST", "/v3.0/OS-CREDENTIAL/securitytokens")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let config = password_config(format!("{}/v3", server.url()));
        let mut context = obtain_authenticated_context(&config).await.unwrap();
        let err = ensure_temporary_credential(&mut context).await.unwrap_err();

        assert!(matches!(err, BackupError::CredentialExchange(_)));
        assert!(context.credentials.access_key.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_password_is_client_init_error() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/v3/auth/tokens")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let config = password_config(format!("{}/v3", server.url()));
        let err = obtain_authenticated_context(&config).await.unwrap_err();
        assert!(matches!(err, BackupError::ClientInit { client: "identity", .. }));
    }

    fn bare_context() -> CloudContext {
        CloudContext {
            region: "eu-de".to_string(),
            auth_url: "https://iam.eu-de.otc.t-systems.com/v3/".to_string(),
            domain_name: "OTC00000".to_string(),
            project_name: "eu-de".to_string(),
            credentials: AkSk::default(),
            session_token: None,
            http: Client::new(),
        }
    }

    #[tokio::test]
    async fn test_stalled_identity_service_times_out() {
        // Accepted by the kernel backlog, never answered
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut context = bare_context();
        context.auth_url = format!("http://{}/v3", listener.local_addr().unwrap());
        context.http = http_client(Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let err = request_password_token(&context, "backup", "pw")
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(format!("{:#}", err).contains("Failed to request token"));
        assert!(err
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_timeout));
        drop(listener);
    }

    #[tokio::test]
    async fn test_exchange_without_session_fails() {
        let mut context = bare_context();
        let err = ensure_temporary_credential(&mut context).await.unwrap_err();

        assert!(matches!(err, BackupError::CredentialExchange(_)));
        assert!(format!("{:#}", anyhow::Error::from(err)).contains("not initialized"));
    }

    #[test]
    fn test_credential_endpoint() {
        let context = bare_context();
        assert_eq!(
            context.credential_endpoint(),
            "https://iam.eu-de.otc.t-systems.com/v3.0/OS-CREDENTIAL/securitytokens"
        );
    }
}
