use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::BackupError;

pub const DEFAULT_VAULT_ADDRESS: &str = "https://127.0.0.1:8200";
pub const DEFAULT_VAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_OBJECT_NAME: &str = "vault-raft-backup.snap";
pub const DEFAULT_OBS_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_AUTH_URL: &str = "https://iam.eu-de.otc.t-systems.com/v3";
pub const DEFAULT_PROJECT_NAME: &str = "eu-de";

/// File name looked up in the home directory when `--config` is not given
pub const CONFIG_FILE_NAME: &str = ".vault-raft-backup.yaml";

/// Vault connection and AppRole credentials
#[derive(Clone)]
pub struct VaultConfig {
    pub address: String,
    pub timeout: Duration,
    pub role_id: String,
    pub secret_id: String,
    pub namespace: Option<String>,
    pub ca_cert: Option<PathBuf>,
}

/// Destination of the snapshot
#[derive(Debug, Clone)]
pub struct ObsConfig {
    pub bucket_name: String,
    pub object_name: String,
    /// Overrides the endpoint derived from the auth URL
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

/// Identity service settings used to sign OBS requests
#[derive(Clone)]
pub struct IdentityConfig {
    pub auth_url: String,
    pub domain_name: String,
    pub project_name: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Everything a backup run needs, captured once before orchestration starts
#[derive(Debug, Clone)]
pub struct Settings {
    pub vault: VaultConfig,
    pub obs: ObsConfig,
    pub identity: IdentityConfig,
}

fn redact(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("role_id", &self.role_id)
            .field("secret_id", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("ca_cert", &self.ca_cert)
            .finish()
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("auth_url", &self.auth_url)
            .field("domain_name", &self.domain_name)
            .field("project_name", &self.project_name)
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// Raw backup options as they arrive from flags, environment or the YAML file.
///
/// Every field is optional so the sources can be layered; defaults and
/// required-field checks are applied in [`BackupOptions::into_settings`].
/// Environment variable names are the flag names upper-cased with hyphens
/// replaced by underscores. YAML keys are the flag names.
#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackupOptions {
    /// Vault address
    #[arg(long, env = "VAULT_ADDRESS", global = true)]
    pub vault_address: Option<String>,

    /// Vault AppRole role ID (required)
    #[arg(long, env = "VAULT_ROLE_ID", global = true)]
    pub vault_role_id: Option<String>,

    /// Vault AppRole secret ID (required)
    #[arg(long, env = "VAULT_SECRET_ID", global = true, hide_env_values = true)]
    pub vault_secret_id: Option<String>,

    /// Vault client timeout, e.g. 60s or 2m [default: 60s]
    #[arg(long, env = "VAULT_TIMEOUT", global = true, value_parser = parse_duration)]
    #[serde(deserialize_with = "deserialize_duration")]
    pub vault_timeout: Option<Duration>,

    /// Vault Enterprise namespace
    #[arg(long, env = "VAULT_NAMESPACE", global = true)]
    pub vault_namespace: Option<String>,

    /// PEM or DER CA certificate used to verify the Vault server
    #[arg(long, env = "VAULT_CA_CERT", global = true)]
    pub vault_ca_cert: Option<PathBuf>,

    /// OBS bucket name (required)
    #[arg(long, env = "OBS_BUCKET_NAME", global = true)]
    pub obs_bucket_name: Option<String>,

    /// OBS object name [default: vault-raft-backup.snap]
    #[arg(long, env = "OBS_OBJECT_NAME", global = true)]
    pub obs_object_name: Option<String>,

    /// OBS endpoint, derived from the auth URL when not set
    #[arg(long, env = "OBS_ENDPOINT", global = true)]
    pub obs_endpoint: Option<String>,

    /// Upload deadline [default: 10m]
    #[arg(long, env = "OBS_TIMEOUT", global = true, value_parser = parse_duration)]
    #[serde(deserialize_with = "deserialize_duration")]
    pub obs_timeout: Option<Duration>,

    /// OTC access key (required unless username/password are given)
    #[arg(long, env = "OS_ACCESS_KEY", global = true)]
    pub os_access_key: Option<String>,

    /// OTC secret key (required unless username/password are given)
    #[arg(long, env = "OS_SECRET_KEY", global = true, hide_env_values = true)]
    pub os_secret_key: Option<String>,

    /// OTC authentication URL [default: https://iam.eu-de.otc.t-systems.com/v3]
    #[arg(long, env = "OS_AUTH_URL", global = true)]
    pub os_auth_url: Option<String>,

    /// OTC domain name (required)
    #[arg(long, env = "OS_DOMAIN_NAME", global = true)]
    pub os_domain_name: Option<String>,

    /// OTC project name [default: eu-de]
    #[arg(long, env = "OS_PROJECT_NAME", global = true)]
    pub os_project_name: Option<String>,

    /// OTC user name for token authentication
    #[arg(long, env = "OS_USERNAME", global = true)]
    pub os_username: Option<String>,

    /// OTC password for token authentication
    #[arg(long, env = "OS_PASSWORD", global = true, hide_env_values = true)]
    pub os_password: Option<String>,
}

macro_rules! fill {
    ($target:ident, $source:ident, $($field:ident),+ $(,)?) => {
        $( if $target.$field.is_none() { $target.$field = $source.$field; } )+
    };
}

impl BackupOptions {
    /// Fill every unset field from `fallback`; values already present win
    pub fn merge(mut self, fallback: BackupOptions) -> Self {
        fill!(
            self,
            fallback,
            vault_address,
            vault_role_id,
            vault_secret_id,
            vault_timeout,
            vault_namespace,
            vault_ca_cert,
            obs_bucket_name,
            obs_object_name,
            obs_endpoint,
            obs_timeout,
            os_access_key,
            os_secret_key,
            os_auth_url,
            os_domain_name,
            os_project_name,
            os_username,
            os_password,
        );
        self
    }

    /// Load options from a YAML file keyed by flag names
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        // An empty file is a valid, empty config
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Apply defaults and check that every required value is present
    pub fn into_settings(self) -> Result<Settings, BackupError> {
        let mut missing = Vec::new();
        let mut require = |value: Option<String>, flag: &'static str| {
            let value = value.filter(|v| !v.is_empty());
            if value.is_none() {
                missing.push(flag);
            }
            value.unwrap_or_default()
        };

        let role_id = require(self.vault_role_id, "vault-role-id");
        let secret_id = require(self.vault_secret_id, "vault-secret-id");
        let bucket_name = require(self.obs_bucket_name, "obs-bucket-name");
        let domain_name = require(self.os_domain_name, "os-domain-name");

        let access_key = self.os_access_key.filter(|v| !v.is_empty());
        let secret_key = self.os_secret_key.filter(|v| !v.is_empty());
        let username = self.os_username.filter(|v| !v.is_empty());
        let password = self.os_password.filter(|v| !v.is_empty());

        if username.is_none() || password.is_none() {
            if access_key.is_none() {
                missing.push("os-access-key");
            }
            if secret_key.is_none() {
                missing.push("os-secret-key");
            }
        }

        if !missing.is_empty() {
            let flags = missing
                .iter()
                .map(|flag| format!("\"{}\"", flag))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(BackupError::Configuration(format!(
                "required flag(s) {} not set",
                flags
            )));
        }

        Ok(Settings {
            vault: VaultConfig {
                address: self
                    .vault_address
                    .unwrap_or_else(|| DEFAULT_VAULT_ADDRESS.to_string()),
                timeout: self.vault_timeout.unwrap_or(DEFAULT_VAULT_TIMEOUT),
                role_id,
                secret_id,
                namespace: self.vault_namespace.filter(|v| !v.is_empty()),
                ca_cert: self.vault_ca_cert,
            },
            obs: ObsConfig {
                bucket_name,
                object_name: self
                    .obs_object_name
                    .unwrap_or_else(|| DEFAULT_OBJECT_NAME.to_string()),
                endpoint: self.obs_endpoint.filter(|v| !v.is_empty()),
                timeout: self.obs_timeout.unwrap_or(DEFAULT_OBS_TIMEOUT),
            },
            identity: IdentityConfig {
                auth_url: self
                    .os_auth_url
                    .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
                domain_name,
                project_name: self
                    .os_project_name
                    .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
                access_key,
                secret_key,
                username,
                password,
            },
        })
    }
}

/// Read the config file: the explicit one must exist, the default one is optional
pub fn load_config_file(explicit: Option<&Path>) -> Result<BackupOptions> {
    if let Some(path) = explicit {
        let options = BackupOptions::from_file(path)?;
        info!("Using config file: {}", path.display());
        return Ok(options);
    }

    let Some(home) = dirs::home_dir() else {
        return Ok(BackupOptions::default());
    };
    let path = home.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(BackupOptions::default());
    }

    let options = BackupOptions::from_file(&path)?;
    info!("Using config file: {}", path.display());
    Ok(options)
}

/// Parse a duration such as `60s`, `5m`, `1h30m`, `250ms` or bare seconds
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        if digits == 0 {
            return Err(format!("invalid duration {:?}", input));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let too_large = || format!("duration {:?} is too large", input);
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_large)?),
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(Raw::Text(text)) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn complete_options() -> BackupOptions {
        BackupOptions {
            vault_role_id: Some("r1".to_string()),
            vault_secret_id: Some("s1".to_string()),
            obs_bucket_name: Some("backups".to_string()),
            os_access_key: Some("AK".to_string()),
            os_secret_key: Some("SK".to_string()),
            os_domain_name: Some("OTC00000".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ten seconds").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s10").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        let err = parse_duration("18446744073709551615s1s").unwrap_err();
        assert!(err.contains("too large"));
        assert!(parse_duration("307445734561825862m").is_err());
        assert!(parse_duration("5124095576030432h").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn test_yaml_duration_overflow_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "vault-timeout: 307445734561825862m\n").unwrap();

        assert!(BackupOptions::from_file(&path).is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let settings = complete_options().into_settings().unwrap();

        assert_eq!(settings.vault.address, DEFAULT_VAULT_ADDRESS);
        assert_eq!(settings.vault.timeout, Duration::from_secs(60));
        assert_eq!(settings.obs.object_name, "vault-raft-backup.snap");
        assert_eq!(settings.obs.timeout, DEFAULT_OBS_TIMEOUT);
        assert_eq!(settings.identity.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(settings.identity.project_name, "eu-de");
        assert_eq!(settings.identity.access_key.as_deref(), Some("AK"));
    }

    #[test]
    fn test_missing_required_flags_are_listed() {
        let err = BackupOptions::default().into_settings().unwrap_err();
        match err {
            BackupError::Configuration(msg) => {
                assert!(msg.contains("\"vault-role-id\""));
                assert!(msg.contains("\"vault-secret-id\""));
                assert!(msg.contains("\"obs-bucket-name\""));
                assert!(msg.contains("\"os-domain-name\""));
                assert!(msg.contains("\"os-access-key\""));
                assert!(msg.contains("\"os-secret-key\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut options = complete_options();
        options.os_domain_name = Some(String::new());

        let err = options.into_settings().unwrap_err();
        assert!(err.to_string().contains("os-domain-name"));
    }

    #[test]
    fn test_username_password_replace_access_keys() {
        let mut options = complete_options();
        options.os_access_key = None;
        options.os_secret_key = None;
        options.os_username = Some("backup-user".to_string());
        options.os_password = Some("hunter2".to_string());

        let settings = options.into_settings().unwrap();
        assert!(settings.identity.access_key.is_none());
        assert_eq!(settings.identity.username.as_deref(), Some("backup-user"));
    }

    #[test]
    fn test_merge_keeps_explicit_values() {
        let explicit = BackupOptions {
            vault_address: Some("https://vault.local:8200".to_string()),
            ..Default::default()
        };
        let file = BackupOptions {
            vault_address: Some("https://ignored:8200".to_string()),
            obs_bucket_name: Some("from-file".to_string()),
            ..Default::default()
        };

        let merged = explicit.merge(file);
        assert_eq!(
            merged.vault_address.as_deref(),
            Some("https://vault.local:8200")
        );
        assert_eq!(merged.obs_bucket_name.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_from_file_reads_flag_names() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup.yaml");
        fs::write(
            &path,
            "vault-role-id: r1\nvault-timeout: 90s\nobs-timeout: 120\nobs-bucket-name: backups\n",
        )?;

        let options = BackupOptions::from_file(&path)?;
        assert_eq!(options.vault_role_id.as_deref(), Some("r1"));
        assert_eq!(options.vault_timeout, Some(Duration::from_secs(90)));
        assert_eq!(options.obs_timeout, Some(Duration::from_secs(120)));
        assert_eq!(options.obs_bucket_name.as_deref(), Some("backups"));
        assert!(options.vault_secret_id.is_none());

        Ok(())
    }

    #[test]
    fn test_from_file_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("empty.yaml");
        fs::write(&path, "\n")?;

        let options = BackupOptions::from_file(&path)?;
        assert!(options.vault_role_id.is_none());

        Ok(())
    }

    #[test]
    fn test_explicit_config_file_must_exist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.yaml");
        assert!(load_config_file(Some(&path)).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = complete_options().into_settings().unwrap();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("\"s1\""));
        assert!(!rendered.contains("\"SK\""));
        assert!(rendered.contains("<redacted>"));
    }
}
