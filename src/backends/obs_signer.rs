//! OBS request signing (the provider's `OBS` V2 signature scheme)

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::identity::AkSk;

type HmacSha1 = Hmac<Sha1>;

const OBS_HEADER_PREFIX: &str = "x-obs-";

/// `Date` header value in RFC 1123 form
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Signs requests with an AK/SK pair
pub struct ObsSigner {
    credentials: AkSk,
}

impl ObsSigner {
    pub fn new(credentials: AkSk) -> Self {
        Self { credentials }
    }

    pub fn security_token(&self) -> Option<&str> {
        self.credentials.security_token.as_deref()
    }

    /// Canonical string covered by the signature
    pub fn string_to_sign(
        method: &str,
        content_md5: &str,
        content_type: &str,
        date: &str,
        headers: &[(&str, &str)],
        resource: &str,
    ) -> String {
        let mut obs_headers: Vec<(String, &str)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .filter(|(name, _)| name.starts_with(OBS_HEADER_PREFIX))
            .collect();
        obs_headers.sort();

        let mut out = format!("{}\n{}\n{}\n{}\n", method, content_md5, content_type, date);
        for (name, value) in obs_headers {
            out.push_str(&name);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push_str(resource);
        out
    }

    /// Value of the `Authorization` header for the given string-to-sign
    pub fn authorization(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = HmacSha1::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| anyhow!("Invalid OBS signing key: {}", e))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!("OBS {}:{}", self.credentials.access_key, signature))
    }
}
