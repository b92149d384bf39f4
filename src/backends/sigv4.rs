//! AWS Signature Version 4 for JSON-protocol POST requests
//!
//! Only the subset the backends need: `POST /` with an empty query string
//! and a JSON body.

use crate::error::{SagePipeError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static credentials for one signing session
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }
}

impl From<aws_credential_types::Credentials> for Credentials {
    fn from(resolved: aws_credential_types::Credentials) -> Self {
        Self {
            access_key_id: resolved.access_key_id().to_string(),
            secret_access_key: resolved.secret_access_key().to_string(),
            session_token: resolved.session_token().map(str::to_string),
        }
    }
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SagePipeError::Credentials(format!("Invalid signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the signing key for one day, region and service
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date)?;
    let k_region = hmac(&k_date, region)?;
    let k_service = hmac(&k_region, service)?;
    hmac(&k_service, "aws4_request")
}

/// One request to sign
#[derive(Debug)]
pub struct SigningRequest<'a> {
    pub credentials: &'a Credentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
    /// Lowercase header names; must include `host` and `x-amz-date`
    pub headers: &'a BTreeMap<String, String>,
    pub payload: &'a [u8],
}

impl SigningRequest<'_> {
    fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    pub fn canonical_request(&self) -> String {
        let canonical_headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();

        format!(
            "POST\n/\n\n{}\n{}\n{}",
            canonical_headers,
            self.signed_headers(),
            sha256_hex(self.payload)
        )
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.time.format("%Y%m%d"),
            self.region,
            self.service
        )
    }

    pub fn string_to_sign(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date(&self.time),
            self.scope(),
            sha256_hex(self.canonical_request().as_bytes())
        )
    }

    /// Value of the `Authorization` header
    pub fn authorization(&self) -> Result<String> {
        let key = signing_key(
            &self.credentials.secret_access_key,
            &self.time.format("%Y%m%d").to_string(),
            self.region,
            self.service,
        )?;
        let signature = hex::encode(hmac(&key, &self.string_to_sign())?);

        Ok(format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.credentials.access_key_id,
            self.scope(),
            self.signed_headers(),
            signature
        ))
    }
}

/// `x-amz-date` timestamp
pub fn amz_date(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}
