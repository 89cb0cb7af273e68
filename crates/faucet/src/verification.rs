//! Human-verification capability consumed by the dispense flow.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{VerificationConfig, VerificationMode};
use crate::error::{FaucetError, FaucetResult};

/// Answers whether a verification token is valid.
///
/// `None` means no verifier produced an answer for the request.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<bool>;
}

/// No verification configured.
pub struct NoVerifier;

#[async_trait]
impl Verifier for NoVerifier {
    async fn verify(&self, _token: &str) -> Option<bool> {
        None
    }
}

/// Accepts exactly one preconfigured token.
pub struct StaticTokenVerifier {
    expected: String,
}

impl StaticTokenVerifier {
    pub fn new(expected: impl Into<String>) -> Self {
        Self { expected: expected.into() }
    }
}

#[async_trait]
impl Verifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<bool> {
        Some(token == self.expected)
    }
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Checks tokens against a reCAPTCHA-style `siteverify` endpoint.
pub struct SiteVerifyVerifier {
    verify_url: String,
    secret: String,
    client: reqwest::Client,
}

impl SiteVerifyVerifier {
    pub fn new(verify_url: String, secret: String, timeout: Duration) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FaucetError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            verify_url,
            secret,
            client,
        })
    }

    async fn check(&self, token: &str) -> Result<SiteVerifyResponse, reqwest::Error> {
        self.client
            .post(&self.verify_url)
            .form(&[("secret", self.secret.as_str()), ("response", token)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl Verifier for SiteVerifyVerifier {
    async fn verify(&self, token: &str) -> Option<bool> {
        match self.check(token).await {
            Ok(response) => {
                if !response.success {
                    debug!("Verification rejected: {:?}", response.error_codes);
                }
                Some(response.success)
            }
            Err(e) => {
                warn!("Verification service unavailable: {}", e);
                Some(false)
            }
        }
    }
}

/// Builds the verifier selected by configuration.
pub fn build_verifier(config: &VerificationConfig, timeout: Duration) -> FaucetResult<Arc<dyn Verifier>> {
    match config.mode {
        VerificationMode::None => Ok(Arc::new(NoVerifier)),
        VerificationMode::Static => {
            let token = config.static_token.clone().ok_or_else(|| {
                FaucetError::InvalidConfig("verification.static_token is required in static mode".to_string())
            })?;
            Ok(Arc::new(StaticTokenVerifier::new(token)))
        }
        VerificationMode::SiteVerify => {
            let secret = config.secret.clone().ok_or_else(|| {
                FaucetError::InvalidConfig("verification.secret is required in site-verify mode".to_string())
            })?;
            Ok(Arc::new(SiteVerifyVerifier::new(config.verify_url.clone(), secret, timeout)?))
        }
    }
}
