//! Gateway configuration with fail-fast validation.
//!
//! A placeholder or missing secret must never reach signature verification
//! in a non-test environment, so `from_env` rejects them at startup.

use std::str::FromStr;

use chatdesk_shared::GatewayKind;

use crate::error::{BillingError, BillingResult};

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const RAZORPAY_API_BASE: &str = "https://api.razorpay.com";

/// Process environment, from `APP_ENV`. Only `test` relaxes secret checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Production,
    Development,
    Test,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("production") => AppEnv::Production,
            Ok("test") => AppEnv::Test,
            _ => AppEnv::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Overridable for tests against a local mock server.
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub api_base: String,
}

/// Process-wide gateway selection plus the credentials for the selected
/// provider.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub provider: GatewayKind,
    pub stripe: Option<StripeConfig>,
    pub razorpay: Option<RazorpayConfig>,
    /// Base URL for checkout success/cancel redirects.
    pub frontend_url: String,
}

impl GatewayConfig {
    /// Load configuration from the environment, validating that the selected
    /// provider's secrets are present and not placeholders.
    pub fn from_env(env: AppEnv) -> BillingResult<Self> {
        let provider = match std::env::var("PAYMENT_GW") {
            Ok(raw) => GatewayKind::from_str(&raw)
                .map_err(|e| BillingError::Config(e.to_string()))?,
            Err(_) => GatewayKind::Stripe,
        };

        let frontend_url = std::env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let config = match provider {
            GatewayKind::Stripe => Self {
                provider,
                stripe: Some(StripeConfig {
                    secret_key: require_secret("STRIPE_SECRET", env)?,
                    webhook_secret: require_secret("STRIPE_WEBHOOK_SECRET", env)?,
                    api_base: STRIPE_API_BASE.to_string(),
                }),
                razorpay: None,
                frontend_url,
            },
            GatewayKind::Razorpay => Self {
                provider,
                stripe: None,
                razorpay: Some(RazorpayConfig {
                    key_id: require_secret("RZP_KEY_ID", env)?,
                    key_secret: require_secret("RZP_KEY_SECRET", env)?,
                    webhook_secret: require_secret("RZP_WEBHOOK_SECRET", env)?,
                    api_base: RAZORPAY_API_BASE.to_string(),
                }),
                frontend_url,
            },
        };

        Ok(config)
    }
}

/// Read a secret, rejecting empty values and the placeholder strings the
/// old deployment scripts used to ship.
fn require_secret(name: &str, env: AppEnv) -> BillingResult<String> {
    let value = std::env::var(name).unwrap_or_default();

    if is_placeholder(&value) {
        if env == AppEnv::Test {
            return Ok(format!("test_{}", name.to_ascii_lowercase()));
        }
        return Err(BillingError::Config(format!(
            "{name} is missing or set to a placeholder value"
        )));
    }

    Ok(value)
}

fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.contains("placeholder")
        || trimmed.contains("changeme")
        || trimmed.contains("your_")
}
