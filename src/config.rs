use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_JWT_ISSUER: &str = "subscription-billing";
pub const DEFAULT_JWT_AUDIENCE: &str = "subscription-billing-web";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Which path turns a subscribe form into a subscription. Exactly one runs
/// per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFlow {
    /// Redirect to processor checkout; the webhook creates the row.
    Checkout,
    /// Create an ACTIVE row immediately.
    Direct,
}

impl FromStr for SubscribeFlow {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checkout" => Ok(SubscribeFlow::Checkout),
            "direct" => Ok(SubscribeFlow::Direct),
            _ => Err(()),
        }
    }
}

#[derive(Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
}

impl fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeSettings").finish_non_exhaustive()
    }
}

#[cfg(test)]
impl StripeSettings {
    pub fn for_tests() -> Self {
        Self {
            secret_key: "sk_test_dummy".into(),
            webhook_secret: "whsec_test_secret".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub app_base_url: String,
    pub bind_addr: SocketAddr,
    pub stripe: StripeSettings,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub csrf_secret: String,
    pub subscribe_flow: SubscribeFlow,
    pub login_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let optional = |name: &'static str, default: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid { name, value })
        }

        let app_base_url = required("APP_BASE_URL")?.trim_end_matches('/').to_string();
        let bind_addr = parse("BIND_ADDR", optional("BIND_ADDR", DEFAULT_BIND_ADDR))?;
        let subscribe_flow = parse("SUBSCRIBE_FLOW", optional("SUBSCRIBE_FLOW", "checkout"))?;

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            app_base_url,
            bind_addr,
            stripe: StripeSettings {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            },
            jwt_secret: required("JWT_SECRET")?,
            jwt_issuer: optional("JWT_ISSUER", DEFAULT_JWT_ISSUER),
            jwt_audience: optional("JWT_AUDIENCE", DEFAULT_JWT_AUDIENCE),
            csrf_secret: required("CSRF_SECRET")?,
            subscribe_flow,
            login_path: optional("LOGIN_PATH", DEFAULT_LOGIN_PATH),
        })
    }

    #[cfg(test)]
    pub fn for_tests(subscribe_flow: SubscribeFlow) -> Self {
        Config {
            database_url: "postgres://localhost/test".into(),
            app_base_url: "https://app.example.test".into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            stripe: StripeSettings::for_tests(),
            jwt_secret: "0123456789abcdef0123456789abcdef".into(),
            jwt_issuer: DEFAULT_JWT_ISSUER.into(),
            jwt_audience: DEFAULT_JWT_AUDIENCE.into(),
            csrf_secret: "csrf-test-secret".into(),
            subscribe_flow,
            login_path: DEFAULT_LOGIN_PATH.into(),
        }
    }
}
