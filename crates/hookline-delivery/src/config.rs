//! Layered configuration for embedding the dispatcher.
//!
//! Nothing here is required: `DispatchConfig::default()` builds a working
//! dispatcher. Embedders that want operator-tunable settings load a
//! [`Config`] and convert it.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientConfig,
    dispatcher::DispatchConfig,
    retry::{BackoffStrategy, RetryPolicy},
};

const CONFIG_FILE: &str = "hookline.toml";
const ENV_PREFIX: &str = "HOOKLINE_";

/// Dispatch settings from defaults, file and environment.
///
/// Sources in priority order:
/// 1. Environment variables prefixed `HOOKLINE_` (highest)
/// 2. `hookline.toml` in the working directory
/// 3. Built-in defaults (lowest)
///
/// # Example
///
/// ```no_run
/// use hookline_delivery::config::Config;
///
/// # fn main() -> anyhow::Result<()> {
/// let config = Config::load()?;
/// let dispatch = config.to_dispatch_config();
/// assert!(dispatch.retry_policy.max_attempts >= 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Client
    /// Per-attempt HTTP timeout in milliseconds.
    ///
    /// Environment variable: `HOOKLINE_DELIVERY_TIMEOUT_MS`
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// `User-Agent` sent with every delivery.
    ///
    /// Environment variable: `HOOKLINE_USER_AGENT`
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Redirects to follow before treating a 3xx as final.
    ///
    /// Environment variable: `HOOKLINE_MAX_REDIRECTS`
    #[serde(default)]
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    ///
    /// Environment variable: `HOOKLINE_VERIFY_TLS`
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    // Retry
    /// Maximum attempts per delivery sequence, first attempt included.
    ///
    /// Environment variable: `HOOKLINE_MAX_RETRY_ATTEMPTS`
    #[serde(default = "default_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base backoff delay in milliseconds.
    ///
    /// Environment variable: `HOOKLINE_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    ///
    /// Environment variable: `HOOKLINE_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter fraction, 0.0 to 1.0.
    ///
    /// Environment variable: `HOOKLINE_RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor")]
    pub retry_jitter_factor: f64,
    /// `fixed`, `linear` or `exponential`.
    ///
    /// Environment variable: `HOOKLINE_RETRY_BACKOFF`
    #[serde(default = "default_backoff")]
    pub retry_backoff: BackoffStrategy,

    // Observer
    /// Upper bound on one observer call in milliseconds.
    ///
    /// Environment variable: `HOOKLINE_OBSERVER_TIMEOUT_MS`
    #[serde(default = "default_observer_timeout_ms")]
    pub observer_timeout_ms: u64,
}

impl Config {
    /// Loads from defaults, `hookline.toml` and `HOOKLINE_*` variables.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or the result does not validate.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like [`Config::load`] with an explicit file path. A missing file is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or the result does not validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("failed to load hookline configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the dispatcher's configuration.
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            client: self.to_client_config(),
            retry_policy: self.to_retry_policy(),
            observer_timeout: Duration::from_millis(self.observer_timeout_ms),
        }
    }

    /// Converts to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.delivery_timeout_ms),
            user_agent: self.user_agent.clone(),
            max_redirects: self.max_redirects,
            verify_tls: self.verify_tls,
        }
    }

    /// Converts to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: self.retry_backoff,
        }
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        if self.delivery_timeout_ms == 0 {
            anyhow::bail!("delivery_timeout_ms must be greater than 0");
        }

        if self.user_agent.trim().is_empty() {
            anyhow::bail!("user_agent must not be empty");
        }

        if self.max_retry_attempts == 0 {
            anyhow::bail!("max_retry_attempts must be greater than 0");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.observer_timeout_ms == 0 {
            anyhow::bail!("observer_timeout_ms must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout_ms(),
            user_agent: default_user_agent(),
            max_redirects: 0,
            verify_tls: default_verify_tls(),
            max_retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            retry_backoff: default_backoff(),
            observer_timeout_ms: default_observer_timeout_ms(),
        }
    }
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_user_agent() -> String {
    ClientConfig::default().user_agent
}

fn default_verify_tls() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_backoff() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_observer_timeout_ms() -> u64 {
    5_000
}
