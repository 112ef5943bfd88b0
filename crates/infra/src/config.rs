//! Configuration loading and representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tillerp_accounting::{DEFAULT_TRANSACTION_ID_JOURNALS, TransactionIdPolicy};
use tillerp_invoicing::UntaxedBasis;
use tillerp_sales::DEFAULT_NOTIFICATION_CHANNEL;

pub const ENV_TRANSACTION_ID_JOURNALS: &str = "TILLERP_TRANSACTION_ID_JOURNALS";
pub const ENV_NOTIFICATION_CHANNEL: &str = "TILLERP_NOTIFICATION_CHANNEL";
pub const ENV_UNTAXED_BASIS: &str = "TILLERP_UNTAXED_BASIS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Journals whose payments must carry a mobile-money transaction id.
    pub transaction_id_journals: Vec<String>,
    /// Channel announcing confirmed sale orders.
    pub notification_channel: String,
    pub untaxed_basis: UntaxedBasis,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transaction_id_journals: DEFAULT_TRANSACTION_ID_JOURNALS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            notification_channel: DEFAULT_NOTIFICATION_CHANNEL.to_string(),
            untaxed_basis: UntaxedBasis::default(),
        }
    }
}

impl AppConfig {
    /// Read `TILLERP_*` environment variables, falling back to defaults.
    ///
    /// Malformed values are logged and ignored rather than failing startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TRANSACTION_ID_JOURNALS) {
            let journals = split_list(&raw);
            if journals.is_empty() {
                tracing::warn!(
                    "{ENV_TRANSACTION_ID_JOURNALS} is empty; no journal will require a transaction id"
                );
            }
            config.transaction_id_journals = journals;
        }

        match lookup(ENV_NOTIFICATION_CHANNEL) {
            Some(name) if !name.trim().is_empty() => {
                config.notification_channel = name.trim().to_string();
            }
            Some(_) => {
                tracing::warn!(
                    "{ENV_NOTIFICATION_CHANNEL} is blank; using {DEFAULT_NOTIFICATION_CHANNEL:?}"
                );
            }
            None => {}
        }

        if let Some(raw) = lookup(ENV_UNTAXED_BASIS) {
            match parse_basis(&raw) {
                Ok(basis) => config.untaxed_basis = basis,
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "{ENV_UNTAXED_BASIS} not recognised; using net_of_tax");
                }
            }
        }

        config
    }

    /// Parse a JSON configuration document; missing keys take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_channel.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "notification_channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transaction_id_policy(&self) -> TransactionIdPolicy {
        TransactionIdPolicy::new(self.transaction_id_journals.iter().cloned())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_basis(raw: &str) -> Result<UntaxedBasis, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
}
