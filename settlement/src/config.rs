//! Configuration for the escrow engine

use message_bus::NatsConfig;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Escrow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Store configuration
    pub ledger: ledger_core::Config,

    /// Tax rates
    pub taxes: TaxConfig,

    /// Balance operation limits
    pub accounts: AccountsConfig,

    /// Moderation policy
    pub moderation: ModerationConfig,

    /// Notification transport
    pub notifications: NotificationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "marketplace-escrow".to_string(),
            ledger: ledger_core::Config::default(),
            taxes: TaxConfig::default(),
            accounts: AccountsConfig::default(),
            moderation: ModerationConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

/// Tax rates as fractions of the pre-tax total (0.05 = 5%)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxConfig {
    /// Paid by the buyer on top of the price
    pub govt_tax_rate: Decimal,

    /// Withheld from the seller payout
    pub ecommerce_tax_rate: Decimal,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            govt_tax_rate: Decimal::new(5, 2),
            ecommerce_tax_rate: Decimal::new(2, 2),
        }
    }
}

/// Taxes fixed on an order at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxQuote {
    /// Buyer-side tax
    pub govt_tax: u64,
    /// Seller-side platform fee
    pub ecommerce_tax: u64,
}

impl TaxConfig {
    /// Taxes for a pre-tax total, rounded down to whole minor units
    pub fn quote(&self, total_price: u64) -> crate::Result<TaxQuote> {
        Ok(TaxQuote {
            govt_tax: Self::apply(total_price, self.govt_tax_rate)?,
            ecommerce_tax: Self::apply(total_price, self.ecommerce_tax_rate)?,
        })
    }

    fn apply(total_price: u64, rate: Decimal) -> crate::Result<u64> {
        Decimal::from(total_price)
            .checked_mul(rate)
            .and_then(|tax| tax.floor().to_u64())
            .ok_or_else(|| {
                crate::Error::Validation(format!("Tax on {} is out of range", total_price))
            })
    }

    fn validate(&self) -> crate::Result<()> {
        for (name, rate) in [
            ("govt_tax_rate", self.govt_tax_rate),
            ("ecommerce_tax_rate", self.ecommerce_tax_rate),
        ] {
            if rate < Decimal::ZERO || rate >= Decimal::ONE {
                return Err(crate::Error::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }
}

/// Limits on top-ups and withdrawals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Smallest top-up
    pub min_top_up: u64,

    /// Largest top-up
    pub max_top_up: u64,

    /// Smallest withdrawal
    pub min_withdraw: u64,

    /// Largest withdrawal
    pub max_withdraw: u64,

    /// Default page size of balance statements
    pub statement_limit: usize,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            min_top_up: 1,
            max_top_up: 10_000_000,
            min_withdraw: 10_000,
            max_withdraw: 10_000_000,
            statement_limit: 50,
        }
    }
}

/// Moderation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Warnings that trigger an automatic suspension
    pub penalty_warning_limit: u32,

    /// Longest ban (hours)
    pub max_ban_hours: u32,

    /// How often the node lifts expired bans (seconds)
    pub ban_sweep_interval_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            penalty_warning_limit: 3,
            max_ban_hours: 8_760,
            ban_sweep_interval_secs: 60,
        }
    }
}

/// Notification transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Log only
    Tracing,
    /// Publish on NATS
    Nats,
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Transport
    pub transport: Transport,

    /// NATS connection
    pub nats: NatsConfig,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Tracing,
            nats: NatsConfig::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            ledger: ledger_core::Config::from_env()?,
            ..Config::default()
        };

        if let Ok(rate) = std::env::var("GOVT_TAX_PERCENT") {
            config.taxes.govt_tax_rate = parse_rate("GOVT_TAX_PERCENT", &rate)?;
        }

        if let Ok(rate) = std::env::var("ECOMMERCE_TAX_PERCENT") {
            config.taxes.ecommerce_tax_rate = parse_rate("ECOMMERCE_TAX_PERCENT", &rate)?;
        }

        if let Ok(limit) = std::env::var("PENALTY_WARNING_LIMIT") {
            config.moderation.penalty_warning_limit = limit.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid PENALTY_WARNING_LIMIT: {}", e))
            })?;
        }

        if let Ok(url) = std::env::var("MARKETPLACE_NATS_URL") {
            config.notifications.transport = Transport::Nats;
            config.notifications.nats.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        self.taxes.validate()?;

        if self.accounts.min_top_up == 0 || self.accounts.min_top_up > self.accounts.max_top_up {
            return Err(crate::Error::Config("Invalid top-up limits".to_string()));
        }
        if self.accounts.min_withdraw == 0
            || self.accounts.min_withdraw > self.accounts.max_withdraw
        {
            return Err(crate::Error::Config("Invalid withdrawal limits".to_string()));
        }
        if self.moderation.penalty_warning_limit == 0 {
            return Err(crate::Error::Config(
                "penalty_warning_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_rate(name: &str, value: &str) -> crate::Result<Decimal> {
    Decimal::from_str(value.trim())
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.taxes.govt_tax_rate, Decimal::new(5, 2));
        assert_eq!(config.taxes.ecommerce_tax_rate, Decimal::new(2, 2));
        assert_eq!(config.moderation.penalty_warning_limit, 3);
        assert_eq!(config.notifications.transport, Transport::Tracing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quote_rounds_down() {
        let taxes = TaxConfig::default();

        let quote = taxes.quote(50_000).unwrap();
        assert_eq!(quote.govt_tax, 2_500);
        assert_eq!(quote.ecommerce_tax, 1_000);

        let quote = taxes.quote(99).unwrap();
        assert_eq!(quote.govt_tax, 4);
        assert_eq!(quote.ecommerce_tax, 1);

        let quote = taxes.quote(1).unwrap();
        assert_eq!(quote.govt_tax, 0);
        assert_eq!(quote.ecommerce_tax, 0);
    }

    #[test]
    fn test_rates_must_be_fractions() {
        let mut config = Config::default();
        config.taxes.govt_tax_rate = Decimal::ONE;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        config.taxes.govt_tax_rate = Decimal::new(-1, 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("X", " 0.10 ").unwrap(), Decimal::new(10, 2));
        assert!(parse_rate("X", "ten percent").is_err());
    }

    #[test]
    fn test_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            [taxes]
            govt_tax_rate = "0.11"

            [moderation]
            penalty_warning_limit = 5

            [notifications]
            transport = "nats"
            "#,
        )
        .unwrap();

        assert_eq!(config.taxes.govt_tax_rate, Decimal::new(11, 2));
        assert_eq!(config.taxes.ecommerce_tax_rate, Decimal::new(2, 2));
        assert_eq!(config.moderation.penalty_warning_limit, 5);
        assert_eq!(config.notifications.transport, Transport::Nats);
        assert_eq!(config.notifications.nats.subject_prefix, "marketplace.notifications");
    }
}
