// 7.0 config.rs: all platform settings in one place. fees, risk limits, oracle, funded constants.
// 7.1 everything here is injected. nothing in the engine hardcodes a business constant.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/** 7.2: ledger settings. fee rate is a fraction of notional (0.00035 = 3.5 bps) */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    // Fee charged on every simulated fill, as a fraction of notional
    pub taker_fee_rate: Decimal,
    // Remaining size at or below this is treated as flat and the position is deleted
    pub dust_size: Decimal,
    // Cap on the notional of one order and of a position after an add. keeps fill math far from Decimal's range
    pub max_notional: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            taker_fee_rate: dec!(0.00035),
            dust_size: dec!(0.00000001),
            max_notional: Decimal::from(1_000_000_000_000i64),
        }
    }
}

// Per-position watchdog limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    // Force close when unrealized_pnl / margin_used drops below this (-0.05 = -5%)
    pub auto_close_ratio: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            auto_close_ratio: dec!(-0.05),
        }
    }
}

// Price source chain. order of `sources` is the fallback priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub sources: Vec<SourceKind>,
    // Bound on each source call so one dead venue can't stall an evaluation pass
    pub source_timeout_ms: u64,
    pub binance_url: String,
    pub coinbase_url: String,
    pub coingecko_url: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            sources: vec![SourceKind::Binance, SourceKind::Coinbase, SourceKind::CoinGecko],
            source_timeout_ms: 2_000,
            binance_url: "https://api.binance.com".to_string(),
            coinbase_url: "https://api.coinbase.com".to_string(),
            coingecko_url: "https://api.coingecko.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Binance,
    Coinbase,
    CoinGecko,
}

/** 7.3: funded account provisioning constants. product decisions, not derived values */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundedAccountConfig {
    // Leverage the trader sees on the funded account
    pub user_leverage: Decimal,
    // Platform-side effective leverage; margin requirement = notional / effective
    pub effective_leverage: Decimal,
    // Maintenance margin as a fraction of the margin requirement
    pub maintenance_margin_fraction: Decimal,
}

impl Default for FundedAccountConfig {
    fn default() -> Self {
        Self {
            user_leverage: dec!(20),
            effective_leverage: dec!(419),
            maintenance_margin_fraction: dec!(0.5),
        }
    }
}

// Defaults applied when the purchase flow opens an evaluation account without overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationDefaults {
    pub leverage: Decimal,
    pub num_checkpoints: u32,
    pub checkpoint_interval_hours: u64,
    pub profit_target_percent: Decimal,
    // Max drawdown as a percent of account size, converted to an absolute amount at open
    pub max_drawdown_percent: Decimal,
    // Reserved. stored on the account, never enforced
    pub daily_loss_percent: Decimal,
}

impl Default for EvaluationDefaults {
    fn default() -> Self {
        Self {
            leverage: dec!(20),
            num_checkpoints: 3,
            checkpoint_interval_hours: 24 * 7,
            profit_target_percent: dec!(8),
            max_drawdown_percent: dec!(10),
            daily_loss_percent: dec!(5),
        }
    }
}

// The complete platform configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub ledger: LedgerConfig,
    pub risk: RiskConfig,
    pub oracle: OracleConfig,
    pub funded: FundedAccountConfig,
    pub evaluation: EvaluationDefaults,
}

impl PlatformConfig {
    // Demo deployments run on a short cadence so checkpoints can be watched end to end
    pub fn demo() -> Self {
        let mut config = Self::default();
        config.evaluation.checkpoint_interval_hours = 1;
        config.evaluation.num_checkpoints = 2;
        config.oracle.source_timeout_ms = 1_000;
        config
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `PROP_*` environment variables onto this config.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(rate) = env_decimal("PROP_TAKER_FEE_RATE")? {
            self.ledger.taker_fee_rate = rate;
        }
        if let Some(ratio) = env_decimal("PROP_AUTO_CLOSE_RATIO")? {
            self.risk.auto_close_ratio = ratio;
        }
        if let Some(lev) = env_decimal("PROP_FUNDED_USER_LEVERAGE")? {
            self.funded.user_leverage = lev;
        }
        if let Some(lev) = env_decimal("PROP_FUNDED_EFFECTIVE_LEVERAGE")? {
            self.funded.effective_leverage = lev;
        }
        if let Ok(raw) = std::env::var("PROP_SOURCE_TIMEOUT_MS") {
            self.oracle.source_timeout_ms = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PROP_SOURCE_TIMEOUT_MS".to_string(),
                value: raw,
            })?;
        }
        self.validate()
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.taker_fee_rate < Decimal::ZERO || self.ledger.taker_fee_rate >= dec!(0.01) {
            return Err(ConfigError::InvalidFees {
                reason: "taker fee rate must be in [0, 1%)".to_string(),
            });
        }

        if self.ledger.dust_size < Decimal::ZERO {
            return Err(ConfigError::InvalidFees {
                reason: "dust size cannot be negative".to_string(),
            });
        }

        if self.ledger.max_notional <= Decimal::ZERO {
            return Err(ConfigError::InvalidFees {
                reason: "max notional must be positive".to_string(),
            });
        }

        if self.risk.auto_close_ratio >= Decimal::ZERO {
            return Err(ConfigError::InvalidRisk {
                reason: "auto close ratio must be negative".to_string(),
            });
        }

        if self.oracle.sources.is_empty() {
            return Err(ConfigError::InvalidOracle {
                reason: "need at least 1 price source".to_string(),
            });
        }

        if self.oracle.source_timeout_ms == 0 {
            return Err(ConfigError::InvalidOracle {
                reason: "source timeout must be positive".to_string(),
            });
        }

        if self.funded.user_leverage < Decimal::ONE || self.funded.effective_leverage < Decimal::ONE {
            return Err(ConfigError::InvalidFunded {
                reason: "funded leverage must be >= 1x".to_string(),
            });
        }

        if self.funded.maintenance_margin_fraction <= Decimal::ZERO
            || self.funded.maintenance_margin_fraction >= Decimal::ONE
        {
            return Err(ConfigError::InvalidFunded {
                reason: "maintenance fraction must be between 0 and 1".to_string(),
            });
        }

        let eval = &self.evaluation;
        if eval.num_checkpoints == 0 || eval.checkpoint_interval_hours == 0 {
            return Err(ConfigError::InvalidEvaluation {
                reason: "need at least one checkpoint with a positive interval".to_string(),
            });
        }

        if eval.leverage < Decimal::ONE {
            return Err(ConfigError::InvalidEvaluation {
                reason: "leverage must be >= 1x".to_string(),
            });
        }

        if eval.max_drawdown_percent <= Decimal::ZERO || eval.max_drawdown_percent >= dec!(100) {
            return Err(ConfigError::InvalidEvaluation {
                reason: "max drawdown must be between 0 and 100 percent".to_string(),
            });
        }

        Ok(())
    }
}

fn env_decimal(key: &str) -> Result<Option<Decimal>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid fees: {reason}")]
    InvalidFees { reason: String },
    #[error("Invalid risk limits: {reason}")]
    InvalidRisk { reason: String },
    #[error("Invalid oracle settings: {reason}")]
    InvalidOracle { reason: String },
    #[error("Invalid funded account constants: {reason}")]
    InvalidFunded { reason: String },
    #[error("Invalid evaluation defaults: {reason}")]
    InvalidEvaluation { reason: String },
    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
    #[error("Cannot read {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("Cannot parse config: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Demo,
    Production,
}

impl Environment {
    pub fn config(&self) -> PlatformConfig {
        match self {
            Environment::Development | Environment::Production => PlatformConfig::default(),
            Environment::Demo => PlatformConfig::demo(),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "demo" => Ok(Environment::Demo),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidEnv {
                key: "PROP_ENV".to_string(),
                value: s.to_string(),
            }),
        }
    }
}
