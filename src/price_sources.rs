//! Network price sources for the oracle chain.
//!
//! Each source is a thin `reqwest::blocking` client with its own request
//! timeout. Parsing is strict: a response is only a price if the field is
//! present, numeric, finite and positive.

use crate::config::{OracleConfig, SourceKind};
use crate::price_feed::{parse_price_f64, parse_price_str, OracleError, PriceSource};
use crate::types::Symbol;
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

fn http_client(source_name: &str, timeout: Duration) -> Result<Client, OracleError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("prop-eval-core/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| OracleError::Http {
            source_name: source_name.to_string(),
            reason: format!("failed to build client: {e}"),
        })
}

fn get_json<T: DeserializeOwned>(client: &Client, source_name: &str, url: &str) -> Result<T, OracleError> {
    let response = client.get(url).send().map_err(|e| classify(source_name, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(OracleError::Http {
            source_name: source_name.to_string(),
            reason: format!("status {status}"),
        });
    }

    response.json::<T>().map_err(|e| {
        if e.is_timeout() {
            classify(source_name, e)
        } else {
            OracleError::Malformed {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            }
        }
    })
}

fn classify(source_name: &str, err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout {
            source_name: source_name.to_string(),
        }
    } else {
        OracleError::Http {
            source_name: source_name.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Primary: Binance spot ticker. `GET /api/v3/ticker/price?symbol=BTCUSDT`
pub struct BinanceTicker {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BinanceTickerResponse {
    price: String,
}

impl BinanceTicker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        Ok(Self {
            client: http_client("binance", timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PriceSource for BinanceTicker {
    fn name(&self) -> &str {
        "binance"
    }

    fn venue_symbol(&self, asset: &Symbol) -> Option<String> {
        Some(format!("{}USDT", asset.as_str()))
    }

    fn fetch_price(&self, venue_symbol: &str) -> Result<Decimal, OracleError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, venue_symbol);
        let body: BinanceTickerResponse = get_json(&self.client, self.name(), &url)?;
        parse_price_str(self.name(), &body.price)
    }
}

/// Secondary: Coinbase spot. `GET /v2/prices/BTC-USD/spot`
pub struct CoinbaseSpot {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CoinbaseSpotResponse {
    data: CoinbaseSpotData,
}

#[derive(Debug, Deserialize)]
struct CoinbaseSpotData {
    amount: String,
}

impl CoinbaseSpot {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        Ok(Self {
            client: http_client("coinbase", timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PriceSource for CoinbaseSpot {
    fn name(&self) -> &str {
        "coinbase"
    }

    fn venue_symbol(&self, asset: &Symbol) -> Option<String> {
        Some(format!("{}-USD", asset.as_str()))
    }

    fn fetch_price(&self, venue_symbol: &str) -> Result<Decimal, OracleError> {
        let url = format!("{}/v2/prices/{}/spot", self.base_url, venue_symbol);
        let body: CoinbaseSpotResponse = get_json(&self.client, self.name(), &url)?;
        parse_price_str(self.name(), &body.data.amount)
    }
}

/// Tertiary aggregator: CoinGecko simple price. `GET /api/v3/simple/price?ids=bitcoin&vs_currencies=usd`
pub struct CoinGeckoSimple {
    client: Client,
    base_url: String,
}

impl CoinGeckoSimple {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        Ok(Self {
            client: http_client("coingecko", timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

// coingecko keys by coin id, not ticker
fn coingecko_id(asset: &str) -> Option<&'static str> {
    match asset {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        _ => None,
    }
}

impl PriceSource for CoinGeckoSimple {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn venue_symbol(&self, asset: &Symbol) -> Option<String> {
        coingecko_id(asset.as_str()).map(str::to_string)
    }

    fn fetch_price(&self, venue_symbol: &str) -> Result<Decimal, OracleError> {
        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies=usd",
            self.base_url, venue_symbol
        );
        let body: HashMap<String, HashMap<String, f64>> = get_json(&self.client, self.name(), &url)?;
        let usd = body
            .get(venue_symbol)
            .and_then(|quotes| quotes.get("usd"))
            .copied()
            .ok_or_else(|| OracleError::UnknownSymbol {
                source_name: self.name().to_string(),
                symbol: venue_symbol.to_string(),
            })?;
        parse_price_f64(self.name(), usd)
    }
}

/// Builds the configured chain in priority order.
pub fn build_sources(config: &OracleConfig) -> Result<Vec<Box<dyn PriceSource>>, OracleError> {
    let timeout = Duration::from_millis(config.source_timeout_ms);
    let mut sources: Vec<Box<dyn PriceSource>> = Vec::with_capacity(config.sources.len());

    for kind in &config.sources {
        let source: Box<dyn PriceSource> = match kind {
            SourceKind::Binance => Box::new(BinanceTicker::new(&config.binance_url, timeout)?),
            SourceKind::Coinbase => Box::new(CoinbaseSpot::new(&config.coinbase_url, timeout)?),
            SourceKind::CoinGecko => Box::new(CoinGeckoSimple::new(&config.coingecko_url, timeout)?),
        };
        sources.push(source);
    }

    tracing::debug!(
        sources = ?config.sources,
        timeout_ms = config.source_timeout_ms,
        "built price source chain"
    );
    Ok(sources)
}
