// Price Oracle
//
// Resolves a reference price for a symbol by walking an ordered chain of sources.
// The first source that answers with a finite, positive number wins. Individual
// source failures are logged and skipped; only an exhausted chain is an error.
// The manual demo offset is added by the caller that owns the persisted value
// (the engine), so every consumer sees the same effective price.

use crate::types::{Price, Symbol, Timestamp};
use parking_lot::RwLock;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// A resolved price. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: Symbol,
    /// Effective price: base + offset.
    pub price: Price,
    pub base_price: Price,
    pub offset: Decimal,
    pub source: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("{source_name} timed out")]
    Timeout { source_name: String },

    #[error("{source_name} request failed: {reason}")]
    Http { source_name: String, reason: String },

    #[error("{source_name} returned an unusable price: {reason}")]
    Malformed { source_name: String, reason: String },

    #[error("{source_name} does not list {symbol}")]
    UnknownSymbol { source_name: String, symbol: String },

    #[error("{source_name} is unhealthy")]
    Unhealthy { source_name: String },

    #[error("no price source answered for {symbol}")]
    Exhausted { symbol: Symbol },

    #[error("offset {offset} makes the price for {symbol} non-positive")]
    NonPositive { symbol: Symbol, offset: Decimal },
}

/// Trait for price sources. Implement this to add a venue to the fallback chain.
pub trait PriceSource: Send + Sync {
    /// Human readable name, reported as the quote's `source`
    fn name(&self) -> &str;

    /// How this venue names the canonical asset, or None if it doesn't list it
    fn venue_symbol(&self, asset: &Symbol) -> Option<String>;

    /// Fetch the last traded or mid price for a venue symbol. Implementations bound their own latency.
    fn fetch_price(&self, venue_symbol: &str) -> Result<Decimal, OracleError>;
}

/// Parses a venue's price field. Rejects non-numeric, NaN, infinite and non-positive values.
pub fn parse_price_str(source_name: &str, raw: &str) -> Result<Decimal, OracleError> {
    let value = Decimal::from_str(raw.trim()).map_err(|e| OracleError::Malformed {
        source_name: source_name.to_string(),
        reason: format!("{raw:?}: {e}"),
    })?;
    ensure_positive(source_name, value)
}

pub fn parse_price_f64(source_name: &str, raw: f64) -> Result<Decimal, OracleError> {
    if !raw.is_finite() {
        return Err(OracleError::Malformed {
            source_name: source_name.to_string(),
            reason: format!("non-finite value {raw}"),
        });
    }
    let value = Decimal::from_f64(raw).ok_or_else(|| OracleError::Malformed {
        source_name: source_name.to_string(),
        reason: format!("unrepresentable value {raw}"),
    })?;
    ensure_positive(source_name, value)
}

fn ensure_positive(source_name: &str, value: Decimal) -> Result<Decimal, OracleError> {
    if value > Decimal::ZERO {
        Ok(value)
    } else {
        Err(OracleError::Malformed {
            source_name: source_name.to_string(),
            reason: format!("non-positive value {value}"),
        })
    }
}

const QUOTE_SUFFIXES: [&str; 4] = ["PERP", "USDT", "USDC", "USD"];

/// Normalizes "btc", "BTC-PERP", "BTCUSDT", "BTC/USD", "XBT" to "BTC".
pub fn canonicalize(raw: &str) -> Symbol {
    let upper = raw.trim().to_ascii_uppercase();
    let mut base: String = upper
        .split(|c: char| c == '-' || c == '/' || c == '_' || c == ':')
        .next()
        .unwrap_or("")
        .to_string();

    if base == upper {
        for suffix in QUOTE_SUFFIXES {
            if let Some(stripped) = base.strip_suffix(suffix) {
                if !stripped.is_empty() {
                    base = stripped.to_string();
                    break;
                }
            }
        }
    }

    if base == "XBT" {
        base = "BTC".to_string();
    }

    Symbol::new(base)
}

/// Lazily-populated lookups shared by the oracle: raw -> canonical symbol, and
/// (source, asset) -> venue symbol. Owned by the oracle, cleared with `invalidate`.
#[derive(Debug, Default)]
pub struct SymbolCache {
    canonical: RwLock<HashMap<String, Symbol>>,
    venue: RwLock<HashMap<(usize, Symbol), Option<String>>>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canonical(&self, raw: &str) -> Symbol {
        if let Some(hit) = self.canonical.read().get(raw) {
            return hit.clone();
        }
        let symbol = canonicalize(raw);
        self.canonical.write().insert(raw.to_string(), symbol.clone());
        symbol
    }

    pub fn venue_symbol(&self, index: usize, source: &dyn PriceSource, asset: &Symbol) -> Option<String> {
        let key = (index, asset.clone());
        if let Some(hit) = self.venue.read().get(&key) {
            return hit.clone();
        }
        let resolved = source.venue_symbol(asset);
        self.venue.write().insert(key, resolved.clone());
        resolved
    }

    pub fn len(&self) -> usize {
        self.canonical.read().len() + self.venue.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self) {
        self.canonical.write().clear();
        self.venue.write().clear();
    }
}

/// Walks the source chain in priority order.
pub struct PriceOracle {
    sources: Vec<Box<dyn PriceSource>>,
    cache: SymbolCache,
}

impl PriceOracle {
    pub fn new(sources: Vec<Box<dyn PriceSource>>) -> Self {
        Self {
            sources,
            cache: SymbolCache::new(),
        }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn cache(&self) -> &SymbolCache {
        &self.cache
    }

    pub fn canonical(&self, raw: &str) -> Symbol {
        self.cache.canonical(raw)
    }

    /// Base price from the first healthy source. No offset applied.
    pub fn resolve(&self, symbol: &Symbol) -> Result<(Price, &str), OracleError> {
        let asset = self.cache.canonical(symbol.as_str());

        for (index, source) in self.sources.iter().enumerate() {
            let Some(venue_symbol) = self.cache.venue_symbol(index, source.as_ref(), &asset) else {
                tracing::debug!(source = source.name(), symbol = %asset, "source does not list symbol");
                continue;
            };

            match source.fetch_price(&venue_symbol) {
                Ok(value) => match Price::new(value) {
                    Some(price) => return Ok((price, source.name())),
                    None => tracing::warn!(source = source.name(), symbol = %asset, %value, "discarding non-positive price"),
                },
                Err(err) => {
                    tracing::warn!(source = source.name(), symbol = %asset, error = %err, "price source failed, trying next");
                }
            }
        }

        tracing::error!(symbol = %asset, sources = self.sources.len(), "all price sources exhausted");
        Err(OracleError::Exhausted { symbol: asset })
    }

    /// Full quote: resolve the base price and shift it by `offset`.
    pub fn quote(&self, symbol: &Symbol, offset: Decimal, now: Timestamp) -> Result<PriceQuote, OracleError> {
        let (base_price, source) = self.resolve(symbol)?;
        let asset = self.cache.canonical(symbol.as_str());
        let price = Price::new(base_price.value() + offset).ok_or_else(|| OracleError::NonPositive {
            symbol: asset.clone(),
            offset,
        })?;

        Ok(PriceQuote {
            symbol: asset,
            price,
            base_price,
            offset,
            source: source.to_string(),
            timestamp: now,
        })
    }
}

impl std::fmt::Debug for PriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceOracle")
            .field("sources", &self.source_names())
            .field("cache_entries", &self.cache.len())
            .finish()
    }
}

/// In-process source with settable prices. Used by the simulator and tests.
#[derive(Debug)]
pub struct StaticPriceSource {
    name: String,
    prices: RwLock<HashMap<Symbol, Decimal>>,
    healthy: AtomicBool,
}

impl StaticPriceSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prices: RwLock::new(HashMap::new()),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().insert(canonicalize(symbol), price);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl PriceSource for StaticPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn venue_symbol(&self, asset: &Symbol) -> Option<String> {
        Some(asset.as_str().to_string())
    }

    fn fetch_price(&self, venue_symbol: &str) -> Result<Decimal, OracleError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(OracleError::Unhealthy {
                source_name: self.name.clone(),
            });
        }
        let value = self
            .prices
            .read()
            .get(&Symbol::new(venue_symbol))
            .copied()
            .ok_or_else(|| OracleError::UnknownSymbol {
                source_name: self.name.clone(),
                symbol: venue_symbol.to_string(),
            })?;
        ensure_positive(&self.name, value)
    }
}

// lets tests keep a handle on a source after handing it to the oracle
impl<T: PriceSource + ?Sized> PriceSource for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn venue_symbol(&self, asset: &Symbol) -> Option<String> {
        (**self).venue_symbol(asset)
    }

    fn fetch_price(&self, venue_symbol: &str) -> Result<Decimal, OracleError> {
        (**self).fetch_price(venue_symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn btc() -> Symbol {
        Symbol::new("BTC")
    }

    #[test]
    fn canonicalize_variants() {
        for raw in ["btc", "BTC-PERP", "BTCUSDT", "BTC/USD", "xbt", "BTC-USD"] {
            assert_eq!(canonicalize(raw), btc(), "{raw}");
        }
        assert_eq!(canonicalize("ETHUSDC"), Symbol::new("ETH"));
        assert_eq!(canonicalize("USD"), Symbol::new("USD"));
    }

    #[test]
    fn first_healthy_source_wins() {
        let primary = Arc::new(StaticPriceSource::new("primary").with_price("BTC", dec!(50000)));
        let secondary = Arc::new(StaticPriceSource::new("secondary").with_price("BTC", dec!(50100)));
        let oracle = PriceOracle::new(vec![Box::new(primary.clone()), Box::new(secondary.clone())]);

        let (price, source) = oracle.resolve(&btc()).unwrap();
        assert_eq!(price.value(), dec!(50000));
        assert_eq!(source, "primary");

        primary.set_healthy(false);
        let (price, source) = oracle.resolve(&btc()).unwrap();
        assert_eq!(price.value(), dec!(50100));
        assert_eq!(source, "secondary");
    }

    #[test]
    fn exhausted_chain_is_an_error() {
        let only = Arc::new(StaticPriceSource::new("only").with_price("BTC", dec!(50000)));
        only.set_healthy(false);
        let oracle = PriceOracle::new(vec![Box::new(only)]);

        assert!(matches!(oracle.resolve(&btc()), Err(OracleError::Exhausted { .. })));
    }

    #[test]
    fn unlisted_symbol_falls_through() {
        let a = StaticPriceSource::new("a").with_price("ETH", dec!(3000));
        let b = StaticPriceSource::new("b").with_price("BTC", dec!(50000));
        let oracle = PriceOracle::new(vec![Box::new(a), Box::new(b)]);

        let (_, source) = oracle.resolve(&btc()).unwrap();
        assert_eq!(source, "b");
    }

    #[test]
    fn offset_is_applied_to_quote() {
        let oracle = PriceOracle::new(vec![Box::new(
            StaticPriceSource::new("a").with_price("BTC", dec!(50000)),
        )]);

        let quote = oracle.quote(&Symbol::new("BTC-PERP"), dec!(-1500), Timestamp::from_millis(7)).unwrap();
        assert_eq!(quote.price.value(), dec!(48500));
        assert_eq!(quote.base_price.value(), dec!(50000));
        assert_eq!(quote.symbol, btc());

        let err = oracle.quote(&btc(), dec!(-60000), Timestamp::from_millis(7));
        assert!(matches!(err, Err(OracleError::NonPositive { .. })));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_price_str("x", "abc").is_err());
        assert!(parse_price_str("x", "-1").is_err());
        assert!(parse_price_f64("x", f64::NAN).is_err());
        assert!(parse_price_f64("x", f64::INFINITY).is_err());
        assert_eq!(parse_price_str("x", " 67000.5 ").unwrap(), dec!(67000.5));
    }

    #[test]
    fn cache_is_lazy_and_invalidates() {
        let oracle = PriceOracle::new(vec![Box::new(
            StaticPriceSource::new("a").with_price("BTC", dec!(1)),
        )]);
        assert!(oracle.cache().is_empty());

        oracle.resolve(&btc()).unwrap();
        assert!(!oracle.cache().is_empty());

        oracle.cache().invalidate();
        assert!(oracle.cache().is_empty());
    }
}
