//! Upstream price lookup seam
//!
//! The engine never talks to a broker API directly. Sector aggregation asks
//! a `PriceLookupProvider` for each instrument's current quote and treats any
//! failure as "no data this round".

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::LookupError;
use types::ids::InstrumentCode;
use types::numeric::{trading_value, Volume};

/// One instrument's current quote as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub current_price: Decimal,
    /// Cumulative session volume.
    pub volume: Volume,
    pub change_rate_pct: Decimal,
    /// May be empty; callers fall back to the sector catalog's name map.
    pub instrument_name: String,
    /// Cumulative session trading value, when the upstream reports one.
    pub accumulated_trading_value: Option<Decimal>,
}

impl PriceQuote {
    /// Session trading value: the reported cumulative figure when positive,
    /// otherwise `current_price × volume`. `None` when the product overflows.
    pub fn trading_value(&self) -> Option<Decimal> {
        match self.accumulated_trading_value {
            Some(v) if v > Decimal::ZERO => Some(v),
            _ => trading_value(self.current_price, self.volume),
        }
    }

    /// Reject quotes the engine cannot aggregate.
    pub fn validate(self) -> Result<Self, LookupError> {
        if self.trading_value().is_none() {
            return Err(LookupError::Malformed(format!(
                "trading value overflows: price {} × volume {}",
                self.current_price, self.volume
            )));
        }
        Ok(self)
    }
}

/// External collaborator resolving current prices.
///
/// Implementations may be slow or unavailable; the fetch executor bounds
/// each call with a timeout and absorbs every error.
#[async_trait]
pub trait PriceLookupProvider: Send + Sync {
    async fn fetch_current_price(&self, instrument: &InstrumentCode)
        -> Result<PriceQuote, LookupError>;
}

/// Per-instrument row of a sector snapshot. Transient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTradingInfo {
    pub instrument_code: InstrumentCode,
    pub instrument_name: String,
    pub current_price: Decimal,
    pub change_rate_pct: Decimal,
    pub trading_value: Decimal,
}

impl StockTradingInfo {
    /// Build a row from a quote, using `fallback_name` when the quote
    /// carries no name. `None` when the quote's trading value overflows.
    pub fn from_quote(
        instrument: InstrumentCode,
        quote: &PriceQuote,
        fallback_name: impl FnOnce() -> String,
    ) -> Option<Self> {
        let trading_value = quote.trading_value()?;
        let instrument_name = match quote.instrument_name.trim() {
            "" => fallback_name(),
            name => name.to_string(),
        };
        Some(Self {
            instrument_code: instrument,
            instrument_name,
            current_price: quote.current_price,
            change_rate_pct: quote.change_rate_pct,
            trading_value,
        })
    }
}
