//! Opening price registry
//!
//! Holds the first observed price per instrument for the current session.
//! It is the baseline for every change-rate figure the engine produces.
//! First observation wins; only an explicit override or a reset replaces it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info};
use types::ids::InstrumentCode;
use types::numeric::Price;

/// Session opening prices keyed by instrument.
#[derive(Debug, Default)]
pub struct OpeningPriceRegistry {
    prices: DashMap<InstrumentCode, Price>,
}

impl OpeningPriceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `price` as the opening price unless one is already set.
    ///
    /// Returns `true` if this call established the baseline.
    pub fn record_if_absent(&self, instrument: &InstrumentCode, price: Price) -> bool {
        match self.prices.entry(instrument.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(price);
                debug!(instrument = %instrument, price = %price, "Opening price recorded");
                true
            }
        }
    }

    /// Overwrite the opening price, e.g. with an official open print.
    pub fn set(&self, instrument: &InstrumentCode, price: Price) {
        self.prices.insert(instrument.clone(), price);
        info!(instrument = %instrument, price = %price, "Opening price overridden");
    }

    pub fn get(&self, instrument: &InstrumentCode) -> Option<Decimal> {
        self.prices.get(instrument).map(|p| p.as_decimal())
    }

    /// Forget one instrument's baseline; its next tick re-establishes it.
    pub fn reset(&self, instrument: &InstrumentCode) {
        self.prices.remove(instrument);
    }

    /// Forget every baseline (session start).
    pub fn reset_all(&self) {
        self.prices.clear();
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
