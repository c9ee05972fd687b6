//! Minute bar aggregation
//!
//! Folds ticks into per-minute OHLCV bars per instrument. The current
//! minute's bar is updated in place; the first tick of a later minute
//! opens a new bar, which freezes the previous one. Each instrument keeps
//! at most `max_bars` bars, evicting the oldest first.
//!
//! Bucket boundaries are aligned to epoch minutes. Minute keys are
//! rendered as `HH:MM` in the session's local time. Every fold also
//! refreshes the bar's change rate against the instrument's opening price.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use types::errors::TickError;
use types::ids::InstrumentCode;
use types::numeric::{change_rate_pct, trading_value, Price, Volume};

use crate::opening::OpeningPriceRegistry;

/// Align a timestamp to the start of its minute (floor).
pub fn align_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let secs = timestamp.timestamp();
    let aligned = secs - secs.rem_euclid(60);
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(timestamp)
}

/// A single one-minute OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteBar {
    /// `HH:MM` in session-local time.
    pub minute_key: String,
    /// Start of the minute this bar covers.
    pub opened_at: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Cumulative volume of every tick folded into this bar.
    pub volume: Volume,
    /// Change of `close` against the opening price; unset until one exists.
    pub change_rate_pct: Option<Decimal>,
    pub tick_count: u64,
}

impl MinuteBar {
    /// Create a new bar from the first tick in this minute.
    fn new(price: Decimal, volume: Volume, opened_at: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            minute_key: opened_at.with_timezone(&offset).format("%H:%M").to_string(),
            opened_at,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            change_rate_pct: None,
            tick_count: 1,
        }
    }

    /// Update the bar with a new tick.
    fn update(&mut self, price: Decimal, volume: Volume) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume = self.volume.saturating_add(volume);
        self.tick_count += 1;
    }

    /// Trading value attributed to this bar (close × volume). `None` on
    /// overflow.
    pub fn trading_value(&self) -> Option<Decimal> {
        trading_value(self.close, self.volume)
    }

    /// Validate bar integrity (OHLC invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.low > Decimal::ZERO
    }
}

/// Bounded bar history for a single instrument.
#[derive(Debug)]
pub struct BarSeries {
    bars: VecDeque<MinuteBar>,
    max_bars: usize,
}

impl BarSeries {
    pub fn new(max_bars: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(max_bars.min(512)),
            max_bars,
        }
    }

    /// Fold a tick. Returns `true` if it opened a new bar.
    fn fold(
        &mut self,
        price: Decimal,
        volume: Volume,
        now: DateTime<Utc>,
        offset: FixedOffset,
        opening: Option<Decimal>,
    ) -> bool {
        let bucket = align_to_minute(now);

        let opened = match self.bars.back_mut() {
            Some(current) if bucket <= current.opened_at => {
                current.update(price, volume);
                false
            }
            _ => {
                self.bars.push_back(MinuteBar::new(price, volume, bucket, offset));
                while self.bars.len() > self.max_bars {
                    self.bars.pop_front();
                }
                true
            }
        };

        if let (Some(current), Some(open_price)) = (self.bars.back_mut(), opening) {
            current.change_rate_pct = change_rate_pct(price, open_price);
        }

        opened
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bars in chronological order (oldest first).
    pub fn snapshot(&self) -> Vec<MinuteBar> {
        self.bars.iter().cloned().collect()
    }

    /// Sum of bar trading values for bars opened at or after `since`.
    ///
    /// `None` when no bar is in the window or the sum overflows.
    fn trading_value_since(&self, since: DateTime<Utc>) -> Option<Decimal> {
        let mut window = self
            .bars
            .iter()
            .rev()
            .take_while(|b| b.opened_at >= since)
            .peekable();
        window.peek()?;
        window.try_fold(Decimal::ZERO, |acc, bar| acc.checked_add(bar.trading_value()?))
    }
}

/// Per-instrument minute bar aggregation.
///
/// Each instrument's series sits behind its own lock so folds for
/// unrelated instruments never contend.
pub struct BarAggregator {
    series: DashMap<InstrumentCode, Arc<Mutex<BarSeries>>>,
    opening: Arc<OpeningPriceRegistry>,
    max_bars: usize,
    offset: FixedOffset,
}

impl BarAggregator {
    pub fn new(opening: Arc<OpeningPriceRegistry>, max_bars: usize, offset: FixedOffset) -> Self {
        Self {
            series: DashMap::new(),
            opening,
            max_bars,
            offset,
        }
    }

    /// Fold a tick into the instrument's current minute bar.
    ///
    /// Rejects non-positive prices without touching any state.
    pub fn fold(
        &self,
        instrument: &InstrumentCode,
        price: Decimal,
        volume: Volume,
        now: DateTime<Utc>,
    ) -> Result<(), TickError> {
        let price = Price::try_new(price).ok_or_else(|| {
            warn!(instrument = %instrument, price = %price, "Rejecting bar fold with non-positive price");
            TickError::NonPositivePrice(price.to_string())
        })?;

        let series = self.series_for(instrument);
        let opening = self.opening.get(instrument);
        let mut series = series.lock().unwrap_or_else(PoisonError::into_inner);

        if series.fold(price.as_decimal(), volume, now, self.offset, opening) {
            debug!(
                instrument = %instrument,
                bars = series.len(),
                "Opened new minute bar"
            );
        }
        Ok(())
    }

    /// Retained bars for an instrument, oldest first.
    pub fn bars(&self, instrument: &InstrumentCode) -> Vec<MinuteBar> {
        match self.series.get(instrument).map(|s| Arc::clone(s.value())) {
            Some(series) => series
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .snapshot(),
            None => Vec::new(),
        }
    }

    /// Trading value over bars opened at or after `since`.
    ///
    /// `None` when the instrument has no bars in the window.
    pub fn trading_value_since(
        &self,
        instrument: &InstrumentCode,
        since: DateTime<Utc>,
    ) -> Option<Decimal> {
        let series = self.series.get(instrument).map(|s| Arc::clone(s.value()))?;
        let series = series.lock().unwrap_or_else(PoisonError::into_inner);
        series.trading_value_since(since)
    }

    pub fn clear(&self, instrument: &InstrumentCode) {
        self.series.remove(instrument);
    }

    pub fn clear_all(&self) {
        self.series.clear();
    }

    /// Total retained bars across instruments (eventually consistent).
    pub fn total_bars(&self) -> usize {
        let series: Vec<Arc<Mutex<BarSeries>>> =
            self.series.iter().map(|e| Arc::clone(e.value())).collect();
        series
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    fn series_for(&self, instrument: &InstrumentCode) -> Arc<Mutex<BarSeries>> {
        if let Some(existing) = self.series.get(instrument) {
            return Arc::clone(existing.value());
        }
        let max_bars = self.max_bars;
        Arc::clone(
            self.series
                .entry(instrument.clone())
                .or_insert_with(|| Arc::new(Mutex::new(BarSeries::new(max_bars))))
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn t(minute: i64, second: i64) -> DateTime<Utc> {
        // 00:00 UTC == 09:00 KST (market open)
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
            + Duration::minutes(minute)
            + Duration::seconds(second)
    }

    fn code() -> InstrumentCode {
        InstrumentCode::new("005930")
    }

    fn aggregator(max_bars: usize) -> (Arc<OpeningPriceRegistry>, BarAggregator) {
        let opening = Arc::new(OpeningPriceRegistry::new());
        let agg = BarAggregator::new(Arc::clone(&opening), max_bars, kst());
        (opening, agg)
    }

    #[test]
    fn test_align_to_minute() {
        assert_eq!(align_to_minute(t(5, 30)), t(5, 0));
        assert_eq!(align_to_minute(t(5, 0)), t(5, 0));
        assert_eq!(align_to_minute(t(5, 59)), t(5, 0));
    }

    #[test]
    fn test_bar_ohlc_within_minute() {
        let (_, agg) = aggregator(390);
        agg.fold(&code(), Decimal::from(100), Volume::new(1), t(0, 1)).unwrap();
        agg.fold(&code(), Decimal::from(105), Volume::new(2), t(0, 20)).unwrap();
        agg.fold(&code(), Decimal::from(95), Volume::new(3), t(0, 40)).unwrap();

        let bars = agg.bars(&code());
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.minute_key, "09:00");
        assert_eq!(bar.open, Decimal::from(100));
        assert_eq!(bar.high, Decimal::from(105));
        assert_eq!(bar.low, Decimal::from(95));
        assert_eq!(bar.close, Decimal::from(95));
        assert_eq!(bar.volume, Volume::new(6));
        assert_eq!(bar.tick_count, 3);
        assert!(bar.is_valid());
    }

    #[test]
    fn test_new_minute_opens_new_bar() {
        let (_, agg) = aggregator(390);
        agg.fold(&code(), Decimal::from(100), Volume::new(1), t(0, 10)).unwrap();
        agg.fold(&code(), Decimal::from(101), Volume::new(1), t(1, 5)).unwrap();

        let bars = agg.bars(&code());
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].minute_key, "09:00");
        assert_eq!(bars[0].close, Decimal::from(100));
        assert_eq!(bars[1].minute_key, "09:01");
        assert_eq!(bars[1].open, Decimal::from(101));
    }

    #[test]
    fn test_zero_volume_is_valid() {
        let (_, agg) = aggregator(390);
        agg.fold(&code(), Decimal::from(100), Volume::ZERO, t(0, 0)).unwrap();
        assert_eq!(agg.bars(&code())[0].volume, Volume::ZERO);
    }

    #[test]
    fn test_non_positive_price_rejected_without_mutation() {
        let (_, agg) = aggregator(390);
        let err = agg
            .fold(&code(), Decimal::ZERO, Volume::new(1), t(0, 0))
            .unwrap_err();
        assert!(matches!(err, TickError::NonPositivePrice(_)));
        assert!(agg.bars(&code()).is_empty());
        assert_eq!(agg.total_bars(), 0);
    }

    #[test]
    fn test_change_rate_against_opening() {
        let (opening, agg) = aggregator(390);

        agg.fold(&code(), Decimal::from(100), Volume::new(1), t(0, 0)).unwrap();
        assert_eq!(agg.bars(&code())[0].change_rate_pct, None);

        opening.record_if_absent(&code(), Price::from_u64(100));
        agg.fold(&code(), Decimal::from(110), Volume::new(1), t(0, 30)).unwrap();
        assert_eq!(
            agg.bars(&code())[0].change_rate_pct,
            Some(Decimal::from_str_exact("10.00").unwrap())
        );
    }

    #[test]
    fn test_bar_history_limit_evicts_oldest() {
        let (_, agg) = aggregator(3);
        for minute in 0..5 {
            agg.fold(&code(), Decimal::from(100 + minute), Volume::new(1), t(minute, 0))
                .unwrap();
        }

        let bars = agg.bars(&code());
        assert_eq!(bars.len(), 3);
        let keys: Vec<&str> = bars.iter().map(|b| b.minute_key.as_str()).collect();
        assert_eq!(keys, vec!["09:02", "09:03", "09:04"]);
    }

    #[test]
    fn test_late_tick_folds_into_current_bar() {
        let (_, agg) = aggregator(390);
        agg.fold(&code(), Decimal::from(100), Volume::new(1), t(2, 0)).unwrap();
        agg.fold(&code(), Decimal::from(99), Volume::new(1), t(1, 59)).unwrap();

        let bars = agg.bars(&code());
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Decimal::from(99));
    }

    #[test]
    fn test_trading_value_since() {
        let (_, agg) = aggregator(390);
        agg.fold(&code(), Decimal::from(100), Volume::new(10), t(0, 0)).unwrap();
        agg.fold(&code(), Decimal::from(200), Volume::new(5), t(3, 0)).unwrap();
        agg.fold(&code(), Decimal::from(300), Volume::new(5), t(4, 0)).unwrap();

        assert_eq!(
            agg.trading_value_since(&code(), t(3, 0)),
            Some(Decimal::from(200 * 5 + 300 * 5))
        );
        assert_eq!(
            agg.trading_value_since(&code(), t(0, 0)),
            Some(Decimal::from(100 * 10 + 200 * 5 + 300 * 5))
        );
        assert_eq!(agg.trading_value_since(&code(), t(10, 0)), None);
        assert_eq!(
            agg.trading_value_since(&InstrumentCode::new("000660"), t(0, 0)),
            None
        );
    }

    #[test]
    fn test_large_prices_fold_without_overflow() {
        let (opening, agg) = aggregator(390);
        let huge = Decimal::from_str_exact("1000000000000000000000000000").unwrap();
        opening.record_if_absent(&code(), Price::from_u64(1));

        agg.fold(&code(), Decimal::ONE, Volume::new(1), t(0, 0)).unwrap();
        agg.fold(&code(), huge, Volume::new(100), t(0, 10)).unwrap();

        let bar = agg.bars(&code()).pop().unwrap();
        assert_eq!(bar.close, huge);
        assert_eq!(bar.high, huge);
        assert_eq!(bar.change_rate_pct, None);
        assert_eq!(bar.trading_value(), None);
        // An unrepresentable window value counts as no windowed data.
        assert_eq!(agg.trading_value_since(&code(), t(0, 0)), None);
    }

    #[test]
    fn test_clear() {
        let (_, agg) = aggregator(390);
        let other = InstrumentCode::new("000660");
        agg.fold(&code(), Decimal::from(100), Volume::new(1), t(0, 0)).unwrap();
        agg.fold(&other, Decimal::from(100), Volume::new(1), t(0, 0)).unwrap();
        assert_eq!(agg.total_bars(), 2);

        agg.clear(&code());
        assert!(agg.bars(&code()).is_empty());
        assert_eq!(agg.total_bars(), 1);

        agg.clear_all();
        assert_eq!(agg.total_bars(), 0);
    }

    proptest! {
        #[test]
        fn prop_bar_ohlc_invariants(prices in proptest::collection::vec(1u64..1_000_000, 1..50)) {
            let (_, agg) = aggregator(390);
            for (i, p) in prices.iter().enumerate() {
                agg.fold(&code(), Decimal::from(*p), Volume::new(1), t(0, (i % 60) as i64)).unwrap();
            }
            let bars = agg.bars(&code());
            prop_assert_eq!(bars.len(), 1);
            let bar = &bars[0];
            prop_assert!(bar.is_valid());
            prop_assert_eq!(bar.open, Decimal::from(prices[0]));
            prop_assert_eq!(bar.close, Decimal::from(*prices.last().unwrap()));
            prop_assert_eq!(bar.high, Decimal::from(*prices.iter().max().unwrap()));
            prop_assert_eq!(bar.low, Decimal::from(*prices.iter().min().unwrap()));
            prop_assert_eq!(bar.volume, Volume::new(prices.len() as u64));
        }
    }
}
