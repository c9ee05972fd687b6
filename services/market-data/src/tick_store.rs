//! Tick store for live price updates
//!
//! Keeps a bounded, append-only history of recent ticks per instrument
//! (FIFO eviction at `max_ticks`) and drives the bar aggregator and the
//! opening price registry from the same ingestion call.
//!
//! Each instrument has its own slot lock. The slot lock is held while the
//! tick is folded into the bar aggregator, so bars see ticks in exactly the
//! order `add_tick` was called for that instrument. Lock order is always
//! tick slot → bar series.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::errors::TickError;
use types::ids::InstrumentCode;
use types::numeric::{Price, Volume};

use crate::bars::BarAggregator;
use crate::clock::Clock;
use crate::metrics::EngineMetrics;
use crate::opening::OpeningPriceRegistry;

/// A single observed print. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Session-local wall-clock time of the print (second precision).
    pub occurred_at: NaiveTime,
    pub price: Decimal,
    pub volume: Volume,
    /// When the engine ingested the tick.
    pub ingested_at: DateTime<Utc>,
}

/// Bounded tick history for one instrument (ring buffer).
#[derive(Debug)]
struct TickSlot {
    ticks: VecDeque<TickRecord>,
    max_ticks: usize,
}

impl TickSlot {
    fn new(max_ticks: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(max_ticks.min(1024)),
            max_ticks,
        }
    }

    fn push(&mut self, tick: TickRecord) {
        self.ticks.push_back(tick);
        while self.ticks.len() > self.max_ticks {
            self.ticks.pop_front();
        }
    }

    fn recent(&self, count: usize) -> Vec<TickRecord> {
        let skip = self.ticks.len().saturating_sub(count);
        self.ticks.iter().skip(skip).cloned().collect()
    }
}

/// Diagnostic counts. Eventually consistent under concurrent writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub tracked_instruments: usize,
    pub total_ticks: usize,
    pub total_bars: usize,
}

/// Thread-safe per-instrument tick history.
pub struct TickStore {
    slots: DashMap<InstrumentCode, Arc<Mutex<TickSlot>>>,
    bars: Arc<BarAggregator>,
    opening: Arc<OpeningPriceRegistry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    max_ticks: usize,
    offset: FixedOffset,
}

impl TickStore {
    pub fn new(
        bars: Arc<BarAggregator>,
        opening: Arc<OpeningPriceRegistry>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        max_ticks: usize,
        offset: FixedOffset,
    ) -> Self {
        info!(max_ticks, offset = %offset, "TickStore initialized");
        Self {
            slots: DashMap::new(),
            bars,
            opening,
            clock,
            metrics,
            max_ticks,
            offset,
        }
    }

    /// Ingest a tick stamped with the current wall-clock time.
    ///
    /// Records the opening price if none exists yet and folds the tick into
    /// the instrument's current minute bar. A non-positive price is rejected
    /// before any state is touched.
    pub fn add_tick(
        &self,
        instrument: &InstrumentCode,
        price: Decimal,
        volume: Volume,
    ) -> Result<(), TickError> {
        let started = Instant::now();

        let Some(price) = Price::try_new(price) else {
            self.metrics.record_tick_rejected();
            warn!(instrument = %instrument, price = %price, "Rejecting tick with non-positive price");
            return Err(TickError::NonPositivePrice(price.to_string()));
        };

        let now = self.clock.now();
        let tick = TickRecord {
            occurred_at: session_clock_time(now, self.offset),
            price: price.as_decimal(),
            volume,
            ingested_at: now,
        };

        let slot = self.slot_for(instrument);
        {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.opening.record_if_absent(instrument, price);
            self.bars.fold(instrument, price.as_decimal(), volume, now)?;
            slot.push(tick);
        }

        self.metrics
            .record_tick_ingested(started.elapsed().as_nanos() as u64);
        Ok(())
    }

    /// Ingest a tick from untyped input (signed volume, raw code).
    pub fn add_tick_raw(
        &self,
        instrument: &str,
        price: Decimal,
        volume: i64,
    ) -> Result<(), TickError> {
        let Some(code) = InstrumentCode::try_new(instrument) else {
            self.metrics.record_tick_rejected();
            warn!("Rejecting tick with empty instrument code");
            return Err(TickError::EmptyInstrument);
        };
        let Some(volume) = Volume::try_from_signed(volume) else {
            self.metrics.record_tick_rejected();
            warn!(instrument = %code, volume, "Rejecting tick with negative volume");
            return Err(TickError::NegativeVolume(volume));
        };
        self.add_tick(&code, price, volume)
    }

    /// Up to `count` most recent ticks, oldest first.
    ///
    /// The result is a copy; it stays valid while writers keep appending.
    pub fn recent_ticks(&self, instrument: &InstrumentCode, count: usize) -> Vec<TickRecord> {
        match self.slots.get(instrument).map(|s| Arc::clone(s.value())) {
            Some(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recent(count),
            None => Vec::new(),
        }
    }

    /// Drop one instrument's ticks, bars and opening price.
    pub fn clear(&self, instrument: &InstrumentCode) {
        self.slots.remove(instrument);
        self.bars.clear(instrument);
        self.opening.reset(instrument);
        info!(instrument = %instrument, "Cleared instrument market data");
    }

    /// Drop every instrument's ticks, bars and opening prices (session start).
    pub fn clear_all(&self) {
        self.slots.clear();
        self.bars.clear_all();
        self.opening.reset_all();
        info!("Cleared all real-time market data");
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let slots: Vec<Arc<Mutex<TickSlot>>> =
            self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let total_ticks = slots
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).ticks.len())
            .sum();

        Diagnostics {
            tracked_instruments: slots.len(),
            total_ticks,
            total_bars: self.bars.total_bars(),
        }
    }

    fn slot_for(&self, instrument: &InstrumentCode) -> Arc<Mutex<TickSlot>> {
        if let Some(existing) = self.slots.get(instrument) {
            return Arc::clone(existing.value());
        }
        let max_ticks = self.max_ticks;
        Arc::clone(
            self.slots
                .entry(instrument.clone())
                .or_insert_with(|| Arc::new(Mutex::new(TickSlot::new(max_ticks))))
                .value(),
        )
    }
}

fn session_clock_time(now: DateTime<Utc>, offset: FixedOffset) -> NaiveTime {
    let local = now.with_timezone(&offset).time();
    local.with_nanosecond(0).unwrap_or(local)
}
