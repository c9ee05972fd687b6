//! Sector aggregation cache
//!
//! Builds ranked, percentage-weighted sector snapshots from upstream price
//! lookups and serves them until they age past the TTL. One snapshot set is
//! cached per [`TradingPeriod`].
//!
//! Per period the cache moves through `EMPTY → COMPUTING → FRESH → STALE →
//! COMPUTING → …`. Recomputes are single-flight: callers that miss while a
//! rebuild is running wait for it and share its result. `clear_cache` bumps a
//! generation counter so a rebuild that started before the clear still
//! answers its own callers but is never stored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use types::ids::{InstrumentCode, SectorCode};
use types::numeric::{checked_sum, percentage_of};

use crate::bars::BarAggregator;
use crate::clock::Clock;
use crate::fetch::ParallelFetchExecutor;
use crate::metrics::EngineMetrics;
use crate::provider::{PriceQuote, StockTradingInfo};
use crate::sectors::{SectorConfigProvider, SectorDefinition};

/// Instruments listed per sector snapshot.
pub const TOP_INSTRUMENTS: usize = 5;

/// Window over which trading value is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingPeriod {
    /// Cumulative session value.
    Today,
    #[serde(rename = "MIN_5")]
    Min5,
    #[serde(rename = "MIN_30")]
    Min30,
}

impl TradingPeriod {
    pub const ALL: [TradingPeriod; 3] = [TradingPeriod::Today, TradingPeriod::Min5, TradingPeriod::Min30];

    /// Lenient parse for request parameters. Unknown input means `Today`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MIN_5" => TradingPeriod::Min5,
            "MIN_30" => TradingPeriod::Min30,
            _ => TradingPeriod::Today,
        }
    }

    /// Window length in minutes; `None` for the whole session.
    pub fn window_minutes(&self) -> Option<i64> {
        match self {
            TradingPeriod::Today => None,
            TradingPeriod::Min5 => Some(5),
            TradingPeriod::Min30 => Some(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingPeriod::Today => "TODAY",
            TradingPeriod::Min5 => "MIN_5",
            TradingPeriod::Min30 => "MIN_30",
        }
    }

    fn index(&self) -> usize {
        match self {
            TradingPeriod::Today => 0,
            TradingPeriod::Min5 => 1,
            TradingPeriod::Min30 => 2,
        }
    }
}

/// Aggregated trading activity of one sector. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorSnapshot {
    pub sector_code: SectorCode,
    pub sector_name: String,
    pub display_color: String,
    /// Configured member count, not the number that resolved.
    pub instrument_count: usize,
    /// At most five, descending by trading value, ties by code ascending.
    pub top_instruments: Vec<StockTradingInfo>,
    pub total_trading_value: Decimal,
    /// Share of the grand total across all sectors of the same pass.
    /// Zero in single-sector views.
    pub percentage_of_all_sectors: Decimal,
    pub computed_at: DateTime<Utc>,
}

/// Observable state of one period's cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheState {
    Empty,
    Computing,
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
struct CachedSet {
    snapshots: Arc<Vec<SectorSnapshot>>,
    computed_at: DateTime<Utc>,
}

#[derive(Default)]
struct PeriodSlot {
    current: RwLock<Option<CachedSet>>,
    rebuild: AsyncMutex<()>,
    computing: AtomicBool,
}

/// Clears the computing flag even if the rebuilding future is dropped.
struct ComputingGuard<'a>(&'a AtomicBool);

impl<'a> ComputingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// TTL cache of computed sector snapshot sets.
pub struct SectorAggregationCache {
    sectors: Arc<dyn SectorConfigProvider>,
    fetcher: Arc<ParallelFetchExecutor>,
    bars: Option<Arc<BarAggregator>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    ttl: Duration,
    generation: AtomicU64,
    slots: [PeriodSlot; 3],
}

impl SectorAggregationCache {
    pub fn new(
        sectors: Arc<dyn SectorConfigProvider>,
        fetcher: Arc<ParallelFetchExecutor>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        ttl: Duration,
    ) -> Self {
        info!(
            sectors = sectors.list_sectors().len(),
            ttl_secs = ttl.as_secs(),
            "Sector aggregation cache initialized"
        );
        Self {
            sectors,
            fetcher,
            bars: None,
            clock,
            metrics,
            ttl,
            generation: AtomicU64::new(0),
            slots: Default::default(),
        }
    }

    /// Use locally aggregated minute bars for `Min5`/`Min30` windows.
    ///
    /// Without bars every period falls back to cumulative values.
    pub fn with_bars(mut self, bars: Arc<BarAggregator>) -> Self {
        self.bars = Some(bars);
        self
    }

    /// Snapshots for the whole session, descending by total trading value.
    pub async fn get_all_sector_trading(&self) -> Vec<SectorSnapshot> {
        self.get_all_sector_trading_for(TradingPeriod::Today).await
    }

    /// Snapshots for `period`, served from cache while fresh.
    pub async fn get_all_sector_trading_for(&self, period: TradingPeriod) -> Vec<SectorSnapshot> {
        if let Some(snapshots) = self.fresh(period) {
            self.metrics.record_sector_cache_hit();
            debug!(period = period.as_str(), "Sector cache hit");
            return snapshots.as_ref().clone();
        }

        let slot = &self.slots[period.index()];
        let _rebuild = slot.rebuild.lock().await;

        // Another caller may have rebuilt while we waited.
        if let Some(snapshots) = self.fresh(period) {
            self.metrics.record_sector_cache_hit();
            debug!(period = period.as_str(), "Sector cache filled by concurrent rebuild");
            return snapshots.as_ref().clone();
        }

        self.metrics.record_sector_cache_miss();
        let generation = self.generation.load(Ordering::Acquire);
        let snapshots = {
            let _computing = ComputingGuard::enter(&slot.computing);
            Arc::new(self.build_all(period).await)
        };

        let mut current = slot.current.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) == generation {
            *current = Some(CachedSet {
                snapshots: Arc::clone(&snapshots),
                computed_at: self.clock.now(),
            });
        } else {
            debug!(period = period.as_str(), "Cache cleared during rebuild, result not stored");
        }
        drop(current);

        snapshots.as_ref().clone()
    }

    /// One sector's snapshot for the whole session. Always recomputed.
    ///
    /// `None` when the code is not configured.
    pub async fn get_sector_detail(&self, sector_code: &str) -> Option<SectorSnapshot> {
        self.get_sector_detail_for(sector_code, TradingPeriod::Today)
            .await
    }

    pub async fn get_sector_detail_for(
        &self,
        sector_code: &str,
        period: TradingPeriod,
    ) -> Option<SectorSnapshot> {
        let Some(sector) = self.sectors.sector(sector_code) else {
            debug!(sector = sector_code, "Unknown sector requested");
            return None;
        };

        let quotes = self.fetch_quotes(&sector.instrument_codes).await;
        let windowed = self.windowed_values(period, &sector.instrument_codes, false);
        Some(self.build_sector(sector, &quotes, &windowed, self.clock.now()))
    }

    /// Drop every cached snapshot set; the next read recomputes.
    pub fn clear_cache(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        for slot in &self.slots {
            *slot.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        }
        info!("Sector trading cache cleared");
    }

    /// Populate the `Today` snapshot set ahead of the first request.
    pub async fn warmup(&self) {
        let started = Instant::now();
        let snapshots = self.get_all_sector_trading().await;
        let resolved = snapshots
            .iter()
            .filter(|s| !s.top_instruments.is_empty())
            .count();

        if resolved == 0 {
            warn!(
                sectors = snapshots.len(),
                "Sector cache warmup finished without any resolved instruments"
            );
        } else {
            info!(
                sectors = snapshots.len(),
                resolved_sectors = resolved,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Sector cache warmed up"
            );
        }
    }

    pub fn cache_state(&self, period: TradingPeriod) -> CacheState {
        let slot = &self.slots[period.index()];
        if slot.computing.load(Ordering::Acquire) {
            return CacheState::Computing;
        }
        let current = slot.current.read().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            None => CacheState::Empty,
            Some(set) if self.is_fresh(set.computed_at) => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    fn fresh(&self, period: TradingPeriod) -> Option<Arc<Vec<SectorSnapshot>>> {
        let current = self.slots[period.index()]
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .filter(|set| self.is_fresh(set.computed_at))
            .map(|set| Arc::clone(&set.snapshots))
    }

    fn is_fresh(&self, computed_at: DateTime<Utc>) -> bool {
        match (self.clock.now() - computed_at).to_std() {
            Ok(age) => age < self.ttl,
            // Clock moved backwards.
            Err(_) => true,
        }
    }

    async fn build_all(&self, period: TradingPeriod) -> Vec<SectorSnapshot> {
        let started = Instant::now();
        let sectors = self.sectors.list_sectors();
        let instruments: Vec<InstrumentCode> =
            self.sectors.distinct_instruments().into_iter().collect();

        let quotes = self.fetch_quotes(&instruments).await;
        let windowed = self.windowed_values(period, &instruments, true);
        let computed_at = self.clock.now();

        let mut snapshots: Vec<SectorSnapshot> = sectors
            .iter()
            .map(|sector| self.build_sector(sector, &quotes, &windowed, computed_at))
            .collect();

        let grand_total = checked_sum(snapshots.iter().map(|s| s.total_trading_value))
            .unwrap_or_else(|| {
                warn!(period = period.as_str(), "Grand total overflows, saturating");
                Decimal::MAX
            });
        for snapshot in &mut snapshots {
            snapshot.percentage_of_all_sectors =
                percentage_of(snapshot.total_trading_value, grand_total);
        }
        snapshots.sort_by(|a, b| {
            b.total_trading_value
                .cmp(&a.total_trading_value)
                .then_with(|| a.sector_code.cmp(&b.sector_code))
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_sector_recompute(elapsed_ms);
        info!(
            period = period.as_str(),
            sectors = snapshots.len(),
            instruments = instruments.len(),
            resolved = quotes.len(),
            grand_total = %grand_total,
            source = if windowed.is_empty() { "cumulative" } else { "minute_bars" },
            elapsed_ms,
            "Sector trading snapshot rebuilt"
        );
        snapshots
    }

    async fn fetch_quotes(&self, instruments: &[InstrumentCode]) -> HashMap<InstrumentCode, PriceQuote> {
        self.fetcher
            .fetch_all(instruments, self.fetcher.timeout())
            .await
            .into_iter()
            .collect()
    }

    /// Per-instrument trading value inside the period's window, from local
    /// minute bars. Empty for `Today`.
    ///
    /// With `require_coverage`, if fewer than half of `instruments` have
    /// windowed data the whole map is discarded so the pass uses cumulative
    /// values consistently.
    fn windowed_values(
        &self,
        period: TradingPeriod,
        instruments: &[InstrumentCode],
        require_coverage: bool,
    ) -> HashMap<InstrumentCode, Decimal> {
        let Some(minutes) = period.window_minutes() else {
            return HashMap::new();
        };
        let Some(bars) = self.bars.as_ref() else {
            warn!(period = period.as_str(), "No minute bars attached, using cumulative values");
            return HashMap::new();
        };

        let since = self.clock.now() - chrono::Duration::minutes(minutes);
        let values: HashMap<InstrumentCode, Decimal> = instruments
            .iter()
            .filter_map(|code| {
                bars.trading_value_since(code, since)
                    .filter(|v| *v > Decimal::ZERO)
                    .map(|v| (code.clone(), v))
            })
            .collect();

        if require_coverage && values.len() < instruments.len() / 2 {
            warn!(
                period = period.as_str(),
                with_data = values.len(),
                instruments = instruments.len(),
                "Insufficient minute bar coverage, using cumulative values"
            );
            return HashMap::new();
        }
        values
    }

    fn build_sector(
        &self,
        sector: &SectorDefinition,
        quotes: &HashMap<InstrumentCode, PriceQuote>,
        windowed: &HashMap<InstrumentCode, Decimal>,
        computed_at: DateTime<Utc>,
    ) -> SectorSnapshot {
        let mut rows: Vec<StockTradingInfo> = sector
            .instrument_codes
            .iter()
            .filter_map(|code| {
                let quote = quotes.get(code)?;
                let mut row = StockTradingInfo::from_quote(code.clone(), quote, || {
                    self.sectors
                        .instrument_name(code)
                        .map(str::to_string)
                        .unwrap_or_else(|| code.to_string())
                })?;
                if let Some(value) = windowed.get(code) {
                    row.trading_value = *value;
                }
                Some(row)
            })
            .collect();

        let mut total_trading_value = Decimal::ZERO;
        rows.retain(|row| match total_trading_value.checked_add(row.trading_value) {
            Some(sum) => {
                total_trading_value = sum;
                true
            }
            None => {
                warn!(
                    sector = %sector.code,
                    instrument = %row.instrument_code,
                    "Sector total overflows, excluding instrument"
                );
                false
            }
        });
        rank_instruments(&mut rows);
        rows.truncate(TOP_INSTRUMENTS);

        SectorSnapshot {
            sector_code: sector.code.clone(),
            sector_name: sector.name.clone(),
            display_color: sector.color.clone(),
            instrument_count: sector.instrument_codes.len(),
            top_instruments: rows,
            total_trading_value,
            percentage_of_all_sectors: Decimal::ZERO,
            computed_at,
        }
    }
}

/// Descending by trading value, ties by instrument code ascending.
fn rank_instruments(rows: &mut [StockTradingInfo]) {
    rows.sort_by(|a, b| {
        b.trading_value
            .cmp(&a.trading_value)
            .then_with(|| a.instrument_code.cmp(&b.instrument_code))
    });
}
