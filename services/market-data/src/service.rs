//! Market data service facade
//!
//! Wires the tick store, bar aggregator, opening price registry, fetch
//! executor and sector cache together from one [`MarketDataConfig`] and
//! exposes the in-process operations an API layer calls.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use types::errors::TickError;
use types::ids::InstrumentCode;
use types::numeric::{Price, Volume};

use crate::bars::{BarAggregator, MinuteBar};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, MarketDataConfig};
use crate::fetch::ParallelFetchExecutor;
use crate::metrics::EngineMetrics;
use crate::opening::OpeningPriceRegistry;
use crate::provider::PriceLookupProvider;
use crate::sector_cache::{CacheState, SectorAggregationCache, SectorSnapshot, TradingPeriod};
use crate::sectors::{SectorConfigProvider, StaticSectorConfig};
use crate::tick_store::{Diagnostics, TickRecord, TickStore};

/// Real-time market data engine.
pub struct MarketDataService {
    config: MarketDataConfig,
    metrics: Arc<EngineMetrics>,
    opening: Arc<OpeningPriceRegistry>,
    bars: Arc<BarAggregator>,
    ticks: TickStore,
    fetcher: Arc<ParallelFetchExecutor>,
    sectors: SectorAggregationCache,
}

impl MarketDataService {
    /// Build the engine from explicit collaborators.
    pub fn new(
        config: MarketDataConfig,
        provider: Arc<dyn PriceLookupProvider>,
        sector_config: Arc<dyn SectorConfigProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let offset = config.session_offset().ok_or_else(|| ConfigError::InvalidValue {
            key: "MARKET_DATA_SESSION_UTC_OFFSET_SECS",
            value: config.session_utc_offset_secs.to_string(),
            reason: "out of range".to_string(),
        })?;

        let metrics = Arc::new(EngineMetrics::new());
        let opening = Arc::new(OpeningPriceRegistry::new());
        let bars = Arc::new(BarAggregator::new(
            Arc::clone(&opening),
            config.max_bars,
            offset,
        ));
        let ticks = TickStore::new(
            Arc::clone(&bars),
            Arc::clone(&opening),
            Arc::clone(&clock),
            Arc::clone(&metrics),
            config.max_ticks,
            offset,
        );
        let fetcher = Arc::new(ParallelFetchExecutor::new(
            provider,
            config.fetch_pool_width,
            config.fetch_timeout,
            Arc::clone(&metrics),
        ));
        let sectors = SectorAggregationCache::new(
            sector_config,
            Arc::clone(&fetcher),
            clock,
            Arc::clone(&metrics),
            config.cache_ttl,
        )
        .with_bars(Arc::clone(&bars));

        info!(
            max_ticks = config.max_ticks,
            max_bars = config.max_bars,
            pool_width = config.fetch_pool_width,
            "MarketDataService initialized"
        );

        Ok(Self {
            config,
            metrics,
            opening,
            bars,
            ticks,
            fetcher,
            sectors,
        })
    }

    /// Build the engine on the system clock, loading the sector catalog from
    /// `config.sector_catalog_path` or falling back to the built-in one.
    pub fn from_config(
        config: MarketDataConfig,
        provider: Arc<dyn PriceLookupProvider>,
    ) -> Result<Self, ConfigError> {
        let sector_config = match config.sector_catalog_path.as_deref() {
            Some(path) => StaticSectorConfig::from_path(path)?,
            None => StaticSectorConfig::builtin(),
        };
        Self::new(
            config,
            provider,
            Arc::new(sector_config),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &MarketDataConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    // Tick ingestion

    pub fn add_tick(
        &self,
        instrument: &InstrumentCode,
        price: Decimal,
        volume: Volume,
    ) -> Result<(), TickError> {
        self.ticks.add_tick(instrument, price, volume)
    }

    /// Ingest from untyped feed input (raw code, signed volume).
    pub fn add_tick_raw(&self, instrument: &str, price: Decimal, volume: i64) -> Result<(), TickError> {
        self.ticks.add_tick_raw(instrument, price, volume)
    }

    pub fn recent_ticks(&self, instrument: &InstrumentCode, count: usize) -> Vec<TickRecord> {
        self.ticks.recent_ticks(instrument, count)
    }

    pub fn minute_bars(&self, instrument: &InstrumentCode) -> Vec<MinuteBar> {
        self.bars.bars(instrument)
    }

    pub fn opening_price(&self, instrument: &InstrumentCode) -> Option<Decimal> {
        self.opening.get(instrument)
    }

    /// Replace the opening price baseline, e.g. with the official open.
    pub fn set_opening_price(&self, instrument: &InstrumentCode, price: Decimal) -> Result<(), TickError> {
        let price = Price::try_new(price).ok_or_else(|| TickError::NonPositivePrice(price.to_string()))?;
        self.opening.set(instrument, price);
        Ok(())
    }

    pub fn clear_instrument(&self, instrument: &InstrumentCode) {
        self.ticks.clear(instrument);
    }

    /// Session reset: ticks, bars and opening prices for every instrument.
    pub fn clear_all_market_data(&self) {
        self.ticks.clear_all();
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.ticks.diagnostics()
    }

    // Sector aggregation

    pub async fn get_all_sector_trading(&self) -> Vec<SectorSnapshot> {
        self.sectors.get_all_sector_trading().await
    }

    pub async fn get_all_sector_trading_for(&self, period: TradingPeriod) -> Vec<SectorSnapshot> {
        self.sectors.get_all_sector_trading_for(period).await
    }

    pub async fn get_sector_detail(&self, sector_code: &str) -> Option<SectorSnapshot> {
        self.sectors.get_sector_detail(sector_code).await
    }

    pub async fn get_sector_detail_for(
        &self,
        sector_code: &str,
        period: TradingPeriod,
    ) -> Option<SectorSnapshot> {
        self.sectors.get_sector_detail_for(sector_code, period).await
    }

    pub fn clear_sector_cache(&self) {
        self.sectors.clear_cache();
    }

    pub fn sector_cache_state(&self, period: TradingPeriod) -> CacheState {
        self.sectors.cache_state(period)
    }

    pub async fn warmup(&self) {
        self.sectors.warmup().await;
    }

    /// Stop accepting upstream lookups. Tick ingestion keeps working.
    pub fn shutdown(&self) {
        self.fetcher.shutdown();
        info!("MarketDataService shut down");
    }
}
