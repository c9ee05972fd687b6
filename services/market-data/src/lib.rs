//! Market Data Engine
//!
//! Real-time market data caching and sector aggregation:
//! - Bounded per-instrument tick history (FIFO eviction)
//! - One-minute OHLCV bars with change rate against the session open
//! - First-observation-wins opening prices
//! - Bounded parallel price lookups with per-task timeouts
//! - TTL-cached, ranked, percentage-weighted sector snapshots
//!
//! # Architecture
//!
//! ```text
//!   Live ticks                     Snapshot requests
//!       │                                 │
//!  ┌────▼─────┐                   ┌───────▼────────┐
//!  │TickStore │                   │ SectorCache    │ ← TTL, single-flight
//!  └────┬─────┘                   └───────┬────────┘
//!       │                                 │ miss
//!  ┌────┴──────┬──────────┐       ┌───────▼────────┐
//!  │           │          │       │ FetchExecutor  │ ← bounded pool
//! ┌▼─────┐ ┌───▼────┐     │       └───────┬────────┘
//! │Bars  │ │Opening │◄────┘               │
//! └──▲───┘ └────────┘             ┌───────▼────────┐
//!    └──── windowed values ───────┤PriceLookup     │ (external)
//!                                 └────────────────┘
//! ```

pub mod bars;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod metrics;
pub mod opening;
pub mod provider;
pub mod sector_cache;
pub mod sectors;
pub mod service;
pub mod tick_store;

pub use bars::MinuteBar;
pub use config::{ConfigError, MarketDataConfig};
pub use provider::{PriceLookupProvider, PriceQuote, StockTradingInfo};
pub use sector_cache::{CacheState, SectorSnapshot, TradingPeriod};
pub use service::MarketDataService;
pub use tick_store::{Diagnostics, TickRecord};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
