use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use market_data::clock::SystemClock;
use market_data::sectors::StaticSectorConfig;
use market_data::{MarketDataConfig, MarketDataService, PriceLookupProvider, PriceQuote};
use rust_decimal::Decimal;
use tokio::runtime::Runtime;
use types::errors::LookupError;
use types::ids::InstrumentCode;
use types::numeric::Volume;

struct InstantProvider;

#[async_trait]
impl PriceLookupProvider for InstantProvider {
    async fn fetch_current_price(
        &self,
        _instrument: &InstrumentCode,
    ) -> Result<PriceQuote, LookupError> {
        Ok(PriceQuote {
            current_price: Decimal::from(50_000),
            volume: Volume::new(1_000),
            change_rate_pct: Decimal::ZERO,
            instrument_name: String::new(),
            accumulated_trading_value: None,
        })
    }
}

fn service() -> MarketDataService {
    MarketDataService::new(
        MarketDataConfig::default(),
        Arc::new(InstantProvider),
        Arc::new(StaticSectorConfig::builtin()),
        Arc::new(SystemClock),
    )
    .expect("default config is valid")
}

fn bench_add_tick(c: &mut Criterion) {
    let svc = service();
    let codes: Vec<InstrumentCode> = (0..50)
        .map(|i| InstrumentCode::new(format!("{:06}", i)))
        .collect();
    let batch_size: usize = 10_000;

    let mut group = c.benchmark_group("tick_ingestion");
    group.throughput(Throughput::Elements(batch_size as u64));

    group.bench_function("add_tick_50_instruments", |b| {
        b.iter(|| {
            for i in 0..batch_size {
                let code = &codes[i % codes.len()];
                let price = Decimal::from(70_000 + (i % 100) as u64);
                svc.add_tick(black_box(code), price, Volume::new(10))
                    .expect("valid tick");
            }
        });
    });

    group.finish();
}

fn bench_sector_rebuild(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to create Tokio runtime");
    let svc = service();

    let mut group = c.benchmark_group("sector_cache");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("rebuild_builtin_catalog", |b| {
        b.iter(|| {
            rt.block_on(async {
                svc.clear_sector_cache();
                black_box(svc.get_all_sector_trading().await)
            })
        });
    });

    group.bench_function("cache_hit", |b| {
        rt.block_on(svc.get_all_sector_trading());
        b.iter(|| rt.block_on(async { black_box(svc.get_all_sector_trading().await) }));
    });

    group.finish();
}

criterion_group!(benches, bench_add_tick, bench_sector_rebuild);
criterion_main!(benches);
