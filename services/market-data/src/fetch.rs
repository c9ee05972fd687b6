//! Bounded parallel price lookups
//!
//! Fans a batch of lookups out over at most `pool_width` concurrent tasks.
//! Each task gets its own timeout, started once it holds a pool permit, so a
//! batch wider than the pool runs in rounds and its wall-clock bound grows to
//! roughly `ceil(n / pool_width) × timeout`.
//!
//! Failures never escape: a lookup that errors, times out, panics or returns
//! a quote whose trading value overflows is logged, counted and left out of
//! the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};
use types::errors::LookupError;
use types::ids::InstrumentCode;

use crate::metrics::EngineMetrics;
use crate::provider::{PriceLookupProvider, PriceQuote};

/// Fixed-width executor for upstream price lookups.
pub struct ParallelFetchExecutor {
    provider: Arc<dyn PriceLookupProvider>,
    permits: Arc<Semaphore>,
    pool_width: usize,
    timeout: Duration,
    metrics: Arc<EngineMetrics>,
}

impl ParallelFetchExecutor {
    pub fn new(
        provider: Arc<dyn PriceLookupProvider>,
        pool_width: usize,
        timeout: Duration,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let pool_width = pool_width.max(1);
        info!(pool_width, timeout_ms = timeout.as_millis() as u64, "Fetch executor started");
        Self {
            provider,
            permits: Arc::new(Semaphore::new(pool_width)),
            pool_width,
            timeout,
            metrics,
        }
    }

    pub fn pool_width(&self) -> usize {
        self.pool_width
    }

    /// Default per-lookup timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Look up every instrument, returning the subset that succeeded.
    ///
    /// Result order is unspecified. An empty result is a valid outcome.
    pub async fn fetch_all(
        &self,
        instruments: &[InstrumentCode],
        per_task_timeout: Duration,
    ) -> Vec<(InstrumentCode, PriceQuote)> {
        if self.permits.is_closed() {
            warn!(instruments = instruments.len(), "Fetch executor is shut down, returning no data");
            return Vec::new();
        }
        if instruments.is_empty() {
            return Vec::new();
        }

        self.metrics.record_fetch_batch();
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for code in instruments.iter().cloned() {
            let provider = Arc::clone(&self.provider);
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                let result = lookup(provider, permits, &code, per_task_timeout).await;
                (code, result)
            });
        }

        let mut quotes = Vec::with_capacity(instruments.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((code, Ok(quote))) => {
                    self.metrics.record_lookup_succeeded();
                    quotes.push((code, quote));
                }
                Ok((code, Err(e))) => {
                    self.metrics
                        .record_lookup_failed(matches!(e, LookupError::Timeout { .. }));
                    warn!(
                        instrument = %code,
                        kind = e.kind_label(),
                        error = %e,
                        "Price lookup failed, excluding instrument from this round"
                    );
                }
                Err(e) => {
                    self.metrics.record_lookup_failed(false);
                    warn!(error = %e, "Price lookup task aborted");
                }
            }
        }

        debug!(
            requested = instruments.len(),
            succeeded = quotes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetch batch complete"
        );
        quotes
    }

    /// Close the pool. Lookups already holding a permit finish; queued and
    /// future lookups resolve to no data.
    pub fn shutdown(&self) {
        if !self.permits.is_closed() {
            self.permits.close();
            info!("Fetch executor shut down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }
}

async fn lookup(
    provider: Arc<dyn PriceLookupProvider>,
    permits: Arc<Semaphore>,
    code: &InstrumentCode,
    per_task_timeout: Duration,
) -> Result<PriceQuote, LookupError> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| LookupError::ExecutorShutdown)?;

    match time::timeout(per_task_timeout, provider.fetch_current_price(code)).await {
        Ok(result) => result.and_then(PriceQuote::validate),
        Err(_) => Err(LookupError::Timeout {
            timeout_ms: per_task_timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use types::numeric::Volume;

    /// Codes starting with "SLOW" hang, "ERR" fail, "HUGE" resolve to a
    /// quote whose trading value overflows, anything else resolves after
    /// `delay`.
    struct ScriptedProvider {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceLookupProvider for ScriptedProvider {
        async fn fetch_current_price(
            &self,
            instrument: &InstrumentCode,
        ) -> Result<PriceQuote, LookupError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = if instrument.as_str().starts_with("SLOW") {
                time::sleep(Duration::from_secs(3600)).await;
                Err(LookupError::NoData)
            } else if instrument.as_str().starts_with("ERR") {
                Err(LookupError::Transport("connection reset".to_string()))
            } else if instrument.as_str().starts_with("HUGE") {
                Ok(PriceQuote {
                    current_price: Decimal::from(1_000_000_000_000u64),
                    volume: Volume::new(100_000_000_000_000_000),
                    change_rate_pct: Decimal::ZERO,
                    instrument_name: instrument.to_string(),
                    accumulated_trading_value: None,
                })
            } else {
                time::sleep(self.delay).await;
                Ok(PriceQuote {
                    current_price: Decimal::from(100),
                    volume: Volume::new(10),
                    change_rate_pct: Decimal::ZERO,
                    instrument_name: instrument.to_string(),
                    accumulated_trading_value: None,
                })
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn codes(raw: &[&str]) -> Vec<InstrumentCode> {
        raw.iter().map(|c| InstrumentCode::new(*c)).collect()
    }

    fn executor(provider: Arc<ScriptedProvider>, width: usize) -> (ParallelFetchExecutor, Arc<EngineMetrics>) {
        let metrics = Arc::new(EngineMetrics::new());
        let exec = ParallelFetchExecutor::new(
            provider,
            width,
            Duration::from_secs(10),
            Arc::clone(&metrics),
        );
        (exec, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_succeed() {
        let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(50)));
        let (exec, metrics) = executor(provider, 10);

        let result = exec
            .fetch_all(&codes(&["A", "B", "C"]), Duration::from_secs(1))
            .await;
        let got: HashSet<String> = result.iter().map(|(c, _)| c.to_string()).collect();
        assert_eq!(got, HashSet::from(["A".into(), "B".into(), "C".into()]));
        assert_eq!(metrics.export()["lookups_succeeded"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_timeouts_are_dropped() {
        let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(50)));
        let (exec, metrics) = executor(provider, 10);

        let started = time::Instant::now();
        let result = exec
            .fetch_all(
                &codes(&["A", "SLOW1", "B", "ERR1", "SLOW2"]),
                Duration::from_secs(1),
            )
            .await;

        assert_eq!(result.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(2));
        let exported = metrics.export();
        assert_eq!(exported["lookups_failed"], 3);
        assert_eq!(exported["lookups_timed_out"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_is_empty_not_error() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        let (exec, _) = executor(provider, 4);
        let result = exec
            .fetch_all(&codes(&["ERR1", "ERR2"]), Duration::from_secs(1))
            .await;
        assert!(result.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflowing_quote_is_dropped() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        let (exec, metrics) = executor(provider, 4);

        let result = exec
            .fetch_all(&codes(&["A", "HUGE1"]), Duration::from_secs(1))
            .await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0.as_str(), "A");
        let exported = metrics.export();
        assert_eq!(exported["lookups_succeeded"], 1);
        assert_eq!(exported["lookups_failed"], 1);
        assert_eq!(exported["lookups_timed_out"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_by_pool_width() {
        let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(100)));
        let (exec, _) = executor(Arc::clone(&provider), 3);

        let batch: Vec<InstrumentCode> =
            (0..10).map(|i| InstrumentCode::new(format!("{:06}", i))).collect();
        let result = exec.fetch_all(&batch, Duration::from_secs(1)).await;

        assert_eq!(result.len(), 10);
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_rounds_get_their_own_timeout() {
        // Width 1: each lookup waits for the previous one, but the timeout
        // only starts once it runs.
        let provider = Arc::new(ScriptedProvider::new(Duration::from_millis(600)));
        let (exec, _) = executor(provider, 1);

        let result = exec
            .fetch_all(&codes(&["A", "B", "C"]), Duration::from_secs(1))
            .await;
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_returns_empty() {
        let provider = Arc::new(ScriptedProvider::new(Duration::ZERO));
        let (exec, metrics) = executor(provider, 2);

        exec.shutdown();
        assert!(exec.is_shutdown());
        let result = exec.fetch_all(&codes(&["A"]), Duration::from_secs(1)).await;
        assert!(result.is_empty());
        assert_eq!(metrics.export()["fetch_batches"], 0);
    }
}
