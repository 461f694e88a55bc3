use crate::config::TelemetryConfig;
use crate::envelope::{ExportEnvelope, MetricPoint};
use crate::error::{Result, TelemetryError};
use crate::names;
use crate::sampler::SystemSampler;
use crate::store::MetricStore;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodic push exporter: once per interval it reads the store and the
/// system sampler, shapes one envelope per metric and POSTs each to the
/// collector. Pushes are independent; a failed one is logged and never
/// affects the rest of the tick or later ticks.
pub struct Exporter {
    store: Arc<MetricStore>,
    sampler: SystemSampler,
    client: reqwest::Client,
    config: TelemetryConfig,
}

impl Exporter {
    pub fn new(store: Arc<MetricStore>, config: TelemetryConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.push_timeout)
            .build()?;
        let sampler = SystemSampler::new(config.cpu_sample_interval);
        Ok(Self {
            store,
            sampler,
            client,
            config,
        })
    }

    /// Starts the recurring export task. The returned handle cancels it
    /// cleanly on shutdown; without that the task runs for the process
    /// lifetime.
    pub fn spawn(self) -> ExporterHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move { self.run(child).await });
        ExporterHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        info!(
            interval = %humantime::format_duration(self.config.export_interval),
            url = %self.config.url,
            "starting metrics exporter"
        );
        // First export happens one full interval after startup, not at
        // spawn time.
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.export_interval,
            self.config.export_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("metrics exporter stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.export_tick().await;
                }
            }
        }
    }

    /// Runs one full export cycle. Public so tests (and manual flushes) can
    /// drive ticks without the timer.
    pub async fn export_tick(&self) {
        let points = self.collect_points().await;
        let pushes = points.into_iter().map(|point| async move {
            if let Err(e) = self.push(&point).await {
                warn!(metric = %point.name, error = %e, "metric push failed");
            }
        });
        join_all(pushes).await;
    }

    /// Builds the tick's metric catalogue from one store snapshot plus the
    /// host sampler.
    async fn collect_points(&self) -> Vec<MetricPoint> {
        // One snapshot per tick: counters, gauges, latency and the
        // active-user scan all come from a single lock acquisition.
        let snapshot = self.store.snapshot(self.config.active_user_window);

        let mut points = Vec::new();

        points.push(MetricPoint::gauge(
            names::ACTIVE_USERS,
            "users",
            snapshot.active_users() as f64,
        ));

        points.push(MetricPoint::sum(
            names::HTTP_REQUESTS_TOTAL,
            "1",
            snapshot.counter(names::HTTP_REQUESTS_TOTAL),
        ));
        for (method, count) in snapshot.counters_with_dim(names::HTTP_REQUESTS_BY_METHOD) {
            points.push(
                MetricPoint::sum(names::HTTP_REQUESTS_BY_METHOD, "1", count)
                    .with_attribute(names::METHOD_DIM, &method),
            );
        }
        for (method, stats) in snapshot.latencies() {
            // Guarded average: a category with no samples emits nothing.
            if let Some(avg) = stats.average_ms() {
                points.push(
                    MetricPoint::gauge(names::HTTP_AVG_LATENCY_MS, "ms", avg)
                        .with_attribute(names::METHOD_DIM, method),
                );
            }
        }

        points.push(MetricPoint::sum(
            names::AUTH_SUCCESS_TOTAL,
            "1",
            snapshot.counter(names::AUTH_SUCCESS_TOTAL),
        ));
        points.push(MetricPoint::sum(
            names::AUTH_FAILURE_TOTAL,
            "1",
            snapshot.counter(names::AUTH_FAILURE_TOTAL),
        ));

        match self.sampler.cpu_usage_percent().await {
            Ok(pct) => points.push(MetricPoint::gauge(names::CPU_USAGE_PERCENT, "%", pct)),
            Err(e) => warn!(error = %e, "CPU sampling failed, skipping metric for this tick"),
        }
        match self.sampler.memory_usage_percent() {
            Ok(pct) => points.push(MetricPoint::gauge(names::MEMORY_USAGE_PERCENT, "%", pct)),
            Err(e) => warn!(error = %e, "memory sampling failed, skipping metric for this tick"),
        }

        // Since-last-export average: emitted only when samples exist, and
        // taking it resets the accumulator.
        let creation = self.store.take_creation_latency();
        if let Some(avg) = creation.average_ms() {
            points.push(MetricPoint::gauge(
                names::PIZZA_CREATION_LATENCY_MS,
                "ms",
                avg,
            ));
        }

        points.push(MetricPoint::sum(
            names::PIZZAS_SOLD_TOTAL,
            "1",
            snapshot.counter(names::PIZZAS_SOLD_TOTAL),
        ));
        // Revenue goes out cents-scaled, as the dashboards expect.
        points.push(MetricPoint::gauge(
            names::PIZZA_REVENUE_TOTAL,
            "USD",
            snapshot.counter(names::PIZZA_REVENUE_TOTAL) * 100.0,
        ));
        points.push(MetricPoint::sum(
            names::PIZZA_CREATION_FAILURES,
            "1",
            snapshot.counter(names::PIZZA_CREATION_FAILURES),
        ));

        points
    }

    async fn push(&self, point: &MetricPoint) -> Result<()> {
        let envelope = ExportEnvelope::wrap(point, &self.config.source);
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&envelope)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TelemetryError::CollectorStatus(response.status()));
        }
        debug!(metric = %point.name, value = point.value, "pushed metric");
        Ok(())
    }
}

/// Handle to the running export task.
pub struct ExporterHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ExporterHandle {
    /// Cancels the recurring task and waits for it to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MetricKind;
    use crate::events::{AuthEvents, BusinessEvents, OrderItem};
    use std::time::Duration;

    fn test_exporter(store: Arc<MetricStore>) -> Exporter {
        let mut config =
            TelemetryConfig::new("http://127.0.0.1:9/unreachable", "key", "pizza-test");
        config.cpu_sample_interval = Duration::from_millis(10);
        Exporter::new(store, config).unwrap()
    }

    fn find<'a>(points: &'a [MetricPoint], name: &str) -> Option<&'a MetricPoint> {
        points.iter().find(|p| p.name == name)
    }

    #[tokio::test]
    async fn tick_catalogue_covers_every_recorded_metric() {
        let store = Arc::new(MetricStore::new());
        let business = BusinessEvents::new(store.clone());
        let auth = AuthEvents::new(store.clone());

        store.increment_counter(names::HTTP_REQUESTS_TOTAL, 2.0, None);
        store.increment_counter(
            names::HTTP_REQUESTS_BY_METHOD,
            2.0,
            Some((names::METHOD_DIM, "GET")),
        );
        store.record_latency("GET", 12.0);
        store.mark_active("diner-1");
        auth.record_success();
        business.record_sale(&[OrderItem { price: 5.0 }]);
        business.record_creation_latency(40.0);

        let exporter = test_exporter(store);
        let points = exporter.collect_points().await;

        for name in [
            names::ACTIVE_USERS,
            names::HTTP_REQUESTS_TOTAL,
            names::HTTP_REQUESTS_BY_METHOD,
            names::HTTP_AVG_LATENCY_MS,
            names::AUTH_SUCCESS_TOTAL,
            names::AUTH_FAILURE_TOTAL,
            names::CPU_USAGE_PERCENT,
            names::MEMORY_USAGE_PERCENT,
            names::PIZZA_CREATION_LATENCY_MS,
            names::PIZZAS_SOLD_TOTAL,
            names::PIZZA_REVENUE_TOTAL,
            names::PIZZA_CREATION_FAILURES,
        ] {
            assert!(find(&points, name).is_some(), "missing {name}");
        }

        assert_eq!(find(&points, names::ACTIVE_USERS).unwrap().value, 1.0);
        let by_method = find(&points, names::HTTP_REQUESTS_BY_METHOD).unwrap();
        assert_eq!(
            by_method.attributes,
            vec![("method".to_string(), "GET".to_string())]
        );
    }

    #[tokio::test]
    async fn revenue_is_cents_scaled_and_a_gauge() {
        let store = Arc::new(MetricStore::new());
        BusinessEvents::new(store.clone()).record_sale(&[
            OrderItem { price: 0.0038 },
            OrderItem { price: 0.0042 },
            OrderItem { price: 0.0042 },
        ]);

        let exporter = test_exporter(store);
        let points = exporter.collect_points().await;

        let sold = find(&points, names::PIZZAS_SOLD_TOTAL).unwrap();
        assert_eq!(sold.value, 3.0);
        assert_eq!(sold.kind, MetricKind::Sum);

        let revenue = find(&points, names::PIZZA_REVENUE_TOTAL).unwrap();
        assert_eq!(revenue.kind, MetricKind::Gauge);
        assert!((revenue.value - 1.22).abs() < 1e-9);
    }

    #[tokio::test]
    async fn creation_latency_emits_once_then_resets() {
        let store = Arc::new(MetricStore::new());
        store.record_creation_latency(30.0);
        store.record_creation_latency(50.0);

        let exporter = test_exporter(store);

        let first = exporter.collect_points().await;
        let point = find(&first, names::PIZZA_CREATION_LATENCY_MS).unwrap();
        assert_eq!(point.value, 40.0);

        // No samples since the last tick: the metric is absent entirely.
        let second = exporter.collect_points().await;
        assert!(find(&second, names::PIZZA_CREATION_LATENCY_MS).is_none());
    }

    #[tokio::test]
    async fn methods_without_latency_samples_emit_no_average() {
        let store = Arc::new(MetricStore::new());
        store.increment_counter(
            names::HTTP_REQUESTS_BY_METHOD,
            1.0,
            Some((names::METHOD_DIM, "GET")),
        );

        let exporter = test_exporter(store);
        let points = exporter.collect_points().await;
        assert!(find(&points, names::HTTP_AVG_LATENCY_MS).is_none());
    }

    #[tokio::test]
    async fn unreachable_collector_does_not_abort_the_tick() {
        let store = Arc::new(MetricStore::new());
        store.increment_counter(names::HTTP_REQUESTS_TOTAL, 1.0, None);

        let exporter = test_exporter(store.clone());
        // Every push fails against the unroutable endpoint; the tick must
        // still complete and leave cumulative state untouched.
        exporter.export_tick().await;
        assert_eq!(
            store.snapshot(Duration::from_secs(300)).counter(names::HTTP_REQUESTS_TOTAL),
            1.0
        );
    }
}
