use std::fmt;
use std::sync::Arc;

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

struct MetricsInner {
    registry: Registry,
    filters_pushed: CounterVec,
    filters_skipped: CounterVec,
    filters_failed: CounterVec,
    streams_produced: CounterVec,
    rows_produced: CounterVec,
    statistics_requests: CounterVec,
    releases_queued: CounterVec,
    releases_flushed: CounterVec,
    pending_releases: GaugeVec,
    registered_factories: GaugeVec,
}

/// Outcome label for statistics requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOutcome {
    Precomputed,
    Computed,
    Discarded,
    Unsupported,
    Disabled,
}

impl StatsOutcome {
    fn label(self) -> &'static str {
        match self {
            StatsOutcome::Precomputed => "precomputed",
            StatsOutcome::Computed => "computed",
            StatsOutcome::Discarded => "discarded",
            StatsOutcome::Unsupported => "unsupported",
            StatsOutcome::Disabled => "disabled",
        }
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_filters(&self, view: &str, pushed: u64, skipped: u64, failed: u64) {
        let labels = [view];
        self.inner
            .filters_pushed
            .with_label_values(&labels)
            .inc_by(pushed as f64);
        self.inner
            .filters_skipped
            .with_label_values(&labels)
            .inc_by(skipped as f64);
        self.inner
            .filters_failed
            .with_label_values(&labels)
            .inc_by(failed as f64);
    }

    pub fn inc_streams_produced(&self, view: &str) {
        self.inner
            .streams_produced
            .with_label_values(&[view])
            .inc();
    }

    pub fn add_rows_produced(&self, view: &str, rows: u64) {
        self.inner
            .rows_produced
            .with_label_values(&[view])
            .inc_by(rows as f64);
    }

    pub fn record_statistics(&self, view: &str, outcome: StatsOutcome) {
        self.inner
            .statistics_requests
            .with_label_values(&[view, outcome.label()])
            .inc();
    }

    pub fn inc_releases_queued(&self, view: &str) {
        self.inner
            .releases_queued
            .with_label_values(&[view])
            .inc();
    }

    pub fn add_releases_flushed(&self, view: &str, released: u64) {
        self.inner
            .releases_flushed
            .with_label_values(&[view])
            .inc_by(released as f64);
    }

    pub fn set_pending_releases(&self, view: &str, pending: u64) {
        self.inner
            .pending_releases
            .with_label_values(&[view])
            .set(pending as f64);
    }

    pub fn set_registered_factories(&self, kind: &str, count: u64) {
        self.inner
            .registered_factories
            .with_label_values(&[kind])
            .set(count as f64);
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let filters_pushed = counter_vec(
            &registry,
            "scanbridge_filters_pushed_total",
            "Column filters translated and pushed into the source scan",
            &["view"],
        );
        let filters_skipped = counter_vec(
            &registry,
            "scanbridge_filters_skipped_total",
            "Column filters left to the engine because the column type is not pushable",
            &["view"],
        );
        let filters_failed = counter_vec(
            &registry,
            "scanbridge_filters_failed_total",
            "Column filters whose translation failed and degraded to no filter",
            &["view"],
        );
        let streams_produced = counter_vec(
            &registry,
            "scanbridge_streams_produced_total",
            "Array streams exported to the engine",
            &["view"],
        );
        let rows_produced = counter_vec(
            &registry,
            "scanbridge_rows_produced_total",
            "Rows delivered through exported streams",
            &["view"],
        );
        let statistics_requests = counter_vec(
            &registry,
            "scanbridge_statistics_requests_total",
            "Column statistics requests by outcome",
            &["view", "outcome"],
        );
        let releases_queued = counter_vec(
            &registry,
            "scanbridge_releases_queued_total",
            "Deferred release tokens queued",
            &["view"],
        );
        let releases_flushed = counter_vec(
            &registry,
            "scanbridge_releases_flushed_total",
            "Deferred release tokens forcibly flushed at close",
            &["view"],
        );
        let pending_releases = gauge_vec(
            &registry,
            "scanbridge_pending_releases",
            "Deferred release tokens not yet fired",
            &["view"],
        );
        let registered_factories = gauge_vec(
            &registry,
            "scanbridge_registered_factories",
            "Factories currently bound in the catalog",
            &["kind"],
        );

        Self {
            registry,
            filters_pushed,
            filters_skipped,
            filters_failed,
            streams_produced,
            rows_produced,
            statistics_requests,
            releases_queued,
            releases_flushed,
            pending_releases,
            registered_factories,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

#[cfg(test)]
mod tests {
    use super::{MetricsRegistry, StatsOutcome};

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_filters("trades", 2, 1, 0);
        let text = m.render_prometheus();
        assert!(text.contains("scanbridge_filters_pushed_total"));
        assert!(text.contains("trades"));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_filters("t", 1, 1, 1);
        m.inc_streams_produced("t");
        m.add_rows_produced("t", 10);
        m.record_statistics("t", StatsOutcome::Discarded);
        m.inc_releases_queued("t");
        m.add_releases_flushed("t", 1);
        m.set_pending_releases("t", 0);
        m.set_registered_factories("table", 1);
        let text = m.render_prometheus();

        assert!(text.contains("scanbridge_filters_pushed_total"));
        assert!(text.contains("scanbridge_filters_skipped_total"));
        assert!(text.contains("scanbridge_filters_failed_total"));
        assert!(text.contains("scanbridge_streams_produced_total"));
        assert!(text.contains("scanbridge_rows_produced_total"));
        assert!(text.contains("scanbridge_statistics_requests_total"));
        assert!(text.contains("outcome=\"discarded\""));
        assert!(text.contains("scanbridge_releases_queued_total"));
        assert!(text.contains("scanbridge_releases_flushed_total"));
        assert!(text.contains("scanbridge_pending_releases"));
        assert!(text.contains("scanbridge_registered_factories"));
    }
}
