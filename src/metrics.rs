// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Metrics: a narrow [`MetricsSink`] trait so the hot path never depends on
//! `prometheus` directly, backed by [`PrometheusSink`] in production and a
//! no-op sink in tests.

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// What the gateway core reports as it runs. Kept narrow and allocation-free
/// on the hot path; implementations decide how to aggregate and export.
pub trait MetricsSink: Send + Sync {
    /// A connection was accepted.
    fn connection_opened(&self);
    /// A connection was closed, having lived `duration`.
    fn connection_closed(&self, duration: Duration);
    /// A request completed and got `status` back to the client.
    fn request_completed(&self, status: u16, latency: Duration);
    /// A middleware in the chain rejected a request.
    fn middleware_rejected(&self, middleware: &str);
    /// An upstream connection attempt failed.
    fn upstream_failure(&self, target: &str);
}

/// A [`MetricsSink`] that discards everything, for tests and benchmarks.
#[derive(Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn connection_opened(&self) {}
    fn connection_closed(&self, _duration: Duration) {}
    fn request_completed(&self, _status: u16, _latency: Duration) {}
    fn middleware_rejected(&self, _middleware: &str) {}
    fn upstream_failure(&self, _target: &str) {}
}

/// `prometheus`-backed metrics, exported as the text format on the gateway's
/// own metrics endpoint.
pub struct PrometheusSink {
    registry: Registry,
    connections_opened: IntCounter,
    connections_active: IntGauge,
    connection_duration: Histogram,
    requests_total: IntCounterVec,
    request_latency: Histogram,
    middleware_rejections: IntCounterVec,
    upstream_failures: IntCounterVec,
}

impl PrometheusSink {
    /// Registers every metric the gateway exports into a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_opened = IntCounter::new("rask_connections_opened_total", "Connections accepted")?;
        let connections_active = IntGauge::new("rask_connections_active", "Currently open connections")?;
        let connection_duration = Histogram::with_opts(HistogramOpts::new(
            "rask_connection_duration_seconds",
            "Connection lifetime",
        ))?;
        let requests_total = IntCounterVec::new(
            Opts::new("rask_requests_total", "Completed requests by status class"),
            &["status"],
        )?;
        let request_latency = Histogram::with_opts(HistogramOpts::new(
            "rask_request_latency_seconds",
            "Request handling latency",
        ))?;
        let middleware_rejections = IntCounterVec::new(
            Opts::new("rask_middleware_rejections_total", "Requests rejected by middleware"),
            &["middleware"],
        )?;
        let upstream_failures = IntCounterVec::new(
            Opts::new("rask_upstream_failures_total", "Failed upstream connection attempts"),
            &["target"],
        )?;

        registry.register(Box::new(connections_opened.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(connection_duration.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(middleware_rejections.clone()))?;
        registry.register(Box::new(upstream_failures.clone()))?;

        Ok(PrometheusSink {
            registry,
            connections_opened,
            connections_active,
            connection_duration,
            requests_total,
            request_latency,
            middleware_rejections,
            upstream_failures,
        })
    }

    /// Renders every registered metric in Prometheus text exposition format.
    pub fn render(&self) -> Vec<u8> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf).expect("metric encoding never fails");
        buf
    }
}

impl MetricsSink for PrometheusSink {
    fn connection_opened(&self) {
        self.connections_opened.inc();
        self.connections_active.inc();
    }

    fn connection_closed(&self, duration: Duration) {
        self.connections_active.dec();
        self.connection_duration.observe(duration.as_secs_f64());
    }

    fn request_completed(&self, status: u16, latency: Duration) {
        let class = format!("{}xx", status / 100);
        self.requests_total.with_label_values(&[&class]).inc();
        self.request_latency.observe(latency.as_secs_f64());
    }

    fn middleware_rejected(&self, middleware: &str) {
        self.middleware_rejections.with_label_values(&[middleware]).inc();
    }

    fn upstream_failure(&self, target: &str) {
        self.upstream_failures.with_label_values(&[target]).inc();
    }
}
