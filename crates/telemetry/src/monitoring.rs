// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Optional push-gateway metrics.
//!
//! Metrics are collected into a private registry and pushed to a Prometheus
//! push-gateway only when both `PUSHGATEWAY_IP` and `PUSHGATEWAY_PORT` are
//! set in the environment. `MODELRUNNER_CONTAINER_NAME` names the job.
//! Without a gateway the counters still work locally and
//! [`push`](Monitoring::push) is a no-op, so instrumented code never has to
//! care whether monitoring is configured.

use parking_lot::Mutex;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::OnceLock;

static GLOBAL: OnceLock<Monitoring> = OnceLock::new();

/// Process-wide metric registry with best-effort push-gateway delivery.
pub struct Monitoring {
    enabled: bool,
    gateway: Option<String>,
    job: String,
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
    gauges: Mutex<HashMap<String, IntGaugeVec>>,
}

impl Monitoring {
    /// The process-wide instance, configured from the environment on first
    /// use.
    pub fn global() -> &'static Monitoring {
        GLOBAL.get_or_init(Monitoring::from_env)
    }

    fn from_env() -> Self {
        let ip = std::env::var("PUSHGATEWAY_IP").ok();
        let port = std::env::var("PUSHGATEWAY_PORT").ok();
        let gateway = match (ip, port) {
            (Some(ip), Some(port)) if !ip.is_empty() && !port.is_empty() => {
                Some(format!("{ip}:{port}"))
            }
            _ => None,
        };
        let job = std::env::var("MODELRUNNER_CONTAINER_NAME")
            .ok()
            .filter(|name| !name.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "modelrunner".to_owned());
        Monitoring {
            enabled: gateway.is_some(),
            gateway,
            job,
            registry: Registry::new(),
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a push-gateway is configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the counter vector registered under `name`, creating and
    /// registering it on first use.
    pub fn counter(&self, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
        let mut counters = self.counters.lock();
        if let Some(existing) = counters.get(name) {
            return existing.clone();
        }
        let counter = IntCounterVec::new(Opts::new(name, help), labels)
            .unwrap_or_else(|_| panic_on_bad_metric(name));
        if let Err(error) = self.registry.register(Box::new(counter.clone())) {
            tracing::warn!(%error, name, "failed to register counter");
        }
        let _ = counters.insert(name.to_owned(), counter.clone());
        counter
    }

    /// Returns the gauge vector registered under `name`, creating and
    /// registering it on first use.
    pub fn gauge(&self, name: &str, help: &str, labels: &[&str]) -> IntGaugeVec {
        let mut gauges = self.gauges.lock();
        if let Some(existing) = gauges.get(name) {
            return existing.clone();
        }
        let gauge = IntGaugeVec::new(Opts::new(name, help), labels)
            .unwrap_or_else(|_| panic_on_bad_metric(name));
        if let Err(error) = self.registry.register(Box::new(gauge.clone())) {
            tracing::warn!(%error, name, "failed to register gauge");
        }
        let _ = gauges.insert(name.to_owned(), gauge.clone());
        gauge
    }

    /// Pushes the registry to the configured gateway, if any.
    ///
    /// Failures are logged and swallowed; metric delivery is best-effort.
    pub fn push(&self) {
        let Some(gateway) = &self.gateway else {
            return;
        };
        let result = prometheus::push_metrics(
            &self.job,
            HashMap::new(),
            gateway,
            self.registry.gather(),
            None,
        );
        if let Err(error) = result {
            tracing::warn!(%error, gateway, "failed to push metrics");
        }
    }
}

fn panic_on_bad_metric(name: &str) -> ! {
    // Metric names are compile-time constants; a bad one is a programming
    // error, not a runtime condition.
    panic!("invalid metric definition: {name}")
}
