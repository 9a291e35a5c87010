//! # Prometheus Metrics
//!
//! Operational counters for registration, login, and document traffic,
//! served at `/metrics` on the dedicated metrics port.
//!
//! Login failures are labelled with the internal failure kind. The HTTP
//! response for every kind is the same 401; this is the only place the
//! difference is visible.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// All metric handles for the server. Cloning shares the underlying metrics.
#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    /// Successful registrations.
    pub registrations_total: IntCounter,
    /// Failed registrations by reason (`validation`, `conflict`, `internal`).
    pub registration_failures_total: IntCounterVec,
    /// Successful logins.
    pub logins_total: IntCounter,
    /// Failed logins by internal failure kind.
    pub login_failures_total: IntCounterVec,
    /// Sessions revoked through `/logout`.
    pub logouts_total: IntCounter,
    /// PDFs accepted by the document store.
    pub documents_uploaded_total: IntCounter,
    /// Wall time of keypair + certificate issuance.
    pub issuance_duration_seconds: Histogram,
}

impl ServerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("firma".into()), None)
            .expect("failed to create prometheus registry");

        let registrations_total =
            IntCounter::new("registrations_total", "Total successful registrations")
                .expect("metric creation");
        registry
            .register(Box::new(registrations_total.clone()))
            .expect("metric registration");

        let registration_failures_total = IntCounterVec::new(
            Opts::new(
                "registration_failures_total",
                "Total rejected registrations by reason",
            ),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(registration_failures_total.clone()))
            .expect("metric registration");

        let logins_total =
            IntCounter::new("logins_total", "Total successful logins").expect("metric creation");
        registry
            .register(Box::new(logins_total.clone()))
            .expect("metric registration");

        let login_failures_total = IntCounterVec::new(
            Opts::new("login_failures_total", "Total failed logins by reason"),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(login_failures_total.clone()))
            .expect("metric registration");

        let logouts_total =
            IntCounter::new("logouts_total", "Total revoked sessions").expect("metric creation");
        registry
            .register(Box::new(logouts_total.clone()))
            .expect("metric registration");

        let documents_uploaded_total = IntCounter::new(
            "documents_uploaded_total",
            "Total signed documents stored",
        )
        .expect("metric creation");
        registry
            .register(Box::new(documents_uploaded_total.clone()))
            .expect("metric registration");

        let issuance_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "issuance_duration_seconds",
                "Keypair and certificate issuance latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(issuance_duration_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            registrations_total,
            registration_failures_total,
            logins_total,
            login_failures_total,
            logouts_total,
            documents_uploaded_total,
            issuance_duration_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<ServerMetrics>;

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
