use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus collectors of the coordinator.
///
/// Wrapped in an `Arc` and shared between the grid record and the metrics
/// server.
pub struct Metrics {
    pub registry: Registry,
    /// Requests sent to the worker context.
    pub requests_sent_total: IntCounter,
    /// Replies received, successful or not.
    pub responses_total: IntCounter,
    /// Requests that ended canceled instead of answered.
    pub cancels_total: IntCounter,
    /// Replies carrying an error.
    pub handler_errors_total: IntCounter,
    /// Cells currently held by the storage-id record.
    pub cells_in_record: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("grid_orchestrator".into()), None)?;

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry.register(Box::new(collector.clone()))?;
                collector
            }};
        }

        Ok(Self {
            requests_sent_total: reg!(IntCounter::new(
                "requests_sent_total",
                "Total number of requests sent to the grid worker"
            )?),
            responses_total: reg!(IntCounter::new(
                "responses_total",
                "Total number of replies received from the grid worker"
            )?),
            cancels_total: reg!(IntCounter::new(
                "cancels_total",
                "Total number of requests that were canceled"
            )?),
            handler_errors_total: reg!(IntCounter::new(
                "handler_errors_total",
                "Total number of replies that carried an error"
            )?),
            cells_in_record: reg!(IntGauge::new(
                "cells_in_record",
                "Number of cells in the coordinator's storage-id record"
            )?),
            registry,
        })
    }

    /// Serves the registry on `/metrics`.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let mut buffer = Vec::new();
                    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                        Ok(()) => String::from_utf8_lossy(&buffer).into_owned().into_response(),
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode metrics");
                            StatusCode::INTERNAL_SERVER_ERROR.into_response()
                        }
                    }
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectors_are_namespaced() {
        let metrics = Metrics::new().unwrap();
        metrics.requests_sent_total.inc();
        metrics.cells_in_record.set(7);

        let names: Vec<String> = metrics.registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"grid_orchestrator_requests_sent_total".to_string()));
        assert!(names.contains(&"grid_orchestrator_cells_in_record".to_string()));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn two_instances_do_not_collide() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.responses_total.inc();
        assert_eq!(b.responses_total.get(), 0);
    }
}
