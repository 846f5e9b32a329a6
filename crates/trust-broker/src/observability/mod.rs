//! Observability for the trust broker.
//!
//! Metrics are recorded through the `metrics` facade and exported by the
//! Prometheus recorder installed in [`metrics::init_metrics_recorder`].

pub mod metrics;
