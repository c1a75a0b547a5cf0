//! Controller metrics.
//!
//! Gauges track whether a graph evaluation is in progress and how much
//! work is queued on the worker pool; histograms track per-node
//! evaluation latency and how long dependants wait before the pool picks
//! them up.

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::register_gauge;
use prometheus::register_histogram;
use prometheus::register_histogram_vec;
use prometheus::register_int_gauge;
use prometheus::Gauge;
use prometheus::Histogram;
use prometheus::HistogramVec;
use prometheus::IntGauge;

lazy_static! {
    /// 1 while an apply pass or a dependant batch is being evaluated.
    pub static ref CONTROLLER_EVALUATION: Gauge = register_gauge!(
        "controller_evaluating",
        "Tracks whether the controller is currently evaluating nodes"
    )
    .expect("metric can not be created");

    pub static ref EVALUATION_QUEUE_SIZE: IntGauge = register_int_gauge!(
        "controller_evaluation_queue_size",
        "Number of node evaluations waiting on the worker pool"
    )
    .expect("metric can not be created");

    pub static ref NODE_EVALUATION_DURATION: HistogramVec = register_histogram_vec!(
        "controller_node_evaluation_duration_seconds",
        "Histogram of per-node evaluation duration in seconds",
        &["node_id"],
        exponential_buckets(0.001, 2.0, 14).unwrap()
    )
    .expect("metric can not be created");

    pub static ref DEPENDENCY_WAIT_SECONDS: Histogram = register_histogram!(
        "controller_dependency_wait_seconds",
        "Histogram of time between an export change and the dependant evaluation starting",
        exponential_buckets(0.001, 2.0, 14).unwrap()
    )
    .expect("metric can not be created");
}
