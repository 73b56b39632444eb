//! Prometheus metrics for shiftboard
//!
//! This module provides metrics tracking for:
//! - Scheduling: shift mutations by operation and outcome, lock toggles
//! - Realtime: connected subscribers, published/relayed/dropped events
//! - Dispatch: queue admission, notifications written, webhook deliveries
//! - API: request counts and latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct SchedulingMetrics {
    shift_operations: CounterVec,
    lock_changes: CounterVec,
}

struct RealtimeMetrics {
    subscribers: Gauge,
    published: CounterVec,
    relayed_in: Counter,
    relay_errors: Counter,
    dropped: Counter,
}

struct DispatchMetrics {
    jobs: CounterVec,
    notifications: CounterVec,
    webhook_deliveries: CounterVec,
    webhook_duration: HistogramVec,
}

struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

static SCHEDULING_METRICS: OnceLock<SchedulingMetrics> = OnceLock::new();
static REALTIME_METRICS: OnceLock<RealtimeMetrics> = OnceLock::new();
static DISPATCH_METRICS: OnceLock<DispatchMetrics> = OnceLock::new();
static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Registration happens against the default registry, once per process.
/// Repeated calls return `Ok(())` without touching the registry.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = shiftboard::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let scheduling = SchedulingMetrics {
        shift_operations: register_counter_vec!(
            "shiftboard_shift_operations_total",
            "Shift mutations by operation and outcome",
            &["operation", "outcome"]
        )?,
        lock_changes: register_counter_vec!(
            "shiftboard_event_lock_changes_total",
            "Event lock state transitions",
            &["state"]
        )?,
    };

    let realtime = RealtimeMetrics {
        subscribers: register_gauge!(
            "shiftboard_realtime_subscribers",
            "Currently registered realtime subscribers"
        )?,
        published: register_counter_vec!(
            "shiftboard_realtime_published_total",
            "Events published by this instance",
            &["type"]
        )?,
        relayed_in: register_counter!(
            "shiftboard_realtime_relayed_in_total",
            "Events received from other instances through the relay"
        )?,
        relay_errors: register_counter!(
            "shiftboard_realtime_relay_errors_total",
            "Failed relay publishes and lost relay subscriptions"
        )?,
        dropped: register_counter!(
            "shiftboard_realtime_dropped_total",
            "Events dropped from slow subscriber buffers"
        )?,
    };

    let dispatch = DispatchMetrics {
        jobs: register_counter_vec!(
            "shiftboard_dispatch_jobs_total",
            "Dispatch jobs by admission outcome",
            &["outcome"]
        )?,
        notifications: register_counter_vec!(
            "shiftboard_notifications_created_total",
            "In-app notifications written",
            &["trigger"]
        )?,
        webhook_deliveries: register_counter_vec!(
            "shiftboard_webhook_deliveries_total",
            "Webhook delivery attempts",
            &["format", "outcome"]
        )?,
        webhook_duration: register_histogram_vec!(
            "shiftboard_webhook_duration_seconds",
            "Webhook delivery duration in seconds",
            &["format"],
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let api = ApiMetrics {
        requests: register_counter_vec!(
            "shiftboard_api_requests_total",
            "Total API requests",
            &["endpoint", "status"]
        )?,
        duration: register_histogram_vec!(
            "shiftboard_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        )?,
    };

    SCHEDULING_METRICS
        .set(scheduling)
        .map_err(|_| "Scheduling metrics already initialized")?;
    REALTIME_METRICS
        .set(realtime)
        .map_err(|_| "Realtime metrics already initialized")?;
    DISPATCH_METRICS
        .set(dispatch)
        .map_err(|_| "Dispatch metrics already initialized")?;
    API_METRICS
        .set(api)
        .map_err(|_| "API metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULING_METRICS.get().is_some() && API_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a shift mutation (`create`/`update`/`delete`) and its outcome label
pub fn record_shift_operation(operation: &str, outcome: &str) {
    if let Some(m) = SCHEDULING_METRICS.get() {
        m.shift_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }
}

pub fn record_lock_change(locked: bool) {
    if let Some(m) = SCHEDULING_METRICS.get() {
        let state = if locked { "locked" } else { "unlocked" };
        m.lock_changes.with_label_values(&[state]).inc();
    }
}

pub fn subscriber_added() {
    if let Some(m) = REALTIME_METRICS.get() {
        m.subscribers.inc();
    }
}

pub fn subscribers_removed(count: usize) {
    if let Some(m) = REALTIME_METRICS.get() {
        m.subscribers.sub(count as f64);
    }
}

pub fn record_published(event_type: &str) {
    if let Some(m) = REALTIME_METRICS.get() {
        m.published.with_label_values(&[event_type]).inc();
    }
}

pub fn record_relayed_in() {
    if let Some(m) = REALTIME_METRICS.get() {
        m.relayed_in.inc();
    }
}

pub fn record_relay_error() {
    if let Some(m) = REALTIME_METRICS.get() {
        m.relay_errors.inc();
    }
}

/// Relay failures recorded so far; zero before initialization
pub fn relay_error_count() -> u64 {
    REALTIME_METRICS
        .get()
        .map_or(0, |m| m.relay_errors.get() as u64)
}

pub fn record_dropped(count: u64) {
    if let Some(m) = REALTIME_METRICS.get() {
        m.dropped.inc_by(count as f64);
    }
}

/// Record queue admission (`queued`, `dropped`, `closed`)
pub fn record_dispatch_job(outcome: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.jobs.with_label_values(&[outcome]).inc();
    }
}

pub fn record_notification(trigger: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.notifications.with_label_values(&[trigger]).inc();
    }
}

/// Record a webhook delivery
pub fn record_webhook_delivery(format: &str, success: bool, duration_secs: f64) {
    let Some(m) = DISPATCH_METRICS.get() else {
        return;
    };

    let outcome = if success { "success" } else { "failure" };
    m.webhook_deliveries
        .with_label_values(&[format, outcome])
        .inc();
    m.webhook_duration
        .with_label_values(&[format])
        .observe(duration_secs);
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================
