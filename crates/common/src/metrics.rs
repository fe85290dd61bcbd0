use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Stock operation metrics
    pub static ref STOCK_OPERATION_COUNTER: CounterVec = register_counter_vec!(
        "stock_operations_total",
        "Total number of stock operations processed",
        &["operation", "status"]
    )
    .expect("metric cannot be created");

    pub static ref STOCK_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "stock_operation_duration_seconds",
        "Stock operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("metric cannot be created");

    // Reservation lifecycle
    pub static ref RESERVATION_TRANSITIONS: CounterVec = register_counter_vec!(
        "stock_reservation_transitions_total",
        "Reservations moved into a status",
        &["status"]
    )
    .expect("metric cannot be created");

    pub static ref INSUFFICIENT_STOCK_COUNTER: CounterVec = register_counter_vec!(
        "stock_insufficient_total",
        "Requests rejected for insufficient stock",
        &["operation"]
    )
    .expect("metric cannot be created");

    // Ledger/cache consistency
    pub static ref CACHE_SYNC_FAILURES: CounterVec = register_counter_vec!(
        "stock_cache_sync_failures_total",
        "Product cache writes that failed after a ledger change",
        &["operation"]
    )
    .expect("metric cannot be created");

    pub static ref INVARIANT_VIOLATIONS: CounterVec = register_counter_vec!(
        "stock_invariant_violations_total",
        "Inventory invariant violations detected and corrected",
        &["kind"]
    )
    .expect("metric cannot be created");

    pub static ref SYNC_SWEEP_COUNTER: CounterVec = register_counter_vec!(
        "stock_sync_products_total",
        "Products visited by consistency sweeps",
        &["outcome"]
    )
    .expect("metric cannot be created");
}

/// Get all metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Helper function to record a stock operation
pub fn record_stock_operation(operation: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "error" };
    STOCK_OPERATION_COUNTER
        .with_label_values(&[operation, status])
        .inc();
    STOCK_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Helper function to record reservations entering a status
pub fn record_reservation_transition(status: &str, count: usize) {
    if count == 0 {
        return;
    }
    RESERVATION_TRANSITIONS
        .with_label_values(&[status])
        .inc_by(count as f64);
}

pub fn record_insufficient_stock(operation: &str) {
    INSUFFICIENT_STOCK_COUNTER
        .with_label_values(&[operation])
        .inc();
}

pub fn record_cache_sync_failure(operation: &str) {
    CACHE_SYNC_FAILURES.with_label_values(&[operation]).inc();
}

pub fn record_invariant_violation(kind: &str) {
    INVARIANT_VIOLATIONS.with_label_values(&[kind]).inc();
}

/// Outcome is one of `consistent`, `fixed` or `error`
pub fn record_sync_outcome(outcome: &str) {
    SYNC_SWEEP_COUNTER.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stock_operation() {
        record_stock_operation("atomic_reserve", true, 0.01);
        let metrics = gather_metrics().unwrap();
        assert!(metrics.contains("stock_operations_total"));
        assert!(metrics.contains("atomic_reserve"));
    }

    #[test]
    fn test_record_reservation_transition_skips_zero() {
        record_reservation_transition("expired", 0);
        record_reservation_transition("released", 2);
        let metrics = gather_metrics().unwrap();
        assert!(metrics.contains("stock_reservation_transitions_total"));
    }

    #[test]
    fn test_record_invariant_violation() {
        record_invariant_violation("reserved_exceeds_on_hand");
        let metrics = gather_metrics().unwrap();
        assert!(metrics.contains("stock_invariant_violations_total"));
    }
}
