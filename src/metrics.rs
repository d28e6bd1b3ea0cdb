use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};

// --- Relay Metrics ---

pub static RECORDS_MAPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "deg_ledger_relay_records_mapped_total",
        "Total ledger records mapped from confirmation callbacks"
    )
    .expect("records_mapped counter")
});

pub static DELIVERIES_SUCCEEDED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "deg_ledger_relay_deliveries_succeeded_total",
        "Total records accepted by the ledger"
    )
    .expect("deliveries_succeeded counter")
});

pub static DELIVERIES_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "deg_ledger_relay_deliveries_failed_total",
        "Total records that exhausted their delivery budget"
    )
    .expect("deliveries_failed counter")
});

pub static DELIVERY_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "deg_ledger_relay_delivery_retries_total",
        "Total retry attempts across all deliveries"
    )
    .expect("delivery_retries counter")
});

pub static DELIVERIES_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "deg_ledger_relay_deliveries_in_flight",
        "Delivery tasks currently outstanding"
    )
    .expect("deliveries_in_flight gauge")
});

pub static DELIVERY_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "deg_ledger_relay_delivery_seconds",
        "Wall time of one delivery including retries",
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("delivery_seconds histogram")
});

pub fn inc_records_mapped(count: u64) {
    RECORDS_MAPPED.inc_by(count);
}

pub fn inc_deliveries_succeeded() {
    DELIVERIES_SUCCEEDED.inc();
}

pub fn inc_deliveries_failed() {
    DELIVERIES_FAILED.inc();
}

pub fn inc_delivery_retries() {
    DELIVERY_RETRIES.inc();
}

pub fn inc_deliveries_in_flight() {
    DELIVERIES_IN_FLIGHT.inc();
}

pub fn dec_deliveries_in_flight() {
    DELIVERIES_IN_FLIGHT.dec();
}

pub fn observe_delivery_seconds(duration_sec: f64) {
    DELIVERY_LATENCY.observe(duration_sec);
}
