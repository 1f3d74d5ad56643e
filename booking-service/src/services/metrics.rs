use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static BOOKING_ADMISSIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PAYMENT_CONFIRMATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Install the global recorder and register the booking counters.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);

    let registry = Registry::new();

    let admissions = IntCounterVec::new(
        Opts::new(
            "booking_admissions_total",
            "Booking admission attempts by entry path and outcome",
        ),
        &["path", "outcome"],
    )?;

    let confirmations = IntCounterVec::new(
        Opts::new(
            "payment_confirmations_total",
            "Payment confirmations by gateway and outcome",
        ),
        &["gateway", "outcome"],
    )?;

    registry.register(Box::new(admissions.clone()))?;
    registry.register(Box::new(confirmations.clone()))?;

    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = BOOKING_ADMISSIONS_TOTAL.set(admissions);
    let _ = PAYMENT_CONFIRMATIONS_TOTAL.set(confirmations);
    Ok(())
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// `path` is `full`, `minimal` or `prepaid`.
pub fn record_admission(path: &str, outcome: &str) {
    if let Some(counter) = BOOKING_ADMISSIONS_TOTAL.get() {
        counter.with_label_values(&[path, outcome]).inc();
    }
}

pub fn record_confirmation(gateway: &str, outcome: &str) {
    if let Some(counter) = PAYMENT_CONFIRMATIONS_TOTAL.get() {
        counter.with_label_values(&[gateway, outcome]).inc();
    }
}
