use metrics::counter;
use std::net::SocketAddr;
use tracing::{info, warn};

pub const PICKUPS_SUBMITTED: &str = "pickups_submitted_total";
pub const PICKUP_STATUS_CHANGES: &str = "pickup_status_changes_total";
pub const ROUTES_BUILT: &str = "routes_built_total";
pub const INVOICES_PAID: &str = "invoices_paid_total";
pub const AUTH_FAILURES: &str = "auth_failures_total";

/// Install the Prometheus exporter on `port`. Counters are no-ops when no
/// exporter is installed.
pub fn init_metrics(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}

pub fn pickup_submitted() {
    counter!(PICKUPS_SUBMITTED).increment(1);
}

pub fn pickup_status_changed(status: &'static str) {
    counter!(PICKUP_STATUS_CHANGES, "status" => status).increment(1);
}

pub fn route_built(stops: usize) {
    counter!(ROUTES_BUILT).increment(1);
    metrics::histogram!("route_stops").record(stops as f64);
}

pub fn invoice_paid() {
    counter!(INVOICES_PAID).increment(1);
}

pub fn auth_failure(reason: &'static str) {
    counter!(AUTH_FAILURES, "reason" => reason).increment(1);
}
