//! Prometheus metrics recorder and `/metrics` rendering.
//!
//! Metric names live in `wiretap_core::metrics`; this module only owns the
//! exporter.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus recorder (global).
///
/// Must run once, before the pipeline records anything.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_local_recorder() {
        // Local recorder; installing globally would leak across tests.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let output = render(&handle);
        assert!(!output.contains("capture_records_written_total"));
    }
}
