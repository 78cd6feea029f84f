//! Prometheus recorder and metric names

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder.
///
/// Call once at startup, before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Client connections accepted (counter, labels: tenant)
pub const CONNECTIONS_TOTAL: &str = "rdpgate_connections_total";
/// Client connections currently bridged (gauge, labels: tenant)
pub const CONNECTIONS_ACTIVE: &str = "rdpgate_connections_active";
/// Open rooms (gauge)
pub const ROOMS_ACTIVE: &str = "rdpgate_rooms_active";
/// Side-channel commands dispatched (counter, labels: op)
pub const COMMANDS_TOTAL: &str = "rdpgate_commands_total";
/// Broadcast signals skipped because one was already pending (counter)
pub const BROADCAST_SKIPPED_TOTAL: &str = "rdpgate_broadcast_skipped_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn test_metric_names_are_snake_case() {
        for name in [
            CONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            ROOMS_ACTIVE,
            COMMANDS_TOTAL,
            BROADCAST_SKIPPED_TOTAL,
        ] {
            assert!(name.starts_with("rdpgate_"));
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
