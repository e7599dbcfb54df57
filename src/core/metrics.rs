use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) const ATTEMPTS_STARTED: &str = "attempts_started_total";
pub(crate) const ATTEMPTS_SUBMITTED: &str = "attempts_submitted_total";
pub(crate) const ATTEMPTS_GRADED: &str = "attempts_graded_total";
pub(crate) const MANUAL_GRADES: &str = "manual_grades_total";
pub(crate) const LOCK_TIMEOUTS: &str = "lock_timeouts_total";

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
