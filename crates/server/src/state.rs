//! Application state

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use speech_relay_config::Settings;

use crate::hub::SessionHub;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub hub: SessionHub,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, hub: SessionHub, prometheus: PrometheusHandle) -> Self {
        Self {
            settings,
            hub,
            prometheus,
        }
    }
}
