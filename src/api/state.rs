//! Shared handler state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;

use super::auth::SessionStore;
use crate::config::Config;
use crate::services::{DocumentStore, ExtractionService, MemoryDocumentStore};
use crate::store::{MemoryStore, Store};

/// Request-independent settings handlers need.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub admin_password: String,
    pub admin_auth_required: bool,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl ApiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            admin_password: config.admin_password.clone(),
            admin_auth_required: config.admin_auth_required,
            session_ttl: Duration::from_secs(config.admin_session_ttl_secs),
            cookie_secure: config.cookie_secure,
            max_upload_bytes: config.max_upload_bytes,
            cors_origins: config.cors_origins.clone(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub documents: Arc<dyn DocumentStore>,
    pub extraction: Arc<ExtractionService>,
    pub sessions: SessionStore,
    pub settings: Arc<ApiSettings>,
    /// Present when the Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        documents: Arc<dyn DocumentStore>,
        extraction: ExtractionService,
        settings: ApiSettings,
    ) -> Self {
        Self {
            store,
            documents,
            extraction: Arc::new(extraction),
            sessions: SessionStore::new(),
            settings: Arc::new(settings),
            metrics: None,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// In-memory everything, extraction disabled.
    pub fn ephemeral(settings: ApiSettings) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDocumentStore::new()),
            ExtractionService::disabled(),
            settings,
        )
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_ready_toggle() {
        let state = AppState::ephemeral(ApiSettings::default());
        assert!(!state.is_ready());

        state.set_ready(true);
        assert!(state.is_ready());

        state.set_ready(false);
        assert!(!state.is_ready());
    }

    #[test]
    fn settings_follow_config() {
        let config = Config {
            admin_session_ttl_secs: 60,
            cookie_secure: true,
            ..Config::default()
        };
        let settings = ApiSettings::from_config(&config);
        assert_eq!(settings.session_ttl, Duration::from_secs(60));
        assert!(settings.cookie_secure);
        assert!(settings.admin_auth_required);
    }
}
