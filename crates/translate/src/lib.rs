//! Translation providers for the speech translation relay.
//!
//! A translator failure is never fatal to a transcript: callers fall back to
//! echoing the source text per target (`speech_relay_core::echo_targets`).

mod cache;
mod echo;
mod http;

pub use cache::CachedTranslator;
pub use echo::EchoTranslator;
pub use http::{HttpTranslator, HttpTranslatorConfig};

use speech_relay_config::TranslatorSettings;
use speech_relay_core::Translator;
use std::sync::Arc;
use std::time::Duration;

/// Create the translator stack from settings.
///
/// An empty endpoint selects the echo translator (pass-through); otherwise
/// the HTTP client is used, wrapped in the TTL cache when caching is enabled.
pub fn create_translator(settings: &TranslatorSettings) -> Arc<dyn Translator> {
    if settings.endpoint.is_empty() {
        tracing::info!("No translator endpoint configured, using echo translator");
        return Arc::new(EchoTranslator::new());
    }

    let inner: Arc<dyn Translator> = Arc::new(HttpTranslator::new(HttpTranslatorConfig {
        endpoint: settings.endpoint.clone(),
        request_timeout: Duration::from_millis(settings.request_timeout_ms),
        detect_timeout: Duration::from_millis(settings.detect_timeout_ms),
    }));

    if settings.cache_enabled {
        tracing::info!(
            endpoint = %settings.endpoint,
            ttl_ms = settings.cache_ttl_ms,
            "Using HTTP translator with TTL cache"
        );
        Arc::new(CachedTranslator::new(
            inner,
            Duration::from_millis(settings.cache_ttl_ms),
            settings.cache_capacity,
        ))
    } else {
        tracing::info!(endpoint = %settings.endpoint, "Using HTTP translator (no cache)");
        inner
    }
}
