//! Speech translation relay server
//!
//! WebSocket transport, session hub, per-language pipelines, and the HTTP
//! control plane.

pub mod http;
pub mod hub;
pub mod metrics;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod ws;

pub use http::create_router;
pub use hub::SessionHub;
pub use metrics::{init_metrics, MetricsSnapshot, RelayMetrics};
pub use session::{Listener, SessionHandle};
pub use state::AppState;
pub use ws::{ClientEvent, ServerEvent};
