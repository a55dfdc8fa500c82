//! Inline proxy surfaces: HTTP forwarding and WebSocket termination.

pub mod http;
pub mod ws;

pub use http::{proxy_handler, BlockedResponse};
pub use ws::{ws_handler, WsConnectionTracker};
