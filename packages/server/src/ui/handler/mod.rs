//! Request handlers.

mod http;
mod websocket;

pub use http::{
    debug_sync_state, get_client, get_playback, health_check, list_clients, pause, play, seek,
    stop,
};
pub use websocket::websocket_handler;
