//! Lockstep sync server library.
//!
//! Keeps independently-clocked media players on a local network starting,
//! pausing and seeking the same media within a shared tolerance. Players
//! connect over WebSocket; playback is controlled over HTTP.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
