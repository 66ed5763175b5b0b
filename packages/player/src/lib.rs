//! Headless reference player for the Lockstep synchronization engine.
//!
//! Speaks the same WebSocket protocol as a real display: it answers clock
//! probes, reports readiness after a simulated preload, fires scheduled
//! transitions against a local playback model and answers drift checks.

pub mod clock;
pub mod error;
pub mod playback;
pub mod runner;
pub mod session;

pub use error::PlayerError;
pub use runner::run_player;
pub use session::PlayerOptions;
