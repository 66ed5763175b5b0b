//! UseCase layer: the Synchronization Engine and its collaborating services.

pub mod client_registry;
pub mod clock_sync;
pub mod command_scheduler;
pub mod drift_monitor;
pub mod error;
pub mod liveness;
pub mod readiness;
pub mod sync_engine;
pub mod sync_state;

pub use client_registry::{ClientRegistry, Registration};
pub use clock_sync::ClockSynchronizer;
pub use command_scheduler::{CommandScheduler, TransitionOutcome, TransitionReport};
pub use drift_monitor::{DriftMonitor, DriftTick, SkipReason};
pub use error::{PlaybackError, RegisterError};
pub use liveness::{LivenessMonitor, LivenessTick};
pub use readiness::{ReadinessOutcome, ReadinessTracker};
pub use sync_engine::{PlayRequest, SyncEngine};
pub use sync_state::SyncStateStore;
