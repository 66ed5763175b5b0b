//! Domain layer: entities, value objects, pure timing rules and the
//! interfaces the usecase layer depends on.

pub mod command;
pub mod drift;
pub mod entity;
pub mod error;
pub mod event;
pub mod media;
pub mod message_pusher;
pub mod repository;
pub mod state;
pub mod timing;
pub mod value_object;

pub use command::{CommandKind, SyncCommand};
pub use drift::{ClientDrift, DriftAssessment, PositionSample, assess_drift};
pub use entity::{Client, ClientMetadata, ClientStatus, VideoReport};
pub use error::{MessagePushError, RepositoryError, ResolveError, ValueObjectError};
pub use event::{DisconnectReason, EngineEvent};
pub use media::MediaResolver;
pub use message_pusher::{MessagePusher, PusherChannel};
pub use repository::ClientRepository;
pub use state::{CurrentVideo, PendingVideo, PlaybackPhase, SyncState};
pub use timing::ClockSample;
pub use value_object::{CheckId, ClientId, ClientRole, CommandId, PingId, Timestamp};

#[cfg(test)]
pub use message_pusher::MockMessagePusher;
