//! Infrastructure layer: concrete implementations of the domain interfaces
//! and the wire format.

pub mod dto;
pub mod media;
pub mod message_pusher;
pub mod repository;
