//! Data Transfer Objects (DTOs) for Lockstep.
//!
//! DTOs are organized by protocol:
//! - `websocket`: messages exchanged over each device connection
//! - `http`: HTTP API request and response bodies

pub mod conversion;
pub mod http;
pub mod websocket;
