//! Utilities shared by the Lockstep server and player binaries.

pub mod logger;
pub mod time;
