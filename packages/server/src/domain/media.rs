//! Media resolution boundary.
//!
//! The catalog layer turns a logical media reference into a playable URL
//! before `play` is invoked.

use async_trait::async_trait;

use super::ResolveError;

#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError>;
}
