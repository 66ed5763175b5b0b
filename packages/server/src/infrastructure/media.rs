//! Direct URL media resolver.

use async_trait::async_trait;

use crate::domain::{MediaResolver, ResolveError};

const SUPPORTED_SCHEMES: [&str; 3] = ["http://", "https://", "file://"];

/// Accepts references that already are playable URLs
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectUrlResolver;

#[async_trait]
impl MediaResolver for DirectUrlResolver {
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ResolveError::Empty);
        }
        let lower = reference.to_ascii_lowercase();
        if SUPPORTED_SCHEMES
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            Ok(reference.to_string())
        } else {
            Err(ResolveError::Unsupported(reference.to_string()))
        }
    }
}
