use std::sync::Arc;

use crate::analytics::{ClickAggregator, ClickEvent, SourceMetadata};
use crate::links::LinkError;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub destination_url: String,
}

/// Maps short codes to destinations on the redirect hot path
///
/// Link state is read with `get_current` on every call, bypassing any cache;
/// active and expiry are judged here, per request.
pub struct Resolver {
    storage: Arc<dyn Storage>,
    clicks: Arc<ClickAggregator>,
}

impl Resolver {
    pub fn new(storage: Arc<dyn Storage>, clicks: Arc<ClickAggregator>) -> Self {
        Self { storage, clicks }
    }

    pub async fn resolve(
        &self,
        code: &str,
        source: SourceMetadata,
    ) -> Result<Resolution, LinkError> {
        self.resolve_at(code, source, chrono::Utc::now().timestamp())
            .await
    }

    /// Resolve as of `now` (Unix seconds). Expiry wins over the active flag.
    /// Exactly one click event is queued per successful resolution.
    pub async fn resolve_at(
        &self,
        code: &str,
        source: SourceMetadata,
        now: i64,
    ) -> Result<Resolution, LinkError> {
        let link = self
            .storage
            .get_current(code)
            .await?
            .ok_or(LinkError::NotFound)?;

        if link.is_expired_at(now) {
            return Err(LinkError::Expired);
        }
        if !link.is_active {
            return Err(LinkError::Inactive);
        }

        // Fire and forget; a full queue only costs the click
        self.clicks.record(ClickEvent::new(code, source));

        Ok(Resolution {
            destination_url: link.destination_url,
        })
    }
}
