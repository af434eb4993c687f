use std::sync::Arc;
use tracing::{info, warn};

use crate::config::CodeConfig;
use crate::cursor::{decode_cursor, encode_cursor, ListCursor};
use crate::links::{CodeGenerator, LinkError};
use crate::models::{CreateLinkRequest, Link, LinkSummary, UpdateLinkRequest};
use crate::storage::{Storage, StorageError};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

/// Link creation and lifecycle on top of the store
pub struct LinkService {
    storage: Arc<dyn Storage>,
    generator: CodeGenerator,
    code_length: usize,
}

/// Check that a destination is an absolute http(s) URL.
/// Returns the trimmed input unchanged so resolution yields exactly what was
/// submitted.
pub fn validate_destination(raw: &str) -> Result<String, LinkError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LinkError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let parsed = url::Url::parse(trimmed).map_err(|e| LinkError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LinkError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(LinkError::InvalidUrl("URL must have a host".to_string()));
    }

    Ok(trimmed.to_string())
}

impl LinkService {
    pub fn new(storage: Arc<dyn Storage>, generator: CodeGenerator, code_length: usize) -> Self {
        Self {
            storage,
            generator,
            code_length,
        }
    }

    pub fn from_config(storage: Arc<dyn Storage>, config: &CodeConfig) -> Self {
        Self::new(storage, CodeGenerator::from_config(config), config.length)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Create a link under a custom alias or a freshly generated code
    pub async fn create(&self, request: CreateLinkRequest) -> Result<Link, LinkError> {
        let destination = validate_destination(&request.destination_url)?;

        if let Some(expires_at) = request.expires_at {
            if expires_at <= chrono::Utc::now().timestamp() {
                return Err(LinkError::InvalidExpiry(
                    "expiresAt must be in the future".to_string(),
                ));
            }
        }

        let owner_id = request.owner_id.as_deref().filter(|o| !o.is_empty());

        match request.alias.as_deref() {
            Some(alias) => {
                let code = self.generator.reserve(self.storage.as_ref(), alias).await?;
                self.storage
                    .create_with_code(&code, &destination, owner_id, request.expires_at)
                    .await
                    .map_err(|e| match e {
                        // Lost the race between the check and the insert
                        StorageError::Conflict => LinkError::AliasTaken,
                        other => other.into(),
                    })
            }
            None => {
                self.create_generated(&destination, owner_id, request.expires_at)
                    .await
            }
        }
    }

    async fn create_generated(
        &self,
        destination: &str,
        owner_id: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<Link, LinkError> {
        let mut remaining = self.generator.max_attempts();

        loop {
            let code = self
                .generator
                .draw_free(self.storage.as_ref(), self.code_length, &mut remaining)
                .await?;

            match self
                .storage
                .create_with_code(&code, destination, owner_id, expires_at)
                .await
            {
                Ok(link) => {
                    info!(short_code = %link.short_code, "created link");
                    return Ok(link);
                }
                Err(StorageError::Conflict) => {
                    warn!(short_code = %code, "generated code was taken concurrently, retrying");
                    if remaining == 0 {
                        return Err(LinkError::ExhaustedKeyspace(self.generator.max_attempts()));
                    }
                }
                Err(StorageError::Other(e)) => return Err(LinkError::Storage(e)),
            }
        }
    }

    /// Current state of a link, as a redirect would see it
    pub async fn get(&self, code: &str) -> Result<Link, LinkError> {
        self.storage
            .get_current(code)
            .await?
            .ok_or(LinkError::NotFound)
    }

    /// Deactivate a link; repeated calls succeed
    pub async fn deactivate(&self, code: &str) -> Result<(), LinkError> {
        if self.storage.deactivate(code).await? {
            info!(short_code = %code, "deactivated link");
            Ok(())
        } else {
            Err(LinkError::NotFound)
        }
    }

    /// Toggle `active` and/or change `expires_at`
    pub async fn update(&self, code: &str, request: UpdateLinkRequest) -> Result<Link, LinkError> {
        if !self.storage.exists(code).await? {
            return Err(LinkError::NotFound);
        }

        if let Some(expires_at) = request.expires_at {
            self.storage.update_expiry(code, expires_at).await?;
        }

        match request.active {
            Some(true) => {
                self.storage.reactivate(code).await?;
            }
            Some(false) => {
                self.storage.deactivate(code).await?;
            }
            None => {}
        }

        self.get(code).await
    }

    /// One page of links, newest first, plus the cursor for the next page
    pub async fn list(
        &self,
        owner_id: Option<&str>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<(Vec<Link>, Option<String>), LinkError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let after = match cursor {
            Some(raw) => Some(
                decode_cursor(raw, owner_id)
                    .map_err(|_| LinkError::InvalidCursor)?
                    .position(),
            ),
            None => None,
        };

        // One extra row tells whether another page exists
        let mut links = self.storage.list(owner_id, after, limit + 1).await?;
        let next_cursor = if links.len() as i64 > limit {
            links.truncate(limit as usize);
            links
                .last()
                .map(|last| {
                    encode_cursor(&ListCursor {
                        created_at: last.created_at,
                        id: last.id,
                        owner_id: owner_id.map(str::to_string),
                    })
                })
                .transpose()?
        } else {
            None
        };

        Ok((links, next_cursor))
    }

    pub async fn summary(&self) -> Result<LinkSummary, LinkError> {
        Ok(self.storage.summary(chrono::Utc::now().timestamp()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::init_cursor_hmac_key;
    use crate::storage::SqliteStorage;

    async fn setup() -> LinkService {
        init_cursor_hmac_key(Some("test-cursor-secret"));
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        LinkService::from_config(Arc::new(storage), &CodeConfig::default())
    }

    fn request(url: &str) -> CreateLinkRequest {
        CreateLinkRequest {
            destination_url: url.to_string(),
            alias: None,
            expires_at: None,
            owner_id: None,
        }
    }

    #[test]
    fn test_validate_destination() {
        assert_eq!(
            validate_destination("  https://example.com/very/long/path ").unwrap(),
            "https://example.com/very/long/path"
        );
        assert!(validate_destination("").is_err());
        assert!(validate_destination("example.com").is_err());
        assert!(validate_destination("ftp://example.com/file").is_err());
        assert!(validate_destination("javascript:alert(1)").is_err());
    }

    #[tokio::test]
    async fn test_create_generates_configured_length() {
        let service = setup().await;
        let link = service
            .create(request("https://example.com/very/long/path"))
            .await
            .unwrap();

        assert_eq!(link.short_code.len(), 6);
        assert_eq!(link.destination_url, "https://example.com/very/long/path");
        assert!(link.is_active);
    }

    #[tokio::test]
    async fn test_create_with_alias_conflicts() {
        let service = setup().await;
        let mut req = request("https://example.com");
        req.alias = Some("promo".to_string());
        service.create(req).await.unwrap();

        let mut again = request("https://example.org");
        again.alias = Some("promo".to_string());
        assert!(matches!(
            service.create(again).await,
            Err(LinkError::AliasTaken)
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_past_expiry() {
        let service = setup().await;
        let mut req = request("https://example.com");
        req.expires_at = Some(chrono::Utc::now().timestamp() - 1);
        assert!(matches!(
            service.create(req).await,
            Err(LinkError::InvalidExpiry(_))
        ));
    }

    #[tokio::test]
    async fn test_update_toggles_active_and_expiry() {
        let service = setup().await;
        let link = service.create(request("https://example.com")).await.unwrap();

        let updated = service
            .update(
                &link.short_code,
                UpdateLinkRequest {
                    active: Some(false),
                    expires_at: Some(Some(4_000_000_000)),
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.expires_at, Some(4_000_000_000));

        let cleared = service
            .update(
                &link.short_code,
                UpdateLinkRequest {
                    active: Some(true),
                    expires_at: Some(None),
                },
            )
            .await
            .unwrap();
        assert!(cleared.is_active);
        assert_eq!(cleared.expires_at, None);

        assert!(matches!(
            service.update("nope", UpdateLinkRequest::default()).await,
            Err(LinkError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_pages_through_owner_links() {
        let service = setup().await;
        for i in 0..5 {
            let mut req = request(&format!("https://example.com/{i}"));
            req.owner_id = Some("alice".to_string());
            service.create(req).await.unwrap();
        }
        service.create(request("https://example.com/other")).await.unwrap();

        let (first, cursor) = service.list(Some("alice"), None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let cursor = cursor.expect("more pages");

        let (second, cursor) = service
            .list(Some("alice"), Some(&cursor), 2)
            .await
            .unwrap();
        assert_eq!(second.len(), 2);

        let (third, cursor) = service
            .list(Some("alice"), cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(third.len(), 1);
        assert!(cursor.is_none());

        let mut codes: Vec<_> = first
            .iter()
            .chain(&second)
            .chain(&third)
            .map(|l| l.short_code.clone())
            .collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 5);

        let (all, _) = service.list(None, None, 50).await.unwrap();
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn test_list_rejects_foreign_cursor() {
        let service = setup().await;
        for i in 0..3 {
            let mut req = request(&format!("https://example.com/{i}"));
            req.owner_id = Some("alice".to_string());
            service.create(req).await.unwrap();
        }

        let (_, cursor) = service.list(Some("alice"), None, 1).await.unwrap();
        let cursor = cursor.unwrap();
        assert!(matches!(
            service.list(Some("bob"), Some(&cursor), 1).await,
            Err(LinkError::InvalidCursor)
        ));
    }
}
