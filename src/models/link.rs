use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored short link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub destination_url: String,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds; the link resolves as expired once `now > expires_at`
    pub expires_at: Option<i64>,
    pub owner_id: Option<String>,
    pub is_active: bool,
}

impl Link {
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    #[serde(rename = "destinationURL", alias = "destination_url", alias = "url")]
    pub destination_url: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default, rename = "expiresAt", alias = "expires_at")]
    pub expires_at: Option<i64>,
    #[serde(default, rename = "ownerId", alias = "owner_id")]
    pub owner_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateLinkRequest {
    #[serde(default)]
    pub active: Option<bool>,
    /// `Some(None)` clears the expiry, absence leaves it untouched
    #[serde(
        default,
        rename = "expiresAt",
        alias = "expires_at",
        deserialize_with = "deserialize_some"
    )]
    pub expires_at: Option<Option<i64>>,
}

fn deserialize_some<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

/// Link as returned by the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct LinkResponse {
    pub code: String,
    #[serde(rename = "shortURL")]
    pub short_url: String,
    #[serde(rename = "destinationURL")]
    pub destination_url: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<i64>,
    #[serde(rename = "ownerId")]
    pub owner_id: Option<String>,
    pub active: bool,
}

impl LinkResponse {
    pub fn from_link(link: Link, base_url: &str) -> Self {
        Self {
            short_url: format!("{}/{}", base_url.trim_end_matches('/'), link.short_code),
            code: link.short_code,
            destination_url: link.destination_url,
            created_at: link.created_at,
            expires_at: link.expires_at,
            owner_id: link.owner_id,
            active: link.is_active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkListResponse {
    pub links: Vec<LinkResponse>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Totals backing the dashboard cards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, FromRow)]
pub struct LinkSummary {
    #[serde(rename = "totalLinks")]
    pub total_links: i64,
    #[serde(rename = "activeLinks")]
    pub active_links: i64,
    #[serde(rename = "totalClicks")]
    pub total_clicks: i64,
}
