use axum::{
    extract::{Path, State},
    http::{
        header::{HeaderMap, HeaderValue, CACHE_CONTROL, LOCATION},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;

use super::middleware::RequestStart;
use super::resolver::Resolver;
use crate::analytics::extract_source;
use crate::api::api_error;
use crate::config::RedirectMode;
use crate::links::LinkError;

pub struct RedirectState {
    pub resolver: Arc<Resolver>,
    pub redirect_status: RedirectMode,
}

/// Redirect to the destination of an active, unexpired link
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    Extension(RequestStart(request_start)): Extension<RequestStart>,
    headers: HeaderMap,
) -> Response {
    let source = extract_source(&headers);

    let resolution = match state.resolver.resolve(&code, source).await {
        Ok(resolution) => resolution,
        Err(err) => return failure_response(&code, err),
    };

    let Some(location) = location_header(&resolution.destination_url) else {
        tracing::error!(short_code = %code, "destination cannot be sent as a Location header");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(LOCATION, location);
    // Redirects must reach the resolver to be counted
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response_headers.insert(
        "x-hopper-timing-total-ms",
        HeaderValue::from(request_start.elapsed().as_millis() as u64),
    );

    (state.redirect_status.status_code(), response_headers).into_response()
}

fn failure_response(code: &str, err: LinkError) -> Response {
    if matches!(err, LinkError::NotFound | LinkError::Expired | LinkError::Inactive) {
        tracing::debug!(short_code = %code, reason = %err, "short code not resolved");
    }
    api_error(err).into_response()
}

/// Destinations are stored as submitted; fall back to the percent-encoded
/// form when the raw text is not a valid header value.
fn location_header(destination: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(destination).ok().or_else(|| {
        url::Url::parse(destination)
            .ok()
            .and_then(|parsed| HeaderValue::from_str(parsed.as_str()).ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_header_percent_encodes_when_needed() {
        assert_eq!(
            location_header("https://example.com/a?b=c").unwrap(),
            "https://example.com/a?b=c"
        );
        let encoded = location_header("https://example.com/caf\u{e9}\n").unwrap();
        assert!(encoded.to_str().unwrap().starts_with("https://example.com/caf%C3%A9"));
    }
}
