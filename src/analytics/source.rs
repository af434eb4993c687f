//! Derive click source metadata from request headers

use axum::http::header::{HeaderMap, REFERER, USER_AGENT};

use crate::analytics::models::{SourceMetadata, UserAgentClass};

const MAX_REFERRER_LEN: usize = 512;

/// Headers set by CDNs / proxies carrying the client's country
const COUNTRY_HEADERS: &[&str] = &["cf-ipcountry", "x-country-code", "cloudfront-viewer-country"];

const BOT_MARKERS: &[&str] = &[
    "bot", "crawl", "spider", "slurp", "curl/", "wget/", "python-requests", "httpclient",
    "headless", "facebookexternalhit", "preview",
];

const MOBILE_MARKERS: &[&str] = &["mobile", "android", "iphone", "ipad", "ipod", "windows phone"];

pub fn extract_source(headers: &HeaderMap) -> SourceMetadata {
    SourceMetadata {
        referrer: extract_referrer(headers),
        country: extract_country(headers),
        user_agent_class: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(classify_user_agent)
            .unwrap_or_default(),
    }
}

fn extract_referrer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(REFERER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    let mut end = raw.len().min(MAX_REFERRER_LEN);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    Some(raw[..end].to_string())
}

fn extract_country(headers: &HeaderMap) -> Option<String> {
    COUNTRY_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_uppercase())
        // XX = unknown, T1 = Tor (Cloudflare)
        .find(|code| {
            code.len() == 2
                && code.bytes().all(|b| b.is_ascii_uppercase())
                && code != "XX"
        })
}

pub fn classify_user_agent(user_agent: &str) -> UserAgentClass {
    let ua = user_agent.to_ascii_lowercase();
    if ua.trim().is_empty() {
        return UserAgentClass::Unknown;
    }

    if BOT_MARKERS.iter().any(|m| ua.contains(m)) {
        UserAgentClass::Bot
    } else if MOBILE_MARKERS.iter().any(|m| ua.contains(m)) {
        UserAgentClass::Mobile
    } else if ua.starts_with("mozilla/") || ua.starts_with("opera/") {
        UserAgentClass::Desktop
    } else {
        UserAgentClass::Unknown
    }
}
