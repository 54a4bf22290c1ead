//! Serialized form of a cached HTTP response.

use std::collections::BTreeMap;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Headers that describe a single transfer and must not be replayed.
const UNCACHED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "date",
    "keep-alive",
    "set-cookie",
    "transfer-encoding",
    "x-cache",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub content_type: String,
    #[serde(with = "base64_body")]
    pub body: Bytes,
    pub headers: BTreeMap<String, Vec<String>>,
}

impl CacheEntry {
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut stored: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            if UNCACHED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                stored
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        Self {
            status: status.as_u16(),
            content_type,
            body,
            headers: stored,
        }
    }

    /// Rebuild a response carrying the stored status, headers and body.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = response.headers_mut();
        for (name, values) in self.headers {
            let Ok(name) = HeaderName::try_from(name.as_str()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        if !self.content_type.is_empty()
            && let Ok(value) = HeaderValue::from_str(&self.content_type)
        {
            headers.insert(header::CONTENT_TYPE, value);
        }

        response
    }
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_skips_transfer_headers_and_keeps_repeats() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("2"));
        headers.insert("x-cache", HeaderValue::from_static("MISS"));
        headers.append(header::VARY, HeaderValue::from_static("accept"));
        headers.append(header::VARY, HeaderValue::from_static("x-user-id"));

        let entry = CacheEntry::capture(StatusCode::OK, &headers, Bytes::from_static(b"[]"));

        assert_eq!(entry.content_type, "application/json");
        assert!(!entry.headers.contains_key("content-length"));
        assert!(!entry.headers.contains_key("x-cache"));
        assert_eq!(entry.headers["vary"], vec!["accept", "x-user-id"]);
    }

    #[test]
    fn wire_format_encodes_body_as_base64() {
        let entry = CacheEntry {
            status: 200,
            content_type: "text/plain".to_string(),
            body: Bytes::from_static(b"hi"),
            headers: BTreeMap::new(),
        };
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["body"], "aGk=");
        assert_eq!(json["content_type"], "text/plain");

        let decoded: CacheEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn replay_restores_status_and_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("etag".to_string(), vec!["\"v1\"".to_string()]);
        let entry = CacheEntry {
            status: 203,
            content_type: "application/json".to_string(),
            body: Bytes::from_static(b"{}"),
            headers,
        };

        let response = entry.into_response();
        assert_eq!(response.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
        assert_eq!(response.headers()["etag"], "\"v1\"");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }
}
