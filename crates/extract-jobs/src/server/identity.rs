//! Caller identity resolution

use axum::http::{header, HeaderMap};

/// Admission key shared by callers that present no identity
pub const ANONYMOUS: &str = "anonymous";

/// Resolve the caller from the identity header, falling back to a bearer token prefix
pub fn caller_identity(headers: &HeaderMap, identity_header: &str) -> Option<String> {
    let from_header = headers
        .get(identity_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let prefix: String = token.chars().take(16).collect();
            format!("token:{}", prefix)
        })
}
