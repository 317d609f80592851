//! Pure rewrite rules between the client-facing namespace and the backend.
//!
//! Every function here is stateless; callers pass the configuration values
//! they need.

use crate::server::token::TOKEN_PATH;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use std::borrow::Cow;

/// Path of the API-version probe, answered locally
pub const API_VERSION_PATH: &str = "/v2/";

/// Rewrite `/v2/<rest>` into `/v2/<repo_prefix>/<rest>`.
///
/// The leading `/v2/` is replaced exactly once, anchored at the start. The
/// probe path `/v2/` and paths outside the registry API are returned as-is.
pub fn rewrite_registry_path<'a>(path: &'a str, repo_prefix: &str) -> Cow<'a, str> {
    if path == API_VERSION_PATH {
        return Cow::Borrowed(path);
    }
    match path.strip_prefix(API_VERSION_PATH) {
        Some(rest) => Cow::Owned(format!("{}{}/{}", API_VERSION_PATH, repo_prefix, rest)),
        None => Cow::Borrowed(path),
    }
}

/// Find the first `realm="..."` value in a `WWW-Authenticate` challenge.
///
/// Returns the byte range of the value (without quotes).
fn realm_span(challenge: &str) -> Option<(usize, usize)> {
    const REALM: &str = "realm=\"";
    let start = challenge.find(REALM)? + REALM.len();
    let len = challenge[start..].find('"')?;
    Some((start, start + len))
}

/// Extract the realm (token endpoint URL) advertised by a challenge
pub fn extract_realm(challenge: &str) -> Option<&str> {
    realm_span(challenge).map(|(start, end)| &challenge[start..end])
}

/// Point the challenge's realm at this proxy's token route under `client_host`.
///
/// Returns `None` when the challenge carries no realm.
pub fn rewrite_challenge_realm(challenge: &str, client_host: &str) -> Option<String> {
    let (start, end) = realm_span(challenge)?;
    Some(format!(
        "{}https://{}{}{}",
        &challenge[..start],
        client_host,
        TOKEN_PATH,
        &challenge[end..]
    ))
}

/// Route an absolute redirect to the object-storage origin through `/storage/`.
///
/// `https://<storage_host>/bucket/obj` becomes `https://<client_host>/storage/bucket/obj`.
pub fn rewrite_blob_location(
    location: &str,
    storage_host: &str,
    client_host: &str,
) -> Option<String> {
    let without_scheme = location
        .strip_prefix("https://")
        .or_else(|| location.strip_prefix("http://"))?;
    let rest = without_scheme.strip_prefix(storage_host)?;
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
        // A different host that merely shares the prefix
        return None;
    }
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    Some(format!("https://{}/storage/{}", client_host, rest))
}

/// Resolve a host-relative `Location` (`/download/x`) against `scheme://host`.
///
/// Protocol-relative (`//host/x`) and absolute locations are left alone.
pub fn absolutize_location(location: &str, scheme: &str, host: &str) -> Option<String> {
    if location.starts_with('/') && !location.starts_with("//") {
        Some(format!("{}://{}{}", scheme, host, location))
    } else {
        None
    }
}

/// Values the response rewrites depend on for a single proxied request
#[derive(Debug, Clone, Copy)]
pub struct ResponseRewrite<'a> {
    /// Method of the inbound request
    pub method: &'a Method,
    /// Client-facing host captured at ingress
    pub client_host: &'a str,
    /// Object-storage origin serving blob downloads
    pub storage_host: &'a str,
    /// Scheme of the outbound request
    pub upstream_scheme: &'a str,
    /// Host of the outbound request
    pub upstream_host: &'a str,
}

impl ResponseRewrite<'_> {
    /// Apply the `Location` and `WWW-Authenticate` rewrites in place.
    ///
    /// Each rewrite is a no-op when its triggering status, method or header is
    /// absent.
    pub fn apply(&self, status: StatusCode, headers: &mut HeaderMap) {
        if let Some(location) = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            let rewritten = if status.is_redirection() {
                rewrite_blob_location(&location, self.storage_host, self.client_host)
            } else {
                None
            };
            let rewritten = rewritten.or_else(|| {
                if status == StatusCode::FOUND && self.method == Method::GET {
                    absolutize_location(&location, self.upstream_scheme, self.upstream_host)
                } else {
                    None
                }
            });

            if let Some(rewritten) = rewritten {
                tracing::debug!("Rewrote Location {} into {}", location, rewritten);
                if let Ok(value) = HeaderValue::from_str(&rewritten) {
                    headers.insert(header::LOCATION, value);
                }
            }
        }

        if headers.contains_key(header::WWW_AUTHENTICATE) {
            let challenges: Vec<HeaderValue> = headers
                .get_all(header::WWW_AUTHENTICATE)
                .iter()
                .map(|value| {
                    value
                        .to_str()
                        .ok()
                        .and_then(|challenge| {
                            rewrite_challenge_realm(challenge, self.client_host)
                        })
                        .and_then(|rewritten| HeaderValue::from_str(&rewritten).ok())
                        .unwrap_or_else(|| value.clone())
                })
                .collect();

            headers.remove(header::WWW_AUTHENTICATE);
            for challenge in challenges {
                headers.append(header::WWW_AUTHENTICATE, challenge);
            }
        }
    }
}
