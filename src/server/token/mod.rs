pub mod discovery;
pub mod handlers;
pub mod routes;

pub use discovery::discover_token_endpoint;

use std::borrow::Cow;
use url::Url;

/// Fixed path of the token route advertised in rewritten challenges
pub const TOKEN_PATH: &str = "/_token";

const REPOSITORY_SCOPE: &str = "repository:";

/// Insert the repository prefix into a `repository:<name>:<actions>` scope.
///
/// Scopes of any other shape are returned unchanged. Only a single resource
/// scope is understood; a space-separated list has just its first entry
/// rewritten.
pub fn rewrite_scope(scope: &str, repo_prefix: &str) -> Option<String> {
    let rest = scope.strip_prefix(REPOSITORY_SCOPE)?;
    let (name, actions) = rest.split_once(':')?;
    if name.is_empty() || actions.is_empty() {
        return None;
    }
    Some(format!("{}{}/{}", REPOSITORY_SCOPE, repo_prefix, rest))
}

/// Rewrite the `scope` parameter of a token request query.
///
/// The query is re-encoded only when the scope actually changes; otherwise it
/// is passed through byte for byte.
pub fn rewrite_token_query<'a>(query: &'a str, repo_prefix: &str) -> Cow<'a, str> {
    let mut changed = false;
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| {
            if key == "scope" && !changed {
                if let Some(scope) = rewrite_scope(&value, repo_prefix) {
                    changed = true;
                    return (key.into_owned(), scope);
                }
            }
            (key.into_owned(), value.into_owned())
        })
        .collect();

    if !changed {
        return Cow::Borrowed(query);
    }

    Cow::Owned(
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish(),
    )
}

/// Target URL of a forwarded token request.
///
/// Query parameters already present in the realm come first, followed by the
/// client's own with the scope rewritten.
pub fn token_request_url(endpoint: &Url, query: Option<&str>, repo_prefix: &str) -> Url {
    let mut url = endpoint.clone();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        let query = rewrite_token_query(query, repo_prefix);
        let merged = match endpoint.query() {
            Some(own) if !own.is_empty() => format!("{}&{}", own, query),
            _ => query.into_owned(),
        };
        url.set_query(Some(&merged));
    }
    url
}
