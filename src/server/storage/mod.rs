pub mod handlers;
pub mod routes;

/// Local prefix under which blob downloads are served
pub const STORAGE_PREFIX: &str = "/storage";

/// Map a `/storage/<rest>` path onto the storage origin's `/<rest>`
pub fn storage_path(path: &str) -> &str {
    match path.strip_prefix(STORAGE_PREFIX) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => "/",
    }
}
