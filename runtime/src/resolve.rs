//! Docker-compatible reference resolution for images.
//!
//! Resolution order: exact repo:tag label -> ID prefix (full id, or the
//! hex digest without its `algorithm:` prefix). Tags win over IDs, the same
//! way `docker run coff33` picks an image tagged `coff33` over one whose ID
//! starts with `coff33`. Among several ID-prefix matches the first one in
//! store enumeration order wins.

use didiff_core::error::{PatchError, Result};

use crate::store::{ImageIdentity, ImageStoreClient};

/// Resolves references against one store, one enumeration per call.
#[derive(Debug, Clone, Copy)]
pub struct ImageResolver {
    min_prefix_len: usize,
}

impl Default for ImageResolver {
    fn default() -> Self {
        Self { min_prefix_len: 1 }
    }
}

impl ImageResolver {
    pub fn new(min_prefix_len: usize) -> Self {
        Self {
            min_prefix_len: min_prefix_len.max(1),
        }
    }

    /// Resolve a reference to a single image identity.
    pub async fn resolve(
        &self,
        store: &dyn ImageStoreClient,
        query: &str,
    ) -> Result<ImageIdentity> {
        let query = checked_query(query)?;
        tracing::debug!(query, store = store.name(), "Lookup image");

        let images = store.list().await?;
        resolve_in(&images, query, self.min_prefix_len).cloned()
    }
}

fn checked_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(PatchError::InvalidInput(
            "Image reference must not be empty".to_string(),
        ));
    }
    Ok(query)
}

/// Resolve `query` against an already enumerated list of images.
pub fn resolve_in<'a>(
    images: &'a [ImageIdentity],
    query: &str,
    min_prefix_len: usize,
) -> Result<&'a ImageIdentity> {
    let query = checked_query(query)?;

    // 1. Exact tag
    if let Some(img) = images
        .iter()
        .find(|img| img.repo_tags.iter().any(|tag| tag == query))
    {
        tracing::debug!(id = %img.id, tag = query, "Lookup image tag match");
        return Ok(img);
    }

    // 2. ID prefix
    if min_prefix_len > 1 && !images.iter().any(|img| img.id == query) {
        if let Some(hex) = id_prefix_hex(query) {
            if hex.len() < min_prefix_len {
                return Err(PatchError::InvalidInput(format!(
                    "Image ID prefix \"{query}\" is shorter than {min_prefix_len} characters"
                )));
            }
        }
    }

    let mut matches = images.iter().filter(|img| id_matches(img, query));
    let first = matches
        .next()
        .ok_or_else(|| PatchError::NotFound(query.to_string()))?;

    let others = matches.count();
    if others > 0 {
        tracing::warn!(
            query,
            matches = others + 1,
            chosen = %first.id,
            "Ambiguous image ID prefix, using first match"
        );
    }
    tracing::debug!(id = %first.id, "Lookup image ID match");
    Ok(first)
}

/// Digest algorithms whose `algorithm:` prefix may lead an ID query.
const DIGEST_ALGORITHMS: [&str; 3] = ["sha256", "sha384", "sha512"];

/// Hex part of a query shaped like an ID (`<hex>` or `<algorithm>:<hex>`).
///
/// Anything else, such as `demo:2`, is a repo:tag and has no hex part.
fn id_prefix_hex(query: &str) -> Option<&str> {
    let hex = match query.split_once(':') {
        Some((algorithm, hex)) if DIGEST_ALGORITHMS.contains(&algorithm) => hex,
        Some(_) => return None,
        None => query,
    };
    hex.chars().all(|c| c.is_ascii_hexdigit()).then_some(hex)
}

fn id_matches(img: &ImageIdentity, query: &str) -> bool {
    match img.id.split_once(':') {
        Some((_, without_prefix)) => {
            img.id.starts_with(query) || without_prefix.starts_with(query)
        }
        None => img.id.starts_with(query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;

    fn image(id: &str, tags: &[&str]) -> ImageIdentity {
        ImageIdentity {
            id: id.to_string(),
            repo_tags: tags.iter().map(|t| t.to_string()).collect(),
            size_bytes: 0,
            created: Utc::now(),
        }
    }

    fn demo_images() -> Vec<ImageIdentity> {
        vec![
            image(&format!("sha256:{}", "a".repeat(64)), &["demo:1.0"]),
            image(&format!("sha256:{}", "b".repeat(64)), &["demo:2.0"]),
        ]
    }

    #[test]
    fn test_resolve_by_tag() {
        let images = demo_images();
        let result = resolve_in(&images, "demo:1.0", 1).unwrap();
        assert_eq!(result.id, images[0].id);
    }

    #[test]
    fn test_resolve_by_short_id() {
        let images = demo_images();
        let result = resolve_in(&images, &"b".repeat(12), 1).unwrap();
        assert_eq!(result.id, images[1].id);
    }

    #[test]
    fn test_resolve_by_full_id() {
        let images = demo_images();
        let result = resolve_in(&images, &images[1].id, 1).unwrap();
        assert_eq!(result.repo_tags, vec!["demo:2.0"]);
    }

    #[test]
    fn test_resolve_by_prefixed_short_id() {
        let images = demo_images();
        let result = resolve_in(&images, "sha256:aaaa", 1).unwrap();
        assert_eq!(result.id, images[0].id);
    }

    #[test]
    fn test_resolve_not_found() {
        let images = demo_images();
        let err = resolve_in(&images, "demo:3.0", 1).unwrap_err();
        assert!(matches!(err, PatchError::NotFound(ref q) if q == "demo:3.0"));
    }

    #[test]
    fn test_resolve_empty_store() {
        let err = resolve_in(&[], "anything", 1).unwrap_err();
        assert!(matches!(err, PatchError::NotFound(_)));
    }

    #[test]
    fn test_resolve_empty_query() {
        let images = demo_images();
        let err = resolve_in(&images, "  ", 1).unwrap_err();
        assert!(matches!(err, PatchError::InvalidInput(_)));
    }

    #[test]
    fn test_tag_takes_priority_over_id_prefix() {
        // The tag "sha256:cafe" is literally a prefix of the first image's ID
        let images = vec![
            image(&format!("sha256:cafe{}", "0".repeat(60)), &["demo:1.0"]),
            image(&format!("sha256:{}", "1".repeat(64)), &["sha256:cafe"]),
        ];
        let result = resolve_in(&images, "sha256:cafe", 1).unwrap();
        assert_eq!(result.id, images[1].id);
    }

    #[test]
    fn test_bare_tag_takes_priority_over_id_prefix() {
        let images = vec![
            image(&format!("sha256:c0ffee{}", "a".repeat(58)), &["awesome"]),
            image(&format!("sha256:{}", "d".repeat(64)), &["c0ffee"]),
        ];
        let result = resolve_in(&images, "c0ffee", 1).unwrap();
        assert_eq!(result.id, images[1].id);
    }

    #[test]
    fn test_ambiguous_prefix_takes_first() {
        let images = vec![
            image("sha256:abc111", &[]),
            image("sha256:abc222", &[]),
        ];
        let result = resolve_in(&images, "abc", 1).unwrap();
        assert_eq!(result.id, "sha256:abc111");
    }

    #[test]
    fn test_id_without_algorithm() {
        let images = vec![image("deadbeef", &[])];
        let result = resolve_in(&images, "dead", 1).unwrap();
        assert_eq!(result.id, "deadbeef");
    }

    #[test]
    fn test_single_character_prefix_matches_by_default() {
        let images = demo_images();
        let result = resolve_in(&images, "b", 1).unwrap();
        assert_eq!(result.id, images[1].id);
    }

    #[test]
    fn test_min_prefix_len_rejects_short_prefix() {
        let images = demo_images();
        let err = resolve_in(&images, "bbb", 12).unwrap_err();
        assert!(matches!(err, PatchError::InvalidInput(_)));
        assert!(resolve_in(&images, &"b".repeat(12), 12).is_ok());
        // Tags are never subject to the minimum
        assert!(resolve_in(&images, "demo:2.0", 64).is_ok());
        // Nor are full IDs
        assert!(resolve_in(&images, &images[0].id, 100).is_ok());
        // Unknown tags are still reported as not found
        let err = resolve_in(&images, "demo:3.0", 12).unwrap_err();
        assert!(matches!(err, PatchError::NotFound(_)));
    }

    #[test]
    fn test_min_prefix_len_ignores_tags_with_short_suffix() {
        let images = demo_images();
        for query in ["demo:2", "app:1", "cafe:beef"] {
            let err = resolve_in(&images, query, 12).unwrap_err();
            assert!(
                matches!(err, PatchError::NotFound(ref q) if q == query),
                "{query} gave {err:?}"
            );
        }
        let err = resolve_in(&images, "sha256:bbb", 12).unwrap_err();
        assert!(matches!(err, PatchError::InvalidInput(_)));
    }

    #[test]
    fn test_bare_algorithm_prefix_matches_first() {
        let images = demo_images();
        let result = resolve_in(&images, "sha256:", 1).unwrap();
        assert_eq!(result.id, images[0].id);
    }

    #[test]
    fn test_id_prefix_hex() {
        assert_eq!(id_prefix_hex("abc123"), Some("abc123"));
        assert_eq!(id_prefix_hex("sha256:abc"), Some("abc"));
        assert_eq!(id_prefix_hex("sha256:"), Some(""));
        assert_eq!(id_prefix_hex("demo:2"), None);
        assert_eq!(id_prefix_hex("cafe:beef"), None);
        assert_eq!(id_prefix_hex("nginx"), None);
    }

    #[tokio::test]
    async fn test_resolver_lists_once() {
        let store = MemoryStore::new()
            .with_image(b"first", &["demo:1.0"])
            .with_image(b"second", &["demo:2.0"]);
        let resolver = ImageResolver::default();

        let result = resolver.resolve(&store, "demo:2.0").await.unwrap();
        assert_eq!(result.size_bytes, 6);
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolver_propagates_store_error() {
        let store = MemoryStore::new().failing(didiff_core::error::StoreOp::List);
        let err = ImageResolver::default()
            .resolve(&store, "demo:1.0")
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::Store { .. }));
    }
}
