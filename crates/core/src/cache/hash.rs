//! Normalized request identity used as the store key.

use sha2::{Digest, Sha256};
use url::Url;

/// Compute the store key for a request: method plus URL without fragment.
pub fn compute_request_key(method: &str, url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_hash_stability() {
        let hash1 = compute_request_key("GET", &url("https://example.com/shell.js"));
        let hash2 = compute_request_key("GET", &url("https://example.com/shell.js"));
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_method_case_insensitive() {
        let upper = compute_request_key("GET", &url("https://example.com/"));
        let lower = compute_request_key("get", &url("https://example.com/"));
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_hash_different_query() {
        let a = compute_request_key("GET", &url("https://example.com/api?a=1"));
        let b = compute_request_key("GET", &url("https://example.com/api?a=2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_format() {
        let hash = compute_request_key("GET", &url("https://example.com"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
