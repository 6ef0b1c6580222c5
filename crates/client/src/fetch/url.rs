//! URL canonicalization for host-supplied inputs.

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("relative URL without a base: {0}")]
    RelativeWithoutBase(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize a URL string so equal resources produce equal cache keys.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Resolve paths (`/x`, `x`) against `base`; bare hosts default to https
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str, base: Option<&url::Url>) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = if trimmed.contains("://") {
        url::Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?
    } else if let Some(base) = base {
        base.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?
    } else if trimmed.starts_with('/') {
        return Err(UrlError::RelativeWithoutBase(trimmed.to_string()));
    } else {
        url::Url::parse(&format!("https://{trimmed}")).map_err(|e| UrlError::InvalidUrl(e.to_string()))?
    };

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str().map(str::to_lowercase) {
        parsed.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}
