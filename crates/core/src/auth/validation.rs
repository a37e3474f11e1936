use url::Url;

/// Query parameter added to the page URL when a redirect loop is detected.
pub const ERROR_QUERY_PARAM: &str = "error";

/// Value of [`ERROR_QUERY_PARAM`] for a detected redirect loop.
pub const REDIRECT_LOOP_ERROR: &str = "redirect_loop_detected";

/// Validates a return path to prevent open redirects.
///
/// Returns `Some(path)` if the value is a local path, `None` otherwise.
///
/// # Security
///
/// The callback page navigates to this value, so it must:
/// - Start with a single `/` (relative path)
/// - Not start with `//` (protocol-relative URLs like `//evil.com`)
/// - Not contain control characters
/// - Not contain `://` (absolute URLs like `https://`)
///
/// # Examples
///
/// ```
/// use tilshare_core::auth::validate_return_to;
///
/// assert_eq!(validate_return_to("/posts/42"), Some("/posts/42"));
/// assert_eq!(validate_return_to("/"), Some("/"));
/// assert_eq!(validate_return_to("//evil.com"), None);
/// assert_eq!(validate_return_to("https://evil.com"), None);
/// ```
pub fn validate_return_to(path: &str) -> Option<&str> {
    if !path.starts_with('/') {
        return None;
    }

    if path.starts_with("//") {
        return None;
    }

    if path.chars().any(|c| c.is_control()) {
        return None;
    }

    if path.contains("://") {
        return None;
    }

    Some(path)
}

/// Returns `url` with the redirect loop marker in its query string.
///
/// An existing `error` parameter is replaced; other parameters are kept.
pub fn annotate_redirect_loop(url: &Url) -> Url {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != ERROR_QUERY_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut annotated = url.clone();
    annotated.set_query(None);
    {
        let mut query = annotated.query_pairs_mut();
        for (key, value) in &retained {
            query.append_pair(key, value);
        }
        query.append_pair(ERROR_QUERY_PARAM, REDIRECT_LOOP_ERROR);
    }
    annotated
}
