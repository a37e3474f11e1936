//! HTML for the auth callback page.

use tilshare_core::auth::AUTH_COMPLETE_KEY;

/// Message type posted to the opener window once sign-in completes.
pub const AUTH_COMPLETE_MESSAGE: &str = "tilshare:auth-complete";

/// Escape HTML special characters to prevent XSS.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Generate the page the identity provider returns to.
///
/// The page marks the attempt complete in session storage, then either hands
/// control back to the window that opened the popup or navigates to
/// `return_to`. Values are passed through `data-` attributes so the script
/// never interpolates user input.
pub fn callback_page(return_to: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8" />
    <title>Signing you in...</title>
</head>
<body data-return-to="{return_to}" data-flag-key="{flag_key}" data-message="{message}">
    <p>Finishing sign-in...</p>
    <noscript>
        <p>JavaScript is disabled. <a href="{return_to}">Continue</a></p>
    </noscript>
    <script>
        (function () {{
            var data = document.body.dataset;
            try {{
                window.sessionStorage.setItem(data.flagKey, "true");
            }} catch (e) {{
                // Session storage unavailable; the app reconciles without the marker.
            }}
            if (window.opener && !window.opener.closed) {{
                window.opener.postMessage({{ type: data.message }}, window.location.origin);
                window.close();
            }} else {{
                window.location.replace(data.returnTo);
            }}
        }})();
    </script>
</body>
</html>"#,
        return_to = html_escape(return_to),
        flag_key = html_escape(AUTH_COMPLETE_KEY),
        message = html_escape(AUTH_COMPLETE_MESSAGE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_sets_completion_flag() {
        let html = callback_page("/");
        assert!(html.contains(r#"data-flag-key="authComplete""#));
        assert!(html.contains("sessionStorage.setItem(data.flagKey"));
    }

    #[test]
    fn test_page_posts_to_opener() {
        let html = callback_page("/");
        assert!(html.contains(r#"data-message="tilshare:auth-complete""#));
        assert!(html.contains("window.opener.postMessage"));
    }

    #[test]
    fn test_return_to_is_escaped() {
        let html = callback_page(r#"/feed?q="><script>alert(1)</script>"#);
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&quot;&gt;&lt;script&gt;"));
    }
}
